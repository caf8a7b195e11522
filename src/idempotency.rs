use crate::models::ImportResponse;
use redis::AsyncCommands;

const KEY_PREFIX: &str = "import:idem:";

fn namespaced(key: &str) -> String {
    format!("{KEY_PREFIX}{key}")
}

pub fn ttl_from_env() -> u64 {
    std::env::var("IDEMPOTENCY_TTL_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(3600)
}

pub async fn redis_get(client: &redis::Client, key: &str) -> Option<ImportResponse> {
    let mut conn = match client.get_multiplexed_async_connection().await {
        Ok(c) => c,
        Err(_) => return None,
    };
    let s: Option<String> = conn.get(namespaced(key)).await.ok();
    s.and_then(|v| serde_json::from_str(&v).ok())
}

pub async fn redis_set(client: &redis::Client, key: &str, value: &ImportResponse, ttl_secs: u64) {
    if let Ok(mut conn) = client.get_multiplexed_async_connection().await
        && let Ok(json) = serde_json::to_string(value)
    {
        let _: Result<(), _> = conn.set_ex(namespaced(key), json, ttl_secs).await;
    }
}

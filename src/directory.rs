use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
    Dealer,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    #[default]
    Active,
    Suspended,
    Deleted,
}

/// One notification recipient from the user-store capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    #[serde(default)]
    pub status: AccountStatus,
}

/// Narrow view of the user store: list active accounts by role. The import
/// pipeline loads this once per batch and treats the result as a fixed
/// snapshot.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn list_active(&self, roles: &[Role]) -> Vec<Recipient>;
}

/// Directory backed by a fixed user list, optionally loaded from the JSON
/// file named by `RECIPIENTS_FILE`.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    users: Vec<Recipient>,
}

impl StaticDirectory {
    pub fn new(users: Vec<Recipient>) -> Self {
        Self { users }
    }

    pub fn from_env() -> Self {
        let Some(path) = std::env::var("RECIPIENTS_FILE").ok() else {
            return Self::default();
        };
        match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Vec<Recipient>>(&raw) {
                Ok(users) => Self::new(users),
                Err(err) => {
                    warn!(
                        target = "autolist.api",
                        path = %path,
                        error = %err,
                        "recipients_file_unreadable",
                    );
                    Self::default()
                }
            },
            Err(err) => {
                warn!(
                    target = "autolist.api",
                    path = %path,
                    error = %err,
                    "recipients_file_unreadable",
                );
                Self::default()
            }
        }
    }
}

#[async_trait]
impl RecipientDirectory for StaticDirectory {
    async fn list_active(&self, roles: &[Role]) -> Vec<Recipient> {
        self.users
            .iter()
            .filter(|user| user.status == AccountStatus::Active && roles.contains(&user.role))
            .cloned()
            .collect()
    }
}

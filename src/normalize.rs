use crate::models::{
    Condition, ListingFragment, ListingStatus, Location, Provenance, SourceType, Specs,
};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

/// Why a raw record was dropped from the batch. Malformed input is a normal,
/// expected outcome here, never a panic or an HTTP error.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum RejectReason {
    #[error("missing_title")]
    MissingTitle,
    #[error("invalid_price")]
    InvalidPrice,
    #[error("no_valid_image")]
    NoValidImage,
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingTitle => "missing_title",
            Self::InvalidPrice => "invalid_price",
            Self::NoValidImage => "no_valid_image",
        }
    }
}

/// A validated record: the fragment the upsert writes, plus the primary image
/// URL which is applied as a separate second write.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub fragment: ListingFragment,
    pub image_url: Option<String>,
}

static LEADING_SYMBOLS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[!@#$%^*()]+").expect("leading symbol pattern"));

/// Turn one arbitrary scraped record into a typed fragment, or reject it.
/// Pure over the input and the supplied wall clock.
pub fn normalize_record(raw: &Value, now: DateTime<Utc>) -> Result<NormalizedRecord, RejectReason> {
    let raw_title = first_text(raw, &["title", "name"]).unwrap_or_default();
    let title = LEADING_SYMBOLS.replace(raw_title.trim(), "").trim().to_string();
    if title.is_empty() {
        return Err(RejectReason::MissingTitle);
    }

    let price = match defined(raw, &["price_numeric", "price"]) {
        Some(value) => coerce_number(value),
        None => f64::NAN,
    };
    if !price.is_finite() {
        return Err(RejectReason::InvalidPrice);
    }

    let image_url = extract_image(raw).ok_or(RejectReason::NoValidImage)?;

    let make = first_text(raw, &["make", "brand"]).unwrap_or_default();
    let fragment = ListingFragment {
        vin: truthy_text(raw.get("vin")).map(|v| v.trim().to_string()),
        title,
        make,
        model: first_text(raw, &["model"]).unwrap_or_default(),
        brand: first_text(raw, &["brand"]).unwrap_or_default(),
        trim: first_text(raw, &["trim", "vehicleTrim"]).unwrap_or_default(),
        year: numeric_pair(raw, "year", "year_numeric").map(|v| v as i32),
        price,
        currency: first_text(raw, &["currency"]).unwrap_or_else(|| "EUR".to_string()),
        mileage: numeric_pair(raw, "mileage", "mileage_numeric"),
        condition: truthy_text(raw.get("condition")).and_then(|v| Condition::from_raw(&v)),
        fuel_type: truthy_text(raw.get("fuelType")),
        transmission: truthy_text(raw.get("transmission")),
        body_type: truthy_text(raw.get("bodyType")),
        drive_type: truthy_text(raw.get("driveType")),
        color: truthy_text(raw.get("color")),
        features: extract_features(raw.get("features")),
        specs: raw
            .get("specs")
            .cloned()
            .and_then(|v| serde_json::from_value::<Specs>(v).ok())
            .unwrap_or_default(),
        description: first_text(raw, &["description", "raw_text"]).unwrap_or_default(),
        status: truthy_text(raw.get("status"))
            .and_then(|v| ListingStatus::from_param(&v))
            .unwrap_or_default(),
        source: Provenance {
            kind: SourceType::Scraped,
            source_id: first_text(raw, &["sourceId", "url"]),
            imported_at: now,
        },
        location: Location {
            city: first_text(raw, &["city"]).unwrap_or_default(),
            country: first_text(raw, &["country"]).unwrap_or_default(),
        },
        ai: raw.get("ai").filter(|v| !v.is_null()).cloned(),
    };

    Ok(NormalizedRecord {
        fragment,
        image_url: Some(image_url),
    })
}

/// First of `images[0]`, `image_url`, `imageUrl` that holds a truthy value;
/// kept only when it is a string forming a valid absolute http(s) URL.
fn extract_image(raw: &Value) -> Option<String> {
    let candidate = raw
        .get("images")
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
        .filter(|v| is_truthy(v))
        .or_else(|| raw.get("image_url").filter(|v| is_truthy(v)))
        .or_else(|| raw.get("imageUrl").filter(|v| is_truthy(v)))?;

    let url = candidate.as_str()?.trim();
    if url.is_empty() {
        return None;
    }
    let parsed = reqwest::Url::parse(url).ok()?;
    match parsed.scheme() {
        "http" | "https" => Some(url.to_string()),
        _ => None,
    }
}

fn extract_features(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(text_of).collect(),
        Some(v) if is_truthy(v) => text_of(v).map(|t| vec![t]).unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// First key holding a truthy value, rendered as text.
fn first_text(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| raw.get(*key))
        .find(|v| is_truthy(v))
        .and_then(text_of)
}

/// First key that is present and not null, regardless of truthiness.
fn defined<'a>(raw: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| raw.get(*key))
        .find(|v| !v.is_null())
}

/// Presence is tested on either field; the first field wins for the value.
fn numeric_pair(raw: &Value, primary: &str, secondary: &str) -> Option<f64> {
    let present = raw.get(primary).is_some_and(is_truthy)
        || raw.get(secondary).is_some_and(is_truthy);
    if !present {
        return None;
    }
    let value = raw
        .get(primary)
        .filter(|v| is_truthy(v))
        .or_else(|| raw.get(secondary))?;
    let number = coerce_number(value);
    number.is_finite().then_some(number)
}

fn truthy_text(value: Option<&Value>) -> Option<String> {
    value.filter(|v| is_truthy(v)).and_then(text_of)
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Loose numeric coercion for scraped payloads: numbers pass through, numeric
/// strings parse, the empty string coerces to zero, anything else is NaN.
fn coerce_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                0.0
            } else {
                trimmed.parse::<f64>().unwrap_or(f64::NAN)
            }
        }
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        _ => f64::NAN,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|v| v != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_record() -> Value {
        json!({
            "title": "!! BMW 320i",
            "price": "15000",
            "images": ["https://x/img.jpg"],
            "make": "BMW",
            "model": "320i",
            "year": 2019,
        })
    }

    #[test]
    fn strips_leading_symbols_from_title() {
        let out = normalize_record(&sample_record(), Utc::now()).expect("normalize");
        assert_eq!(out.fragment.title, "BMW 320i");
        assert_eq!(out.fragment.make, "BMW");
        assert_eq!(out.fragment.year, Some(2019));
        assert_eq!(out.fragment.price, 15000.0);
        assert_eq!(out.image_url.as_deref(), Some("https://x/img.jpg"));
    }

    #[test]
    fn falls_back_to_name_for_title() {
        let mut raw = sample_record();
        raw["title"] = json!("");
        raw["name"] = json!("  Audi A4  ");
        let out = normalize_record(&raw, Utc::now()).expect("normalize");
        assert_eq!(out.fragment.title, "Audi A4");
    }

    #[test]
    fn rejects_symbol_only_title() {
        let mut raw = sample_record();
        raw["title"] = json!("!!@@##");
        let err = normalize_record(&raw, Utc::now()).expect_err("reject");
        assert_eq!(err, RejectReason::MissingTitle);
    }

    #[test]
    fn rejects_missing_title() {
        let raw = json!({"price": 5000, "images": ["https://x/a.jpg"]});
        let err = normalize_record(&raw, Utc::now()).expect_err("reject");
        assert_eq!(err.code(), "missing_title");
    }

    #[test]
    fn rejects_unparseable_price() {
        let mut raw = sample_record();
        raw["price"] = json!("cheap");
        let err = normalize_record(&raw, Utc::now()).expect_err("reject");
        assert_eq!(err, RejectReason::InvalidPrice);
    }

    #[test]
    fn rejects_absent_price() {
        let raw = json!({"title": "Golf", "images": ["https://x/a.jpg"]});
        let err = normalize_record(&raw, Utc::now()).expect_err("reject");
        assert_eq!(err, RejectReason::InvalidPrice);
    }

    #[test]
    fn price_numeric_takes_precedence() {
        let mut raw = sample_record();
        raw["price_numeric"] = json!(12500);
        raw["price"] = json!("99999");
        let out = normalize_record(&raw, Utc::now()).expect("normalize");
        assert_eq!(out.fragment.price, 12500.0);
    }

    #[test]
    fn rejects_non_http_image() {
        let mut raw = sample_record();
        raw["images"] = json!(["ftp://x/img.jpg"]);
        let err = normalize_record(&raw, Utc::now()).expect_err("reject");
        assert_eq!(err, RejectReason::NoValidImage);
    }

    #[test]
    fn rejects_relative_image_url() {
        let mut raw = sample_record();
        raw["images"] = json!(["/uploads/img.jpg"]);
        let err = normalize_record(&raw, Utc::now()).expect_err("reject");
        assert_eq!(err, RejectReason::NoValidImage);
    }

    #[test]
    fn empty_first_image_falls_back_to_image_url() {
        let mut raw = sample_record();
        raw["images"] = json!([""]);
        raw["image_url"] = json!("https://x/alt.jpg");
        let out = normalize_record(&raw, Utc::now()).expect("normalize");
        assert_eq!(out.image_url.as_deref(), Some("https://x/alt.jpg"));
    }

    #[test]
    fn permissive_fields_never_gate() {
        let raw = json!({
            "title": "Mystery car",
            "price": 1,
            "imageUrl": "http://x/1.jpg",
            "condition": "like-new",
            "features": "sunroof",
            "specs": {"horsepower": 150, "doors": 4},
            "url": "https://source.example/42",
        });
        let out = normalize_record(&raw, Utc::now()).expect("normalize");
        assert_eq!(out.fragment.condition, None);
        assert_eq!(out.fragment.features, vec!["sunroof".to_string()]);
        assert_eq!(out.fragment.specs.horsepower, Some(150.0));
        assert_eq!(out.fragment.currency, "EUR");
        assert_eq!(out.fragment.status, ListingStatus::Published);
        assert_eq!(
            out.fragment.source.source_id.as_deref(),
            Some("https://source.example/42")
        );
        assert_eq!(out.fragment.source.kind, SourceType::Scraped);
    }

    #[test]
    fn brand_feeds_make_when_absent() {
        let raw = json!({
            "title": "C220",
            "brand": "Mercedes",
            "price": 20000,
            "images": ["https://x/c.jpg"],
        });
        let out = normalize_record(&raw, Utc::now()).expect("normalize");
        assert_eq!(out.fragment.make, "Mercedes");
        assert_eq!(out.fragment.brand, "Mercedes");
    }

    #[test]
    fn lookup_key_prefers_vin() {
        let mut raw = sample_record();
        raw["vin"] = json!(" WBA123 ");
        let out = normalize_record(&raw, Utc::now()).expect("normalize");
        assert_eq!(
            out.fragment.lookup_key(),
            crate::models::LookupKey::Vin("WBA123".to_string())
        );
    }
}

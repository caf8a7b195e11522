use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use uuid::Uuid;

/// Lifecycle state of a listing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Draft,
    #[default]
    Published,
    Archived,
    Sold,
}

impl ListingStatus {
    pub fn from_param(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "published" => Some(Self::Published),
            "archived" => Some(Self::Archived),
            "sold" => Some(Self::Sold),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    New,
    Used,
    Certified,
}

impl Condition {
    pub fn from_raw(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "new" => Some(Self::New),
            "used" => Some(Self::Used),
            "certified" => Some(Self::Certified),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    #[default]
    Manual,
    Scraped,
    Api,
}

/// Where a listing came from and when it was last imported.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    #[serde(rename = "type")]
    pub kind: SourceType,
    pub source_id: Option<String>,
    pub imported_at: DateTime<Utc>,
}

/// Structured technical specification block. Unknown keys are ignored.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Specs {
    #[serde(rename = "engineCC")]
    pub engine_cc: Option<f64>,
    pub horsepower: Option<f64>,
    pub torque: Option<f64>,
    pub doors: Option<f64>,
    pub seats: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub city: String,
    pub country: String,
}

/// One vehicle-for-sale record in the catalog.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub id: Uuid,
    pub vin: Option<String>,
    pub title: String,
    pub make: String,
    pub model: String,
    pub brand: String,
    pub trim: String,
    pub year: Option<i32>,
    pub price: f64,
    pub currency: String,
    pub mileage: Option<f64>,
    pub condition: Option<Condition>,
    pub fuel_type: Option<String>,
    pub transmission: Option<String>,
    pub body_type: Option<String>,
    pub drive_type: Option<String>,
    pub color: Option<String>,
    pub features: Vec<String>,
    pub specs: Specs,
    pub description: String,
    pub status: ListingStatus,
    pub image: Option<String>,
    pub source: Provenance,
    pub location: Location,
    pub ai: Option<Value>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Normalized output of the validation boundary. Everything downstream of
/// `normalize` operates only on this typed fragment, never on raw records.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingFragment {
    pub vin: Option<String>,
    pub title: String,
    pub make: String,
    pub model: String,
    pub brand: String,
    pub trim: String,
    pub year: Option<i32>,
    pub price: f64,
    pub currency: String,
    pub mileage: Option<f64>,
    pub condition: Option<Condition>,
    pub fuel_type: Option<String>,
    pub transmission: Option<String>,
    pub body_type: Option<String>,
    pub drive_type: Option<String>,
    pub color: Option<String>,
    pub features: Vec<String>,
    pub specs: Specs,
    pub description: String,
    pub status: ListingStatus,
    pub source: Provenance,
    pub location: Location,
    pub ai: Option<Value>,
}

impl ListingFragment {
    /// Key used to decide update-vs-create: VIN when present, otherwise the
    /// best-effort (title, make, year) triple.
    pub fn lookup_key(&self) -> LookupKey {
        match &self.vin {
            Some(vin) => LookupKey::Vin(vin.clone()),
            None => LookupKey::Composite {
                title: self.title.clone(),
                make: self.make.clone(),
                year: self.year,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LookupKey {
    Vin(String),
    Composite {
        title: String,
        make: String,
        year: Option<i32>,
    },
}

/// Fixed projection returned by catalog queries; never the full document.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingCard {
    pub id: Uuid,
    pub title: String,
    pub make: String,
    pub model: String,
    pub brand: String,
    pub year: Option<i32>,
    pub price: f64,
    pub currency: String,
    pub mileage: Option<f64>,
    pub body_type: Option<String>,
    pub fuel_type: Option<String>,
    pub transmission: Option<String>,
    pub drive_type: Option<String>,
    pub color: Option<String>,
    pub status: ListingStatus,
    pub image: Option<String>,
    pub location: Location,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Listing> for ListingCard {
    fn from(listing: &Listing) -> Self {
        Self {
            id: listing.id,
            title: listing.title.clone(),
            make: listing.make.clone(),
            model: listing.model.clone(),
            brand: listing.brand.clone(),
            year: listing.year,
            price: listing.price,
            currency: listing.currency.clone(),
            mileage: listing.mileage,
            body_type: listing.body_type.clone(),
            fuel_type: listing.fuel_type.clone(),
            transmission: listing.transmission.clone(),
            drive_type: listing.drive_type.clone(),
            color: listing.color.clone(),
            status: listing.status,
            image: listing.image.clone(),
            location: listing.location.clone(),
            published_at: listing.published_at,
            created_at: listing.created_at,
            updated_at: listing.updated_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    System,
    Promotion,
    Alert,
    Transaction,
    Info,
    Ticket,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Low,
    #[default]
    Normal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReadState {
    #[default]
    Unread,
    Read,
    Dismissed,
}

/// Persisted per-recipient notification row. Exactly one row is attempted per
/// (recipient, new-listing) pair; failures are logged, never retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub message: String,
    pub priority: Priority,
    pub status: ReadState,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedCar {
    pub car_id: Uuid,
    pub title: String,
    pub images_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportResponse {
    pub success: bool,
    pub count: usize,
    pub imported: Vec<ImportedCar>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMeta {
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub total_pages: usize,
    pub sort: String,
    pub initial: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub success: bool,
    pub message: String,
    pub data: Vec<ListingCard>,
    pub meta: SearchMeta,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub success: bool,
    pub message: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

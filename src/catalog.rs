use crate::models::{Listing, ListingCard, ListingFragment, ListingStatus, LookupKey};
use chrono::Utc;
use regex::Regex;
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Free-text predicate chosen by the planner: index-backed relevance when the
/// text index is available, substring OR-matching otherwise.
#[derive(Debug, Clone)]
pub enum TextFilter {
    Relevance { tokens: Vec<String> },
    Substring(Regex),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SortSpec {
    Relevance { tokens: Vec<String> },
    Field { name: String, descending: bool },
}

/// Store-side filter built by the query planner.
#[derive(Debug, Clone, Default)]
pub struct ListingFilter {
    pub status: Option<ListingStatus>,
    pub year: Option<i32>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub title: Option<Regex>,
    pub make: Option<Regex>,
    pub model: Option<Regex>,
    pub text: Option<TextFilter>,
}

impl ListingFilter {
    pub fn matches(&self, listing: &Listing) -> bool {
        if listing.is_deleted {
            return false;
        }
        if let Some(status) = self.status
            && listing.status != status
        {
            return false;
        }
        if let Some(year) = self.year
            && listing.year != Some(year)
        {
            return false;
        }
        if let Some(min) = self.min_price
            && listing.price < min
        {
            return false;
        }
        if let Some(max) = self.max_price
            && listing.price > max
        {
            return false;
        }
        if let Some(rx) = &self.title
            && !rx.is_match(&listing.title)
        {
            return false;
        }
        if let Some(rx) = &self.make
            && !rx.is_match(&listing.make)
        {
            return false;
        }
        if let Some(rx) = &self.model
            && !rx.is_match(&listing.model)
        {
            return false;
        }
        match &self.text {
            None => true,
            Some(TextFilter::Relevance { tokens }) => relevance_score(listing, tokens) > 0,
            Some(TextFilter::Substring(rx)) => {
                rx.is_match(&listing.title)
                    || rx.is_match(&listing.make)
                    || rx.is_match(&listing.model)
                    || rx.is_match(&listing.description)
            }
        }
    }
}

/// The persistent collection of listings. Single shared mutable resource of
/// the subsystem; all reads exclude soft-deleted rows.
#[derive(Clone)]
pub struct ListingStore {
    rows: Arc<RwLock<HashMap<Uuid, Listing>>>,
    text_search_enabled: bool,
    // Emulates drivers whose upsert call does not hand back the written row,
    // keeping the resolver's re-query/insert recovery exercised.
    opaque_upsert: Arc<AtomicBool>,
}

impl ListingStore {
    pub fn new(text_search_enabled: bool) -> Self {
        Self {
            rows: Arc::new(RwLock::new(HashMap::new())),
            text_search_enabled,
            opaque_upsert: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_env() -> Self {
        let enabled = std::env::var("TEXT_SEARCH_ENABLED")
            .ok()
            .map(|v| !matches!(v.trim().to_lowercase().as_str(), "0" | "false" | "no"))
            .unwrap_or(true);
        Self::new(enabled)
    }

    /// Whether the index-backed relevance path is available to the planner.
    pub fn text_search_enabled(&self) -> bool {
        self.text_search_enabled
    }

    #[cfg(test)]
    pub fn poison_upsert_result(&self) {
        self.opaque_upsert.store(true, Ordering::Relaxed);
    }

    pub async fn find_one(&self, key: &LookupKey) -> Option<Listing> {
        let rows = self.rows.read().await;
        rows.values().find(|row| key_matches(row, key)).cloned()
    }

    /// Atomic insert-if-absent-else-overwrite keyed on the lookup. Fragment
    /// fields overwrite the row; id, createdAt, publishedAt and the image
    /// survive repeated imports of the same key.
    pub async fn find_one_and_upsert(
        &self,
        key: &LookupKey,
        fragment: &ListingFragment,
    ) -> Option<Listing> {
        let mut rows = self.rows.write().await;
        let written = match rows.values_mut().find(|row| key_matches(row, key)) {
            Some(existing) => {
                apply_fragment(existing, fragment);
                existing.updated_at = Utc::now();
                existing.clone()
            }
            None => {
                let listing = new_listing(fragment);
                rows.insert(listing.id, listing.clone());
                listing
            }
        };
        if self.opaque_upsert.load(Ordering::Relaxed) {
            return None;
        }
        Some(written)
    }

    /// Plain insert, last resort of the resolver's recovery path.
    pub async fn insert(&self, fragment: &ListingFragment) -> Listing {
        let listing = new_listing(fragment);
        let mut rows = self.rows.write().await;
        rows.insert(listing.id, listing.clone());
        listing
    }

    /// Second-step write of the primary image onto an existing row.
    pub async fn set_image(&self, id: Uuid, url: &str) {
        let mut rows = self.rows.write().await;
        if let Some(row) = rows.get_mut(&id) {
            row.image = Some(url.to_string());
            row.updated_at = Utc::now();
        }
    }

    pub async fn get(&self, id: Uuid) -> Option<Listing> {
        let rows = self.rows.read().await;
        rows.get(&id).filter(|row| !row.is_deleted).cloned()
    }

    pub async fn count(&self, filter: &ListingFilter) -> usize {
        let rows = self.rows.read().await;
        rows.values().filter(|row| filter.matches(row)).count()
    }

    pub async fn find_page(
        &self,
        filter: &ListingFilter,
        sort: &SortSpec,
        skip: usize,
        limit: usize,
    ) -> Vec<ListingCard> {
        let selected = self.select(filter, sort).await;
        selected
            .iter()
            .skip(skip)
            .take(limit)
            .map(ListingCard::from)
            .collect()
    }

    pub async fn find_all(&self, filter: &ListingFilter, sort: &SortSpec) -> Vec<ListingCard> {
        let selected = self.select(filter, sort).await;
        selected.iter().map(ListingCard::from).collect()
    }

    /// Distinct non-empty brands ordered by listing count, busiest first.
    pub async fn brand_counts(&self) -> Vec<String> {
        let rows = self.rows.read().await;
        let mut counts: HashMap<String, usize> = HashMap::new();
        for row in rows.values() {
            if row.is_deleted {
                continue;
            }
            let brand = row.brand.trim();
            if brand.is_empty() {
                continue;
            }
            *counts.entry(brand.to_string()).or_default() += 1;
        }
        let mut ordered: Vec<(String, usize)> = counts.into_iter().collect();
        ordered.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ordered.into_iter().map(|(brand, _)| brand).collect()
    }

    #[cfg(test)]
    pub async fn mark_deleted(&self, id: Uuid) {
        let mut rows = self.rows.write().await;
        if let Some(row) = rows.get_mut(&id) {
            row.is_deleted = true;
            row.deleted_at = Some(Utc::now());
        }
    }

    async fn select(&self, filter: &ListingFilter, sort: &SortSpec) -> Vec<Listing> {
        let rows = self.rows.read().await;
        let mut selected: Vec<Listing> = rows
            .values()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect();
        sort_listings(&mut selected, sort);
        selected
    }
}

/// Relevance score: one point per queried token found in each of title, make,
/// model and description.
pub fn relevance_score(listing: &Listing, tokens: &[String]) -> usize {
    let haystacks = [
        listing.title.to_lowercase(),
        listing.make.to_lowercase(),
        listing.model.to_lowercase(),
        listing.description.to_lowercase(),
    ];
    tokens
        .iter()
        .map(|token| {
            haystacks
                .iter()
                .filter(|field| field.contains(token.as_str()))
                .count()
        })
        .sum()
}

fn key_matches(listing: &Listing, key: &LookupKey) -> bool {
    // Uniqueness applies only among active rows, like a partial index.
    if listing.is_deleted {
        return false;
    }
    match key {
        LookupKey::Vin(vin) => listing.vin.as_deref() == Some(vin.as_str()),
        LookupKey::Composite { title, make, year } => {
            listing.title == *title && listing.make == *make && listing.year == *year
        }
    }
}

fn new_listing(fragment: &ListingFragment) -> Listing {
    let now = Utc::now();
    let published_at = (fragment.status == ListingStatus::Published).then_some(now);
    Listing {
        id: Uuid::new_v4(),
        vin: fragment.vin.clone(),
        title: fragment.title.clone(),
        make: fragment.make.clone(),
        model: fragment.model.clone(),
        brand: fragment.brand.clone(),
        trim: fragment.trim.clone(),
        year: fragment.year,
        price: fragment.price,
        currency: fragment.currency.clone(),
        mileage: fragment.mileage,
        condition: fragment.condition,
        fuel_type: fragment.fuel_type.clone(),
        transmission: fragment.transmission.clone(),
        body_type: fragment.body_type.clone(),
        drive_type: fragment.drive_type.clone(),
        color: fragment.color.clone(),
        features: fragment.features.clone(),
        specs: fragment.specs.clone(),
        description: fragment.description.clone(),
        status: fragment.status,
        image: None,
        source: fragment.source.clone(),
        location: fragment.location.clone(),
        ai: fragment.ai.clone(),
        published_at,
        created_at: now,
        updated_at: now,
        is_deleted: false,
        deleted_at: None,
    }
}

/// Overwrite-in-place. Always-present fragment fields replace the row's;
/// absent optionals leave the stored value untouched, matching a `$set`
/// that omits undefined keys.
fn apply_fragment(listing: &mut Listing, fragment: &ListingFragment) {
    listing.title = fragment.title.clone();
    listing.make = fragment.make.clone();
    listing.model = fragment.model.clone();
    listing.brand = fragment.brand.clone();
    listing.trim = fragment.trim.clone();
    listing.price = fragment.price;
    listing.currency = fragment.currency.clone();
    listing.features = fragment.features.clone();
    listing.specs = fragment.specs.clone();
    listing.description = fragment.description.clone();
    listing.status = fragment.status;
    listing.source = fragment.source.clone();
    listing.location = fragment.location.clone();

    if fragment.vin.is_some() {
        listing.vin = fragment.vin.clone();
    }
    if fragment.year.is_some() {
        listing.year = fragment.year;
    }
    if fragment.mileage.is_some() {
        listing.mileage = fragment.mileage;
    }
    if fragment.condition.is_some() {
        listing.condition = fragment.condition;
    }
    if fragment.fuel_type.is_some() {
        listing.fuel_type = fragment.fuel_type.clone();
    }
    if fragment.transmission.is_some() {
        listing.transmission = fragment.transmission.clone();
    }
    if fragment.body_type.is_some() {
        listing.body_type = fragment.body_type.clone();
    }
    if fragment.drive_type.is_some() {
        listing.drive_type = fragment.drive_type.clone();
    }
    if fragment.color.is_some() {
        listing.color = fragment.color.clone();
    }
    if fragment.ai.is_some() {
        listing.ai = fragment.ai.clone();
    }
}

fn sort_listings(rows: &mut [Listing], sort: &SortSpec) {
    match sort {
        SortSpec::Relevance { tokens } => {
            rows.sort_by(|a, b| relevance_score(b, tokens).cmp(&relevance_score(a, tokens)));
        }
        SortSpec::Field { name, descending } => {
            rows.sort_by(|a, b| {
                let ord = compare_field(a, b, name);
                if *descending { ord.reverse() } else { ord }
            });
        }
    }
}

/// Field comparison with case-insensitive collation for strings, so "BMW"
/// and "bmw" sort together. Absent values order first ascending.
fn compare_field(a: &Listing, b: &Listing, name: &str) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match name {
        "title" => collate(&a.title, &b.title),
        "make" => collate(&a.make, &b.make),
        "model" => collate(&a.model, &b.model),
        "brand" => collate(&a.brand, &b.brand),
        "price" => a.price.partial_cmp(&b.price).unwrap_or(Ordering::Equal),
        "year" => a.year.cmp(&b.year),
        "mileage" => a.mileage.partial_cmp(&b.mileage).unwrap_or(Ordering::Equal),
        "publishedAt" => a.published_at.cmp(&b.published_at),
        "createdAt" => a.created_at.cmp(&b.created_at),
        "updatedAt" => a.updated_at.cmp(&b.updated_at),
        _ => Ordering::Equal,
    }
}

fn collate(a: &str, b: &str) -> std::cmp::Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Location, Provenance, SourceType, Specs};

    fn fragment(title: &str, make: &str, year: Option<i32>, vin: Option<&str>) -> ListingFragment {
        ListingFragment {
            vin: vin.map(str::to_string),
            title: title.to_string(),
            make: make.to_string(),
            model: String::new(),
            brand: make.to_string(),
            trim: String::new(),
            year,
            price: 10_000.0,
            currency: "EUR".to_string(),
            mileage: None,
            condition: None,
            fuel_type: None,
            transmission: None,
            body_type: None,
            drive_type: None,
            color: None,
            features: Vec::new(),
            specs: Specs::default(),
            description: String::new(),
            status: ListingStatus::Published,
            source: Provenance {
                kind: SourceType::Scraped,
                source_id: None,
                imported_at: Utc::now(),
            },
            location: Location::default(),
            ai: None,
        }
    }

    #[tokio::test]
    async fn upsert_creates_then_overwrites_in_place() {
        let store = ListingStore::new(true);
        let frag = fragment("BMW 320i", "BMW", Some(2019), None);
        let key = frag.lookup_key();

        let first = store
            .find_one_and_upsert(&key, &frag)
            .await
            .expect("created");
        store.set_image(first.id, "https://x/img.jpg").await;

        let mut updated = frag.clone();
        updated.price = 14_000.0;
        updated.mileage = Some(80_000.0);
        let second = store
            .find_one_and_upsert(&key, &updated)
            .await
            .expect("updated");

        assert_eq!(first.id, second.id);
        assert_eq!(second.price, 14_000.0);
        assert_eq!(second.mileage, Some(80_000.0));
        assert_eq!(store.count(&ListingFilter::default()).await, 1);
        // the image from the earlier second-step write survives the overwrite
        let row = store.get(first.id).await.expect("row");
        assert_eq!(row.image.as_deref(), Some("https://x/img.jpg"));
        assert_eq!(row.created_at, first.created_at);
    }

    #[tokio::test]
    async fn absent_optionals_do_not_erase_stored_values() {
        let store = ListingStore::new(true);
        let mut frag = fragment("Passat", "VW", Some(2017), None);
        frag.color = Some("blue".to_string());
        frag.mileage = Some(120_000.0);
        let key = frag.lookup_key();
        store.find_one_and_upsert(&key, &frag).await;

        let bare = fragment("Passat", "VW", Some(2017), None);
        let row = store.find_one_and_upsert(&key, &bare).await.expect("row");
        assert_eq!(row.color.as_deref(), Some("blue"));
        assert_eq!(row.mileage, Some(120_000.0));
    }

    #[tokio::test]
    async fn vin_key_wins_over_composite_fields() {
        let store = ListingStore::new(true);
        let frag = fragment("Golf GTI", "VW", Some(2020), Some("WVW111"));
        let created = store
            .find_one_and_upsert(&frag.lookup_key(), &frag)
            .await
            .expect("row");

        // same VIN under a different title still resolves to the same row
        let mut renamed = fragment("Golf GTI Facelift", "VW", Some(2021), Some("WVW111"));
        renamed.price = 22_000.0;
        let updated = store
            .find_one_and_upsert(&renamed.lookup_key(), &renamed)
            .await
            .expect("row");
        assert_eq!(created.id, updated.id);
        assert_eq!(updated.title, "Golf GTI Facelift");
    }

    #[tokio::test]
    async fn soft_deleted_rows_escape_lookup_and_reads() {
        let store = ListingStore::new(true);
        let frag = fragment("Old Clio", "Renault", Some(2010), Some("VF1AAA"));
        let key = frag.lookup_key();
        let row = store.find_one_and_upsert(&key, &frag).await.expect("row");
        store.mark_deleted(row.id).await;

        assert!(store.find_one(&key).await.is_none());
        assert!(store.get(row.id).await.is_none());
        assert_eq!(store.count(&ListingFilter::default()).await, 0);

        // VIN uniqueness is partial: the key is free again for a new row
        let replacement = store.find_one_and_upsert(&key, &frag).await.expect("row");
        assert_ne!(replacement.id, row.id);
    }

    #[tokio::test]
    async fn opaque_upsert_still_writes_and_requery_finds_it() {
        let store = ListingStore::new(true);
        store.poison_upsert_result();
        let frag = fragment("Ghost Car", "Skoda", Some(2018), None);
        let key = frag.lookup_key();

        assert!(store.find_one_and_upsert(&key, &frag).await.is_none());
        let requeried = store.find_one(&key).await.expect("written row");
        assert_eq!(requeried.title, "Ghost Car");
    }

    #[tokio::test]
    async fn collation_sorts_mixed_case_together() {
        let store = ListingStore::new(true);
        for (title, make) in [("alpha", "bmw"), ("Beta", "BMW"), ("gamma", "Audi")] {
            let frag = fragment(title, make, Some(2020), None);
            store.find_one_and_upsert(&frag.lookup_key(), &frag).await;
        }
        let sort = SortSpec::Field {
            name: "make".to_string(),
            descending: false,
        };
        let cards = store.find_all(&ListingFilter::default(), &sort).await;
        let makes: Vec<&str> = cards.iter().map(|c| c.make.as_str()).collect();
        assert_eq!(makes.len(), 3);
        assert_eq!(makes[0], "Audi");
        assert!(makes[1].eq_ignore_ascii_case("bmw"));
        assert!(makes[2].eq_ignore_ascii_case("bmw"));
    }

    #[tokio::test]
    async fn brand_counts_order_by_volume() {
        let store = ListingStore::new(true);
        for (title, make) in [("a", "BMW"), ("b", "BMW"), ("c", "Audi"), ("d", "")] {
            let frag = fragment(title, make, Some(2020), None);
            store.find_one_and_upsert(&frag.lookup_key(), &frag).await;
        }
        assert_eq!(
            store.brand_counts().await,
            vec!["BMW".to_string(), "Audi".to_string()]
        );
    }

    #[tokio::test]
    async fn relevance_score_counts_field_hits() {
        let store = ListingStore::new(true);
        let mut frag = fragment("BMW 320i", "BMW", Some(2019), None);
        frag.description = "well kept bmw sedan".to_string();
        let row = store
            .find_one_and_upsert(&frag.lookup_key(), &frag)
            .await
            .expect("row");
        let listing = store.get(row.id).await.expect("listing");
        assert_eq!(relevance_score(&listing, &["bmw".to_string()]), 3);
        assert_eq!(relevance_score(&listing, &["diesel".to_string()]), 0);
    }
}

use crate::catalog::ListingStore;
use crate::directory::{RecipientDirectory, Role};
use crate::models::{ImportResponse, ImportedCar, Listing, ListingFragment, LookupKey};
use crate::normalize::normalize_record;
use crate::notify::FanoutJob;
use crate::tasks::FanoutBatch;
use chrono::Utc;
use serde_json::Value;
use std::{sync::Arc, time::Instant};
use tracing::{info, warn};

/// Roles that receive new-listing notifications.
const NOTIFY_ROLES: &[Role] = &[Role::Admin, Role::User];

/// Batch import pipeline: validate and normalize each raw record, dedup
/// against the catalog via lookup-key upsert, and queue fan-out work for
/// listings seen for the first time.
#[derive(Clone)]
pub struct Importer {
    store: ListingStore,
    directory: Arc<dyn RecipientDirectory>,
}

impl Importer {
    pub fn new(store: ListingStore, directory: Arc<dyn RecipientDirectory>) -> Self {
        Self { store, directory }
    }

    /// Process one batch. Records run strictly sequentially so two records in
    /// the same batch cannot race to create duplicate rows under the
    /// composite fallback key. Returns the caller-facing summary and the
    /// fan-out batch to hand to the background runner after responding.
    pub async fn run(&self, records: &[Value]) -> (ImportResponse, FanoutBatch) {
        let started = Instant::now();

        // Recipient snapshot is loaded once and stays fixed for the batch.
        let recipients = Arc::new(self.directory.list_active(NOTIFY_ROLES).await);

        let mut imported = Vec::new();
        let mut jobs = Vec::new();
        let mut skipped = 0usize;

        for raw in records {
            let normalized = match normalize_record(raw, Utc::now()) {
                Ok(normalized) => normalized,
                Err(reason) => {
                    skipped += 1;
                    info!(
                        target = "autolist.import",
                        reason = reason.code(),
                        "record_skipped",
                    );
                    continue;
                }
            };

            let key = normalized.fragment.lookup_key();
            // Existence is decided before the write; the store may not
            // reliably report insert-vs-update.
            let existing = self.store.find_one(&key).await;
            let listing = self.commit(&key, &normalized.fragment).await;

            if let Some(url) = &normalized.image_url {
                self.store.set_image(listing.id, url).await;
            }

            imported.push(ImportedCar {
                car_id: listing.id,
                title: listing.title.clone(),
                images_count: u32::from(normalized.image_url.is_some()),
            });

            if existing.is_none() {
                jobs.push(FanoutJob {
                    listing_id: listing.id,
                    make: normalized.fragment.make.clone(),
                    model: normalized.fragment.model.clone(),
                    year: normalized.fragment.year,
                });
            }
        }

        crate::metrics::import_batch(imported.len(), skipped, started.elapsed().as_millis());

        let response = ImportResponse {
            success: true,
            count: imported.len(),
            imported,
        };
        (response, FanoutBatch { jobs, recipients })
    }

    /// Upsert keyed on the lookup, recovering locally when the store hands
    /// back no identifiable document: re-query the same key, and as a last
    /// resort insert outright.
    async fn commit(&self, key: &LookupKey, fragment: &ListingFragment) -> Listing {
        if let Some(listing) = self.store.find_one_and_upsert(key, fragment).await {
            return listing;
        }
        warn!(
            target = "autolist.import",
            "upsert_returned_no_document",
        );
        if let Some(listing) = self.store.find_one(key).await {
            return listing;
        }
        self.store.insert(fragment).await
    }
}

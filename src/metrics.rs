use tracing::trace;

// Lightweight metrics helpers; counter names stay stable even when the
// Prometheus recorder is not installed.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "autolist.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn import_batch(imported: usize, skipped: usize, elapsed_ms: u128) {
    trace!(
        target = "autolist.metrics",
        imported = imported,
        skipped = skipped,
        elapsed_ms = elapsed_ms as u64,
        "import_batch"
    );
}

pub fn fanout_settled(settled: usize, failed: usize) {
    trace!(
        target = "autolist.metrics",
        settled = settled,
        failed = failed,
        "fanout_batch_settled"
    );
}

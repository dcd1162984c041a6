//! Store metrics.

use metrics::counter;

pub mod names {
    /// Compare-and-set conflicts by operation.
    pub const CONFLICTS_TOTAL: &str = "vgal_store_conflicts_total";
}

/// Record a lost compare-and-set race.
pub fn record_conflict(operation: &str) {
    counter!(
        names::CONFLICTS_TOTAL,
        "operation" => operation.to_string()
    )
    .increment(1);
}

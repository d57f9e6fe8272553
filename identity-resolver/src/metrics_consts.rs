// ==== Resolution metrics ====
/// Counter for resolution outcomes, labelled by entity (customer/offer), outcome and strategy
pub const RESOLUTION_OUTCOME_COUNTER: &str = "identity_resolution_outcome_total";

/// Histogram for end-to-end resolution duration of a single record
pub const RESOLUTION_DURATION_HISTOGRAM: &str = "identity_resolution_duration_ms";

/// Counter for resolutions that failed, labelled by entity and error kind
pub const RESOLUTION_FAILURES_COUNTER: &str = "identity_resolution_failures_total";

/// Histogram for the number of candidates returned by candidate search
pub const CANDIDATE_COUNT_HISTOGRAM: &str = "identity_resolution_candidates";

/// Counter for invariant violations (duplicate flagged without a target)
pub const ILLEGAL_RESOLVER_STATE_COUNTER: &str = "identity_resolution_illegal_state_total";

// ==== Rule metrics ====
/// Counter for rules fired across evaluations
pub const RULES_FIRED_COUNTER: &str = "rule_engine_rules_fired_total";

/// Counter for rule catalog fetch failures, labelled by cause
pub const RULE_RETRIEVAL_FAILURES_COUNTER: &str = "rule_engine_retrieval_failures_total";

// ==== Concurrency metrics ====
/// Histogram for time spent waiting on per-key advisory locks
pub const KEY_LOCK_WAIT_HISTOGRAM: &str = "key_lock_wait_ms";

/// Counter for optimistic version conflicts reported by the live book
pub const VERSION_CONFLICTS_COUNTER: &str = "live_book_version_conflicts_total";

// ==== Event metrics ====
/// Counter for published domain events, labelled by event type and status (success/failure)
pub const EVENTS_PUBLISHED_COUNTER: &str = "live_book_events_published_total";

// ==== Batch metrics ====
/// Counter for batch records by final status
pub const BATCH_RECORDS_COUNTER: &str = "ingest_batch_records_total";

/// Counter for conflict retries performed by the batch ingestor
pub const BATCH_RETRIES_COUNTER: &str = "ingest_batch_retries_total";

/// Counter for batches aborted early because the catalog or store became unavailable
pub const BATCH_ABORTED_COUNTER: &str = "ingest_batch_aborted_total";

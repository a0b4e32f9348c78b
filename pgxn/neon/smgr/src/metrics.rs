use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, register_int_counter, register_int_counter_vec};

pub(crate) static PREFETCH_HITS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "neon_smgr_prefetch_hits_total",
        "Number of page reads served from a prefetched response"
    )
    .expect("failed to define a metric")
});

pub(crate) static PREFETCH_MISSES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "neon_smgr_prefetch_misses_total",
        "Number of page reads that had to send a new GetPage request"
    )
    .expect("failed to define a metric")
});

pub(crate) static PREFETCH_DISCARDED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "neon_smgr_prefetch_discarded_total",
        "Number of prefetched responses read off the connection and thrown away"
    )
    .expect("failed to define a metric")
});

pub(crate) static PAGESERVER_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "neon_smgr_pageserver_requests_total",
        "Number of requests sent to the page server, by request kind",
        &["kind"]
    )
    .expect("failed to define a metric")
});

pub(crate) static FORCE_LOGGED_PAGES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "neon_smgr_force_logged_pages_total",
        "Number of evicted pages that had to be WAL-logged on their way out, by fork",
        &["fork"]
    )
    .expect("failed to define a metric")
});

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static JOBS_PUSHED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("jobs_pushed_total", "Total jobs pushed").unwrap());

pub static JOBS_POPPED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("jobs_popped_total", "Total jobs claimed by workers").unwrap());

pub static JOBS_FINISHED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("jobs_finished_total", "Total jobs finished").unwrap());

pub static JOBS_RESCHEDULED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("jobs_rescheduled_total", "Total jobs rescheduled").unwrap());

pub static JOB_ERRORS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("job_errors_total", "Total error statuses reported").unwrap());

pub fn init_metrics() {
    // Ignore errors if called multiple times (common in tests)
    let _ = REGISTRY.register(Box::new(JOBS_PUSHED.clone()));
    let _ = REGISTRY.register(Box::new(JOBS_POPPED.clone()));
    let _ = REGISTRY.register(Box::new(JOBS_FINISHED.clone()));
    let _ = REGISTRY.register(Box::new(JOBS_RESCHEDULED.clone()));
    let _ = REGISTRY.register(Box::new(JOB_ERRORS.clone()));
}

pub fn gather() -> String {
    let metric_families = REGISTRY.gather();
    let mut buf = Vec::new();
    let encoder = TextEncoder::new();
    encoder.encode(&metric_families, &mut buf).unwrap();
    String::from_utf8(buf).unwrap()
}

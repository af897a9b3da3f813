//! Render pipeline metrics.

use metrics::{counter, histogram};

pub mod names {
    pub const RENDERS_ENQUEUED_TOTAL: &str = "vedit_renders_enqueued_total";
    pub const RENDER_ATTEMPTS_TOTAL: &str = "vedit_render_attempts_total";
    pub const RENDERS_COMPLETED_TOTAL: &str = "vedit_renders_completed_total";
    pub const RENDERS_FAILED_TOTAL: &str = "vedit_renders_failed_total";
    pub const RENDERS_RETRIED_TOTAL: &str = "vedit_renders_retried_total";
    pub const RENDERS_RESUMED_TOTAL: &str = "vedit_renders_resumed_total";
    pub const RENDER_ENCODE_SECONDS: &str = "vedit_render_encode_seconds";
}

pub fn record_render_enqueued() {
    counter!(names::RENDERS_ENQUEUED_TOTAL).increment(1);
}

pub fn record_attempt_started() {
    counter!(names::RENDER_ATTEMPTS_TOTAL).increment(1);
}

pub fn record_render_completed(encode_secs: f64) {
    counter!(names::RENDERS_COMPLETED_TOTAL).increment(1);
    histogram!(names::RENDER_ENCODE_SECONDS).record(encode_secs);
}

pub fn record_render_retried() {
    counter!(names::RENDERS_RETRIED_TOTAL).increment(1);
}

pub fn record_renders_resumed(count: u64) {
    counter!(names::RENDERS_RESUMED_TOTAL).increment(count);
}

pub fn record_render_failed(permanent: bool) {
    let reason = if permanent { "permanent" } else { "exhausted" };
    counter!(names::RENDERS_FAILED_TOTAL, "reason" => reason).increment(1);
}

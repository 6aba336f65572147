//! # Echo Common
//!
//! Shared plumbing for the EchoChat edge agent crates.
//!
//! ## Features
//!
//! - Logging configuration and setup
//! - Wall-clock timestamps used by the cache and outbox stores
//! - Process-unique identifier generation

use std::sync::atomic::{AtomicU64, Ordering};

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generate an identifier that is unique within this process and
/// practically unique across restarts.
pub fn unique_id(prefix: &str) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    let nanos = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_else(|| now_millis().saturating_mul(1_000_000));
    format!(
        "{}-{:016x}-{:04x}",
        prefix,
        nanos as u64,
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_ids_differ() {
        let a = unique_id("msg");
        let b = unique_id("msg");
        assert_ne!(a, b);
        assert!(a.starts_with("msg-"));
    }

    #[test]
    fn test_now_millis_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(now_millis() > 1_577_836_800_000);
    }
}

#![allow(dead_code)]

use std::sync::Once;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use transmit_queue::TransmitConfig;

static INIT: Once = Once::new();

/// Route queue logs to the test harness; filter with RUST_LOG
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Small limits so flow control kicks in after a handful of transmits
pub fn small_config(pending: usize, queued: usize, unblock: usize, drop: usize) -> TransmitConfig {
    TransmitConfig::with_limits(pending, queued, unblock)
        .with_drop_level(drop)
        .with_producer_backoff(Duration::ZERO)
}

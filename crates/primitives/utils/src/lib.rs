#![allow(clippy::new_without_default)]

pub mod parsers;
pub mod service;

use std::time::{Duration, Instant};

async fn graceful_shutdown_inner() {
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => signal.recv().await,
            // SIGTERM not supported
            Err(_) => core::future::pending().await,
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigterm => {},
    };
}

/// Completes on ctrl-c or SIGTERM.
pub async fn graceful_shutdown() {
    graceful_shutdown_inner().await
}

pub struct PerfStopwatch(pub Instant);

impl PerfStopwatch {
    pub fn new() -> PerfStopwatch {
        PerfStopwatch(Instant::now())
    }

    pub fn elapsed(&self) -> Duration {
        self.0.elapsed()
    }
}

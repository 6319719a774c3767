// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber at `info`, or whatever `RUST_LOG` says.
pub fn init() -> bool {
    init_with_default("info")
}

/// Installs the global subscriber with `directive` as the fallback filter.
/// Returns false if a subscriber was already installed, so it is safe to
/// call from every test.
pub fn init_with_default(directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoUtc::rfc3339())
        .try_init()
        .is_ok()
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global tracing subscriber.  The edge calls this once at
/// startup; `QUANTA_LOG` overrides the default `info` filter.
pub fn init() {
    let filter = EnvFilter::try_from_env("QUANTA_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init();
        init();
    }
}

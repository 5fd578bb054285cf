//! Builder-style configuration for a [`crate::device::Device`]'s request
//! engine. Only the per-completion timeout is exposed; pipeline depth
//! is a backend property, not a caller knob.

use std::time::Duration;

use crate::engine::DEFAULT_TIMEOUT;

/// `with_*` setters over a plain struct, without a `paste`-generated
/// macro behind them — a single field doesn't earn one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    timeout: Duration,
}

impl EngineConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { timeout: DEFAULT_TIMEOUT }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_engine_default_timeout() {
        assert_eq!(EngineConfig::default().timeout(), DEFAULT_TIMEOUT);
    }

    #[test]
    fn with_timeout_overrides_the_default() {
        let cfg = EngineConfig::default().with_timeout(Duration::from_millis(5));
        assert_eq!(cfg.timeout(), Duration::from_millis(5));
    }
}

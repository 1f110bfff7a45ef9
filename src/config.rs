//! Run timing, with defaults matching what the ATmega328 family tolerates.
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    /// Red LED lead time before reset is asserted.
    pub reset_pulse_ms: u32,
    /// Time reset is held before programming enable is sent.
    pub reset_settle_ms: u32,
    /// Pause with reset released after a rejected programming enable.
    pub retry_cooldown_ms: u32,
    pub handshake_attempts: u32,
    /// Half blink period while a page write is in progress.
    pub page_poll_ms: u32,
    /// Half blink period while a chip erase is in progress.
    pub erase_poll_ms: u32,
    /// Upper bound for a single busy wait.
    pub ready_timeout_ms: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            reset_pulse_ms: 10,
            reset_settle_ms: 90,
            retry_cooldown_ms: 100,
            handshake_attempts: 3,
            page_poll_ms: 10,
            erase_poll_ms: 200,
            ready_timeout_ms: 2000,
        }
    }
}

impl Timing {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let timing: Timing = serde_yaml::from_str(raw)?;
        anyhow::ensure!(
            timing.handshake_attempts > 0,
            "handshake_attempts must be at least 1"
        );
        for (name, period) in [
            ("page_poll_ms", timing.page_poll_ms),
            ("erase_poll_ms", timing.erase_poll_ms),
        ] {
            anyhow::ensure!(
                period <= timing.ready_timeout_ms,
                "{} ({}) exceeds ready_timeout_ms ({})",
                name,
                period,
                timing.ready_timeout_ms
            );
        }
        Ok(timing)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        let raw = std::fs::read_to_string(p)?;
        log::debug!("Read timing from {}", p.display());
        Self::from_yaml(&raw)
    }
}

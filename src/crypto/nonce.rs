//! Monotonic nonce generation and single-use validation.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct NonceState {
    /// Highest value handed out by `generate`.
    last_issued: u64,
    /// Highest value accepted by `validate`.
    high_water: u64,
}

impl NonceState {
    fn floor(&self) -> u64 {
        self.last_issued.max(self.high_water)
    }
}

/// Nonce source for one operator identity.
///
/// Generated values come from the wall clock in milliseconds but are bumped
/// past anything issued or accepted before. Correctness rests on
/// [`NonceSource::validate`], whose check-and-advance runs under one lock.
#[derive(Debug)]
pub struct NonceSource {
    state: Mutex<NonceState>,
    state_path: Option<PathBuf>,
}

impl NonceSource {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NonceState::default()),
            state_path: None,
        }
    }

    /// Nonce source whose high-water mark survives restarts via `path`.
    pub fn persistent(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let high_water = match std::fs::read_to_string(&path) {
            Ok(raw) => raw
                .trim()
                .parse::<u64>()
                .map_err(|e| anyhow::anyhow!("Corrupt nonce state in {}: {}", path.display(), e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(anyhow::anyhow!("Failed to read nonce state: {}", e)),
        };

        debug!("Loaded nonce high-water mark {} from {}", high_water, path.display());
        Ok(Self {
            state: Mutex::new(NonceState {
                last_issued: high_water,
                high_water,
            }),
            state_path: Some(path),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NonceState> {
        // A panic while holding the lock cannot leave the counters torn.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Produce a value strictly greater than every earlier output or accepted
    /// nonce, or `None` once the `u64` range is used up.
    pub fn generate(&self) -> Option<u64> {
        let mut state = self.lock();
        let Some(next) = state.floor().checked_add(1) else {
            warn!("Nonce space exhausted at {}", state.floor());
            return None;
        };
        let clock = Utc::now().timestamp_millis().max(0) as u64;
        let nonce = clock.max(next);
        state.last_issued = nonce;
        self.persist(&state);
        Some(nonce)
    }

    /// Accept `nonce` at most once: true iff it exceeds the high-water mark,
    /// in which case the mark advances to it. `u64::MAX` is never accepted so
    /// that an accepted nonce cannot exhaust `generate`.
    pub fn validate(&self, nonce: u64) -> bool {
        let mut state = self.lock();
        if nonce == u64::MAX || nonce <= state.high_water {
            debug!("Rejected nonce {} (high-water {})", nonce, state.high_water);
            return false;
        }
        state.high_water = nonce;
        self.persist(&state);
        true
    }

    pub fn high_water_mark(&self) -> u64 {
        self.lock().high_water
    }

    fn persist(&self, state: &NonceState) {
        if let Some(path) = &self.state_path {
            if let Err(e) = std::fs::write(path, state.floor().to_string()) {
                warn!("Failed to persist nonce state to {}: {}", path.display(), e);
            }
        }
    }
}

impl Default for NonceSource {
    fn default() -> Self {
        Self::new()
    }
}

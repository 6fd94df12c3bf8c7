//! Set of voices the platform currently offers.
//!
//! Platforms announce voices late and sometimes more than once, so each
//! non-empty report replaces the catalog wholesale. Empty reports are noise:
//! they never clear a populated catalog and never mark it ready.

use super::Voice;
use tracing::{debug, info};

/// Available synthesis voices plus a one-way readiness latch.
#[derive(Debug, Clone, Default)]
pub struct VoiceCatalog {
    voices: Vec<Voice>,
    ready: bool,
}

impl VoiceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a platform voice report.
    ///
    /// Returns `true` only for the report that made the catalog ready.
    pub fn on_catalog_changed(&mut self, voices: Vec<Voice>) -> bool {
        if voices.is_empty() {
            debug!("ignoring empty voice report");
            return false;
        }
        let became_ready = !self.ready;
        info!(count = voices.len(), became_ready, "voice catalog updated");
        self.voices = voices;
        self.ready = true;
        became_ready
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }
}

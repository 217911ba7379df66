//! Synthesizer capability.
//!
//! Audible feedback independent of MIDI hardware. Implementations are
//! injected into whatever needs them; there is no process-wide instance.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info};

pub trait Synthesizer: Send + Sync {
    /// Sound `name` (e.g. "C4") starting `offset_seconds` from now.
    fn play(&self, name: &str, offset_seconds: f64, duration_seconds: f64);

    /// Silence every voice.
    fn stop(&self);
}

/// Synthesizer that only emits trace events.
#[derive(Debug, Default)]
pub struct LoggingSynth {
    voices_started: AtomicU64,
    stops: AtomicU64,
}

impl LoggingSynth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn voices_started(&self) -> u64 {
        self.voices_started.load(Ordering::Relaxed)
    }

    pub fn stops(&self) -> u64 {
        self.stops.load(Ordering::Relaxed)
    }
}

impl Synthesizer for LoggingSynth {
    fn play(&self, name: &str, offset_seconds: f64, duration_seconds: f64) {
        self.voices_started.fetch_add(1, Ordering::Relaxed);
        debug!(name, offset_seconds, duration_seconds, "synth voice");
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::Relaxed);
        info!(voices = self.voices_started(), "synth stopped");
    }
}

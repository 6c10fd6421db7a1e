use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// The process-wide status cell (spec.md section 4.1, section 9 "Global status").
///
/// A single shared atomic cell drives every Listener's phase transitions.
/// External signal handlers (out of scope here) flip it; Listeners only
/// observe it.
#[derive(Debug, Clone)]
pub struct Status(Arc<AtomicU8>);

const RUNNING: u8 = 0;
const QUIETING: u8 = 1;
const QUIET: u8 = 2;
const STOPPING: u8 = 3;
const STOPPED: u8 = 4;

impl Default for Status {
    fn default() -> Self {
        Self::new()
    }
}

impl Status {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(RUNNING)))
    }

    /// `done?` in spec.md: true once quieting has begun.
    pub fn done(&self) -> bool {
        self.0.load(Ordering::SeqCst) >= QUIETING
    }

    pub fn quieting(&self) -> bool {
        self.0.load(Ordering::SeqCst) == QUIETING
    }

    pub fn quiet(&self) -> bool {
        self.0.load(Ordering::SeqCst) >= QUIET
    }

    pub fn stopping(&self) -> bool {
        self.0.load(Ordering::SeqCst) >= STOPPING
    }

    pub fn stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst) == STOPPED
    }

    pub fn begin_quieting(&self) {
        self.0.store(QUIETING, Ordering::SeqCst);
    }

    pub fn mark_quiet(&self) {
        self.0
            .compare_exchange(QUIETING, QUIET, Ordering::SeqCst, Ordering::SeqCst)
            .ok();
    }

    pub fn begin_stopping(&self) {
        self.0.store(STOPPING, Ordering::SeqCst);
    }

    pub fn mark_stopped(&self) {
        self.0.store(STOPPED, Ordering::SeqCst);
    }
}

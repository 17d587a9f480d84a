//! Collapses overlapping "diagnostics begin/end" notifications into one
//! busy indicator.
//!
//! Begin/end pairs from concurrent analysis passes need not nest. The count
//! is floored at zero, so a surplus `end` never requires an extra `begin`
//! before the indicator can turn busy again.

use crate::host::EditorHost;

pub const WORKING_MESSAGE: &str = "analysis: working";
pub const DONE_MESSAGE: &str = "analysis: done";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityState {
    Idle,
    Busy,
}

/// Outstanding-analysis counter for one session.
///
/// Owned by the supervisor and only touched while it drains events, so it
/// needs no lock.
#[derive(Debug, Default)]
pub(crate) struct ActivityAggregator {
    count: u32,
}

impl ActivityAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ActivityState {
        if self.count > 0 {
            ActivityState::Busy
        } else {
            ActivityState::Idle
        }
    }

    #[cfg(test)]
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn on_begin(&mut self, host: &dyn EditorHost) -> ActivityState {
        self.count = self.count.saturating_add(1);
        if self.count == 1 {
            host.start_spinner(WORKING_MESSAGE);
        }
        self.state()
    }

    pub fn on_end(&mut self, host: &dyn EditorHost) -> ActivityState {
        self.count = self.count.saturating_sub(1);
        if self.count == 0 {
            host.stop_spinner(DONE_MESSAGE);
        }
        self.state()
    }

    /// Drop any outstanding work, e.g. when the server goes away mid-analysis.
    /// A `begin` without its `end` would otherwise leave the spinner stuck.
    pub fn reset(&mut self, host: &dyn EditorHost) {
        if self.count > 0 {
            tracing::debug!(outstanding = self.count, "Clearing unfinished analysis");
            self.count = 0;
            host.stop_spinner(DONE_MESSAGE);
        }
    }
}

//! Terminal rendition of the editor surface.
//!
//! Status, spinner, and warnings go to stderr; server output goes to stdout
//! so it can be piped separately.

use std::io::{Write, stdout};
use std::sync::atomic::{AtomicBool, Ordering};

use warden_lsp::EditorHost;

#[derive(Debug, Default)]
pub struct TerminalHost {
    spinning: AtomicBool,
}

impl TerminalHost {
    pub fn is_spinning(&self) -> bool {
        self.spinning.load(Ordering::Relaxed)
    }
}

impl EditorHost for TerminalHost {
    fn set_status(&self, message: &str) {
        eprintln!("[warden] {message}");
    }

    fn start_spinner(&self, message: &str) {
        self.spinning.store(true, Ordering::Relaxed);
        eprintln!("[warden] {message} ...");
    }

    fn stop_spinner(&self, message: &str) {
        // Stops arrive even when idle; only print the transition.
        if self.spinning.swap(false, Ordering::Relaxed) {
            eprintln!("[warden] {message}");
        }
    }

    fn show_warning(&self, message: &str) {
        eprintln!("warning: {message}");
    }

    fn append_output(&self, text: &str) {
        let mut out = stdout().lock();
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }

    fn reveal_output(&self, preserve_focus: bool) {
        // Output is always visible in a terminal.
        tracing::trace!(preserve_focus, "Reveal output requested");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spinner_tracks_transitions() {
        let host = TerminalHost::default();
        assert!(!host.is_spinning());

        host.start_spinner("analysis: working");
        assert!(host.is_spinning());

        host.stop_spinner("analysis: done");
        host.stop_spinner("analysis: done");
        assert!(!host.is_spinning());
    }
}

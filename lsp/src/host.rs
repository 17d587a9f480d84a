//! The editor surface the supervisor reports to.
//!
//! The host is shared with the editor and never owned by the core. It must
//! exist before the launcher is built, so stderr routing never observes a
//! missing output surface.

/// Editor-side UI the supervisor drives.
///
/// All methods are fire-and-forget: none may block on user input.
pub trait EditorHost: Send + Sync {
    /// Replace the visible status text.
    fn set_status(&self, message: &str);

    /// Show the busy indicator with `message`.
    fn start_spinner(&self, message: &str);

    /// Hide the busy indicator and leave `message` behind.
    fn stop_spinner(&self, message: &str);

    /// Non-blocking warning.
    fn show_warning(&self, message: &str);

    /// Append text to the shared output surface.
    fn append_output(&self, text: &str);

    /// Force the output surface into view.
    fn reveal_output(&self, preserve_focus: bool);
}

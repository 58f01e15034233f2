use crate::version::Version;

/// The foreground application, as far as the agent is concerned
pub trait ForegroundHost: Send + Sync {
    /// Show a non-blocking, dismissible update notice
    fn notify_update_available(&self, current: Option<&Version>, available: &Version);

    /// Whether the user is in the middle of something a reload would break
    /// (audio playback, an open dialog)
    fn is_busy(&self) -> bool;

    fn reload(&self);
}

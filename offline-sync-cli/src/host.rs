use std::sync::atomic::{AtomicBool, Ordering};

use offline_sync::{ForegroundHost, Version};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Terminal stand-in for the page. Notices are printed and forwarded to the
/// watch loop, which decides whether to accept them.
pub struct ConsoleHost {
    busy: AtomicBool,
    notices: mpsc::UnboundedSender<Version>,
}

impl ConsoleHost {
    pub fn new(notices: mpsc::UnboundedSender<Version>) -> Self {
        Self {
            busy: AtomicBool::new(false),
            notices,
        }
    }

    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
        info!(busy, "Host activity changed");
    }
}

impl ForegroundHost for ConsoleHost {
    fn notify_update_available(&self, current: Option<&Version>, available: &Version) {
        println!(
            "Update available: {} -> {}",
            current.map_or("none", Version::as_str),
            available
        );
        if self.notices.send(available.clone()).is_err() {
            debug!("Watch loop gone, notice dropped");
        }
    }

    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn reload(&self) {
        println!("Reloading");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notice_is_forwarded() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let host = ConsoleHost::new(tx);
        host.notify_update_available(Some(&Version::from("1")), &Version::from("2"));
        assert_eq!(rx.try_recv().unwrap(), Version::from("2"));
    }

    #[test]
    fn test_busy_flag() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let host = ConsoleHost::new(tx);
        assert!(!host.is_busy());
        host.set_busy(true);
        assert!(host.is_busy());
    }
}

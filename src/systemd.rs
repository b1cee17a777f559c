//! sd_notify integration for running as a `Type=notify` service.
//!
//! Every method is a no-op when disabled or off Linux, so callers never need
//! `#[cfg]` of their own.

use crate::sync::RunSummary;

#[derive(Debug, Clone, Copy)]
pub(crate) struct SystemdNotifier {
    enabled: bool,
}

impl SystemdNotifier {
    pub(crate) fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// `READY=1` once configuration is loaded.
    pub(crate) fn notify_ready(&self) {
        self.send(Message::Ready);
    }

    /// `STOPPING=1` on the way out.
    pub(crate) fn notify_stopping(&self) {
        self.send(Message::Stopping);
    }

    pub(crate) fn notify_status(&self, msg: &str) {
        self.send(Message::Status(msg));
    }

    /// Publish a finished run and ping the watchdog, so a hung sync is
    /// restarted by the service manager.
    pub(crate) fn notify_run(&self, summary: &RunSummary) {
        self.notify_status(&format!("Last run: {}", summary.status_line()));
        self.send(Message::Watchdog);
    }

    fn send(&self, message: Message<'_>) {
        if self.enabled {
            message.deliver();
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Message<'a> {
    Ready,
    Stopping,
    Status(&'a str),
    Watchdog,
}

impl Message<'_> {
    #[cfg(target_os = "linux")]
    fn deliver(self) {
        use sd_notify::NotifyState;
        let (state, label) = match self {
            Message::Ready => (NotifyState::Ready, "READY"),
            Message::Stopping => (NotifyState::Stopping, "STOPPING"),
            Message::Status(msg) => (NotifyState::Status(msg), "STATUS"),
            Message::Watchdog => (NotifyState::Watchdog, "WATCHDOG"),
        };
        if let Err(e) = sd_notify::notify(false, &[state]) {
            tracing::debug!(error = %e, "sd_notify {} failed", label);
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn deliver(self) {}
}

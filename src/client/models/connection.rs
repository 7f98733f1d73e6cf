use chrono::{DateTime, Utc};
use serde::Serialize;

/// UI-facing reachability of the service. `connected` follows the event
/// socket, `backend_available` follows the request/response probe; the two
/// may disagree for a while.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub backend_available: bool,
    pub last_check: Option<DateTime<Utc>>,
}

/// Something the health tracker observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthSignal {
    SocketOpened,
    SocketClosed,
    /// Handshake or transport failure on the socket
    SocketFailed,
    ProbeSucceeded,
    ProbeFailed,
}

impl ConnectionStatus {
    pub fn apply(&mut self, signal: HealthSignal, at: DateTime<Utc>) {
        match signal {
            HealthSignal::SocketOpened => {
                self.connected = true;
                self.backend_available = true;
            }
            HealthSignal::SocketClosed => self.connected = false,
            HealthSignal::SocketFailed => {
                self.connected = false;
                self.backend_available = false;
            }
            HealthSignal::ProbeSucceeded => self.backend_available = true,
            HealthSignal::ProbeFailed => self.backend_available = false,
        }
        self.last_check = Some(at);
    }

    pub fn is_healthy(&self) -> bool {
        self.connected && self.backend_available
    }

    pub fn label(&self) -> &'static str {
        if self.is_healthy() {
            "Connected"
        } else {
            "Disconnected"
        }
    }
}

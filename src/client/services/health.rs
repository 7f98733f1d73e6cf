use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};

use crate::client::models::connection::{ConnectionStatus, HealthSignal};
use crate::client::services::api_client::StatusProbe;
use crate::client::services::event_stream::{StreamState, StreamView};

/// Combines the event socket state with a periodic status probe into one
/// [`ConnectionStatus`]. The probe runs immediately, then every `interval`.
pub struct ConnectionHealthTracker {
    status: watch::Receiver<ConnectionStatus>,
    check_now: Arc<Notify>,
    tasks: Vec<JoinHandle<()>>,
}

impl ConnectionHealthTracker {
    pub fn spawn(probe: Arc<dyn StatusProbe>, stream: watch::Receiver<StreamView>, every: Duration) -> Self {
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());
        let status_tx = Arc::new(status_tx);
        let check_now = Arc::new(Notify::new());

        let probe_task = tokio::spawn(probe_loop(probe, every, status_tx.clone(), check_now.clone()));
        let socket_task = tokio::spawn(follow_socket(stream, status_tx));

        Self {
            status: status_rx,
            check_now,
            tasks: vec![probe_task, socket_task],
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Probe now without waiting for the next tick.
    pub fn check_now(&self) {
        self.check_now.notify_one();
    }

    pub fn dispose(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for ConnectionHealthTracker {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn record(status: &watch::Sender<ConnectionStatus>, signal: HealthSignal) {
    status.send_modify(|s| s.apply(signal, Utc::now()));
}

async fn probe_loop(
    probe: Arc<dyn StatusProbe>,
    every: Duration,
    status: Arc<watch::Sender<ConnectionStatus>>,
    check_now: Arc<Notify>,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = check_now.notified() => ticker.reset(),
        }

        // a probe never outlives the poll interval
        let signal = match timeout(every, probe.probe()).await {
            Ok(Ok(())) => HealthSignal::ProbeSucceeded,
            Ok(Err(e)) => {
                warn!("[HEALTH] Backend probe failed: {}", e);
                HealthSignal::ProbeFailed
            }
            Err(_) => {
                warn!("[HEALTH] Backend probe timed out after {:?}", every);
                HealthSignal::ProbeFailed
            }
        };
        debug!("[HEALTH] {:?}", signal);
        record(&status, signal);
    }
}

async fn follow_socket(mut stream: watch::Receiver<StreamView>, status: Arc<watch::Sender<ConnectionStatus>>) {
    let mut last_seen = None;

    loop {
        let signal = {
            let view = stream.borrow_and_update();
            // frames do not stamp changed_at; only state transitions do
            if view.changed_at != last_seen {
                last_seen = view.changed_at;
                socket_signal(&view)
            } else {
                None
            }
        };
        if let Some(signal) = signal {
            info!("[HEALTH] Event socket: {:?}", signal);
            record(&status, signal);
        }

        if stream.changed().await.is_err() {
            // stream dropped without a final Closed view
            record(&status, HealthSignal::SocketClosed);
            return;
        }
    }
}

fn socket_signal(view: &StreamView) -> Option<HealthSignal> {
    match view.state {
        StreamState::Open => Some(HealthSignal::SocketOpened),
        StreamState::Disconnected if view.last_error.is_some() => Some(HealthSignal::SocketFailed),
        StreamState::Disconnected | StreamState::Closed => Some(HealthSignal::SocketClosed),
        StreamState::Connecting => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::services::api_client::ApiError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeProbe {
        up: AtomicBool,
        hang: AtomicBool,
        calls: AtomicUsize,
    }

    impl FakeProbe {
        fn new(up: bool) -> Arc<Self> {
            Arc::new(Self {
                up: AtomicBool::new(up),
                hang: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl StatusProbe for FakeProbe {
        async fn probe(&self) -> Result<(), ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if self.up.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(ApiError::transport("connection refused"))
            }
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn view(state: StreamState, error: Option<&str>) -> StreamView {
        StreamView {
            state,
            current: None,
            last_error: error.map(str::to_string),
            changed_at: Some(Utc::now()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn probes_immediately_then_on_interval() {
        let probe = FakeProbe::new(true);
        let (_view_tx, view_rx) = watch::channel(StreamView::default());
        let tracker = ConnectionHealthTracker::spawn(probe.clone(), view_rx, Duration::from_secs(30));
        settle().await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        assert!(tracker.status().backend_available);
        assert!(tracker.status().last_check.is_some());

        probe.up.store(false, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(29)).await;
        settle().await;
        assert!(tracker.status().backend_available);

        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
        assert!(!tracker.status().backend_available);
    }

    #[tokio::test(start_paused = true)]
    async fn socket_and_probe_are_tracked_independently() {
        let probe = FakeProbe::new(true);
        let (view_tx, view_rx) = watch::channel(StreamView::default());
        let tracker = ConnectionHealthTracker::spawn(probe.clone(), view_rx, Duration::from_secs(30));
        settle().await;

        view_tx.send(view(StreamState::Open, None)).unwrap();
        settle().await;
        assert!(tracker.status().is_healthy());

        probe.up.store(false, Ordering::SeqCst);
        tracker.check_now();
        settle().await;
        let status = tracker.status();
        assert!(status.connected);
        assert!(!status.backend_available);

        probe.up.store(true, Ordering::SeqCst);
        tracker.check_now();
        settle().await;
        view_tx.send(view(StreamState::Disconnected, None)).unwrap();
        settle().await;
        let status = tracker.status();
        assert!(!status.connected);
        assert!(status.backend_available);
    }

    #[tokio::test(start_paused = true)]
    async fn socket_failure_marks_backend_down() {
        let probe = FakeProbe::new(true);
        let (view_tx, view_rx) = watch::channel(StreamView::default());
        let tracker = ConnectionHealthTracker::spawn(probe, view_rx, Duration::from_secs(30));
        settle().await;
        assert!(tracker.status().backend_available);

        view_tx.send(view(StreamState::Disconnected, Some("Connection failed: refused"))).unwrap();
        settle().await;
        assert_eq!(tracker.status().label(), "Disconnected");
        assert!(!tracker.status().backend_available);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_probe_counts_as_failure() {
        let probe = FakeProbe::new(true);
        probe.hang.store(true, Ordering::SeqCst);
        let (_view_tx, view_rx) = watch::channel(StreamView::default());
        let tracker = ConnectionHealthTracker::spawn(probe, view_rx, Duration::from_secs(30));
        settle().await;
        assert!(tracker.status().last_check.is_none());

        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;
        assert!(tracker.status().last_check.is_some());
        assert!(!tracker.status().backend_available);
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_stops_probing() {
        let probe = FakeProbe::new(true);
        let (_view_tx, view_rx) = watch::channel(StreamView::default());
        let mut tracker = ConnectionHealthTracker::spawn(probe.clone(), view_rx, Duration::from_secs(30));
        settle().await;
        tracker.dispose();

        tokio::time::advance(Duration::from_secs(120)).await;
        settle().await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }
}

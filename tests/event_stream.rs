mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use supernote_sync::client::services::event_stream::{EventStreamConsumer, StreamState, StreamView, WebSocketSource};
use supernote_sync::common::events::ProgressEvent;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;

use common::{closed_port_url, send_text, MockEventServer};

async fn wait_for<F>(view: &mut watch::Receiver<StreamView>, mut done: F) -> StreamView
where
    F: FnMut(&StreamView) -> bool,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            {
                let current = view.borrow_and_update();
                if done(&*current) {
                    return current.clone();
                }
            }
            view.changed().await.expect("consumer stopped");
        }
    })
    .await
    .expect("condition not reached in time")
}

#[tokio::test]
async fn frames_update_projection_and_malformed_ones_are_dropped() {
    let mut server = MockEventServer::start().await;
    let consumer = EventStreamConsumer::connect(&server.url, Duration::from_millis(200), 100);
    let mut view = consumer.subscribe_view();
    let mut events = consumer.subscribe_events();

    let mut ws = server.next_connection().await;
    wait_for(&mut view, |v| v.state == StreamState::Open).await;

    send_text(&mut ws, r#"{"type":"connected","message":"ready"}"#).await;
    send_text(&mut ws, "not json at all").await;
    send_text(
        &mut ws,
        r#"{"type":"batch_progress","task_id":"t-9","data":{"current_file":2,"total_files":4,"file_path":"b.md","percent":0.5}}"#,
    )
    .await;

    assert_eq!(events.recv().await.unwrap().event_type(), "connected");
    let progress = events.recv().await.unwrap();
    let ProgressEvent::BatchProgress(update) = &progress else {
        panic!("unexpected {:?}", progress);
    };
    assert_eq!(update.current, Some(1));
    assert_eq!(update.total, Some(4));

    let current = wait_for(&mut view, |v| v.current.is_some()).await;
    assert_eq!(current.current.as_ref(), Some(&progress));
    assert_eq!(current.state, StreamState::Open);

    send_text(&mut ws, r#"{"type":"batch_complete","completed":4}"#).await;
    wait_for(&mut view, |v| v.current.is_none()).await;
    assert_eq!(consumer.recent_events().len(), 3);

    consumer.dispose().await;
}

#[tokio::test]
async fn reconnects_after_server_drop_and_keeps_projection() {
    let mut server = MockEventServer::start().await;
    let consumer = EventStreamConsumer::connect(&server.url, Duration::from_millis(200), 100);
    let mut view = consumer.subscribe_view();

    let mut first = server.next_connection().await;
    wait_for(&mut view, |v| v.state == StreamState::Open).await;
    send_text(&mut first, r#"{"type":"workflow_started","workflow_id":"daily"}"#).await;
    wait_for(&mut view, |v| v.current.is_some()).await;

    first.close(None).await.ok();
    drop(first);
    let dropped = wait_for(&mut view, |v| v.state == StreamState::Disconnected).await;
    assert_eq!(dropped.current.as_ref().and_then(ProgressEvent::workflow_id), Some("daily"));

    let mut second = server.next_connection().await;
    let reopened = wait_for(&mut view, |v| v.state == StreamState::Open).await;
    assert_eq!(reopened.current.as_ref().and_then(ProgressEvent::workflow_id), Some("daily"));
    assert_eq!(reopened.last_error, None);

    send_text(&mut second, r#"{"type":"workflow_complete","workflow_id":"daily"}"#).await;
    wait_for(&mut view, |v| v.current.is_none()).await;

    consumer.dispose().await;
    assert_eq!(view.borrow().state, StreamState::Closed);
}

#[tokio::test]
async fn dispose_stops_retrying_against_a_dead_server() {
    let url = closed_port_url().await.replacen("http://", "ws://", 1) + "/events";
    let consumer = EventStreamConsumer::connect(&url, Duration::from_millis(100), 100);
    let mut view = consumer.subscribe_view();

    let failed = wait_for(&mut view, |v| v.state == StreamState::Disconnected && v.last_error.is_some()).await;
    assert!(failed.last_error.unwrap().starts_with("Connection failed"));

    consumer.dispose().await;
    assert_eq!(view.borrow().state, StreamState::Closed);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(view.borrow().state, StreamState::Closed);
}

#[tokio::test]
async fn dispose_sends_a_close_frame() {
    let mut server = MockEventServer::start().await;
    let consumer = EventStreamConsumer::connect(&server.url, Duration::from_millis(200), 100);
    let mut view = consumer.subscribe_view();

    let mut ws = server.next_connection().await;
    wait_for(&mut view, |v| v.state == StreamState::Open).await;
    consumer.dispose().await;

    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("no frame after dispose");
    assert!(matches!(frame, Some(Ok(Message::Close(_)))), "unexpected {:?}", frame);
}

#[tokio::test]
async fn silent_handshake_times_out_and_retries() {
    // accepts TCP but never answers the upgrade request
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/events", listener.local_addr().unwrap());
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    let server = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            held.push(socket);
        }
    });

    let source = WebSocketSource::new(url).with_handshake_timeout(Duration::from_millis(200));
    let consumer = EventStreamConsumer::spawn(Arc::new(source), Duration::from_millis(100), 100);
    let mut view = consumer.subscribe_view();

    let failed = wait_for(&mut view, |v| v.state == StreamState::Disconnected && v.last_error.is_some()).await;
    assert!(failed.last_error.unwrap().contains("timed out"));

    tokio::time::timeout(Duration::from_secs(5), async {
        while accepted.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("no second connection attempt");

    consumer.dispose().await;
    server.abort();
}

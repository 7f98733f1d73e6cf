#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use futures_util::SinkExt;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    /// Path plus query, as sent on the request line
    pub target: String,
    pub body: String,
}

impl Recorded {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

type Route = dyn Fn(&str, &str) -> (u16, String) + Send + Sync;

/// Minimal HTTP/1.1 backend: one request per connection, answered by `route`.
pub struct MockBackend {
    pub base_url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
    task: JoinHandle<()>,
}

impl MockBackend {
    pub async fn start<F>(route: F) -> Self
    where
        F: Fn(&str, &str) -> (u16, String) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let route: Arc<Route> = Arc::new(route);

        let recorded = requests.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let recorded = recorded.clone();
                let route = route.clone();
                tokio::spawn(async move {
                    serve_one(stream, route.as_ref(), &recorded).await;
                });
            }
        });

        Self {
            base_url: format!("http://{}", addr),
            requests,
            task,
        }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> Recorded {
        self.requests().pop().expect("no request recorded")
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// recorded before responding so a test sees the request once the client returns
async fn serve_one(stream: TcpStream, route: &Route, recorded: &Mutex<Vec<Recorded>>) -> Option<()> {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await.ok()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?.to_string();

    let mut content_length = 0usize;
    loop {
        let mut header = String::new();
        reader.read_line(&mut header).await.ok()?;
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await.ok()?;
    let body = String::from_utf8_lossy(&body).into_owned();

    let (status, payload) = route(&method, &target);
    recorded.lock().unwrap().push(Recorded { method, target, body });
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        if status < 400 { "OK" } else { "Error" },
        payload.len(),
        payload
    );
    let mut stream = reader.into_inner();
    stream.write_all(response.as_bytes()).await.ok()?;
    stream.shutdown().await.ok();
    Some(())
}

/// An address nothing listens on.
pub async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

/// WebSocket server handing every accepted connection to the test.
pub struct MockEventServer {
    pub url: String,
    connections: mpsc::UnboundedReceiver<WebSocketStream<TcpStream>>,
    task: JoinHandle<()>,
}

impl MockEventServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                if let Ok(ws) = accept_async(stream).await {
                    if tx.send(ws).is_err() {
                        break;
                    }
                }
            }
        });
        Self {
            url: format!("ws://{}/events", addr),
            connections: rx,
            task,
        }
    }

    pub async fn next_connection(&mut self) -> WebSocketStream<TcpStream> {
        tokio::time::timeout(std::time::Duration::from_secs(10), self.connections.recv())
            .await
            .expect("no client connected")
            .expect("server stopped")
    }
}

impl Drop for MockEventServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub async fn send_text(ws: &mut WebSocketStream<TcpStream>, text: &str) {
    ws.send(Message::Text(text.to_string())).await.unwrap();
}

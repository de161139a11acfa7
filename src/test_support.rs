//! Minimal HTTP/1.1 server for exercising the HTTP clients in unit tests.
//!
//! Every connection gets exactly one response and is then closed, so the number of
//! open connections equals the number of requests in flight.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Canned response for one request path; `*` matches any path.
#[derive(Debug, Clone)]
pub struct Route {
    pub path: &'static str,
    pub status: u16,
    pub location: Option<&'static str>,
    pub body: Vec<u8>,
}

impl Route {
    pub fn ok(path: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            path,
            status: 200,
            location: None,
            body: body.into(),
        }
    }

    pub fn status(path: &'static str, status: u16) -> Self {
        Self {
            path,
            status,
            location: None,
            body: Vec::new(),
        }
    }

    pub fn redirect(path: &'static str, location: &'static str) -> Self {
        Self {
            path,
            status: 302,
            location: Some(location),
            body: Vec::new(),
        }
    }
}

#[derive(Default)]
struct Shared {
    requests: Mutex<Vec<String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

pub struct TestServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
}

impl TestServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Raw request heads, in arrival order.
    pub fn requests(&self) -> Vec<String> {
        self.shared.requests.lock().unwrap().clone()
    }

    pub fn hits(&self, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|head| request_path(head) == path)
            .count()
    }

    /// Most connections that were open at the same time.
    pub fn peak_connections(&self) -> usize {
        self.shared.peak.load(Ordering::SeqCst)
    }
}

/// Binds an ephemeral port and serves `routes` until the runtime shuts down.
/// Each response is held back by `delay`.
pub async fn serve(routes: Vec<Route>, delay: Duration) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shared = Arc::new(Shared::default());
    let routes = Arc::new(routes);

    let accept_shared = Arc::clone(&shared);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(respond(
                stream,
                Arc::clone(&routes),
                Arc::clone(&accept_shared),
                delay,
            ));
        }
    });

    TestServer { addr, shared }
}

fn request_path(head: &str) -> &str {
    let target = head.split_whitespace().nth(1).unwrap_or("/");
    target.split('?').next().unwrap_or(target)
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        302 => "Found",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

async fn respond(mut stream: TcpStream, routes: Arc<Vec<Route>>, shared: Arc<Shared>, delay: Duration) {
    let open = shared.active.fetch_add(1, Ordering::SeqCst) + 1;
    shared.peak.fetch_max(open, Ordering::SeqCst);

    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    let head = String::from_utf8_lossy(&head).into_owned();
    let path = request_path(&head).to_string();
    shared.requests.lock().unwrap().push(head);

    tokio::time::sleep(delay).await;

    let route = routes.iter().find(|r| r.path == path || r.path == "*");
    let (status, location, body) = match route {
        Some(route) => (route.status, route.location, route.body.clone()),
        None => (404, None, Vec::new()),
    };
    let mut response = format!(
        "HTTP/1.1 {status} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        reason(status),
        body.len()
    );
    if let Some(location) = location {
        response.push_str(&format!("Location: {location}\r\n"));
    }
    response.push_str("\r\n");

    // Released before answering: the client cannot open its next connection
    // until this response arrives.
    shared.active.fetch_sub(1, Ordering::SeqCst);
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.write_all(&body).await;
    let _ = stream.shutdown().await;
}

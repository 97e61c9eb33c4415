//! Tiny in-process HTTP stub for exercising the adapters and auth flows
//! against canned responses.

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::service::service_fn;
use hyper::{Request, Response, body};
use tokio::net::TcpListener;

/// Serves whatever the handler returns for each request.
///
/// The handler gets the request's path-and-query and a zero-based hit
/// counter, and returns `(status, json_body)`.
pub(crate) struct StubServer {
    addr: std::net::SocketAddr,
    handle: tokio::task::JoinHandle<()>,
    hits: Arc<AtomicU32>,
}

impl StubServer {
    pub(crate) async fn start<F>(handler: F) -> StubServer
    where
        F: Fn(&str, u32) -> (u16, String) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handler = Arc::new(handler);
        let hits = Arc::new(AtomicU32::new(0));
        let hit_counter = Arc::clone(&hits);
        let handle = tokio::spawn(async move {
            loop {
                let Ok((conn, _)) = listener.accept().await else {
                    return;
                };
                let io = hyper_util::rt::TokioIo::new(conn);
                let handler = Arc::clone(&handler);
                let hits = Arc::clone(&hit_counter);
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<body::Incoming>| {
                        let handler = Arc::clone(&handler);
                        let hits = Arc::clone(&hits);
                        async move {
                            let path = req
                                .uri()
                                .path_and_query()
                                .map(|pq| pq.as_str().to_string())
                                .unwrap_or_default();
                            let hit = hits.fetch_add(1, Ordering::SeqCst);
                            let (status, body) = handler(&path, hit);
                            let resp = Response::builder()
                                .status(status)
                                .header("content-type", "application/json")
                                .body(Full::<Bytes>::from(body))
                                .unwrap();
                            Ok::<_, Infallible>(resp)
                        }
                    });
                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(io, service)
                        .await;
                });
            }
        });
        StubServer { addr, handle, hits }
    }

    pub(crate) fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub(crate) fn hits(&self) -> u32 {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

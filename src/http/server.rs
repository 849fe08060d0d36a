//! Worker task endpoint
//!
//! Serves multiplication tasks and health checks over HTTP.

use std::net::SocketAddr;
use std::time::Instant;

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use num_bigint::BigInt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::error::{FlockError, Result};

/// Liveness response body
const STATUS_RESPONSE: &str = "Server is alive";

struct ServeHandle {
    local_addr: SocketAddr,
    stop: oneshot::Sender<()>,
}

/// HTTP server exposing the task and status endpoints
pub struct TaskServer {
    bind_addr: SocketAddr,
    running: Mutex<Option<ServeHandle>>,
}

impl TaskServer {
    /// Create a server that will bind `bind_addr` on start
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            running: Mutex::new(None),
        }
    }

    /// Whether the endpoint is currently serving
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Bound address once running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|handle| handle.local_addr)
    }

    /// Bind and serve in a background task, returning the bound address
    ///
    /// Starting an already-running endpoint is a caller error.
    pub async fn start(&self) -> Result<SocketAddr> {
        if let Some(handle) = self.running.lock().as_ref() {
            return Err(FlockError::EndpointAlreadyRunning {
                address: handle.local_addr.to_string(),
            });
        }

        let listener = tokio::net::TcpListener::bind(self.bind_addr)
            .await
            .map_err(|e| FlockError::Internal {
                message: format!("failed to bind {}: {}", self.bind_addr, e),
            })?;
        let local_addr = listener.local_addr().map_err(|e| FlockError::Internal {
            message: format!("no local address: {}", e),
        })?;

        let (stop, stopped) = oneshot::channel::<()>();
        let serve = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router())
                .with_graceful_shutdown(async move {
                    let _ = stopped.await;
                })
                .await
            {
                warn!("task server error: {}", e);
            }
        });

        let mut running = self.running.lock();
        if let Some(handle) = running.as_ref() {
            serve.abort();
            return Err(FlockError::EndpointAlreadyRunning {
                address: handle.local_addr.to_string(),
            });
        }
        info!("task server listening on {}", local_addr);
        *running = Some(ServeHandle { local_addr, stop });
        Ok(local_addr)
    }

    /// Stop serving; a stopped or never-started server is a no-op
    pub fn shutdown(&self) {
        if let Some(handle) = self.running.lock().take() {
            let _ = handle.stop.send(());
            info!("task server on {} stopped", handle.local_addr);
        }
    }
}

fn router() -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/task", post(handle_task))
}

async fn handle_status() -> &'static str {
    STATUS_RESPONSE
}

async fn handle_task(headers: HeaderMap, body: String) -> Response {
    if header_is_true(&headers, "x-test") {
        return (StatusCode::OK, "Test passed 123\n").into_response();
    }
    let debug_mode = header_is_true(&headers, "x-debug");

    let started = Instant::now();
    match multiply_all(&body) {
        Ok(product) => {
            let payload = format!("Result of multiplication is {}\n", product);
            let mut response = (StatusCode::OK, payload).into_response();
            if debug_mode {
                let timing = format!("Operation took {} ns", started.elapsed().as_nanos());
                if let Ok(value) = HeaderValue::from_str(&timing) {
                    response
                        .headers_mut()
                        .insert(HeaderName::from_static("x-debug-info"), value);
                }
            }
            response
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{}\n", e)).into_response(),
    }
}

fn header_is_true(headers: &HeaderMap, name: &str) -> bool {
    headers
        .get(name)
        .is_some_and(|value| value.as_bytes().eq_ignore_ascii_case(b"true"))
}

/// Product of every comma-separated decimal integer in `body`
pub fn multiply_all(body: &str) -> Result<BigInt> {
    let mut product = BigInt::from(1);
    for token in body.split(',') {
        let token = token.trim();
        let factor: BigInt = token.parse().map_err(|_| FlockError::InvalidTaskPayload {
            reason: format!("not a decimal integer: {:?}", token),
        })?;
        product *= factor;
    }
    Ok(product)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiply_small() {
        assert_eq!(multiply_all("2,3,4").unwrap(), BigInt::from(24));
        assert_eq!(multiply_all("7").unwrap(), BigInt::from(7));
        assert_eq!(multiply_all("-2, 5").unwrap(), BigInt::from(-10));
    }

    #[test]
    fn test_multiply_exceeds_machine_width() {
        let product = multiply_all("99999999999999999999,88888888888888888888").unwrap();
        assert_eq!(
            product.to_string(),
            "8888888888888888888711111111111111111112"
        );
    }

    #[test]
    fn test_multiply_rejects_garbage() {
        assert!(multiply_all("").is_err());
        assert!(multiply_all("2,three").is_err());
        assert!(multiply_all("2,,3").is_err());
    }
}

//! Leader-side task dispatch
//!
//! Fans task payloads out to worker endpoints and joins the results.

use reqwest::Client;

use crate::error::{FlockError, Result};

/// HTTP client for dispatching tasks to registered workers
#[derive(Clone, Default)]
pub struct TaskDispatcher {
    client: Client,
}

impl TaskDispatcher {
    /// Create a dispatcher with a default client
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// POST one payload to a worker's task endpoint, returning the body
    pub async fn send_task(&self, address: &str, payload: Vec<u8>) -> Result<String> {
        let url = format!("{}/task", address.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .body(payload)
            .send()
            .await
            .map_err(|e| FlockError::DispatchFailed {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(FlockError::DispatchFailed {
                address: address.to_string(),
                reason: format!("status {}", response.status()),
            });
        }
        response.text().await.map_err(|e| FlockError::DispatchFailed {
            address: address.to_string(),
            reason: e.to_string(),
        })
    }

    /// Send task `i` to address `i` and join all results in order
    ///
    /// All requests are in flight concurrently; the first failure
    /// observed aborts the whole join.
    pub async fn dispatch(&self, addresses: &[String], tasks: &[String]) -> Result<Vec<String>> {
        if addresses.len() != tasks.len() {
            return Err(FlockError::Internal {
                message: format!(
                    "{} addresses for {} tasks",
                    addresses.len(),
                    tasks.len()
                ),
            });
        }

        let mut handles = Vec::with_capacity(addresses.len());
        for (address, task) in addresses.iter().zip(tasks) {
            let dispatcher = self.clone();
            let address = address.clone();
            let payload = task.clone().into_bytes();
            handles.push(tokio::spawn(async move {
                dispatcher.send_task(&address, payload).await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            let result = handle.await.map_err(|e| FlockError::Internal {
                message: format!("dispatch task failed: {}", e),
            })??;
            results.push(result);
        }
        Ok(results)
    }
}

//! Cancellable HTTP fetches
//!
//! Provider construction routines load remote layer data (tile templates,
//! map configs) through [`FetchClient`]. Every request is a
//! [`CancellableOperation`]; cancelling it aborts the transport call.

use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::{CancellableOperation, OperationError, OperationResult};

/// A completed HTTP exchange; the body is opaque to strata
#[derive(Clone, Debug, PartialEq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Bytes,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn non-2xx responses into `OperationError::Status`
    pub fn error_for_status(self) -> OperationResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(OperationError::Status(self.status))
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> OperationResult<T> {
        serde_json::from_slice(&self.body).map_err(|e| OperationError::Failed(e.to_string()))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// HTTP client whose requests are cancellable operations
#[derive(Clone, Debug, Default)]
pub struct FetchClient {
    client: Client,
}

impl FetchClient {
    pub fn new() -> Self {
        FetchClient::default()
    }

    /// Reuse a configured reqwest client
    pub fn with_client(client: Client) -> Self {
        FetchClient { client }
    }

    /// GET `url`
    pub fn get(&self, url: impl Into<String>) -> CancellableOperation<FetchResponse> {
        self.send(Method::GET, url.into(), None)
    }

    /// POST `body` as JSON to `url`
    pub fn post<B: Serialize + ?Sized>(
        &self,
        url: impl Into<String>,
        body: &B,
    ) -> CancellableOperation<FetchResponse> {
        match serde_json::to_vec(body) {
            Ok(bytes) => self.send(Method::POST, url.into(), Some(bytes)),
            Err(e) => CancellableOperation::rejected(OperationError::Failed(e.to_string())),
        }
    }

    fn send(
        &self,
        method: Method,
        url: String,
        body: Option<Vec<u8>>,
    ) -> CancellableOperation<FetchResponse> {
        let client = self.client.clone();

        CancellableOperation::new(move |on_cancel| {
            let (abort_tx, abort_rx) = oneshot::channel::<()>();
            let aborted_url = url.clone();
            on_cancel.register(move || {
                tracing::debug!(url = %aborted_url, "aborting fetch");
                let _ = abort_tx.send(());
            });

            async move {
                let mut request = client.request(method.clone(), &url);
                if let Some(body) = body {
                    request = request.header(CONTENT_TYPE, "application/json").body(body);
                }

                let exchange = async {
                    let response = request
                        .send()
                        .await
                        .map_err(|e| OperationError::Transport(e.to_string()))?;
                    let status = response.status().as_u16();
                    let body = response
                        .bytes()
                        .await
                        .map_err(|e| OperationError::Transport(e.to_string()))?;
                    Ok::<_, OperationError>(FetchResponse { status, body })
                };

                tokio::select! {
                    result = exchange => {
                        tracing::trace!(%method, url = %url, ok = result.is_ok(), "fetch finished");
                        result
                    }
                    _ = abort_rx => Err(OperationError::Cancelled),
                }
            }
        })
    }
}

use std::time::Duration;

use serde_json::json;
use thiserror::Error;
use tokio::runtime::Handle;
use url::Url;

use crate::config::HandlerEndpoints;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend answered with status {0}")]
    Status(u16),
}

/// Invoked once a write settles, on whatever thread the transport uses.
pub type WriteCallback = Box<dyn FnOnce(Result<String, TransportError>) + Send>;

/// Backend seam for element reads and writes.
pub trait ElementTransport: Send + Sync {
    /// Blocks until the backend answers; returns the raw response body.
    fn fetch_value(&self, element: &str) -> Result<String, TransportError>;

    /// Issues the write and returns immediately.
    fn store_value(&self, element: &str, value: &str, on_complete: WriteCallback);
}

/// Talks to the block's `scorm_get_value` / `scorm_set_value` handlers.
///
/// Reads go through the blocking client and must run on a thread that is not
/// driving a tokio runtime. Writes are spawned onto `handle`.
pub struct HttpTransport {
    get_value_url: Url,
    set_value_url: Url,
    blocking: reqwest::blocking::Client,
    client: reqwest::Client,
    handle: Handle,
    write_timeout: Option<Duration>,
}

impl HttpTransport {
    pub fn new(
        endpoints: &HandlerEndpoints,
        handle: Handle,
        write_timeout: Option<Duration>,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            get_value_url: endpoints.get_value.clone(),
            set_value_url: endpoints.set_value.clone(),
            blocking: reqwest::blocking::Client::builder().build()?,
            client: reqwest::Client::builder().build()?,
            handle,
            write_timeout,
        })
    }
}

impl ElementTransport for HttpTransport {
    fn fetch_value(&self, element: &str) -> Result<String, TransportError> {
        let response = self
            .blocking
            .post(self.get_value_url.clone())
            .json(&json!({ "name": element }))
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        Ok(response.text()?)
    }

    fn store_value(&self, element: &str, value: &str, on_complete: WriteCallback) {
        let mut request = self
            .client
            .post(self.set_value_url.clone())
            .json(&json!({ "name": element, "value": value }));
        if let Some(timeout) = self.write_timeout {
            request = request.timeout(timeout);
        }

        self.handle.spawn(async move {
            let result = async {
                let response = request.send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(TransportError::Status(status.as_u16()));
                }
                Ok(response.text().await?)
            }
            .await;
            on_complete(result);
        });
    }
}

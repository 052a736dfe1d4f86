mod transaction;
pub(crate) use transaction::*;

mod response;
use response::parse_response;

use crate::api::DeviceKind;
use crate::config::{ConfigError, ConnectionConfig};
use crate::motion::sleep_or_abort;
use crate::{Error, Result};
use futures::TryFutureExt;
use mime::Mime;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Get,
    Put,
}

/// HTTP client addressing a single device on an Alpaca server.
///
/// Requests go to `http://<server>:<port>/api/v1/<device_type>/<device>/<action>`.
#[derive(Debug)]
pub struct AlpacaClient {
    inner: reqwest::Client,
    base_url: reqwest::Url,
    client_id: u32,
    kind: DeviceKind,
    device_number: u32,
    alive_parameter: String,
    timeout: Duration,
    connected: AtomicBool,
}

impl AlpacaClient {
    /// Creates a client for a device of the given type.
    ///
    /// The client starts disconnected; run [`check_connected`](Self::check_connected) to connect.
    pub fn new(kind: DeviceKind, config: &ConnectionConfig) -> Result<Self, ConfigError> {
        let base_url = reqwest::Url::parse(&format!(
            "http://{server}:{port}/api/{version}/{kind}/{device}/",
            server = config.server,
            port = config.port,
            version = config.version,
            kind = kind.as_path(),
            device = config.device,
        ))
        .map_err(|err| ConfigError::invalid(&config.server, format_args!("invalid server address: {err}")))?;

        Ok(Self {
            inner: reqwest::Client::new(),
            base_url,
            client_id: rand::random(),
            kind,
            device_number: config.device,
            alive_parameter: config.alive_parameter.clone(),
            timeout: config.timeout()?,
            connected: AtomicBool::new(false),
        })
    }

    /// Device type this client talks to.
    pub const fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Device number on the server.
    pub const fn device_number(&self) -> u32 {
        self.device_number
    }

    /// URL prefix of all requests.
    pub const fn base_url(&self) -> &reqwest::Url {
        &self.base_url
    }

    /// Whether the last liveness check succeeded.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Requests the alive parameter and updates the connection state.
    ///
    /// State transitions are logged; the result is whether the server could be reached.
    pub async fn check_connected(&self) -> bool {
        let connected = match self
            .get_unchecked::<serde_json::Value>(&self.alive_parameter)
            .await
        {
            Ok(_) => true,
            Err(err) => {
                tracing::debug!(%err, "Liveness check failed");
                false
            }
        };

        let previous = self.connected.swap(connected, Ordering::AcqRel);
        if previous != connected {
            if connected {
                tracing::info!(url = %self.base_url, "Connected to Alpaca server");
            } else {
                tracing::warn!(url = %self.base_url, "Lost connection to Alpaca server");
            }
        }

        connected
    }

    /// Spawns a task that runs [`check_connected`](Self::check_connected) every `interval`.
    pub fn spawn_liveness(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let span = tracing::debug_span!("liveness", url = %self.base_url);

        tokio::spawn(
            async move {
                loop {
                    let _ = this.check_connected().await;
                    if sleep_or_abort(&shutdown, interval).await.is_err() {
                        break;
                    }
                }
            }
            .instrument(span),
        )
    }

    /// Reads a property, requiring the device to be connected.
    pub async fn get<T: 'static + DeserializeOwned>(&self, name: &str) -> Result<T> {
        self.ensure_connected()?;
        self.get_unchecked(name).await
    }

    /// Reads a property regardless of the connection state.
    pub async fn get_unchecked<T: 'static + DeserializeOwned>(&self, name: &str) -> Result<T> {
        self.request(Method::Get, name, crate::params::params! {}, self.timeout)
            .await
    }

    /// Sets a property or calls a method, requiring the device to be connected.
    pub(crate) async fn put(
        &self,
        name: &str,
        params: impl Debug + Serialize + Send,
    ) -> Result<()> {
        self.put_with_timeout(name, params, self.timeout).await
    }

    /// Like [`put`](Self::put) but with a custom timeout, for long-running synchronous methods.
    pub(crate) async fn put_with_timeout(
        &self,
        name: &str,
        params: impl Debug + Serialize + Send,
        timeout: Duration,
    ) -> Result<()> {
        self.ensure_connected()?;
        self.request(Method::Put, name, params, timeout).await
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    async fn request<T: 'static + DeserializeOwned>(
        &self,
        method: Method,
        name: &str,
        params: impl Debug + Serialize + Send,
        timeout: Duration,
    ) -> Result<T> {
        // Alpaca URLs are case sensitive and always lower case.
        let action = name.to_ascii_lowercase();
        let url = self
            .base_url
            .join(&action)
            .map_err(|err| Error::protocol(&self.base_url, format_args!("invalid action {name:?}: {err}")))?;
        let request_transaction = RequestTransaction::new(self.client_id);

        let span = tracing::debug_span!(
            "Alpaca transaction",
            ?method,
            %url,
            ?params,
            client_transaction_id = request_transaction.client_transaction_id,
            client_id = request_transaction.client_id,
        );

        async move {
            let request = self
                .inner
                .request(
                    match method {
                        Method::Get => reqwest::Method::GET,
                        Method::Put => reqwest::Method::PUT,
                    },
                    url.clone(),
                )
                .timeout(timeout);

            let add_params = match method {
                Method::Get => reqwest::RequestBuilder::query,
                Method::Put => reqwest::RequestBuilder::form,
            };
            let request = add_params(
                request,
                &RequestWithTransaction {
                    transaction: request_transaction,
                    params,
                },
            );

            let unreachable = |source| Error::Unreachable {
                url: url.to_string(),
                source,
            };

            let response = request.send().await.map_err(unreachable)?;
            let status = response.status();
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(Error::Http {
                    url: url.to_string(),
                    status,
                    message,
                });
            }

            let mime_type = response
                .headers()
                .get(CONTENT_TYPE)
                .ok_or_else(|| Error::protocol(&url, "missing Content-Type header"))?
                .to_str()
                .map_err(|err| Error::protocol(&url, err))?
                .parse::<Mime>()
                .map_err(|err| Error::protocol(&url, err))?;
            let bytes = response.bytes().await.map_err(unreachable)?;

            let ResponseWithTransaction {
                transaction: response_transaction,
                response,
            } = parse_response::<T>(&mime_type, &bytes).map_err(|reason| Error::protocol(&url, reason))?;

            tracing::debug!(
                server_transaction_id = response_transaction.server_transaction_id,
                "Received response",
            );

            match response_transaction.client_transaction_id {
                Some(received_client_transaction_id)
                    if received_client_transaction_id
                        != request_transaction.client_transaction_id =>
                {
                    tracing::warn!(
                        sent = request_transaction.client_transaction_id,
                        received = received_client_transaction_id,
                        "ClientTransactionID mismatch",
                    );
                }
                _ => {}
            }

            Ok::<_, Error>(response?)
        }
        .inspect_err(|err| tracing::debug!(%err, "Alpaca request failed"))
        .instrument(span)
        .await
    }
}

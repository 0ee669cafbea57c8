//! Client of the UpdateHub server API.

use std::io::{self, Read};
use std::time::Duration;

use serde::Serialize;
use tracing::debug;
use ureq::Agent;

use super::{ProbeResponse, Reporter, Updater};
use crate::error::BackendError;
use crate::firmware::FirmwareMetadata;
use crate::hub::DOWNLOAD_TIMEOUT;
use crate::metadata::UpdateMetadata;

pub const API_CONTENT_TYPE: &str = "application/vnd.updatehub-v1+json";

/// Header the server uses to request an additional poll, in seconds.
pub const EXTRA_POLL_HEADER: &str = "Add-Extra-Poll";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximal duration of waiting for the response headers.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);

/// Location of the server API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiClient {
    server: String,
}

impl ApiClient {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// URL of the given API path.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.server.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// URI of an object of a package.
    pub fn object_uri(product_uid: &str, package_uid: &str, object: &str) -> String {
        format!("/products/{product_uid}/packages/{package_uid}/objects/{object}")
    }
}

/// Updater and reporter talking to the server over HTTP.
#[derive(Debug, Clone)]
pub struct HttpApi {
    agent: Agent,
}

impl HttpApi {
    pub fn new() -> Self {
        Self::with_timeouts(RESPONSE_TIMEOUT, DOWNLOAD_TIMEOUT)
    }

    /// Client giving up if the response headers or the response body take longer
    /// than the respective timeout.
    pub fn with_timeouts(response: Duration, body: Duration) -> Self {
        let config = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_connect(Some(CONNECT_TIMEOUT))
            .timeout_recv_response(Some(response))
            .timeout_recv_body(Some(body))
            .build();
        Self {
            agent: Agent::new_with_config(config),
        }
    }
}

impl Default for HttpApi {
    fn default() -> Self {
        Self::new()
    }
}

fn request_error(message: &str, error: ureq::Error) -> BackendError {
    if matches!(error, ureq::Error::Timeout(_)) {
        BackendError::timeout(message).with_source(error)
    } else {
        BackendError::new(message).with_source(error)
    }
}

/// Body of a download, reporting timeouts as [`io::ErrorKind::TimedOut`].
struct DownloadReader<R>(R);

impl<R: Read> Read for DownloadReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf).map_err(|error| {
            let timed_out = matches!(
                error.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ) || error
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<ureq::Error>())
                .is_some_and(|inner| matches!(inner, ureq::Error::Timeout(_)));
            if timed_out {
                io::Error::new(io::ErrorKind::TimedOut, error)
            } else {
                error
            }
        })
    }
}

fn unexpected_status(message: &str, status: u16) -> BackendError {
    BackendError::new(format!("{message}: unexpected status code {status}"))
}

fn to_json(value: &impl Serialize) -> Result<String, BackendError> {
    serde_json::to_string(value)
        .map_err(|error| BackendError::new("unable to serialize request").with_source(error))
}

impl Updater for HttpApi {
    fn probe_update(
        &self,
        api: &ApiClient,
        firmware: &FirmwareMetadata,
        retries: u64,
    ) -> Result<ProbeResponse, BackendError> {
        const MESSAGE: &str = "unable to probe for updates";
        let body = to_json(firmware)?;
        let mut response = self
            .agent
            .post(&api.url("/upgrades"))
            .header("Content-Type", "application/json")
            .header("Api-Content-Type", API_CONTENT_TYPE)
            .header("Api-Retries", retries.to_string())
            .send(body.as_str())
            .map_err(|error| request_error(MESSAGE, error))?;
        let extra_poll = response
            .headers()
            .get(EXTRA_POLL_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_extra_poll);
        match response.status().as_u16() {
            200 => {
                let raw = response
                    .body_mut()
                    .read_to_vec()
                    .map_err(|error| request_error(MESSAGE, error))?;
                let metadata = UpdateMetadata::from_slice(&raw).map_err(|error| {
                    BackendError::new("invalid update metadata").with_source(error)
                })?;
                debug!("update {} available", metadata.package_uid());
                Ok(ProbeResponse {
                    metadata: Some(metadata),
                    extra_poll,
                })
            }
            404 => Ok(ProbeResponse {
                metadata: None,
                extra_poll,
            }),
            status => Err(unexpected_status(MESSAGE, status)),
        }
    }

    fn download_update(
        &self,
        api: &ApiClient,
        uri: &str,
    ) -> Result<(Box<dyn Read>, Option<u64>), BackendError> {
        const MESSAGE: &str = "unable to download object";
        let response = self
            .agent
            .get(&api.url(uri))
            .header("Api-Content-Type", API_CONTENT_TYPE)
            .call()
            .map_err(|error| request_error(MESSAGE, error))?;
        let status = response.status().as_u16();
        if status != 200 {
            return Err(unexpected_status(MESSAGE, status));
        }
        let length = response
            .headers()
            .get("Content-Length")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok());
        let reader = DownloadReader(response.into_body().into_reader());
        Ok((Box::new(reader), length))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct StateReport<'r> {
    status: &'r str,
    package_uid: &'r str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<&'r str>,
    #[serde(flatten)]
    firmware: &'r FirmwareMetadata,
}

impl Reporter for HttpApi {
    fn report_state(
        &self,
        api: &ApiClient,
        package_uid: &str,
        state: &str,
        error_message: Option<&str>,
        firmware: &FirmwareMetadata,
    ) -> Result<(), BackendError> {
        const MESSAGE: &str = "unable to report state";
        let body = to_json(&StateReport {
            status: state,
            package_uid,
            error_message,
            firmware,
        })?;
        let response = self
            .agent
            .post(&api.url("/report"))
            .header("Content-Type", "application/json")
            .header("Api-Content-Type", API_CONTENT_TYPE)
            .send(body.as_str())
            .map_err(|error| request_error(MESSAGE, error))?;
        match response.status().as_u16() {
            200 => Ok(()),
            status => Err(unexpected_status(MESSAGE, status)),
        }
    }
}

fn parse_extra_poll(value: &str) -> Option<Duration> {
    value.trim().parse().ok().map(Duration::from_secs)
}

//! Shared wreq plumbing for the backend adapters.
//!
//! Clients use a connect timeout plus an idle-read timeout rather than a
//! total deadline so long-lived streams are not cut off; backends that only
//! make unary calls may add a total deadline on top.

use std::time::Duration;

use bytes::Bytes;

use crate::adapter::{AdapterError, AdapterResult};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn build_client(total_timeout: Option<Duration>) -> AdapterResult<wreq::Client> {
    let mut builder = wreq::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .read_timeout(READ_IDLE_TIMEOUT);
    if let Some(timeout) = total_timeout {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .map_err(|err| AdapterError::Transport(err.to_string()))
}

pub(crate) fn transport(err: wreq::Error) -> AdapterError {
    AdapterError::Transport(err.to_string())
}

/// Send a unary request; returns status and the full body.
pub(crate) async fn execute(builder: wreq::RequestBuilder) -> AdapterResult<(u16, Bytes)> {
    let response = builder.send().await.map_err(transport)?;
    let status = response.status().as_u16();
    let body = response.bytes().await.map_err(transport)?;
    Ok((status, body))
}

/// Send a unary request expecting 200; non-2xx becomes the matching error.
pub(crate) async fn execute_json(builder: wreq::RequestBuilder) -> AdapterResult<serde_json::Value> {
    let (status, body) = execute(builder).await?;
    if !(200..300).contains(&status) {
        return Err(AdapterError::from_status(status, &body));
    }
    serde_json::from_slice(&body).map_err(|err| AdapterError::Decode(err.to_string()))
}

/// Send a streaming request; non-2xx is read to completion and surfaced as
/// an error, a 2xx hands back the live response for incremental reads.
pub(crate) async fn execute_stream(builder: wreq::RequestBuilder) -> AdapterResult<wreq::Response> {
    let response = builder.send().await.map_err(transport)?;
    let status = response.status().as_u16();
    if !(200..300).contains(&status) {
        let body = response.bytes().await.unwrap_or_default();
        return Err(AdapterError::from_status(status, &body));
    }
    Ok(response)
}

//! HTTP client for the daemon's Unix socket API.

use std::path::Path;

use anyhow::Context;
use http_body_util::{BodyExt, Full};
use hyper::Request;
use hyper::body::Bytes;
use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;

use crib_runtime::{CreateRequest, Created};

/// Sends a create request to the daemon and returns the result.
///
/// # Errors
///
/// Returns an error when the daemon is unreachable, the request fails,
/// or the daemon answers with a non-201 status.
pub async fn create_container(socket: &Path, request: &CreateRequest) -> anyhow::Result<Created> {
    let stream = UnixStream::connect(socket)
        .await
        .with_context(|| format!("connecting to daemon at {}", socket.display()))?;
    let io = TokioIo::new(stream);

    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .context("HTTP handshake failed")?;
    let _ = tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!(error = %e, "client connection closed");
        }
    });

    let body = serde_json::to_vec(request).context("serializing request")?;
    let http_request = Request::builder()
        .method("POST")
        .uri("http://localhost/containers/create")
        .header("host", "localhost")
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .context("building request")?;

    let response = sender
        .send_request(http_request)
        .await
        .context("sending create request")?;
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .context("reading response")?
        .to_bytes();

    if status != hyper::StatusCode::CREATED {
        anyhow::bail!(
            "daemon returned {status}: {}",
            String::from_utf8_lossy(&bytes)
        );
    }
    serde_json::from_slice(&bytes).context("decoding response")
}

//! HTTP plumbing for the plugin socket.
//!
//! hyper owns the wire format; this module only bounds request bodies and
//! builds the JSON responses every endpoint returns.

use std::io;

use http::header::{CONTENT_TYPE, HeaderValue};
use http::{Response, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use serde::Serialize;
use thiserror::Error;

use crate::constants::{MAX_BODY_SIZE, PLUGIN_CONTENT_TYPE};

/// Transport error type.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The request body could not be read off the connection.
    #[error("malformed request body: {0}")]
    Body(String),

    #[error("request body exceeds {0} bytes")]
    TooLarge(usize),
}

impl TransportError {
    /// Status reported to the client for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            TransportError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            TransportError::Body(_) => StatusCode::BAD_REQUEST,
            TransportError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Collect a request body, refusing anything over [`MAX_BODY_SIZE`].
pub async fn read_body<B>(body: B) -> Result<Bytes, TransportError>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, MAX_BODY_SIZE).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => Err(TransportError::TooLarge(MAX_BODY_SIZE)),
        Err(e) => Err(TransportError::Body(e.to_string())),
    }
}

/// Encode `body` as a plugin protocol response.
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let (status, bytes) = match serde_json::to_vec(body) {
        Ok(bytes) => (status, bytes),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode response");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                br#"{"Err":"failed to encode response"}"#.to_vec(),
            )
        }
    };

    let mut response = Response::new(Full::new(Bytes::from(bytes)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(PLUGIN_CONTENT_TYPE));
    response
}

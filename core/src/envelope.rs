//! Response envelope decoding and HTTP status classification.
//!
//! The service wraps failures (and some acknowledgements) in a small JSON
//! object with optional `status` and `error` fields. Only HTTP 200 paired
//! with `status == "OK"` counts as success; the status code is authoritative,
//! so a non-200 response is a failure whatever its body says.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{ApiError, Error, Result};

/// Envelope `status` value reported on success.
pub const API_STATUS_OK: &str = "OK";

pub const HTTP_OK: u16 = 200;

/// Whether a failed attempt with this status is worth repeating.
///
/// 5xx, 408 Request Timeout and 429 Too Many Requests are transient. 202
/// Accepted is also retried: export answers 202 while data is still being
/// prepared, and the service has always been polled through the generic retry
/// path rather than a dedicated wait.
pub fn is_retriable_status(status: u16) -> bool {
    status >= 500 || matches!(status, 408 | 429 | 202)
}

#[derive(Debug, Default, Deserialize)]
struct Envelope {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Decode an envelope body received with `http_status`.
///
/// Returns `Ok(())` only for HTTP 200 with `status == "OK"`. Every other
/// well-formed envelope becomes `Error::Api`; a body that is not a JSON
/// object (arrays included) becomes `Error::Decode` carrying the raw text
/// and status code.
pub fn decode_envelope(http_status: u16, body: &[u8]) -> Result<()> {
    let decode_error = |source: serde_json::Error| Error::Decode {
        http_status,
        raw_body: String::from_utf8_lossy(body).into_owned(),
        source,
    };
    // Derived struct impls also accept arrays; only a map is an envelope.
    let object: Map<String, Value> = serde_json::from_slice(body).map_err(decode_error)?;
    let envelope: Envelope = serde_json::from_value(Value::Object(object)).map_err(decode_error)?;

    if http_status == HTTP_OK
        && envelope.status.as_deref() == Some(API_STATUS_OK)
        && envelope.error.is_none()
    {
        return Ok(());
    }

    Err(Error::Api(ApiError {
        status: envelope.status,
        message: envelope.error.unwrap_or_default(),
        http_status,
    }))
}

/// Classify a non-200 response into its terminal error.
pub(crate) fn error_from_response(http_status: u16, body: &[u8]) -> Error {
    match decode_envelope(http_status, body) {
        Err(err) => err,
        // Status code wins over an "OK" body.
        Ok(()) => Error::Api(ApiError {
            status: Some(API_STATUS_OK.to_string()),
            message: String::new(),
            http_status,
        }),
    }
}

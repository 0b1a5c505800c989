//! Optional JSON normalization of upstream documents.

use bytes::Bytes;
use serde_json::Value;

use crate::error::FormatError;

/// Formats an upstream body for serving.
///
/// With `pretty` disabled the body is returned untouched. Otherwise it is
/// parsed and written back with two-space indentation; object keys come out
/// in the order `serde_json::Map` keeps them (sorted), so the output for a
/// given document is stable across fetches.
///
/// # Errors
///
/// [`FormatError::Parse`] when the body is not JSON,
/// [`FormatError::Serialize`] when the parsed value cannot be written back.
pub fn format_document(body: Bytes, pretty: bool) -> Result<Bytes, FormatError> {
    if !pretty {
        return Ok(body);
    }

    let value: Value = serde_json::from_slice(&body).map_err(FormatError::Parse)?;
    let formatted = serde_json::to_vec_pretty(&value).map_err(FormatError::Serialize)?;
    Ok(Bytes::from(formatted))
}

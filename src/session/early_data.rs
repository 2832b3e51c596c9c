//! Early data carried in the `Sec-WebSocket-Protocol` request header.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use bytes::Bytes;

use super::SessionError;

/// URL-safe alphabet, padding optional.
const EARLY_DATA: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode the early-data header value.
///
/// Standard-alphabet input (`+`, `/`) is accepted as well. An absent or empty
/// value yields `None`.
pub fn decode_early_data(value: Option<&str>) -> Result<Option<Bytes>, SessionError> {
    let value = match value.map(str::trim) {
        Some(v) if !v.is_empty() => v,
        _ => return Ok(None),
    };

    let normalized: String = value
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();

    let decoded = EARLY_DATA
        .decode(normalized.as_bytes())
        .map_err(|e| SessionError::MalformedEarlyData(e.to_string()))?;

    Ok((!decoded.is_empty()).then(|| Bytes::from(decoded)))
}

//! Boundary checks applied before any state is touched.

use base64::{engine::general_purpose::STANDARD, Engine as _};

/// Upper bound for client and group ids, in characters.
pub const MAX_ID_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("missing field: {0}")]
    Missing(&'static str),
    #[error("{field} must be 1..={max} characters")]
    BadLength { field: &'static str, max: usize },
    #[error("{0} is not valid base64")]
    NotBase64(&'static str),
    #[error("{field} exceeds {max} bytes")]
    TooLarge { field: &'static str, max: usize },
}

pub fn check_id(field: &'static str, value: &str) -> Result<(), WireError> {
    match value.chars().count() {
        0 => Err(WireError::Missing(field)),
        n if n > MAX_ID_LEN => Err(WireError::BadLength {
            field,
            max: MAX_ID_LEN,
        }),
        _ => Ok(()),
    }
}

/// Checks that `value` is non-empty, padded standard base64.
pub fn check_base64(field: &'static str, value: &str) -> Result<(), WireError> {
    unb64(field, value).map(|_| ())
}

pub fn b64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn unb64(field: &'static str, value: &str) -> Result<Vec<u8>, WireError> {
    if value.is_empty() {
        return Err(WireError::Missing(field));
    }
    STANDARD
        .decode(value.as_bytes())
        .map_err(|_| WireError::NotBase64(field))
}

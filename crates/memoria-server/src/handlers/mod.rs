pub mod memories;
pub mod personas;
pub mod vectors;

use memoria_core::Error as CoreError;
use uuid::Uuid;

use crate::error::ApiError;

/// Parses a path/body string into a `Uuid`, mapping a bad value onto the
/// same `Validation` bucket spec §7 reserves for malformed input.
pub(crate) fn parse_uuid(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw)
        .map_err(|err| ApiError(CoreError::Validation(format!("invalid id '{raw}': {err}"))))
}

pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

//! Domain status codes returned by native services.

use std::fmt;

/// Signed 32-bit result code of a native call.
///
/// Zero is success.  Native failures are negative, following the device's
/// result-code convention where the top bit marks an error.  A failing status
/// is still carried inside a successful reply; it is never a protocol error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StatusCode(pub i32);

impl StatusCode {
    pub const SUCCESS: StatusCode = StatusCode(0);

    /// The streaming channel could not bind its socket or start its worker.
    pub const STREAM_UNAVAILABLE: StatusCode = StatusCode(0xE0A0_1000_u32 as i32);

    /// Returns `true` for a zero status.
    pub fn is_success(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` for a negative status.
    pub fn is_failure(self) -> bool {
        self.0 < 0
    }

    /// Converts to a `Result`, treating any negative code as an error.
    pub fn into_result(self) -> Result<(), StatusCode> {
        if self.is_failure() {
            Err(self)
        } else {
            Ok(())
        }
    }
}

impl From<i32> for StatusCode {
    fn from(value: i32) -> Self {
        StatusCode(value)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0 as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(StatusCode::SUCCESS.is_success());
        assert!(!StatusCode::SUCCESS.is_failure());
        assert!(StatusCode::STREAM_UNAVAILABLE.is_failure());
        assert!(!StatusCode(5).is_failure(), "positive codes are informational");
    }

    #[test]
    fn test_status_display_is_hex() {
        assert_eq!(StatusCode(-1).to_string(), "0xFFFFFFFF");
        assert_eq!(StatusCode::SUCCESS.to_string(), "0x00000000");
    }

    #[test]
    fn test_into_result() {
        assert_eq!(StatusCode::SUCCESS.into_result(), Ok(()));
        assert_eq!(StatusCode(-7).into_result(), Err(StatusCode(-7)));
    }
}

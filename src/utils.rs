use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{CdpError, Result};

/// Decodes a base64 protocol payload (screenshots, response bodies).
pub(crate) fn decode_base64(data: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(data)
        .map_err(|err| CdpError::InvalidArgs(format!("invalid base64 payload: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_valid_payloads() {
        assert_eq!(decode_base64("aGVsbG8=").unwrap(), b"hello");
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            decode_base64("not base64!"),
            Err(CdpError::InvalidArgs(_))
        ));
    }
}

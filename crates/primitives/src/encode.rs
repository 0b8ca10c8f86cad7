use base64::{engine::general_purpose::STANDARD, Engine};

/// Standard base64 with padding, as used in every signature/hash field.
pub fn b64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn b64_decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(s)
}

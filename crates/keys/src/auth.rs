//! Wire-level request signing between chains.
//!
//! Every authenticated request carries `Authorization: DC1-HMAC-<HASH>
//! <key_id>:<base64_sig>` over a canonical string binding the verb, path,
//! receiver chain id, timestamp, content type and a digest of the body.

use chrono::{DateTime, SecondsFormat, Utc};
use dragonnet_common::config::HashAlgorithm;
use dragonnet_primitives::encode;
use hmac::{Hmac, Mac, SimpleHmac};

pub const AUTH_VERSION: &str = "1";

/// How far a request timestamp may drift from our clock.
pub const TIMESTAMP_TOLERANCE_SECS: i64 = 30;

type HmacSha256 = Hmac<sha2::Sha256>;
type HmacSha3_256 = Hmac<sha3::Sha3_256>;
type HmacBlake2b512 = SimpleHmac<blake2::Blake2b512>;

/// Digest of the request body under the header-selected algorithm.
pub fn content_digest(algo: HashAlgorithm, body: &[u8]) -> Vec<u8> {
    use blake2::Digest;
    match algo {
        HashAlgorithm::Sha256 => sha2::Sha256::digest(body).to_vec(),
        HashAlgorithm::Sha3_256 => sha3::Sha3_256::digest(body).to_vec(),
        HashAlgorithm::Blake2b512 => blake2::Blake2b512::digest(body).to_vec(),
    }
}

/// The canonical string that gets signed.
pub fn signature_string(
    algo: HashAlgorithm,
    http_verb: &str,
    full_path: &str,
    dc_id: &str,
    timestamp: &str,
    content_type: &str,
    body: &[u8],
) -> String {
    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        http_verb.to_ascii_uppercase(),
        full_path,
        dc_id,
        timestamp,
        content_type,
        encode::b64(&content_digest(algo, body)),
    )
}

pub fn hmac_sign(algo: HashAlgorithm, secret: &[u8], message: &str) -> String {
    let tag = match algo {
        HashAlgorithm::Sha256 => {
            let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key size");
            mac.update(message.as_bytes());
            mac.finalize().into_bytes().to_vec()
        }
        HashAlgorithm::Sha3_256 => {
            let mut mac = HmacSha3_256::new_from_slice(secret).expect("hmac accepts any key size");
            mac.update(message.as_bytes());
            mac.finalize().into_bytes().to_vec()
        }
        HashAlgorithm::Blake2b512 => {
            let mut mac =
                HmacBlake2b512::new_from_slice(secret).expect("hmac accepts any key size");
            mac.update(message.as_bytes());
            mac.finalize().into_bytes().to_vec()
        }
    };
    encode::b64(&tag)
}

/// Constant-time comparison against the claimed signature.
pub fn hmac_verify(algo: HashAlgorithm, secret: &[u8], message: &str, signature_b64: &str) -> bool {
    let Ok(claimed) = encode::b64_decode(signature_b64) else {
        return false;
    };
    match algo {
        HashAlgorithm::Sha256 => {
            let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key size");
            mac.update(message.as_bytes());
            mac.verify_slice(&claimed).is_ok()
        }
        HashAlgorithm::Sha3_256 => {
            let mut mac = HmacSha3_256::new_from_slice(secret).expect("hmac accepts any key size");
            mac.update(message.as_bytes());
            mac.verify_slice(&claimed).is_ok()
        }
        HashAlgorithm::Blake2b512 => {
            let mut mac =
                HmacBlake2b512::new_from_slice(secret).expect("hmac accepts any key size");
            mac.update(message.as_bytes());
            mac.verify_slice(&claimed).is_ok()
        }
    }
}

/// Parsed `Authorization` header.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AuthHeader {
    pub algorithm: HashAlgorithm,
    pub key_id: String,
    pub signature: String,
}

impl AuthHeader {
    /// Parse `DC1-HMAC-<HASH> <key_id>:<base64_sig>`; None on any deviation.
    pub fn parse(header: &str) -> Option<Self> {
        let (scheme, credentials) = header.split_once(' ')?;
        let algo_token = scheme.strip_prefix("DC1-HMAC-")?;
        let algorithm = HashAlgorithm::from_wire_token(algo_token)?;
        let (key_id, signature) = credentials.split_once(':')?;
        if key_id.is_empty() || signature.is_empty() {
            return None;
        }
        Some(Self {
            algorithm,
            key_id: key_id.to_string(),
            signature: signature.to_string(),
        })
    }

    pub fn format(algorithm: HashAlgorithm, key_id: &str, signature: &str) -> String {
        format!(
            "DC1-HMAC-{} {}:{}",
            algorithm.wire_token(),
            key_id,
            signature
        )
    }
}

/// Headers for an outbound authenticated request to another chain.
pub fn generate_authenticated_request(
    algo: HashAlgorithm,
    key_id: &str,
    secret: &[u8],
    http_verb: &str,
    receiver_dc_id: &str,
    full_path: &str,
    content_type: &str,
    body: &[u8],
) -> Vec<(String, String)> {
    let timestamp = timestamp_now();
    let message = signature_string(
        algo,
        http_verb,
        full_path,
        receiver_dc_id,
        &timestamp,
        content_type,
        body,
    );
    let signature = hmac_sign(algo, secret, &message);
    vec![
        (
            "Authorization".to_string(),
            AuthHeader::format(algo, key_id, &signature),
        ),
        ("dragonchain".to_string(), receiver_dc_id.to_string()),
        ("timestamp".to_string(), timestamp),
        ("Content-Type".to_string(), content_type.to_string()),
    ]
}

pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Whether an RFC3339 timestamp is within tolerance of our clock.
pub fn timestamp_is_fresh(timestamp: &str) -> bool {
    let Ok(parsed) = DateTime::parse_from_rfc3339(timestamp) else {
        return false;
    };
    (Utc::now() - parsed.with_timezone(&Utc))
        .num_seconds()
        .abs()
        <= TIMESTAMP_TOLERANCE_SECS
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"shared-interchain-secret";

    #[test]
    fn round_trip_verifies_for_every_algorithm() {
        for algo in [
            HashAlgorithm::Sha256,
            HashAlgorithm::Sha3_256,
            HashAlgorithm::Blake2b512,
        ] {
            let message = signature_string(
                algo,
                "POST",
                "/v1/enqueue",
                "receiver-chain",
                "2026-08-01T00:00:00Z",
                "application/json",
                br#"{"some":"block"}"#,
            );
            let sig = hmac_sign(algo, SECRET, &message);
            assert!(hmac_verify(algo, SECRET, &message, &sig));
            assert!(!hmac_verify(algo, b"wrong-secret", &message, &sig));
        }
    }

    #[test]
    fn altering_any_component_breaks_the_signature() {
        let algo = HashAlgorithm::Sha256;
        let sig = hmac_sign(
            algo,
            SECRET,
            &signature_string(algo, "POST", "/v1/receipt", "dc", "t", "ct", b"body"),
        );
        let altered = signature_string(algo, "POST", "/v1/receipt", "dc", "t", "ct", b"other");
        assert!(!hmac_verify(algo, SECRET, &altered, &sig));
    }

    #[test]
    fn auth_header_parses_and_rejects_malformed() {
        let parsed = AuthHeader::parse("DC1-HMAC-SHA3-256 mykey:c2lnbmF0dXJl").unwrap();
        assert_eq!(parsed.algorithm, HashAlgorithm::Sha3_256);
        assert_eq!(parsed.key_id, "mykey");

        assert!(AuthHeader::parse("DC1-HMAC-MD5 k:s").is_none());
        assert!(AuthHeader::parse("DC1-HMAC-SHA256 nosig").is_none());
        assert!(AuthHeader::parse("Bearer token").is_none());
    }

    #[test]
    fn generated_request_passes_verification() {
        let headers = generate_authenticated_request(
            HashAlgorithm::Blake2b512,
            "key-1",
            SECRET,
            "POST",
            "receiver",
            "/v1/enqueue",
            "application/json",
            b"{}",
        );
        let auth = headers.iter().find(|(k, _)| k == "Authorization").unwrap();
        let timestamp = headers.iter().find(|(k, _)| k == "timestamp").unwrap();
        let parsed = AuthHeader::parse(&auth.1).unwrap();

        let message = signature_string(
            parsed.algorithm,
            "POST",
            "/v1/enqueue",
            "receiver",
            &timestamp.1,
            "application/json",
            b"{}",
        );
        assert!(hmac_verify(parsed.algorithm, SECRET, &message, &parsed.signature));
        assert!(timestamp_is_fresh(&timestamp.1));
    }
}

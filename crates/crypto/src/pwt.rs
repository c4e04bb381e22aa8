//! # Pixur web token codec
//!
//! A token is `H.P.S`: the base64url header record, the base64url payload
//! record and the base64url HMAC-SHA-512/256 of the `H.P` text.
//!
//! ## Decode order
//! 1. Exactly three segments; payload and signature non-empty
//! 2. Header decodes and names a recognised algorithm and version
//! 3. MAC over the original `H.P` bytes matches (constant time)
//! 4. Payload decodes
//! 5. `not_before <= now <= not_after`

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use hmac::Mac;
use pixur_types::{ErrorCategory, PwtAlgorithm, PwtHeader, PwtPayload, Timestamp, VarintError};
use prost::Message;

use crate::{b64url_decode, b64url_encode, hmac_sha512_256, CryptoError, HmacSha512_256};

/// Wall-clock source captured by the coder.
pub type Clock = Arc<dyn Fn() -> SystemTime + Send + Sync>;

/// Only header version in existence.
pub const PWT_VERSION: i64 = 0;

/// Token failures.
#[derive(Debug, thiserror::Error)]
pub enum PwtError {
    /// Wrong segment count, bad base64url or an undecodable record
    #[error("malformed token: {0}")]
    Malformed(String),
    /// Header names an algorithm or version this coder does not speak
    #[error("unsupported token: {0}")]
    Unsupported(String),
    /// MAC mismatch
    #[error("token signature mismatch")]
    BadSignature,
    /// `now < not_before`
    #[error("token not yet valid")]
    NotYetValid,
    /// `now > not_after`, or the payload carries no validity window
    #[error("token expired")]
    Expired,
    /// Valid token presented on a path that wants a different type
    #[error("wrong token type: expected {expected}, got {actual}")]
    WrongType {
        /// Type the path accepts
        expected: &'static str,
        /// Type found in the payload
        actual: &'static str,
    },
    /// The path requires a token and none was sent
    #[error("missing token")]
    MissingToken,
    /// Subject is not a varint user id
    #[error("bad token subject: {0}")]
    BadSubject(#[from] VarintError),
}

impl PwtError {
    /// Coarse class of the failure.
    pub fn category(&self) -> ErrorCategory {
        match self {
            PwtError::Malformed(_)
            | PwtError::WrongType { .. }
            | PwtError::MissingToken
            | PwtError::BadSubject(_) => ErrorCategory::MalformedInput,
            PwtError::Unsupported(_) => ErrorCategory::Unsupported,
            PwtError::BadSignature => ErrorCategory::IntegrityFailure,
            PwtError::NotYetValid | PwtError::Expired => ErrorCategory::Expired,
        }
    }
}

/// Encodes and verifies tokens under one key and one clock.
///
/// Built once at startup and shared; `encode` and `decode` take `&self` and
/// clone the keyed MAC per call.
#[derive(Clone)]
pub struct PwtCoder {
    mac: HmacSha512_256,
    clock: Clock,
}

impl fmt::Debug for PwtCoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PwtCoder").finish_non_exhaustive()
    }
}

impl PwtCoder {
    /// Coder keyed with `secret`, reading the system clock.
    pub fn new(secret: &[u8]) -> Result<Self, CryptoError> {
        Self::with_clock(secret, Arc::new(SystemTime::now))
    }

    /// Coder keyed with `secret`, reading time from `clock`.
    pub fn with_clock(secret: &[u8], clock: Clock) -> Result<Self, CryptoError> {
        Ok(PwtCoder {
            mac: hmac_sha512_256(secret)?,
            clock,
        })
    }

    /// Current time according to the coder's clock.
    pub fn now(&self) -> SystemTime {
        (self.clock)()
    }

    /// Serializes and signs `payload`.
    pub fn encode(&self, payload: &PwtPayload) -> String {
        let header = PwtHeader {
            algorithm: PwtAlgorithm::Hs512_256 as i32,
            version: PWT_VERSION,
        };
        let mut token = b64url_encode(&header.encode_to_vec());
        token.push('.');
        token.push_str(&b64url_encode(&payload.encode_to_vec()));

        let mut mac = self.mac.clone();
        mac.update(token.as_bytes());
        let sig = mac.finalize().into_bytes();

        token.push('.');
        token.push_str(&b64url_encode(&sig));
        token
    }

    /// Verifies `token` and returns its payload if it is valid now.
    pub fn decode(&self, token: &[u8]) -> Result<PwtPayload, PwtError> {
        let segments = split_segments(token)?;
        check_header(segments.header)?;

        let sig = b64url_decode(segments.signature)
            .map_err(|e| PwtError::Malformed(format!("signature: {e}")))?;
        let mut mac = self.mac.clone();
        mac.update(segments.signed);
        mac.verify_slice(&sig).map_err(|_| PwtError::BadSignature)?;

        let payload = decode_payload(segments.payload)?;
        check_validity(&payload, self.now())?;
        Ok(payload)
    }
}

/// Parses the payload without checking the MAC or the clock.
///
/// For clients holding tokens they cannot verify; never authorize on it.
pub fn decode_unverified(token: &[u8]) -> Result<PwtPayload, PwtError> {
    let segments = split_segments(token)?;
    check_header(segments.header)?;
    decode_payload(segments.payload)
}

/// Checks `not_before <= now <= not_after`. A missing or out-of-range bound
/// reads as expired.
pub fn check_validity(payload: &PwtPayload, now: SystemTime) -> Result<(), PwtError> {
    let now = Timestamp::from_system_time(now);
    let (Some(not_before), Some(not_after)) = (payload.not_before, payload.not_after) else {
        return Err(PwtError::Expired);
    };
    if !not_before.is_valid() || !not_after.is_valid() {
        return Err(PwtError::Expired);
    }
    if order_key(now) < order_key(not_before) {
        return Err(PwtError::NotYetValid);
    }
    if order_key(now) > order_key(not_after) {
        return Err(PwtError::Expired);
    }
    Ok(())
}

pub(crate) fn order_key(t: Timestamp) -> (i64, i32) {
    (t.seconds, t.nanos)
}

// ---------------------------------------------------------------------------
// Segment handling
// ---------------------------------------------------------------------------

struct Segments<'a> {
    header: &'a [u8],
    payload: &'a [u8],
    signature: &'a [u8],
    /// `H.P`, exactly as received
    signed: &'a [u8],
}

/// The header may be empty: a default header record encodes to no bytes.
fn split_segments(token: &[u8]) -> Result<Segments<'_>, PwtError> {
    let mut parts = token.split(|&b| b == b'.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(payload), Some(signature), None)
            if !payload.is_empty() && !signature.is_empty() =>
        {
            Ok(Segments {
                header,
                payload,
                signature,
                signed: &token[..header.len() + 1 + payload.len()],
            })
        }
        _ => Err(PwtError::Malformed("expected three segments".to_string())),
    }
}

fn check_header(segment: &[u8]) -> Result<(), PwtError> {
    let bytes = b64url_decode(segment).map_err(|e| PwtError::Malformed(format!("header: {e}")))?;
    let header = PwtHeader::decode(bytes.as_slice())
        .map_err(|e| PwtError::Malformed(format!("header: {e}")))?;
    match PwtAlgorithm::try_from(header.algorithm) {
        Ok(PwtAlgorithm::Hs512_256) => {}
        Ok(PwtAlgorithm::Unknown) | Err(_) => {
            return Err(PwtError::Unsupported(format!(
                "algorithm {}",
                header.algorithm
            )))
        }
    }
    if header.version != PWT_VERSION {
        return Err(PwtError::Unsupported(format!("version {}", header.version)));
    }
    Ok(())
}

fn decode_payload(segment: &[u8]) -> Result<PwtPayload, PwtError> {
    let bytes =
        b64url_decode(segment).map_err(|e| PwtError::Malformed(format!("payload: {e}")))?;
    PwtPayload::decode(bytes.as_slice()).map_err(|e| PwtError::Malformed(format!("payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixur_types::TokenType;
    use std::time::{Duration, UNIX_EPOCH};

    const NOW: u64 = 1_500_000_000;

    fn fixed_clock(secs: u64) -> Clock {
        Arc::new(move || UNIX_EPOCH + Duration::from_secs(secs))
    }

    fn coder(secret: &[u8]) -> PwtCoder {
        PwtCoder::with_clock(secret, fixed_clock(NOW)).unwrap()
    }

    fn payload(not_before: i64, not_after: i64) -> PwtPayload {
        PwtPayload {
            subject: "h1".to_string(),
            not_before: Some(Timestamp::from_unix_secs(not_before)),
            not_after: Some(Timestamp::from_unix_secs(not_after)),
            r#type: TokenType::Auth as i32,
            ..Default::default()
        }
    }

    fn live() -> PwtPayload {
        payload(NOW as i64 - 60, NOW as i64 + 3600)
    }

    /// Token with an arbitrary header, correctly signed under `secret`.
    fn token_with_header(secret: &[u8], header: &PwtHeader, p: &PwtPayload) -> String {
        let mut token = b64url_encode(&header.encode_to_vec());
        token.push('.');
        token.push_str(&b64url_encode(&p.encode_to_vec()));
        let mut mac = hmac_sha512_256(secret).unwrap();
        mac.update(token.as_bytes());
        token.push('.');
        token.push_str(&b64url_encode(&mac.finalize().into_bytes()));
        token
    }

    #[test]
    fn test_round_trip() {
        let c = coder(b"secret");
        let p = live();
        let token = c.encode(&p);
        assert_eq!(token.split('.').count(), 3);
        assert_eq!(c.decode(token.as_bytes()).unwrap(), p);
    }

    #[test]
    fn test_other_key_is_integrity_failure() {
        let token = coder(b"secret").encode(&live());
        let err = coder(b"other").decode(token.as_bytes()).unwrap_err();
        assert!(matches!(err, PwtError::BadSignature));
        assert_eq!(err.category(), ErrorCategory::IntegrityFailure);
    }

    #[test]
    fn test_payload_bit_flip_is_integrity_failure() {
        let c = coder(b"secret");
        let token = c.encode(&live());
        let dot = token.find('.').unwrap();
        let mut bytes = token.into_bytes();
        // First payload character; any change breaks the MAC.
        bytes[dot + 1] = if bytes[dot + 1] == b'A' { b'B' } else { b'A' };
        assert!(matches!(c.decode(&bytes), Err(PwtError::BadSignature)));
    }

    #[test]
    fn test_signature_bit_flip_is_integrity_failure() {
        let c = coder(b"secret");
        let mut bytes = c.encode(&live()).into_bytes();
        let last = bytes.len() - 2;
        bytes[last] = if bytes[last] == b'A' { b'B' } else { b'A' };
        assert!(matches!(c.decode(&bytes), Err(PwtError::BadSignature)));
    }

    #[test]
    fn test_expiry_boundaries() {
        let c = coder(b"secret");
        let now = NOW as i64;

        let expired = c.encode(&payload(now - 100, now - 1));
        let err = c.decode(expired.as_bytes()).unwrap_err();
        assert!(matches!(err, PwtError::Expired));
        assert_eq!(err.category(), ErrorCategory::Expired);

        let early = c.encode(&payload(now + 1, now + 100));
        let err = c.decode(early.as_bytes()).unwrap_err();
        assert!(matches!(err, PwtError::NotYetValid));
        assert_eq!(err.category(), ErrorCategory::Expired);

        // Both ends are inclusive.
        let edge = c.encode(&payload(now, now));
        assert!(c.decode(edge.as_bytes()).is_ok());
    }

    #[test]
    fn test_missing_window_is_expired() {
        let c = coder(b"secret");
        let mut p = live();
        p.not_after = None;
        let token = c.encode(&p);
        assert!(matches!(c.decode(token.as_bytes()), Err(PwtError::Expired)));
    }

    #[test]
    fn test_unsupported_algorithm_and_version() {
        let c = coder(b"secret");
        let unknown = PwtHeader {
            algorithm: PwtAlgorithm::Unknown as i32,
            version: 0,
        };
        let token = token_with_header(b"secret", &unknown, &live());
        let err = c.decode(token.as_bytes()).unwrap_err();
        assert!(matches!(err, PwtError::Unsupported(_)));
        assert_eq!(err.category(), ErrorCategory::Unsupported);

        let future_alg = PwtHeader {
            algorithm: 9,
            version: 0,
        };
        let token = token_with_header(b"secret", &future_alg, &live());
        assert!(matches!(
            c.decode(token.as_bytes()),
            Err(PwtError::Unsupported(_))
        ));

        let v1 = PwtHeader {
            algorithm: PwtAlgorithm::Hs512_256 as i32,
            version: 1,
        };
        let token = token_with_header(b"secret", &v1, &live());
        assert!(matches!(
            c.decode(token.as_bytes()),
            Err(PwtError::Unsupported(_))
        ));
    }

    #[test]
    fn test_empty_header_is_unsupported() {
        // The default header record encodes to zero bytes.
        let empty = PwtHeader::default();
        assert!(empty.encode_to_vec().is_empty());
        let token = token_with_header(b"secret", &empty, &live());
        assert!(token.starts_with('.'));

        let err = coder(b"secret").decode(token.as_bytes()).unwrap_err();
        assert!(matches!(err, PwtError::Unsupported(_)), "{err:?}");
        assert_eq!(err.category(), ErrorCategory::Unsupported);
    }

    #[test]
    fn test_out_of_range_timestamps_are_expired() {
        let c = coder(b"secret");
        let mut bad_nanos = live();
        bad_nanos.not_after = Some(Timestamp {
            seconds: NOW as i64 + 3600,
            nanos: 1_000_000_000,
        });
        let mut far_future = live();
        far_future.not_after = Some(Timestamp::from_unix_secs(i64::MAX));
        let mut before_year_one = live();
        before_year_one.not_before = Some(Timestamp::from_unix_secs(Timestamp::MIN_SECONDS - 1));

        for p in [bad_nanos, far_future, before_year_one] {
            let token = c.encode(&p);
            assert!(matches!(c.decode(token.as_bytes()), Err(PwtError::Expired)));
        }
    }

    #[test]
    fn test_secret_and_other_key_scenario() {
        let now = SystemTime::now();
        let clock: Clock = Arc::new(move || now);
        let signer = PwtCoder::with_clock(b"secret", clock.clone()).unwrap();
        let p = PwtPayload {
            subject: "0".to_string(),
            not_before: Some(Timestamp::from_system_time(now - Duration::from_secs(60))),
            not_after: Some(Timestamp::from_system_time(
                now + Duration::from_secs(30 * 24 * 60 * 60),
            )),
            r#type: TokenType::Auth as i32,
            ..Default::default()
        };

        let token = signer.encode(&p);
        assert_eq!(token.split('.').count(), 3);
        assert_eq!(signer.decode(token.as_bytes()).unwrap(), p);

        let other = PwtCoder::with_clock(b"other", clock).unwrap();
        let err = other.decode(token.as_bytes()).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::IntegrityFailure);
    }

    #[test]
    fn test_segment_count_is_malformed() {
        let c = coder(b"secret");
        let token = c.encode(&live());
        for bad in [
            "".to_string(),
            "abc".to_string(),
            "a.b".to_string(),
            format!("{token}.x"),
            "a..c".to_string(),
            "a.b.".to_string(),
        ] {
            let err = c.decode(bad.as_bytes()).unwrap_err();
            assert_eq!(err.category(), ErrorCategory::MalformedInput, "{bad:?}");
        }
    }

    #[test]
    fn test_padded_segment_is_malformed() {
        let c = coder(b"secret");
        let token = c.encode(&live());
        let (header, rest) = token.split_once('.').unwrap();
        let padded = format!("{header}=.{rest}");
        assert!(matches!(
            c.decode(padded.as_bytes()),
            Err(PwtError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_unverified_skips_mac_and_clock() {
        let token = coder(b"secret").encode(&payload(0, 1));
        let p = decode_unverified(token.as_bytes()).unwrap();
        assert_eq!(p.subject, "h1");
        assert!(coder(b"other").decode(token.as_bytes()).is_err());
    }

    /// Rebuilds `token` with one bit of segment `index` flipped in its raw bytes.
    fn flip_bit(token: &str, index: usize, bit: usize) -> String {
        let mut segments: Vec<String> = token.split('.').map(str::to_string).collect();
        let mut raw = b64url_decode(segments[index].as_bytes()).unwrap();
        let bit = bit % (raw.len() * 8);
        raw[bit / 8] ^= 1 << (bit % 8);
        segments[index] = b64url_encode(&raw);
        segments.join(".")
    }

    proptest::proptest! {
        #[test]
        fn test_payload_bit_flips_fail_integrity(bit in 0usize..4096) {
            let c = coder(b"secret");
            let flipped = flip_bit(&c.encode(&live()), 1, bit);
            let err = c.decode(flipped.as_bytes()).unwrap_err();
            proptest::prop_assert_eq!(err.category(), ErrorCategory::IntegrityFailure);
        }

        #[test]
        fn test_signature_bit_flips_fail_integrity(bit in 0usize..256) {
            let c = coder(b"secret");
            let flipped = flip_bit(&c.encode(&live()), 2, bit);
            let err = c.decode(flipped.as_bytes()).unwrap_err();
            proptest::prop_assert_eq!(err.category(), ErrorCategory::IntegrityFailure);
        }
    }
}

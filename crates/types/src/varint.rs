//! # Varint identifier codec
//!
//! Every public identifier (pic ids, user ids, URL segments, on-disk shards,
//! event keys) is a 64-bit integer written in a variable-length base-32 form.
//!
//! ## Layout
//! - The leading symbol has value `0x10 + L` (`g` through `x`) and announces
//!   `L` body symbols, `0 <= L <= 13`.
//! - Each body symbol carries 5 bits, most significant first.
//! - The decoded value is `body + sum(32^i for i < L)`, so every length covers
//!   a disjoint range and each number has exactly one encoding.
//!
//! Because the length is self-delimiting, several encodings can be
//! concatenated and parsed back in order (see [`UserEventId`]).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ErrorCategory;

/// Output alphabet. `i`, `l`, `o` and `u` are left out.
const ALPHABET: &[u8; 32] = b"0123456789abcdefghjkmnpqrstvwxyz";

/// Value of the first length symbol (`g`).
const LENGTH_BASE: u8 = 0x10;

/// Longest body that still fits in 64 bits.
const MAX_BODY_LEN: usize = 13;

/// Marker for bytes outside the alphabet in [`DECODE_TABLE`].
const INVALID: u8 = 0xFF;

/// Byte to symbol value. Lowercase only, plus the `o`/`i`/`l` folds in both
/// cases.
const DECODE_TABLE: [u8; 256] = build_decode_table();

const fn build_decode_table() -> [u8; 256] {
    let mut table = [INVALID; 256];
    let mut i = 0;
    while i < ALPHABET.len() {
        table[ALPHABET[i] as usize] = i as u8;
        i += 1;
    }
    table[b'o' as usize] = 0;
    table[b'O' as usize] = 0;
    table[b'i' as usize] = 1;
    table[b'I' as usize] = 1;
    table[b'l' as usize] = 1;
    table[b'L' as usize] = 1;
    table
}

/// Sum of `32^i` for `i < len`: the smallest value with a body of `len`.
fn length_offset(len: usize) -> u128 {
    (0..len).map(|i| 1u128 << (5 * i)).sum()
}

/// Varint decode errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VarintError {
    /// Empty input
    #[error("varint: no input")]
    NoInput,
    /// Leading symbol is not a length symbol
    #[error("varint: invalid length")]
    InvalidLength,
    /// Body symbol outside the alphabet
    #[error("varint: invalid symbol")]
    InvalidSymbol,
    /// Fewer body symbols than the length announced
    #[error("varint: eof")]
    Truncated,
    /// Value does not fit in 64 bits
    #[error("varint: overflow")]
    Overflow,
    /// Input continues after a complete varint
    #[error("varint: excess input")]
    ExcessInput,
}

impl VarintError {
    /// Every varint failure is a malformed identifier.
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::MalformedInput
    }
}

/// A 64-bit public identifier.
///
/// `Display` and `Serialize` produce the textual form; `FromStr` and
/// `Deserialize` require the whole input to be a single varint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Varint(pub i64);

impl Varint {
    /// Encodes into a fresh lowercase string.
    pub fn encode(self) -> String {
        let mut out = String::with_capacity(MAX_BODY_LEN + 1);
        self.encode_into(&mut out);
        out
    }

    /// Appends the encoding to `out`.
    pub fn encode_into(self, out: &mut String) {
        let mut rem = self.0 as u64;
        let mut len = 0usize;
        while len < MAX_BODY_LEN {
            // 32^13 does not fit in a u64, and nothing is left past it anyway.
            let span = 1u64 << (5 * len);
            if rem < span {
                break;
            }
            rem -= span;
            len += 1;
        }

        out.push(ALPHABET[LENGTH_BASE as usize + len] as char);
        for i in (0..len).rev() {
            let sym = ((rem >> (5 * i)) & 0x1F) as usize;
            out.push(ALPHABET[sym] as char);
        }
    }

    /// Decodes one varint from the front of `raw`, returning it and the
    /// number of bytes consumed. Trailing input is left alone.
    pub fn decode_prefix(raw: &str) -> Result<(Varint, usize), VarintError> {
        Self::decode_bytes(raw.as_bytes())
    }

    /// Byte-slice form of [`Varint::decode_prefix`].
    pub fn decode_bytes(raw: &[u8]) -> Result<(Varint, usize), VarintError> {
        let (&lead, rest) = raw.split_first().ok_or(VarintError::NoInput)?;
        let lead = DECODE_TABLE[lead as usize];
        if lead == INVALID || lead < LENGTH_BASE {
            return Err(VarintError::InvalidLength);
        }
        let len = (lead - LENGTH_BASE) as usize;
        if len > MAX_BODY_LEN {
            return Err(VarintError::InvalidLength);
        }
        let body = rest.get(..len).ok_or(VarintError::Truncated)?;

        let mut num: u128 = 0;
        for &b in body {
            let sym = DECODE_TABLE[b as usize];
            if sym == INVALID {
                return Err(VarintError::InvalidSymbol);
            }
            num = (num << 5) | u128::from(sym);
        }
        let value = u64::try_from(num + length_offset(len)).map_err(|_| VarintError::Overflow)?;

        Ok((Varint(value as i64), len + 1))
    }

    /// Decodes `raw` as exactly one varint.
    pub fn decode_all(raw: &str) -> Result<Varint, VarintError> {
        let (v, n) = Self::decode_prefix(raw)?;
        if n != raw.len() {
            return Err(VarintError::ExcessInput);
        }
        Ok(v)
    }
}

impl From<i64> for Varint {
    fn from(v: i64) -> Self {
        Varint(v)
    }
}

impl From<Varint> for i64 {
    fn from(v: Varint) -> Self {
        v.0
    }
}

impl fmt::Display for Varint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Varint {
    type Err = VarintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Varint::decode_all(s)
    }
}

impl Serialize for Varint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Varint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Varint::decode_all(&s).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// User event keys
// ---------------------------------------------------------------------------

/// Key of a user event: user id, creation timestamp and an index that
/// disambiguates events created in the same instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserEventId {
    /// Owner of the event
    pub user_id: i64,
    /// Creation timestamp
    pub created_ts: i64,
    /// Tie breaker; omitted from the text when zero
    pub index: i64,
}

impl UserEventId {
    /// Concatenated varint text.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        Varint(self.user_id).encode_into(&mut out);
        Varint(self.created_ts).encode_into(&mut out);
        if self.index != 0 {
            Varint(self.index).encode_into(&mut out);
        }
        out
    }

    /// Parses two or three concatenated varints and nothing else.
    pub fn decode(raw: &str) -> Result<Self, VarintError> {
        let (user_id, n) = Varint::decode_prefix(raw)?;
        let rest = &raw[n..];
        let (created_ts, n) = Varint::decode_prefix(rest)?;
        let rest = &rest[n..];
        let index = if rest.is_empty() {
            Varint(0)
        } else {
            Varint::decode_all(rest)?
        };
        Ok(UserEventId {
            user_id: user_id.0,
            created_ts: created_ts.0,
            index: index.0,
        })
    }
}

impl fmt::Display for UserEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for UserEventId {
    type Err = VarintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UserEventId::decode(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_vectors() {
        assert_eq!(Varint(0).encode(), "g");
        assert_eq!(Varint(0x0F).encode(), "he");
        assert_eq!(Varint(16).encode(), "hf");
        assert_eq!(Varint(32).encode(), "hz");
        assert_eq!(Varint(33).encode(), "j00");
        assert_eq!(Varint(72374).encode(), "m15mn");
        assert_eq!(Varint(-1).encode(), "xeyyyyyyyyyyyy");
    }

    #[test]
    fn test_decode_vectors() {
        assert_eq!(Varint::decode_prefix("hz").unwrap(), (Varint(32), 2));
        assert_eq!(Varint::decode_prefix("m15mn").unwrap(), (Varint(72374), 5));
        assert_eq!(
            Varint::decode_prefix("xeyyyyyyyyyyyy").unwrap(),
            (Varint(-1), 14)
        );
    }

    #[test]
    fn test_decode_partial_leaves_trailing_input() {
        assert_eq!(Varint::decode_prefix("gg").unwrap(), (Varint(0), 1));
        assert_eq!(Varint::decode_all("gg"), Err(VarintError::ExcessInput));
    }

    #[test]
    fn test_decode_failures() {
        assert!(Varint::decode_prefix("HZ").is_err());
        assert_eq!(Varint::decode_prefix("hu"), Err(VarintError::InvalidSymbol));
        assert_eq!(Varint::decode_prefix(""), Err(VarintError::NoInput));
        assert!(Varint::decode_prefix("0123456789abcde").is_err());
        assert_eq!(Varint::decode_prefix("h"), Err(VarintError::Truncated));
        assert_eq!(Varint::decode_prefix("y0"), Err(VarintError::InvalidLength));
        assert_eq!(Varint::decode_prefix("z0"), Err(VarintError::InvalidLength));
    }

    #[test]
    fn test_decode_overflow() {
        // One past u64::MAX.
        assert_eq!(
            Varint::decode_prefix("xeyyyyyyyyyyyz"),
            Err(VarintError::Overflow)
        );
        assert_eq!(
            Varint::decode_prefix("xzzzzzzzzzzzzz"),
            Err(VarintError::Overflow)
        );
    }

    #[test]
    fn test_decode_folds_confusable_glyphs() {
        assert_eq!(Varint::decode_all("ho").unwrap(), Varint(1));
        assert_eq!(Varint::decode_all("hO").unwrap(), Varint(1));
        assert_eq!(Varint::decode_all("hi").unwrap(), Varint(2));
        assert_eq!(Varint::decode_all("hI").unwrap(), Varint(2));
        assert_eq!(Varint::decode_all("hl").unwrap(), Varint(2));
        assert_eq!(Varint::decode_all("hL").unwrap(), Varint(2));
        assert!(Varint::decode_all("hA").is_err());
    }

    #[test]
    fn test_roundtrip_boundaries() {
        let mut values = vec![i64::MIN, i64::MAX, -2, -1, 0, 1];
        // Every length transition and its neighbours.
        for len in 0..MAX_BODY_LEN {
            let start = length_offset(len + 1) as u64;
            values.extend([start.wrapping_sub(1), start, start + 1].map(|v| v as i64));
        }
        for v in values {
            let text = Varint(v).encode();
            assert_eq!(
                Varint::decode_prefix(&text).unwrap(),
                (Varint(v), text.len()),
                "roundtrip failed for {v}"
            );
        }
    }

    #[test]
    fn test_encoding_is_unique_and_ordered_by_length() {
        let mut seen = std::collections::HashSet::new();
        let mut prev_len = 0;
        for v in 0..40_000i64 {
            let text = Varint(v).encode();
            assert!(text.len() >= prev_len);
            prev_len = text.len();
            assert!(seen.insert(text), "duplicate encoding for {v}");
        }
    }

    #[test]
    fn test_negative_uses_longest_form() {
        assert_eq!(Varint(i64::MIN).encode().len(), 14);
        assert_eq!(Varint(-72374).encode().len(), 14);
    }

    #[test]
    fn test_display_and_parse() {
        let v: Varint = "m15mn".parse().unwrap();
        assert_eq!(v, Varint(72374));
        assert_eq!(v.to_string(), "m15mn");
    }

    #[test]
    fn test_serde_as_text() {
        let json = serde_json::to_string(&Varint(72374)).unwrap();
        assert_eq!(json, "\"m15mn\"");
        let back: Varint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Varint(72374));
        assert!(serde_json::from_str::<Varint>("\"hu\"").is_err());
    }

    #[test]
    fn test_user_event_id_concatenation() {
        let id = UserEventId {
            user_id: 72374,
            created_ts: 1_500_000_000,
            index: 0,
        };
        let text = id.encode();
        assert_eq!(text, format!("m15mn{}", Varint(1_500_000_000).encode()));
        assert_eq!(UserEventId::decode(&text).unwrap(), id);

        let indexed = UserEventId { index: 3, ..id };
        let text = indexed.encode();
        assert!(text.ends_with("h2"));
        assert_eq!(text.parse::<UserEventId>().unwrap(), indexed);
    }

    #[test]
    fn test_user_event_id_rejects_garbage() {
        assert!(UserEventId::decode("m15mn").is_err());
        assert!(UserEventId::decode("ggh3g").is_err());
        assert!(UserEventId::decode("ggh").is_err());
    }

    proptest::proptest! {
        #[test]
        fn test_roundtrip_any_value(v in proptest::prelude::any::<i64>()) {
            let text = Varint(v).encode();
            proptest::prop_assert_eq!(Varint::decode_prefix(&text), Ok((Varint(v), text.len())));
        }

        #[test]
        fn test_distinct_values_encode_distinctly(
            a in proptest::prelude::any::<i64>(),
            b in proptest::prelude::any::<i64>(),
        ) {
            proptest::prop_assume!(a != b);
            proptest::prop_assert_ne!(Varint(a).encode(), Varint(b).encode());
        }

        #[test]
        fn test_foreign_symbols_are_rejected(s in "[^0-9a-zA-Z]{1,14}") {
            proptest::prop_assert!(Varint::decode_prefix(&s).is_err());
        }
    }
}

use std::fmt;
use std::str::FromStr;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::GuidError;
use crate::hash::{blake3_32, blake3_32_parts, HASH_LEN};

/// Number of bytes in a [`Guid`]. Always equal to the digest width.
pub const GUID_LEN: usize = HASH_LEN;
/// Number of hex digits in a [`Guid`]; also the number of routing levels.
pub const N_DIGITS: usize = GUID_LEN * 2;
/// Radix of one routing digit.
pub const DIGIT_RADIX: usize = 16;

/// Fixed-width identifier naming both nodes and objects in the overlay.
///
/// Ordering is byte-lexicographic. Routing decisions use the per-digit view
/// ([`Guid::digit`], [`Guid::shared_prefix_len`], [`Guid::distance`]).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Guid([u8; GUID_LEN]);

impl Guid {
    /// All-zero identifier.
    pub const ZERO: Guid = Guid([0; GUID_LEN]);

    /// Generates an identifier from the operating system CSPRNG.
    pub fn random() -> Self {
        let mut bytes = [0_u8; GUID_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wraps raw identifier bytes without hashing.
    pub const fn from_raw(bytes: [u8; GUID_LEN]) -> Self {
        Self(bytes)
    }

    /// Derives an identifier by hashing arbitrary content.
    pub fn from_content(data: impl AsRef<[u8]>) -> Self {
        Self(blake3_32(data.as_ref()))
    }

    /// Parses exactly [`N_DIGITS`] hex digits, ignoring case.
    pub fn from_hex(text: &str) -> Result<Self, GuidError> {
        if text.len() != N_DIGITS {
            return Err(GuidError::Length {
                expected: N_DIGITS,
                found: text.len(),
            });
        }
        let mut bytes = [0_u8; GUID_LEN];
        hex::decode_to_slice(text, &mut bytes).map_err(|_| GuidError::Format(text.to_string()))?;
        Ok(Self(bytes))
    }

    /// Returns `hash(self ++ data)`.
    ///
    /// Accepts anything byte-like, so another [`Guid`], a `&str`, or a byte slice all
    /// compose the same way.
    pub fn add(&self, data: impl AsRef<[u8]>) -> Self {
        Self(blake3_32_parts(&[&self.0, data.as_ref()]))
    }

    /// Returns `hash(self ++ value.to_be_bytes())`.
    pub fn add_i64(&self, value: i64) -> Self {
        self.add(value.to_be_bytes())
    }

    /// Upper-case hex rendering, [`N_DIGITS`] characters long.
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; GUID_LEN] {
        &self.0
    }

    /// Returns the hex digit at position `n`, counting from the most significant.
    ///
    /// # Panics
    ///
    /// Panics if `n >= N_DIGITS`.
    pub fn digit(&self, n: usize) -> u8 {
        let byte = self.0[n / 2];
        if n % 2 == 0 {
            byte >> 4
        } else {
            byte & 0x0f
        }
    }

    /// Number of leading hex digits shared with `other`.
    pub fn shared_prefix_len(&self, other: &Guid) -> usize {
        for (i, (a, b)) in self.0.iter().zip(other.0.iter()).enumerate() {
            if a != b {
                let high_matches = (a >> 4) == (b >> 4);
                return i * 2 + usize::from(high_matches);
            }
        }
        N_DIGITS
    }

    /// Routing-table distance from `self` to `other`.
    ///
    /// Zero for identical identifiers. Otherwise, at the first differing digit `i`,
    /// `(N_DIGITS - i) * 100 + ((other[i] - self[i]) mod 16)`. The digit difference is
    /// taken in a fixed direction, so the metric is not symmetric.
    pub fn distance(&self, other: &Guid) -> u32 {
        for i in 0..N_DIGITS {
            let mine = self.digit(i);
            let theirs = other.digit(i);
            if mine != theirs {
                let diff = (u32::from(theirs) + DIGIT_RADIX as u32 - u32::from(mine))
                    % DIGIT_RADIX as u32;
                return (N_DIGITS - i) as u32 * 100 + diff;
            }
        }
        0
    }
}

impl AsRef<[u8]> for Guid {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; GUID_LEN]> for Guid {
    fn from(bytes: [u8; GUID_LEN]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for Guid {
    type Error = GuidError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; GUID_LEN] = value.try_into().map_err(|_| GuidError::Length {
            expected: GUID_LEN,
            found: value.len(),
        })?;
        Ok(Self(bytes))
    }
}

impl FromStr for Guid {
    type Err = GuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", &self.to_hex()[..8])
    }
}

impl Serialize for Guid {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(&self.0)
    }
}

struct GuidVisitor;

impl<'de> Visitor<'de> for GuidVisitor {
    type Value = Guid;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exactly {GUID_LEN} bytes")
    }

    fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Guid::try_from(v).map_err(|_| E::invalid_length(v.len(), &self))
    }

    fn visit_byte_buf<E>(self, v: Vec<u8>) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        self.visit_bytes(&v)
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut bytes = [0_u8; GUID_LEN];
        for (i, slot) in bytes.iter_mut().enumerate() {
            *slot = seq
                .next_element()?
                .ok_or_else(|| de::Error::invalid_length(i, &self))?;
        }
        if seq.next_element::<u8>()?.is_some() {
            return Err(de::Error::invalid_length(GUID_LEN + 1, &self));
        }
        Ok(Guid(bytes))
    }
}

impl<'de> Deserialize<'de> for Guid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_bytes(GuidVisitor)
    }
}

//! 64-bit asset GUIDs.
//!
//! Every asset inside a container is identified by a [`PakGuid`]. Tools
//! derive GUIDs from asset paths with [`PakGuid::from_name`], a hash that
//! ignores ASCII case and treats `\` and `/` as the same separator.

use std::fmt;
use std::str::FromStr;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::Error;

const WORD_MUL: u64 = 0xFB8_C4D9_6501;
const STATE_MUL: u64 = 0x633_D5F1;
const LENGTH_MUL: u64 = 0xAE_5028_12AA_7333;

/// A 64-bit asset identifier, stored little-endian on disk.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, FromBytes, IntoBytes, Immutable, KnownLayout,
)]
#[repr(transparent)]
pub struct PakGuid(pub u64);

impl PakGuid {
    /// The zero GUID. Never a valid asset identifier.
    pub const NULL: Self = Self(0);

    /// Wrap a raw value.
    #[inline]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw 64-bit value.
    #[inline]
    pub const fn value(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Hash an asset path into its GUID.
    ///
    /// The path is consumed four bytes at a time up to the first NUL. Each
    /// word is case-folded and has backslashes rewritten to forward slashes
    /// before being mixed into the state.
    pub fn from_name(name: &str) -> Self {
        let bytes = name.as_bytes();
        let mut padded = Vec::with_capacity(bytes.len() + 8);
        padded.extend_from_slice(bytes);
        padded.resize((bytes.len() / 4 + 2) * 4, 0);

        let word_at = |index: usize| {
            let start = index * 4;
            u32::from_le_bytes([
                padded[start],
                padded[start + 1],
                padded[start + 2],
                padded[start + 3],
            ])
        };

        let mut index = 0;
        let mut state = 0u64;
        let mut length = 0u32;

        let mut word = word_at(index);
        let mut folded = fold_word(word);
        let mut zeros = zero_bytes(word);

        while zeros == 0 {
            let mixed = (WORD_MUL.wrapping_mul(u64::from(folded)) >> 24)
                .wrapping_add(STATE_MUL.wrapping_mul(state));
            state = (mixed >> 61) ^ mixed;

            index += 1;
            length += 4;
            word = word_at(index);
            folded = fold_word(word);
            zeros = zero_bytes(word);
        }

        // Mask covering the bytes before the terminator in the final word.
        let below = (zeros & zeros.wrapping_neg()) - 1;
        let tail = (31 - below.leading_zeros()) / 8;

        Self(
            STATE_MUL
                .wrapping_mul(state)
                .wrapping_add(WORD_MUL.wrapping_mul(u64::from(folded & below)) >> 24)
                .wrapping_sub(LENGTH_MUL.wrapping_mul(u64::from(length + tail))),
        )
    }
}

/// Upper-case ASCII letters and map `\` to `/`, four bytes at once.
#[inline]
fn fold_word(word: u32) -> u32 {
    let x = word ^ 0x5C5C_5C5C;
    let backslashes = (!x >> 7) & (x.wrapping_sub(0x0101_0101) >> 7) & 0x0101_0101;
    word.wrapping_sub(45u32.wrapping_mul(backslashes)) & 0xDFDF_DFDF
}

/// High bit set in every byte of `word` that is (or first becomes) zero.
#[inline]
fn zero_bytes(word: u32) -> u32 {
    !word & word.wrapping_sub(0x0101_0101) & 0x8080_8080
}

impl From<u64> for PakGuid {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Debug for PakGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PakGuid({})", self)
    }
}

impl fmt::Display for PakGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl FromStr for PakGuid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);

        if digits.is_empty() || digits.len() > 16 {
            return Err(Error::InvalidGuid(format!(
                "expected 1 to 16 hex digits, got {}",
                digits.len()
            )));
        }

        u64::from_str_radix(digits, 16)
            .map(Self)
            .map_err(|e| Error::InvalidGuid(format!("{s}: {e}")))
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for PakGuid {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for PakGuid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse() {
        let guid = PakGuid::new(0x00AB_CDEF_0123_4567);
        assert_eq!(guid.to_string(), "0x00ABCDEF01234567");
        assert_eq!("0x00ABCDEF01234567".parse::<PakGuid>().unwrap(), guid);
        assert_eq!("abcdef0123456789".parse::<PakGuid>().unwrap().value(), 0xABCD_EF01_2345_6789);
        assert!("0x".parse::<PakGuid>().is_err());
        assert!("0x1234567890ABCDEF0".parse::<PakGuid>().is_err());
        assert!("xyz".parse::<PakGuid>().is_err());
    }

    #[test]
    fn test_name_hash_is_deterministic() {
        let a = PakGuid::from_name("material/models/weapons/r101.rpak");
        let b = PakGuid::from_name("material/models/weapons/r101.rpak");
        assert_eq!(a, b);
        assert_ne!(a, PakGuid::from_name("material/models/weapons/r102.rpak"));
    }

    #[test]
    fn test_name_hash_folds_case_and_separators() {
        assert_eq!(
            PakGuid::from_name("Textures\\World\\Rock.dds"),
            PakGuid::from_name("textures/world/rock.dds")
        );
    }

    #[test]
    fn test_name_hash_depends_on_length() {
        // Names differing only by length inside the last word must differ.
        assert_ne!(PakGuid::from_name("abc"), PakGuid::from_name("abcd"));
        assert_ne!(PakGuid::from_name(""), PakGuid::from_name("a"));
    }

    #[test]
    fn test_name_hash_stops_at_nul() {
        assert_eq!(PakGuid::from_name("ui/hud\0trailing"), PakGuid::from_name("ui/hud"));
    }
}

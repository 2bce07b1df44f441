//! Hex encoding used at every boundary: lowercase, `0x`-prefixed on output,
//! prefix optional on input.

use crate::{Error, Result};

/// Encodes bytes as `0x`-prefixed lowercase hex
pub fn to_prefixed_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Decodes hex with or without a `0x` prefix
pub fn from_prefixed_hex(input: &str) -> Result<Vec<u8>> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    hex::decode(digits).map_err(|e| Error::InvalidEncoding(format!("{}: {}", input, e)))
}

/// Serde adapter for 32-byte identifiers
pub mod hex32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::to_prefixed_hex(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = super::from_prefixed_hex(&s).map_err(serde::de::Error::custom)?;
        <[u8; 32]>::try_from(bytes.as_slice())
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_is_optional_on_input() {
        assert_eq!(from_prefixed_hex("0xabcd").unwrap(), vec![0xab, 0xcd]);
        assert_eq!(from_prefixed_hex("ABCD").unwrap(), vec![0xab, 0xcd]);
    }

    #[test]
    fn test_output_is_prefixed_lowercase() {
        assert_eq!(to_prefixed_hex(&[0xAB, 0x01]), "0xab01");
    }

    #[test]
    fn test_rejects_non_hex() {
        assert!(matches!(from_prefixed_hex("0xzz"), Err(Error::InvalidEncoding(_))));
    }
}

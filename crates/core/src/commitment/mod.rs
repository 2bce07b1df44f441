//! Secret generation and per-family hashlock commitments.
//!
//! | Family | Commitment |
//! |--------|------------|
//! | EVM    | Keccak-256 (32 bytes) |
//! | Cosmos | SHA-256 (32 bytes) |
//! | UTXO   | RIPEMD-160(SHA-256) (20 bytes) |

use rand::rngs::OsRng;
use rand::RngCore;
use bitcoin::hashes::{hash160, Hash};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::domain::ChainFamily;
use crate::encoding::{from_prefixed_hex, to_prefixed_hex};
use crate::{Error, Result};

/// Swap preimage. Zeroized on drop and redacted in `Debug`.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Secret([u8; 32]);

impl Secret {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parses 32 bytes of hex, `0x` prefix optional
    pub fn from_hex(input: &str) -> Result<Self> {
        let mut bytes = from_prefixed_hex(input)?;
        let secret = <[u8; 32]>::try_from(bytes.as_slice())
            .map(Self)
            .map_err(|_| {
                Error::InvalidEncoding(format!("secret must be 32 bytes, got {}", bytes.len()))
            });
        bytes.zeroize();
        secret
    }

    pub fn to_hex(&self) -> String {
        to_prefixed_hex(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Secret::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// One-way commitment to a secret, 20 or 32 bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Hashlock(Vec<u8>);

impl Hashlock {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        match bytes.len() {
            20 | 32 => Ok(Self(bytes)),
            n => Err(Error::InvalidEncoding(format!(
                "hashlock must be 20 or 32 bytes, got {}",
                n
            ))),
        }
    }

    pub fn from_hex(input: &str) -> Result<Self> {
        Self::from_bytes(from_prefixed_hex(input)?)
    }

    pub fn to_hex(&self) -> String {
        to_prefixed_hex(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Hashlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl TryFrom<String> for Hashlock {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Hashlock::from_hex(&value)
    }
}

impl From<Hashlock> for String {
    fn from(hashlock: Hashlock) -> Self {
        hashlock.to_hex()
    }
}

/// Draws a fresh 32-byte secret from the OS CSPRNG
pub fn generate_secret() -> Result<Secret> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| Error::EntropyUnavailable(e.to_string()))?;
    let secret = Secret(bytes);
    bytes.zeroize();
    Ok(secret)
}

/// Computes the hashlock for `secret` with the family's commitment function
pub fn commit(secret: &Secret, family: ChainFamily) -> Hashlock {
    let preimage = secret.as_bytes();
    let digest = match family {
        ChainFamily::Evm => ethers::utils::keccak256(preimage).to_vec(),
        ChainFamily::Cosmos => Sha256::digest(preimage).to_vec(),
        ChainFamily::Utxo => hash160::Hash::hash(preimage).to_byte_array().to_vec(),
    };
    Hashlock(digest)
}

/// Checks `secret` opens `hashlock` under the family's commitment function
pub fn verify(secret: &Secret, family: ChainFamily, hashlock: &Hashlock) -> bool {
    commit(secret, family) == *hashlock
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        let zero = Secret::from_bytes([0u8; 32]);
        assert_eq!(
            commit(&zero, ChainFamily::Evm).to_hex(),
            "0x290decd9548b62a8d60345a988386fc84ba6bc95484008f6362f93160ef3e563"
        );
        assert_eq!(
            commit(&zero, ChainFamily::Cosmos).to_hex(),
            "0x66687aadf862bd776c8fc18b8e9f8e20089714856ee233b3902a591d0d5f2925"
        );
    }

    #[test]
    fn test_utxo_commitment_is_hash160() {
        let secret = Secret::from_bytes([9u8; 32]);
        let hashlock = commit(&secret, ChainFamily::Utxo);
        assert_eq!(hashlock.len(), 20);

        let inner = bitcoin::hashes::sha256::Hash::hash(&[9u8; 32]);
        let expected = bitcoin::hashes::ripemd160::Hash::hash(inner.as_byte_array());
        assert_eq!(hashlock.as_bytes(), expected.as_byte_array());
    }

    #[test]
    fn test_commit_is_deterministic() {
        let secret = Secret::from_bytes([42u8; 32]);
        for family in ChainFamily::ALL {
            assert_eq!(commit(&secret, family), commit(&secret, family));
            assert_eq!(commit(&secret, family).len(), family.hashlock_len());
        }
    }

    #[test]
    fn test_families_disagree() {
        let secret = Secret::from_bytes([1u8; 32]);
        assert_ne!(
            commit(&secret, ChainFamily::Evm),
            commit(&secret, ChainFamily::Cosmos)
        );
    }

    #[test]
    fn test_distinct_secrets_distinct_hashlocks() {
        let a = generate_secret().unwrap();
        let b = generate_secret().unwrap();
        assert_ne!(a, b);
        for family in ChainFamily::ALL {
            assert_ne!(commit(&a, family), commit(&b, family));
        }
    }

    #[test]
    fn test_verify() {
        let secret = generate_secret().unwrap();
        let hashlock = commit(&secret, ChainFamily::Cosmos);
        assert!(verify(&secret, ChainFamily::Cosmos, &hashlock));
        assert!(!verify(&secret, ChainFamily::Evm, &hashlock));
        assert!(!verify(&Secret::from_bytes([0u8; 32]), ChainFamily::Cosmos, &hashlock));
    }

    #[test]
    fn test_secret_hex_roundtrip_and_redaction() {
        let secret = Secret::from_bytes([0xab; 32]);
        let hex = secret.to_hex();
        assert!(hex.starts_with("0xabab"));
        assert_eq!(Secret::from_hex(&hex).unwrap(), secret);
        assert_eq!(Secret::from_hex(hex.trim_start_matches("0x")).unwrap(), secret);
        assert_eq!(format!("{:?}", secret), "Secret(***)");
        assert!(matches!(Secret::from_hex("0xabcd"), Err(Error::InvalidEncoding(_))));
    }

    #[test]
    fn test_hashlock_serde_as_hex() {
        let hashlock = commit(&Secret::from_bytes([3u8; 32]), ChainFamily::Utxo);
        let json = serde_json::to_string(&hashlock).unwrap();
        assert_eq!(json, format!("\"{}\"", hashlock.to_hex()));
        let back: Hashlock = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hashlock);
        assert!(serde_json::from_str::<Hashlock>("\"0x1234\"").is_err());
    }
}

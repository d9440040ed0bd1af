//! Checksum algorithms and hex digests.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

/// Digest algorithm named by a checksum record or registry hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    /// SHA-256, the default when nothing is specified.
    #[default]
    Sha256,
    /// SHA-512.
    Sha512,
    /// BLAKE3 (256-bit output).
    Blake3,
}

impl ChecksumAlgorithm {
    /// Lowercase algorithm name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
            Self::Blake3 => "blake3",
        }
    }

    /// Length of a hex-encoded digest produced by this algorithm.
    pub fn hex_len(&self) -> usize {
        match self {
            Self::Sha256 | Self::Blake3 => 64,
            Self::Sha512 => 128,
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            "blake3" => Ok(Self::Blake3),
            _ => Err(format!("Unsupported checksum algorithm: {s}")),
        }
    }
}

/// Errors produced while validating a digest string.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DigestError {
    /// The string contains characters outside `[0-9a-fA-F]`.
    #[error("Invalid digest: contains non-hex characters in '{0}'")]
    NotHex(String),

    /// The hex string has the wrong length for its algorithm.
    #[error("Invalid {algorithm} digest: expected {expected} hex characters, got {actual}")]
    Length {
        /// Algorithm the digest was validated against.
        algorithm: ChecksumAlgorithm,
        /// Required number of hex characters.
        expected: usize,
        /// Number of hex characters found.
        actual: usize,
    },
}

/// A hex digest, normalized to lowercase.
///
/// Comparison is therefore case-insensitive with respect to the original
/// input: `ABCD` and `abcd` produce equal digests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Validate and normalize a hex digest. An `<algorithm>:` prefix is
    /// tolerated and removed.
    ///
    /// # Errors
    ///
    /// Returns [`DigestError::NotHex`] for empty or non-hex input.
    pub fn parse(s: &str) -> Result<Self, DigestError> {
        let s = s.trim();
        let hex = s.split_once(':').map_or(s, |(_, h)| h);
        if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DigestError::NotHex(s.to_string()));
        }
        Ok(Self(hex.to_lowercase()))
    }

    /// Validate a digest and check its length against `algorithm`.
    ///
    /// # Errors
    ///
    /// Returns [`DigestError`] if the input is not hex or has the wrong length.
    pub fn for_algorithm(algorithm: ChecksumAlgorithm, s: &str) -> Result<Self, DigestError> {
        let digest = Self::parse(s)?;
        if digest.0.len() != algorithm.hex_len() {
            return Err(DigestError::Length {
                algorithm,
                expected: algorithm.hex_len(),
                actual: digest.0.len(),
            });
        }
        Ok(digest)
    }

    /// Wrap bytes produced by a hasher.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(bytes))
    }

    /// Get the digest as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UPPER: &str = "A665A45920422F9D417E4867EFDC4FB8A04A1F3FFF1FA07E998E86F7F7A27AE3";

    #[test]
    fn digest_is_case_insensitive() {
        let a = Digest::parse(UPPER).unwrap();
        let b = Digest::parse(&UPPER.to_lowercase()).unwrap();
        assert_eq!(a, b);
        assert_eq!(Digest::parse(&format!("sha256:{UPPER}")).unwrap(), a);
    }

    #[test]
    fn digest_validation() {
        assert!(Digest::parse("xyz").is_err());
        assert!(Digest::parse("").is_err());
        assert!(Digest::for_algorithm(ChecksumAlgorithm::Sha256, UPPER).is_ok());
        assert_eq!(
            Digest::for_algorithm(ChecksumAlgorithm::Sha512, UPPER),
            Err(DigestError::Length {
                algorithm: ChecksumAlgorithm::Sha512,
                expected: 128,
                actual: 64,
            })
        );
    }

    #[test]
    fn from_bytes_is_lower_hex() {
        assert_eq!(Digest::from_bytes(&[0xAB, 0x01]).as_str(), "ab01");
    }
}

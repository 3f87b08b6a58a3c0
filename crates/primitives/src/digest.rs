use core::fmt::{self, Display, Formatter};
use core::str::FromStr;

use serde::de::Error as SerdeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Number of bytes in a SHA-256 digest.
pub const DIGEST_SIZE: usize = 32;

/// A fixed-size SHA-256 digest identifying a chunk, a Merkle node, or a CID.
///
/// Two digests compare by byte equality; there is no notion of ordering
/// beyond what `Ord` derives lexicographically, used only to get a
/// deterministic iteration order over sets of digests.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct Digest([u8; DIGEST_SIZE]);

impl Digest {
    #[must_use]
    pub const fn new(bytes: [u8; DIGEST_SIZE]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }

    #[must_use]
    pub fn into_bytes(self) -> [u8; DIGEST_SIZE] {
        self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, DigestParseError> {
        let bytes = hex::decode(s).map_err(|_| DigestParseError::InvalidHex)?;
        Self::from_slice(&bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, DigestParseError> {
        if bytes.len() != DIGEST_SIZE {
            return Err(DigestParseError::WrongLength(bytes.len()));
        }
        let mut out = [0_u8; DIGEST_SIZE];
        out.copy_from_slice(bytes);
        Ok(Self(out))
    }

    /// The all-zero digest, used as a sentinel for "no such chunk" checks.
    #[must_use]
    pub const fn zero() -> Self {
        Self([0_u8; DIGEST_SIZE])
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0_u8; DIGEST_SIZE]
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum DigestParseError {
    #[error("invalid hex encoding")]
    InvalidHex,
    #[error("expected {DIGEST_SIZE} bytes, got {0}")]
    WrongLength(usize),
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; DIGEST_SIZE]> for Digest {
    fn from(bytes: [u8; DIGEST_SIZE]) -> Self {
        Self(bytes)
    }
}

impl FromStr for Digest {
    type Err = DigestParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

/// Serializes as a base64 string, matching the metadata file format in
/// spec.md §6 where byte fields are base64-encoded.
pub mod base64_serde {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    use super::{Deserialize, Deserializer, Digest, SerdeError, Serialize, Serializer};

    pub fn serialize<S>(digest: &Digest, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(digest.as_bytes()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Digest, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| D::Error::custom(format!("invalid base64 digest: {e}")))?;
        Digest::from_slice(&bytes).map_err(D::Error::custom)
    }

    pub mod option {
        use super::{Deserialize, Deserializer, Digest, SerdeError, Serialize, Serializer, STANDARD};
        use base64::Engine;

        pub fn serialize<S>(digest: &Option<Digest>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            digest
                .map(|d| STANDARD.encode(d.as_bytes()))
                .serialize(serializer)
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Digest>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let Some(encoded) = Option::<String>::deserialize(deserializer)? else {
                return Ok(None);
            };
            let bytes = STANDARD
                .decode(encoded.as_bytes())
                .map_err(|e| D::Error::custom(format!("invalid base64 digest: {e}")))?;
            Digest::from_slice(&bytes).map(Some).map_err(D::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let digest = Digest::new([7_u8; DIGEST_SIZE]);
        let hex = digest.to_hex();
        assert_eq!(Digest::from_hex(&hex).unwrap(), digest);
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(
            Digest::from_slice(&[0_u8; 31]),
            Err(DigestParseError::WrongLength(31))
        );
    }

    #[test]
    fn base64_serde_round_trips_through_json() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper(#[serde(with = "base64_serde")] Digest);

        let digest = Digest::new([42_u8; DIGEST_SIZE]);
        let json = serde_json::to_string(&Wrapper(digest)).unwrap();
        let Wrapper(decoded) = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, digest);
    }
}

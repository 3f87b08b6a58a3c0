use elliptic_curve::sec1::ToEncodedPoint;
use elliptic_curve::{Field, PrimeField};
use p256::{AffinePoint, ProjectivePoint, Scalar};
use rand_core::{CryptoRng, RngCore};

use crate::error::CryptoError;

/// `(rX, rY)` big-endian coordinates of a P-256 public key (spec.md §3).
pub const PUBKEY_LEN: usize = 64;
/// `(rX, rY, s)` big-endian scalars/coordinates (spec.md §3).
pub const RANDOMNESS_LEN: usize = 96;

/// A chameleon key pair: `sk` is the trapdoor, `pk = sk * G` is published.
#[derive(Clone, Copy)]
pub struct ChameleonKeyPair {
    pub(crate) secret: Scalar,
    pub(crate) public: ProjectivePoint,
}

impl ChameleonKeyPair {
    /// Draws a fresh key pair: `sk` uniform in `[1, n-1]`, `PK = sk * G`.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let secret = loop {
            let candidate = Scalar::random(&mut *rng);
            if !bool::from(candidate.is_zero()) {
                break candidate;
            }
        };
        let public = ProjectivePoint::GENERATOR * secret;
        Self { secret, public }
    }

    #[must_use]
    pub fn public_key(&self) -> ChameleonPubKey {
        ChameleonPubKey::from_point(&self.public)
    }

    #[must_use]
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_repr().into()
    }

    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let repr = p256::FieldBytes::clone_from_slice(bytes);
        let secret: Scalar =
            Option::from(Scalar::from_repr(repr)).ok_or(CryptoError::SecretKeyOutOfRange)?;
        if bool::from(secret.is_zero()) {
            return Err(CryptoError::SecretKeyOutOfRange);
        }
        let public = ProjectivePoint::GENERATOR * secret;
        Ok(Self { secret, public })
    }
}

/// Serialized P-256 public key: `X || Y`, 64 bytes total (spec.md §3).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChameleonPubKey {
    pub x: [u8; 32],
    pub y: [u8; 32],
}

impl ChameleonPubKey {
    pub(crate) fn from_point(point: &ProjectivePoint) -> Self {
        let encoded = point.to_affine().to_encoded_point(false);
        let mut x = [0_u8; 32];
        let mut y = [0_u8; 32];
        x.copy_from_slice(encoded.x().expect("uncompressed point has x"));
        y.copy_from_slice(encoded.y().expect("uncompressed point has y"));
        Self { x, y }
    }

    pub(crate) fn to_point(self) -> Result<ProjectivePoint, CryptoError> {
        let encoded = p256::EncodedPoint::from_affine_coordinates(
            p256::FieldBytes::from_slice(&self.x),
            p256::FieldBytes::from_slice(&self.y),
            false,
        );
        let affine: AffinePoint =
            Option::from(AffinePoint::from_encoded_point(&encoded)).ok_or(CryptoError::InvalidPoint)?;
        Ok(ProjectivePoint::from(affine))
    }

    #[must_use]
    pub fn to_bytes(self) -> [u8; PUBKEY_LEN] {
        let mut out = [0_u8; PUBKEY_LEN];
        out[..32].copy_from_slice(&self.x);
        out[32..].copy_from_slice(&self.y);
        out
    }

    pub fn from_bytes(bytes: &[u8; PUBKEY_LEN]) -> Self {
        let mut x = [0_u8; 32];
        let mut y = [0_u8; 32];
        x.copy_from_slice(&bytes[..32]);
        y.copy_from_slice(&bytes[32..]);
        Self { x, y }
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;

    use super::*;

    #[test]
    fn rebuild_pub_key_round_trips() {
        let key_pair = ChameleonKeyPair::generate(&mut OsRng);
        let rebuilt = ChameleonKeyPair::from_secret_bytes(&key_pair.secret_bytes()).unwrap();
        assert_eq!(rebuilt.public_key(), key_pair.public_key());
    }

    #[test]
    fn serialized_lengths_match_spec() {
        let key_pair = ChameleonKeyPair::generate(&mut OsRng);
        assert_eq!(key_pair.public_key().to_bytes().len(), PUBKEY_LEN);
    }
}

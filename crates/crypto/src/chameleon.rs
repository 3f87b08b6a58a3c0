use elliptic_curve::group::Group;
use elliptic_curve::ops::Reduce;
use elliptic_curve::sec1::ToEncodedPoint;
use elliptic_curve::{Field, PrimeField};
use meshfile_primitives::Digest;
use p256::{AffinePoint, ProjectivePoint, Scalar, U256};
use rand_core::{CryptoRng, RngCore};
use subtle::ConstantTimeEq;

use crate::error::CryptoError;
use crate::keypair::{ChameleonKeyPair, ChameleonPubKey, RANDOMNESS_LEN};

/// `(rX, rY, s)`: a fresh P-256 point plus the scalar that produced it,
/// serialized as three 32-byte big-endian integers (spec.md §3).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChameleonRandomness {
    pub r_x: [u8; 32],
    pub r_y: [u8; 32],
    pub s: [u8; 32],
}

impl ChameleonRandomness {
    #[must_use]
    pub fn to_bytes(self) -> [u8; RANDOMNESS_LEN] {
        let mut out = [0_u8; RANDOMNESS_LEN];
        out[..32].copy_from_slice(&self.r_x);
        out[32..64].copy_from_slice(&self.r_y);
        out[64..].copy_from_slice(&self.s);
        out
    }

    #[must_use]
    pub fn from_bytes(bytes: &[u8; RANDOMNESS_LEN]) -> Self {
        let mut r_x = [0_u8; 32];
        let mut r_y = [0_u8; 32];
        let mut s = [0_u8; 32];
        r_x.copy_from_slice(&bytes[..32]);
        r_y.copy_from_slice(&bytes[32..64]);
        s.copy_from_slice(&bytes[64..]);
        Self { r_x, r_y, s }
    }

    fn scalar_s(self) -> Result<Scalar, CryptoError> {
        decode_scalar(&self.s)
    }

    fn point(self) -> Result<AffinePoint, CryptoError> {
        let encoded = p256::EncodedPoint::from_affine_coordinates(
            p256::FieldBytes::from_slice(&self.r_x),
            p256::FieldBytes::from_slice(&self.r_y),
            false,
        );
        Option::from(AffinePoint::from_encoded_point(&encoded)).ok_or(CryptoError::InvalidPoint)
    }
}

fn decode_scalar(bytes: &[u8; 32]) -> Result<Scalar, CryptoError> {
    Option::from(Scalar::from_repr(*p256::FieldBytes::from_slice(bytes)))
        .ok_or(CryptoError::InvalidMessage)
}

fn digest_to_scalar(digest: &Digest) -> Scalar {
    let field_bytes = p256::FieldBytes::clone_from_slice(digest.as_bytes());
    <Scalar as Reduce<U256>>::reduce_bytes(&field_bytes)
}

fn reduce_x_coordinate(point: &ProjectivePoint) -> (Digest, Scalar) {
    let encoded = point.to_affine().to_encoded_point(false);
    let x_bytes = encoded.x().expect("uncompressed point has x");
    let mut rx = [0_u8; 32];
    rx.copy_from_slice(x_bytes);
    let h_scalar = <Scalar as Reduce<U256>>::reduce_bytes(x_bytes);
    let mut h = [0_u8; 32];
    h.copy_from_slice(&h_scalar.to_repr());
    (Digest::new(h), h_scalar)
}

/// Computes `(rX, rY, s, h)` for message digest `m` under public key `pk`:
/// `r_point = s*G + m*PK`, `h = x(r_point) mod n`. `s` is fresh per call.
pub fn hash<R: RngCore + CryptoRng>(
    rng: &mut R,
    message: &Digest,
    pk: ChameleonPubKey,
) -> Result<(ChameleonRandomness, Digest), CryptoError> {
    let pk_point = pk.to_point()?;
    let m = digest_to_scalar(message);

    let s = Scalar::random(&mut *rng);
    let r_point = ProjectivePoint::GENERATOR * s + pk_point * m;
    if bool::from(r_point.is_identity()) {
        return Err(CryptoError::IdentityResult);
    }

    let (h, _h_scalar) = reduce_x_coordinate(&r_point);
    let encoded = r_point.to_affine().to_encoded_point(false);
    let mut r_x = [0_u8; 32];
    let mut r_y = [0_u8; 32];
    r_x.copy_from_slice(encoded.x().expect("uncompressed point has x"));
    r_y.copy_from_slice(encoded.y().expect("uncompressed point has y"));

    let mut s_bytes = [0_u8; 32];
    s_bytes.copy_from_slice(&s.to_repr());

    Ok((
        ChameleonRandomness {
            r_x,
            r_y,
            s: s_bytes,
        },
        h,
    ))
}

/// Recomputes `s*G + m*PK` and checks it equals `(rX, rY)` and that its
/// reduced x-coordinate equals `h`.
pub fn verify(
    message: &Digest,
    randomness: ChameleonRandomness,
    pk: ChameleonPubKey,
    h: Digest,
) -> Result<bool, CryptoError> {
    let pk_point = pk.to_point()?;
    let m = digest_to_scalar(message);
    let s = randomness.scalar_s()?;
    let claimed_point = ProjectivePoint::from(randomness.point()?);

    let recomputed = ProjectivePoint::GENERATOR * s + pk_point * m;
    if bool::from(recomputed.is_identity()) {
        return Err(CryptoError::IdentityResult);
    }

    let points_equal = bool::from(recomputed.to_affine().ct_eq(&claimed_point.to_affine()));
    let (recomputed_h, _) = reduce_x_coordinate(&recomputed);

    Ok(points_equal && recomputed_h == h)
}



/// Finds `(rX', rY', s')` such that `verify(m_new, rX', rY', s', sk*G, h)`
/// holds, given the secret key `sk` and the original collision witness
/// (spec.md §4.1). The resulting point is identical to the original, so
/// `(rX', rY') = (rX, rY)` unchanged — only `s'` rotates.
pub fn find_collision(
    message_old: &Digest,
    randomness_old: ChameleonRandomness,
    message_new: &Digest,
    key_pair: &ChameleonKeyPair,
) -> Result<ChameleonRandomness, CryptoError> {
    let m_old = digest_to_scalar(message_old);
    let m_new = digest_to_scalar(message_new);
    let s_old = randomness_old.scalar_s()?;
    let sk = key_pair.secret;

    let k = s_old + m_old * sk;
    let s_new = k - m_new * sk;

    let mut s_bytes = [0_u8; 32];
    s_bytes.copy_from_slice(&s_new.to_repr());

    Ok(ChameleonRandomness {
        r_x: randomness_old.r_x,
        r_y: randomness_old.r_y,
        s: s_bytes,
    })
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;

    use super::*;

    #[test]
    fn hash_then_verify_round_trips() {
        let key_pair = ChameleonKeyPair::generate(&mut OsRng);
        let message = Digest::new([9_u8; 32]);

        let (randomness, h) = hash(&mut OsRng, &message, key_pair.public_key()).unwrap();

        assert!(verify(&message, randomness, key_pair.public_key(), h).unwrap());
    }

    #[test]
    fn collision_preserves_hash_under_new_message() {
        let key_pair = ChameleonKeyPair::generate(&mut OsRng);
        let message_old = Digest::new([1_u8; 32]);
        let message_new = Digest::new([2_u8; 32]);

        let (randomness_old, h) = hash(&mut OsRng, &message_old, key_pair.public_key()).unwrap();
        assert!(verify(&message_old, randomness_old, key_pair.public_key(), h).unwrap());

        let randomness_new =
            find_collision(&message_old, randomness_old, &message_new, &key_pair).unwrap();

        assert!(verify(&message_new, randomness_new, key_pair.public_key(), h).unwrap());
        assert_eq!(randomness_new.r_x, randomness_old.r_x);
        assert_eq!(randomness_new.r_y, randomness_old.r_y);
    }

    #[test]
    fn tampered_randomness_fails_verification() {
        let key_pair = ChameleonKeyPair::generate(&mut OsRng);
        let message = Digest::new([3_u8; 32]);
        let (mut randomness, h) = hash(&mut OsRng, &message, key_pair.public_key()).unwrap();
        randomness.s[0] ^= 0xFF;

        assert!(!verify(&message, randomness, key_pair.public_key(), h).unwrap());
    }
}

use meshfile_primitives::CoreError;
use thiserror::Error;

/// Crypto-layer failures (spec.md §4.1, mapped to `CoreError::Crypto` at the
/// workspace boundary).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CryptoError {
    #[error("secret key is out of range for the curve order")]
    SecretKeyOutOfRange,

    #[error("message digest could not be decoded to a curve scalar")]
    InvalidMessage,

    #[error("coordinates do not lie on the P-256 curve")]
    InvalidPoint,

    #[error("point arithmetic yielded the identity element")]
    IdentityResult,

    #[error("chameleon hash verification failed")]
    VerificationFailed,

    #[error("secret key does not reproduce the stored public key")]
    InvalidKey,
}

impl From<CryptoError> for CoreError {
    fn from(err: CryptoError) -> Self {
        Self::Crypto(err.to_string())
    }
}

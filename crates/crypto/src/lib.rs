//! Chameleon (trapdoor) hash primitives over NIST P-256 (spec.md §4.1).
//!
//! Knowing the trapdoor `sk`, `find_collision` lets a publisher retarget a
//! chameleon hash `h` from an old preimage to a new one without changing
//! `h` itself — this is what keeps a `ChameleonTree`'s externally published
//! CID stable across authorized content edits.

mod chameleon;
mod error;
mod keypair;

pub use chameleon::{find_collision, hash, verify, ChameleonRandomness};
pub use error::CryptoError;
pub use keypair::{ChameleonKeyPair, ChameleonPubKey, PUBKEY_LEN, RANDOMNESS_LEN};

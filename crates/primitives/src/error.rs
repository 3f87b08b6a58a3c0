use libp2p_identity::PeerId;
use thiserror::Error;

use crate::digest::Digest;

/// The eight-kind error taxonomy from spec.md §7, shared across every crate
/// in the workspace so that a caller at any layer can match on `kind()`
/// without parsing strings.
///
/// Low-level transports produce `RetryableIo`; `ChunkProtocol` attaches
/// `peer_id`/`chunk_hash` as it propagates; the orchestrator converts an
/// exhausted retry budget into `Exhausted` and ultimately `DownloadFailed`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// Malformed request, invalid digest, unsupported tree_type, bad config.
    #[error("invalid input: {0}")]
    Input(String),

    /// Missing metadata, missing chunk, no DHT providers.
    #[error("not found: {0}")]
    NotFound(String),

    /// Chameleon hash / Merkle proof verification failure.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Stream open refused, deadline exceeded, transient DHT timeout, quota
    /// exhaustion. Safe to retry per the caller's backoff policy.
    #[error("retryable I/O error{}{}: {source}",
        .peer_id.map(|p| format!(" (peer {p})")).unwrap_or_default(),
        .chunk_hash.map(|h| format!(" (chunk {h})")).unwrap_or_default())]
    RetryableIo {
        peer_id: Option<PeerId>,
        chunk_hash: Option<Digest>,
        source: std::io::Error,
    },

    /// Oversized chunk, non-JSON response, truncated framing.
    #[error("protocol error{}: {message}",
        .peer_id.map(|p| format!(" (peer {p})")).unwrap_or_default())]
    Protocol {
        peer_id: Option<PeerId>,
        message: String,
    },

    /// The caller's cancellation signal fired.
    #[error("operation cancelled")]
    Cancelled,

    /// Every retry attempt and every provider has been tried.
    #[error("exhausted all {attempts} attempts across {providers_tried} provider(s)")]
    Exhausted {
        attempts: u32,
        providers_tried: u32,
    },

    /// Terminal for the process: host failed to start, storage directory
    /// uncreatable, DHT bootstrap found no reachable peers.
    #[error("fatal: {0}")]
    Fatal(String),

    /// A download failed for a specific chunk after exhausting retries.
    #[error("download failed at chunk {chunk_index}: {cause}")]
    DownloadFailed {
        chunk_index: usize,
        cause: String,
    },
}

impl CoreError {
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RetryableIo { .. })
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Input(_) => "input",
            Self::NotFound(_) => "not_found",
            Self::Crypto(_) => "crypto",
            Self::RetryableIo { .. } => "retryable_io",
            Self::Protocol { .. } => "protocol",
            Self::Cancelled => "cancelled",
            Self::Exhausted { .. } => "exhausted",
            Self::Fatal(_) => "fatal",
            Self::DownloadFailed { .. } => "download_failed",
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

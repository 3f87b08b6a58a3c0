//! The bidirectional stream abstraction (spec.md §3 "Stream"), decoupled
//! from any concrete transport so the protocol crate can run against both
//! a real host and the in-memory test double.

use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};

/// A duplex byte pipe opened on one logical protocol id with one peer.
/// Exclusive to its opener for its lifetime; dropping it releases the
/// peer's stream quota slot (the caller is responsible for calling
/// `ConnectionManager::release_stream` on drop).
pub trait DuplexStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> DuplexStream for T {}

pub type Stream = Pin<Box<dyn DuplexStream>>;

use libp2p_identity::PeerId;

use crate::stream::Stream;

/// One inbound stream delivered to the local node: which protocol it was
/// opened on, who opened it, and the stream itself (spec.md §4.10 "four
/// inbound protocol handlers"). A concrete `Host` implementation is
/// expected to deliver these over some channel of its own choosing; this
/// crate only defines the shape the `Node` facade dispatches on.
pub struct IncomingStream {
    pub protocol: String,
    pub remote: PeerId,
    pub stream: Stream,
}

//! Configuration, download/publish orchestration, and the node facade that
//! ties transport, DHT, storage, and peer management together (spec.md
//! §4.9, §4.10, §4.11).

mod config;
mod node;
mod orchestrator;
mod types;

pub use config::{AntiLeecherConfig, NodeConfig, RawAntiLeecherConfig, RawConfig};
pub use node::Node;
pub use orchestrator::{DeliveryMode, DownloadOrchestrator};
pub use types::{DownloadProgress, NodeStats, NodeStatsSnapshot, PublishReceipt};

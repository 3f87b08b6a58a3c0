use std::time::Duration;

use camino::Utf8PathBuf;
use meshfile_primitives::{CoreError, DEFAULT_BLOCK_SIZE};
use multiaddr::Multiaddr;
use serde::{Deserialize, Serialize};

const MIN_BLOCK_SIZE: u32 = 1024;
const MAX_BLOCK_SIZE: u32 = 4 * 1024 * 1024;

fn default_protocol_prefix() -> String {
    "p2pFileTransfer".to_string()
}
fn default_namespace() -> String {
    "v".to_string()
}
fn default_chunk_path() -> String {
    "data/chunks".to_string()
}
fn default_metadata_path() -> String {
    "data/metadata".to_string()
}
const fn default_block_size() -> u32 {
    DEFAULT_BLOCK_SIZE
}
const fn default_buffer_number() -> u32 {
    16
}
const fn default_max_retries() -> u32 {
    3
}
const fn default_max_concurrency() -> u32 {
    16
}
const fn default_request_timeout_s() -> u32 {
    5
}
const fn default_data_timeout_s() -> u32 {
    30
}
const fn default_dht_timeout_s() -> u32 {
    10
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}
const fn default_min_success_rate() -> f64 {
    0.5
}
const fn default_min_requests() -> u32 {
    10
}
const fn default_blacklist_timeout_s() -> u32 {
    300
}

/// The deserializable shape of every configuration option named in
/// spec.md §6. Defaults mirror the spec's stated defaults; range
/// validation happens in `TryFrom<RawConfig> for NodeConfig`, matching
/// the raw/validated config split (ambient addition, SPEC_FULL.md §4.11).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawAntiLeecherConfig {
    pub enabled: bool,
    pub min_success_rate: Option<f64>,
    pub min_requests: Option<u32>,
    pub blacklist_timeout_s: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub port: u16,
    pub insecure: bool,
    pub seed: Option<i64>,
    pub bootstrap_peers: Vec<String>,
    pub protocol_prefix: String,
    pub auto_refresh: bool,
    pub namespace: String,
    pub chunk_path: String,
    pub metadata_path: String,
    pub block_size: u32,
    pub buffer_number: u32,
    pub max_retries: u32,
    pub max_concurrency: u32,
    pub request_timeout_s: u32,
    pub data_timeout_s: u32,
    pub dht_timeout_s: u32,
    pub log_level: String,
    pub log_format: String,
    pub anti_leecher: RawAntiLeecherConfig,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            port: 0,
            insecure: false,
            seed: None,
            bootstrap_peers: Vec::new(),
            protocol_prefix: default_protocol_prefix(),
            auto_refresh: true,
            namespace: default_namespace(),
            chunk_path: default_chunk_path(),
            metadata_path: default_metadata_path(),
            block_size: default_block_size(),
            buffer_number: default_buffer_number(),
            max_retries: default_max_retries(),
            max_concurrency: default_max_concurrency(),
            request_timeout_s: default_request_timeout_s(),
            data_timeout_s: default_data_timeout_s(),
            dht_timeout_s: default_dht_timeout_s(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            anti_leecher: RawAntiLeecherConfig::default(),
        }
    }
}

/// Anti-leecher policy thresholds (spec.md §6 `anti_leecher.*`).
#[derive(Clone, Copy, Debug)]
pub struct AntiLeecherConfig {
    pub enabled: bool,
    pub min_success_rate: f64,
    pub min_requests: u32,
    pub blacklist_timeout: Duration,
}

/// The validated, range-checked runtime configuration. Constructed only
/// via `TryFrom<RawConfig>`, so a live `NodeConfig` is always in range.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct NodeConfig {
    pub port: u16,
    pub insecure: bool,
    pub seed: Option<i64>,
    pub bootstrap_peers: Vec<Multiaddr>,
    pub protocol_prefix: String,
    pub auto_refresh: bool,
    pub namespace: String,
    pub chunk_path: Utf8PathBuf,
    pub metadata_path: Utf8PathBuf,
    pub block_size: u32,
    pub buffer_number: u32,
    pub max_retries: u32,
    pub max_concurrency: u32,
    pub request_timeout: Duration,
    pub data_timeout: Duration,
    pub dht_timeout: Duration,
    pub log_level: String,
    pub log_format: String,
    pub anti_leecher: AntiLeecherConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::try_from(RawConfig::default()).expect("built-in defaults are always in range")
    }
}

fn in_range<T: PartialOrd + std::fmt::Display + Copy>(
    field: &str,
    value: T,
    min: T,
    max: T,
) -> Result<T, CoreError> {
    if value < min || value > max {
        return Err(CoreError::Input(format!(
            "{field}={value} out of range [{min}, {max}]"
        )));
    }
    Ok(value)
}

impl TryFrom<RawConfig> for NodeConfig {
    type Error = CoreError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        let block_size = in_range("block_size", raw.block_size, MIN_BLOCK_SIZE, MAX_BLOCK_SIZE)?;
        let buffer_number = in_range("buffer_number", raw.buffer_number, 1, 256)?;
        let max_retries = in_range("max_retries", raw.max_retries, 0, 100)?;
        let max_concurrency = in_range("max_concurrency", raw.max_concurrency, 1, 1024)?;
        let request_timeout_s = in_range("request_timeout_s", raw.request_timeout_s, 1, 3600)?;
        let data_timeout_s = in_range("data_timeout_s", raw.data_timeout_s, 1, 7200)?;
        let dht_timeout_s = in_range("dht_timeout_s", raw.dht_timeout_s, 1, 3600)?;

        if !matches!(raw.log_level.as_str(), "debug" | "info" | "warn" | "error") {
            return Err(CoreError::Input(format!("unrecognized log_level {:?}", raw.log_level)));
        }
        if !matches!(raw.log_format.as_str(), "json" | "text") {
            return Err(CoreError::Input(format!("unrecognized log_format {:?}", raw.log_format)));
        }

        let bootstrap_peers = raw
            .bootstrap_peers
            .iter()
            .map(|addr| {
                addr.parse::<Multiaddr>()
                    .map_err(|e| CoreError::Input(format!("invalid bootstrap_peers entry {addr:?}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let anti_leecher = AntiLeecherConfig {
            enabled: raw.anti_leecher.enabled,
            min_success_rate: in_range(
                "anti_leecher.min_success_rate",
                raw.anti_leecher.min_success_rate.unwrap_or_else(default_min_success_rate),
                0.0,
                1.0,
            )?,
            min_requests: in_range(
                "anti_leecher.min_requests",
                raw.anti_leecher.min_requests.unwrap_or_else(default_min_requests),
                1,
                10_000,
            )?,
            blacklist_timeout: Duration::from_secs(u64::from(
                raw.anti_leecher.blacklist_timeout_s.unwrap_or_else(default_blacklist_timeout_s),
            )),
        };

        Ok(Self {
            port: raw.port,
            insecure: raw.insecure,
            seed: raw.seed,
            bootstrap_peers,
            protocol_prefix: raw.protocol_prefix,
            auto_refresh: raw.auto_refresh,
            namespace: raw.namespace,
            chunk_path: Utf8PathBuf::from(raw.chunk_path),
            metadata_path: Utf8PathBuf::from(raw.metadata_path),
            block_size,
            buffer_number,
            max_retries,
            max_concurrency,
            request_timeout: Duration::from_secs(u64::from(request_timeout_s)),
            data_timeout: Duration::from_secs(u64::from(data_timeout_s)),
            dht_timeout: Duration::from_secs(u64::from(dht_timeout_s)),
            log_level: raw.log_level,
            log_format: raw.log_format,
            anti_leecher,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_raw_config_validates() {
        let config = NodeConfig::try_from(RawConfig::default()).unwrap();
        assert_eq!(config.block_size, DEFAULT_BLOCK_SIZE);
        assert_eq!(config.max_concurrency, 16);
    }

    #[test]
    fn rejects_undersized_block_size() {
        let raw = RawConfig {
            block_size: 512,
            ..RawConfig::default()
        };
        assert!(matches!(NodeConfig::try_from(raw), Err(CoreError::Input(_))));
    }

    #[test]
    fn rejects_unrecognized_log_level() {
        let raw = RawConfig {
            log_level: "trace".to_string(),
            ..RawConfig::default()
        };
        assert!(matches!(NodeConfig::try_from(raw), Err(CoreError::Input(_))));
    }

    #[test]
    fn rejects_out_of_range_success_rate() {
        let raw = RawConfig {
            anti_leecher: RawAntiLeecherConfig {
                min_success_rate: Some(1.5),
                ..RawAntiLeecherConfig::default()
            },
            ..RawConfig::default()
        };
        assert!(matches!(NodeConfig::try_from(raw), Err(CoreError::Input(_))));
    }

    #[test]
    fn parses_bootstrap_peer_multiaddrs() {
        let raw = RawConfig {
            bootstrap_peers: vec!["/ip4/127.0.0.1/tcp/4001".to_string()],
            ..RawConfig::default()
        };
        let config = NodeConfig::try_from(raw).unwrap();
        assert_eq!(config.bootstrap_peers.len(), 1);
    }
}

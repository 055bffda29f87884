use std::{default::Default, net::IpAddr, time::Duration};

use crate::{
    constants::MAX_PACKET_SIZE,
    error::{ErrorKind, Result},
    link::MacAddr,
};

/// Policy deciding whether this node re-floods a packet.
#[derive(Clone, Debug, Copy, PartialEq, Eq, Default)]
pub enum RelayType {
    /// Classical flooding: relay whenever relaying is enabled.
    #[default]
    Cf,
    /// Selective multi-point relay: relay only for MPR selectors.
    SMpr,
    /// Essential connected dominating set: relay only while selected.
    ECds,
}

/// Digest used for hash based duplicate detection.
#[derive(Clone, Debug, Copy, PartialEq, Eq, Default)]
pub enum HashAlgorithm {
    /// No hashing.
    #[default]
    None,
    /// CRC-32 (IEEE).
    Crc32,
    /// MD5.
    Md5,
    /// SHA-1.
    Sha1,
}

/// Whether hash based detection may alter packets.
#[derive(Clone, Debug, Copy, PartialEq, Eq, Default)]
pub enum HashMode {
    /// Digests are used locally only, packets are never modified.
    #[default]
    Internal,
    /// H-DPD: ingress interfaces install hash assist values on collision.
    Hdpd,
}

/// Duplicate table flavour used for identification based detection.
#[derive(Clone, Debug, Copy, PartialEq, Eq, Default)]
pub enum DpdTableKind {
    /// Per-flow sliding window over sequential identifiers.
    #[default]
    Window,
    /// Per-flow history of explicit identifiers.
    Tree,
}

#[derive(Clone, Debug)]
/// Configuration options for the forwarding engine.
pub struct Config {
    /// Table flavour for identification based detection.
    pub dpd_table: DpdTableKind,
    /// Sliding window size in packets.
    pub window_size: u32,
    /// Age (in sequence numbers) past which a packet is assumed a stale duplicate.
    pub window_past_max: u32,
    /// Max ticks a flow may go untouched before pruning removes it.
    pub update_age_max: u64,
    /// Wall-clock interval between prune timeouts.
    pub prune_interval: Duration,
    /// Ticks the logical clock advances per prune timeout.
    pub prune_interval_ticks: u64,
    /// Max flows per duplicate table (0 = unbounded). The LRU tail is evicted when full.
    pub max_flows: usize,
    /// Max identifiers remembered per tree-variant flow.
    pub max_tree_ids_per_flow: usize,
    /// Use identification based detection (IPv4 ID, SMF_DPD identifiers).
    pub use_idpd: bool,
    /// Hash algorithm for hash based detection.
    pub hash_algorithm: HashAlgorithm,
    /// Whether hashing is internal only or may install hash assist values.
    pub hash_mode: HashMode,
    /// Forward unicast destinations in addition to multicast.
    pub forward_unicast: bool,
    /// Ticks a "stop relaying" transition waits before taking effect.
    pub relay_stop_delay: u64,
    /// Initial state of the relay function.
    pub relay_enabled: bool,
    /// Initial E_CDS relay selection.
    pub relay_selected: bool,
    /// Tagger id written into SMF_DPD options this node inserts (None = NULL tagger).
    pub tagger_id: Option<IpAddr>,
    /// Largest packet the buffer may grow to when inserting headers.
    pub max_packet_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dpd_table: DpdTableKind::Window,
            window_size: 128,
            window_past_max: 32768,
            update_age_max: 10,
            prune_interval: Duration::from_secs(5),
            prune_interval_ticks: 5, // one tick per second
            max_flows: 4096,
            max_tree_ids_per_flow: 1024,
            use_idpd: true,
            hash_algorithm: HashAlgorithm::None,
            hash_mode: HashMode::Internal,
            forward_unicast: false,
            relay_stop_delay: 0,
            relay_enabled: true,
            relay_selected: false,
            tagger_id: None,
            max_packet_size: MAX_PACKET_SIZE,
        }
    }
}

impl Config {
    /// Checks the configuration for contract violations.
    ///
    /// Values are never clamped here: anything out of range is an error.
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(ErrorKind::InvalidConfig("window_size must be non-zero"));
        }
        if self.window_past_max < self.window_size {
            return Err(ErrorKind::InvalidConfig("window_past_max must be >= window_size"));
        }
        if self.window_past_max > 1 << 31 {
            return Err(ErrorKind::InvalidConfig("window_past_max exceeds half the 32-bit space"));
        }
        if self.prune_interval.is_zero() {
            return Err(ErrorKind::InvalidConfig("prune_interval must be non-zero"));
        }
        if self.prune_interval_ticks == 0 {
            return Err(ErrorKind::InvalidConfig("prune_interval_ticks must be non-zero"));
        }
        if self.max_tree_ids_per_flow == 0 {
            return Err(ErrorKind::InvalidConfig("max_tree_ids_per_flow must be non-zero"));
        }
        if self.hash_mode == HashMode::Hdpd && self.hash_algorithm == HashAlgorithm::None {
            return Err(ErrorKind::InvalidConfig("H-DPD requires a hash algorithm"));
        }
        Ok(())
    }
}

/// Per-interface settings.
#[derive(Clone, Debug)]
pub struct InterfaceConfig {
    /// Interface name, used in logs only.
    pub name: String,
    /// Own link-layer address, used to spot re-captured transmissions.
    pub mac: MacAddr,
    /// Overwrite or add identifiers on packets arriving here (ingress).
    pub resequence: bool,
    /// Tunnel endpoint: link-local traffic allowed, TTL left untouched.
    pub tunnel: bool,
    /// Re-flood on the arrival interface inside RELAY groups.
    pub reflect: bool,
}

impl InterfaceConfig {
    /// Creates a plain interface configuration.
    pub fn new(name: impl Into<String>, mac: MacAddr) -> Self {
        Self { name: name.into(), mac, resequence: false, tunnel: false, reflect: false }
    }

    /// Marks the interface as resequencing.
    pub fn resequence(mut self, on: bool) -> Self {
        self.resequence = on;
        self
    }

    /// Marks the interface as a tunnel endpoint.
    pub fn tunnel(mut self, on: bool) -> Self {
        self.tunnel = on;
        self
    }

    /// Marks the interface as reflecting.
    pub fn reflect(mut self, on: bool) -> Self {
        self.reflect = on;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_window() {
        let mut config = Config::default();
        config.window_past_max = config.window_size - 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.window_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_hdpd_needs_algorithm() {
        let mut config = Config::default();
        config.hash_mode = HashMode::Hdpd;
        assert!(config.validate().is_err());
        config.hash_algorithm = HashAlgorithm::Crc32;
        assert!(config.validate().is_ok());
    }
}

use std::time::Duration;

use clap::Parser;

use crate::core::identifier::NodeAddress;
use crate::maintenance::MaintenancePeriods;
use crate::{Error, Result};

const PERIOD_MIN_MS: u64 = 1;
const PERIOD_MAX_MS: u64 = 60_000;

/// Node configuration. Parsed from the command line; `validate` must pass
/// before any socket is opened.
#[derive(Parser, Debug, Clone)]
#[command(name = "chord", about = "A Chord DHT node storing hashed file payloads")]
pub struct Config {
    /// Local hostname or IP to advertise to peers.
    #[arg(long, default_value = "127.0.0.1")]
    pub bind_address: String,

    /// Local TCP port. 0 binds an ephemeral port.
    #[arg(long)]
    pub bind_port: u16,

    /// Address of a bootstrap peer; requires --join-port.
    #[arg(long)]
    pub join_address: Option<String>,

    /// Port of the bootstrap peer; requires --join-address.
    #[arg(long)]
    pub join_port: Option<u16>,

    /// Milliseconds between stabilize rounds (1..=60000).
    #[arg(long, default_value_t = 1_000)]
    pub stabilize_period_ms: u64,

    /// Milliseconds between fix_fingers rounds (1..=60000).
    #[arg(long, default_value_t = 3_000)]
    pub fix_fingers_period_ms: u64,

    /// Milliseconds between check_predecessor rounds (1..=60000).
    #[arg(long, default_value_t = 1_000)]
    pub check_predecessor_period_ms: u64,

    /// Length of the successor list (the r parameter).
    #[arg(long, default_value_t = 4)]
    pub successor_list_length: usize,

    /// Seed string hashed into this node's identifier instead of the
    /// advertised address.
    #[arg(long)]
    pub identifier_override: Option<String>,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.bind_address.trim().is_empty() {
            return Err(Error::Config("bind address must not be empty".into()));
        }
        if self.join_address.is_some() != self.join_port.is_some() {
            return Err(Error::Config(
                "--join-address and --join-port must be given together".into(),
            ));
        }
        for (name, value) in [
            ("stabilize-period-ms", self.stabilize_period_ms),
            ("fix-fingers-period-ms", self.fix_fingers_period_ms),
            ("check-predecessor-period-ms", self.check_predecessor_period_ms),
        ] {
            if !(PERIOD_MIN_MS..=PERIOD_MAX_MS).contains(&value) {
                return Err(Error::Config(format!(
                    "{name} must be within {PERIOD_MIN_MS}..={PERIOD_MAX_MS}, got {value}"
                )));
            }
        }
        if self.successor_list_length == 0 {
            return Err(Error::Config(
                "successor-list-length must be positive".into(),
            ));
        }
        Ok(())
    }

    /// The bootstrap peer to join through, if any.
    pub fn bootstrap(&self) -> Option<NodeAddress> {
        match (&self.join_address, self.join_port) {
            (Some(host), Some(port)) => Some(NodeAddress::new(host, port)),
            _ => None,
        }
    }

    pub fn periods(&self) -> MaintenancePeriods {
        MaintenancePeriods {
            stabilize: Duration::from_millis(self.stabilize_period_ms),
            fix_fingers: Duration::from_millis(self.fix_fingers_period_ms),
            check_predecessor: Duration::from_millis(self.check_predecessor_period_ms),
        }
    }

    /// Per-RPC deadline: the smallest maintenance period, kept inside
    /// 250ms..=2s so extreme periods neither starve nor stall calls.
    pub fn rpc_timeout(&self) -> Duration {
        let min_period = self
            .stabilize_period_ms
            .min(self.fix_fingers_period_ms)
            .min(self.check_predecessor_period_ms);
        Duration::from_millis(min_period.clamp(250, 2_000))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn base() -> Config {
        Config {
            bind_address: "127.0.0.1".into(),
            bind_port: 0,
            join_address: None,
            join_port: None,
            stabilize_period_ms: 1_000,
            fix_fingers_period_ms: 3_000,
            check_predecessor_period_ms: 1_000,
            successor_list_length: 4,
            identifier_override: None,
        }
    }

    #[test]
    fn default_shape_is_valid() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn one_sided_join_pair_is_rejected() {
        let mut cfg = base();
        cfg.join_address = Some("10.0.0.1".into());
        assert!(cfg.validate().is_err());

        let mut cfg = base();
        cfg.join_port = Some(4000);
        assert!(cfg.validate().is_err());

        let mut cfg = base();
        cfg.join_address = Some("10.0.0.1".into());
        cfg.join_port = Some(4000);
        assert!(cfg.validate().is_ok());
        assert_eq!(
            cfg.bootstrap(),
            Some(NodeAddress::new("10.0.0.1", 4000))
        );
    }

    #[test]
    fn out_of_range_periods_are_rejected() {
        let mut cfg = base();
        cfg.stabilize_period_ms = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = base();
        cfg.fix_fingers_period_ms = 60_001;
        assert!(cfg.validate().is_err());

        let mut cfg = base();
        cfg.check_predecessor_period_ms = 60_000;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_length_successor_list_is_rejected() {
        let mut cfg = base();
        cfg.successor_list_length = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rpc_timeout_tracks_the_smallest_period() {
        let mut cfg = base();
        cfg.stabilize_period_ms = 700;
        assert_eq!(cfg.rpc_timeout(), Duration::from_millis(700));

        cfg.check_predecessor_period_ms = 5;
        assert_eq!(cfg.rpc_timeout(), Duration::from_millis(250));

        cfg.stabilize_period_ms = 60_000;
        cfg.fix_fingers_period_ms = 60_000;
        cfg.check_predecessor_period_ms = 60_000;
        assert_eq!(cfg.rpc_timeout(), Duration::from_millis(2_000));
    }
}

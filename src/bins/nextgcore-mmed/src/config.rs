//! MME configuration
//!
//! Only the parts of the MME YAML file the S11 path reads:
//!
//! ```yaml
//! mme:
//!   gtpc:
//!     server:
//!       - address: 127.0.0.2
//!     client:
//!       sgwc:
//!         - address: 127.0.0.3
//! time:
//!   message:
//!     gtp:
//!       t3_response_ms: 3000
//!       n3_response_rcount: 3
//! max:
//!   xact: 4096
//!   event_queue: 1024
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use ogs_gtp::{XactConfig, GTPV2_C_UDP_PORT};
use serde::Deserialize;

/// Default event queue depth
pub const DEFAULT_EVENT_QUEUE: usize = 1024;

/// One configured address
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AddrEntry {
    pub address: IpAddr,
    #[serde(default)]
    pub port: Option<u16>,
}

impl AddrEntry {
    fn localhost(last: u8) -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::new(127, 0, 0, last)),
            port: None,
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port.unwrap_or(GTPV2_C_UDP_PORT))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GtpcClientConfig {
    pub sgwc: Vec<AddrEntry>,
}

impl Default for GtpcClientConfig {
    fn default() -> Self {
        Self {
            sgwc: vec![AddrEntry::localhost(3)],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GtpcConfig {
    pub server: Vec<AddrEntry>,
    pub client: GtpcClientConfig,
}

impl Default for GtpcConfig {
    fn default() -> Self {
        Self {
            server: vec![AddrEntry::localhost(2)],
            client: GtpcClientConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MmeSection {
    pub gtpc: GtpcConfig,
}

/// GTP message timers
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GtpTimeConfig {
    pub t3_response_ms: u64,
    pub n3_response_rcount: u32,
}

impl Default for GtpTimeConfig {
    fn default() -> Self {
        let defaults = XactConfig::default();
        Self {
            t3_response_ms: defaults.t3_response.as_millis() as u64,
            n3_response_rcount: defaults.n3_response_retry,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MessageTimeConfig {
    pub gtp: GtpTimeConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    pub message: MessageTimeConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MaxConfig {
    pub xact: usize,
    pub event_queue: usize,
}

impl Default for MaxConfig {
    fn default() -> Self {
        Self {
            xact: XactConfig::default().max_xacts,
            event_queue: DEFAULT_EVENT_QUEUE,
        }
    }
}

/// MME configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MmeConfig {
    pub mme: MmeSection,
    pub time: TimeConfig,
    pub max: MaxConfig,
}

impl MmeConfig {
    /// Load configuration from a YAML file.
    ///
    /// A missing file falls back to defaults; a malformed one is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        log::info!("Loading configuration from: {}", path.display());

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                log::warn!(
                    "Could not read config file '{}': {}. Using defaults.",
                    path.display(),
                    e
                );
                return Ok(Self::default());
            }
        };

        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse YAML config '{}'", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content)?;
        if config.time.message.gtp.t3_response_ms == 0 {
            anyhow::bail!("time.message.gtp.t3_response_ms must be positive");
        }
        if config.time.message.gtp.n3_response_rcount == 0 {
            anyhow::bail!("time.message.gtp.n3_response_rcount must be positive");
        }
        if config.max.event_queue == 0 {
            anyhow::bail!("max.event_queue must be positive");
        }
        Ok(config)
    }

    pub fn xact_config(&self) -> XactConfig {
        XactConfig {
            t3_response: Duration::from_millis(self.time.message.gtp.t3_response_ms),
            n3_response_retry: self.time.message.gtp.n3_response_rcount,
            max_xacts: self.max.xact,
        }
    }

    /// GTP-C server addresses split by family, IPv4 first
    pub fn gtpc_server_addrs(&self) -> (Vec<SocketAddr>, Vec<SocketAddr>) {
        self.mme
            .gtpc
            .server
            .iter()
            .map(AddrEntry::socket_addr)
            .partition(SocketAddr::is_ipv4)
    }

    /// Configured SGW-C addresses, one entry per SGW
    pub fn sgw_addrs(&self) -> Vec<SocketAddr> {
        self.mme.gtpc.client.sgwc.iter().map(AddrEntry::socket_addr).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MmeConfig::default();
        assert_eq!(config.xact_config(), XactConfig::default());
        assert_eq!(
            config.gtpc_server_addrs(),
            (vec!["127.0.0.2:2123".parse::<SocketAddr>().unwrap()], vec![])
        );
        assert_eq!(config.sgw_addrs(), vec!["127.0.0.3:2123".parse::<SocketAddr>().unwrap()]);
        assert_eq!(config.max.event_queue, DEFAULT_EVENT_QUEUE);
    }

    #[test]
    fn test_parse_yaml() {
        let config = MmeConfig::from_yaml(
            r#"
mme:
  gtpc:
    server:
      - address: 10.0.0.1
      - address: "::1"
        port: 2124
      - address: 10.0.0.4
    client:
      sgwc:
        - address: 10.0.0.2
        - address: 10.0.0.3
          port: 3000
time:
  message:
    gtp:
      t3_response_ms: 500
      n3_response_rcount: 5
max:
  xact: 64
"#,
        )
        .unwrap();

        let xact = config.xact_config();
        assert_eq!(xact.t3_response, Duration::from_millis(500));
        assert_eq!(xact.n3_response_retry, 5);
        assert_eq!(xact.max_xacts, 64);
        assert_eq!(config.max.event_queue, DEFAULT_EVENT_QUEUE);
        assert_eq!(
            config.gtpc_server_addrs(),
            (
                vec![
                    "10.0.0.1:2123".parse::<SocketAddr>().unwrap(),
                    "10.0.0.4:2123".parse::<SocketAddr>().unwrap()
                ],
                vec!["[::1]:2124".parse::<SocketAddr>().unwrap()]
            )
        );
        assert_eq!(
            config.sgw_addrs(),
            vec![
                "10.0.0.2:2123".parse::<SocketAddr>().unwrap(),
                "10.0.0.3:3000".parse::<SocketAddr>().unwrap()
            ]
        );
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(MmeConfig::from_yaml("mme: [").is_err());
        assert!(MmeConfig::from_yaml("time:\n  message:\n    gtp:\n      n3_response_rcount: 0\n").is_err());
        assert_eq!(MmeConfig::from_yaml("").unwrap(), MmeConfig::default());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = MmeConfig::load("/nonexistent/mme.yaml").unwrap();
        assert_eq!(config, MmeConfig::default());
    }
}

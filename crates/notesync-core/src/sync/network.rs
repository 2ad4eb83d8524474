//! Connectivity checks

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use tokio::net::TcpStream;
use tracing::debug;

/// Kind of network currently available
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkType {
    Wifi,
    Mobile,
    None,
}

impl NetworkType {
    pub fn is_connected(&self) -> bool {
        !matches!(self, NetworkType::None)
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NetworkType::Wifi => "wifi",
            NetworkType::Mobile => "mobile",
            NetworkType::None => "none",
        };
        f.write_str(s)
    }
}

/// Reports the current network type
#[async_trait]
pub trait Connectivity: Send + Sync {
    async fn check(&self) -> NetworkType;
}

/// Probes the API host with a TCP connect
///
/// A reachable host is reported as [`NetworkType::Wifi`], or as
/// [`NetworkType::Mobile`] when the link is marked metered.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addr: String,
    timeout: Duration,
    metered: bool,
}

impl TcpProbe {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
            metered: false,
        }
    }

    /// Probe the host and port of an API URL
    pub fn for_url(api_url: &str, timeout: Duration) -> Option<Self> {
        let url = Url::parse(api_url).ok()?;
        let host = url.host_str()?;
        let port = url.port_or_known_default()?;
        Some(Self::new(format!("{}:{}", host, port), timeout))
    }

    /// Report a reachable host as a mobile connection
    pub fn metered(mut self, metered: bool) -> Self {
        self.metered = metered;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Connectivity for TcpProbe {
    async fn check(&self) -> NetworkType {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(_)) if self.metered => NetworkType::Mobile,
            Ok(Ok(_)) => NetworkType::Wifi,
            Ok(Err(e)) => {
                debug!(addr = %self.addr, error = %e, "Connectivity probe failed");
                NetworkType::None
            }
            Err(_) => {
                debug!(addr = %self.addr, "Connectivity probe timed out");
                NetworkType::None
            }
        }
    }
}

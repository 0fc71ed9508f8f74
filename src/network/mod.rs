//! Network address lookup
//!
//! `NetworkInfo` resolves the machine's local address and its public address
//! (as seen by an external address-echo service) for display next to the
//! server status. Lookups are best effort: only a machine without any usable
//! local address is an error, and the public address degrades to `unknown`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, ToSocketAddrs, UdpSocket};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, warn};

use crate::config::{LampConfig, DEFAULT_PUBLIC_IP_URL};
use crate::error::{LampError, Result};

// =============================================================================
// Types
// =============================================================================

/// Public address as reported by the echo service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicAddress {
    Known(IpAddr),
    /// Lookup failed or timed out
    Unknown,
}

impl PublicAddress {
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            PublicAddress::Known(ip) => Some(*ip),
            PublicAddress::Unknown => None,
        }
    }
}

impl std::fmt::Display for PublicAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PublicAddress::Known(ip) => write!(f, "{}", ip),
            PublicAddress::Unknown => write!(f, "unknown"),
        }
    }
}

impl Serialize for PublicAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Local and public address at one point in time
#[derive(Debug, Clone, Serialize)]
pub struct NetworkSnapshot {
    pub local_address: IpAddr,
    pub public_address: PublicAddress,
    pub captured_at: DateTime<Utc>,
}

impl NetworkSnapshot {
    pub fn format_text(&self) -> String {
        [
            format!("Local IP:   {}", self.local_address),
            format!("Public IP:  {}", self.public_address),
            format!(
                "Checked:    {}",
                self.captured_at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
        ]
        .join("\n")
    }
}

#[derive(Debug, Deserialize)]
struct EchoResponse {
    ip: String,
}

// =============================================================================
// Lookup
// =============================================================================

/// Resolves local and public network addresses
#[derive(Debug, Clone)]
pub struct NetworkInfo {
    public_ip_url: String,
    timeout: Duration,
}

impl Default for NetworkInfo {
    fn default() -> Self {
        Self::new(DEFAULT_PUBLIC_IP_URL, Duration::from_secs(3))
    }
}

impl NetworkInfo {
    pub fn new(public_ip_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            public_ip_url: public_ip_url.into(),
            timeout,
        }
    }

    pub fn from_config(config: &LampConfig) -> Self {
        Self::new(config.public_ip_url.clone(), config.public_ip_timeout())
    }

    /// Capture a fresh snapshot
    ///
    /// Takes at most the configured public lookup timeout plus the local
    /// lookup, which does not touch the network.
    pub fn snapshot(&self) -> Result<NetworkSnapshot> {
        let local_address = self.local_address()?;
        let public_address = self.public_address();
        Ok(NetworkSnapshot {
            local_address,
            public_address,
            captured_at: Utc::now(),
        })
    }

    /// Best local address: routing table, then host name, then loopback
    pub fn local_address(&self) -> Result<IpAddr> {
        if let Some(ip) = routed_address() {
            return Ok(ip);
        }
        debug!("no routed local address, trying host name");

        if let Some(ip) = hostname_address() {
            return Ok(ip);
        }
        debug!("host name did not resolve, falling back to loopback");

        loopback_address().ok_or_else(|| {
            LampError::LocalResolution("no routed, named or loopback address".to_string())
        })
    }

    /// Public address, or `Unknown` on any failure within the timeout
    pub fn public_address(&self) -> PublicAddress {
        let (tx, rx) = mpsc::channel();
        let url = self.public_ip_url.clone();
        let timeout = self.timeout;

        let spawned = thread::Builder::new()
            .name("lampctl-public-ip".to_string())
            .spawn(move || {
                let _ = tx.send(fetch_public_ip(&url, timeout));
            });
        if let Err(e) = spawned {
            warn!("unable to start public address lookup: {}", e);
            return PublicAddress::Unknown;
        }

        match rx.recv_timeout(self.timeout) {
            Ok(Ok(ip)) => PublicAddress::Known(ip),
            Ok(Err(e)) => {
                warn!("public address lookup failed: {}", e);
                PublicAddress::Unknown
            }
            Err(_) => {
                warn!(
                    "public address lookup timed out after {} ms",
                    self.timeout.as_millis()
                );
                PublicAddress::Unknown
            }
        }
    }
}

fn fetch_public_ip(url: &str, timeout: Duration) -> anyhow::Result<IpAddr> {
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into();

    let resp = agent.get(url).call()?.body_mut().read_json::<EchoResponse>()?;
    Ok(resp.ip.trim().parse::<IpAddr>()?)
}

/// Source address the kernel would use for outbound traffic
///
/// Connecting a UDP socket only selects a route; no packet is sent.
fn routed_address() -> Option<IpAddr> {
    let routes: [(IpAddr, IpAddr); 2] = [
        (
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)),
        ),
        (
            IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1)),
        ),
    ];

    routes.into_iter().find_map(|(bind, target)| {
        let socket = UdpSocket::bind((bind, 0)).ok()?;
        socket.connect((target, 80)).ok()?;
        let ip = socket.local_addr().ok()?.ip();
        (!ip.is_unspecified()).then_some(ip)
    })
}

fn hostname_address() -> Option<IpAddr> {
    let name = hostname()?;
    let addrs: Vec<IpAddr> = (name.as_str(), 0)
        .to_socket_addrs()
        .ok()?
        .map(|a| a.ip())
        .collect();

    addrs
        .iter()
        .find(|ip| ip.is_ipv4() && !ip.is_loopback())
        .or_else(|| addrs.iter().find(|ip| !ip.is_loopback()))
        .copied()
}

#[cfg(unix)]
fn hostname() -> Option<String> {
    let mut buf = [0u8; 256];
    // SAFETY: the buffer is valid for buf.len() bytes
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return None;
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let name = String::from_utf8_lossy(&buf[..len]).to_string();
    (!name.is_empty()).then_some(name)
}

#[cfg(not(unix))]
fn hostname() -> Option<String> {
    std::env::var("COMPUTERNAME").ok().filter(|n| !n.is_empty())
}

fn loopback_address() -> Option<IpAddr> {
    [
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(Ipv6Addr::LOCALHOST),
    ]
    .into_iter()
    .find(|ip| UdpSocket::bind((*ip, 0)).is_ok())
}

// =============================================================================
// Tests
// =============================================================================

//! Core types for the lanscout discovery and resilience layer.
//!
//! This module defines the logical services the layer resolves, the resolved
//! endpoint record handed to callers, probe results, and the network status
//! snapshot maintained by the network monitor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::{Host, Url};

/// Logical backend service that callers ask the layer to locate.
///
/// # Examples
///
/// ```
/// use lanscout_core::types::ServiceKind;
///
/// let kind: ServiceKind = "speech-synthesis".parse().unwrap();
/// assert_eq!(kind, ServiceKind::SpeechSynthesis);
/// assert_eq!(kind.to_string(), "speech-synthesis");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceKind {
    /// LLM inference service
    Llm,
    /// Speech-to-text service
    Transcription,
    /// Text-to-speech service
    SpeechSynthesis,
    /// General application backend
    Backend,
}

impl ServiceKind {
    /// Every service kind, in resolution order.
    pub const ALL: [ServiceKind; 4] = [
        ServiceKind::Llm,
        ServiceKind::Transcription,
        ServiceKind::SpeechSynthesis,
        ServiceKind::Backend,
    ];

    /// Returns the canonical name used in configuration and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Llm => "llm",
            ServiceKind::Transcription => "transcription",
            ServiceKind::SpeechSynthesis => "speech-synthesis",
            ServiceKind::Backend => "backend",
        }
    }

    /// Environment variable holding the override URL for this service.
    pub fn env_var(&self) -> &'static str {
        match self {
            ServiceKind::Llm => "LANSCOUT_LLM_URL",
            ServiceKind::Transcription => "LANSCOUT_TRANSCRIPTION_URL",
            ServiceKind::SpeechSynthesis => "LANSCOUT_SPEECH_URL",
            ServiceKind::Backend => "LANSCOUT_BACKEND_URL",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "llm" => Ok(ServiceKind::Llm),
            "transcription" | "stt" => Ok(ServiceKind::Transcription),
            "speech-synthesis" | "speech" | "tts" => Ok(ServiceKind::SpeechSynthesis),
            "backend" => Ok(ServiceKind::Backend),
            other => Err(format!("unknown service: {}", other)),
        }
    }
}

/// How a service endpoint was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointOrigin {
    /// Found by probing the network
    Discovered,
    /// Taken from configuration or a manual override
    Configured,
    /// Nothing usable was found
    Unavailable,
}

impl fmt::Display for EndpointOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointOrigin::Discovered => write!(f, "discovered"),
            EndpointOrigin::Configured => write!(f, "configured"),
            EndpointOrigin::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// A resolved network location for one logical service.
///
/// `url` carries scheme, host and port only; callers append their own
/// service-specific path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    /// Base URL (scheme + host + port)
    pub url: String,

    /// Where the endpoint came from
    pub origin: EndpointOrigin,

    /// Whether the endpoint is believed usable
    pub available: bool,

    /// Last time reachability was established or asserted
    pub last_checked_at: DateTime<Utc>,
}

impl ServiceEndpoint {
    /// Endpoint produced by a successful probe.
    pub fn discovered(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            origin: EndpointOrigin::Discovered,
            available: true,
            last_checked_at: Utc::now(),
        }
    }

    /// Endpoint taken from configuration.
    pub fn configured(url: impl Into<String>, available: bool) -> Self {
        Self {
            url: url.into(),
            origin: EndpointOrigin::Configured,
            available,
            last_checked_at: Utc::now(),
        }
    }

    /// Placeholder describing a service with no usable endpoint.
    pub fn unavailable() -> Self {
        Self {
            url: String::new(),
            origin: EndpointOrigin::Unavailable,
            available: false,
            last_checked_at: Utc::now(),
        }
    }

    /// Records a fresh reachability check. The only in-place mutation allowed.
    pub fn mark_checked(&mut self, available: bool) {
        self.available = available;
        self.last_checked_at = Utc::now();
    }

    /// Returns true when the endpoint resolved to something callers can use.
    pub fn is_usable(&self) -> bool {
        self.available && self.origin != EndpointOrigin::Unavailable
    }
}

/// Outcome of one reachability probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub address: String,
    pub port: u16,
    pub service_kind: ServiceKind,
    pub reachable: bool,
    pub latency_ms: u64,
}

impl DiscoveryResult {
    /// Returns the base URL this result points at.
    pub fn url(&self) -> String {
        base_url(&self.address, self.port)
    }
}

/// Network status maintained by the network monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub connected: bool,
    pub transport_type: String,
    pub internet_reachable: Option<bool>,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_disconnected_at: Option<DateTime<Utc>>,
}

impl Default for NetworkStatus {
    fn default() -> Self {
        Self {
            connected: false,
            transport_type: "unknown".to_string(),
            internet_reachable: None,
            last_connected_at: None,
            last_disconnected_at: None,
        }
    }
}

/// Raw connectivity notification delivered by the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkNotification {
    pub connected: bool,

    #[serde(default = "default_transport", alias = "transportType")]
    pub transport_type: String,

    #[serde(default, alias = "internetReachable")]
    pub internet_reachable: Option<bool>,
}

fn default_transport() -> String {
    "unknown".to_string()
}

impl NetworkNotification {
    pub fn new(connected: bool, transport_type: impl Into<String>, internet_reachable: Option<bool>) -> Self {
        Self {
            connected,
            transport_type: transport_type.into(),
            internet_reachable,
        }
    }
}

/// Read-only view of whether the device currently has connectivity.
pub trait ConnectivityGate: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Read-only view of resolved endpoint URLs.
pub trait EndpointSource: Send + Sync {
    fn endpoint(&self, kind: ServiceKind) -> Option<String>;
}

/// Formats `http://host:port`, bracketing IPv6 literals.
pub fn base_url(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("http://[{}]:{}", host, port)
    } else {
        format!("http://{}:{}", host, port)
    }
}

/// Parses an absolute `http`/`https` URL with a host.
///
/// Rejects other schemes, out-of-range ports and host-less URLs.
pub fn parse_http_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw.trim()).map_err(|e| format!("invalid URL '{}': {}", raw, e))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme '{}' in '{}'", url.scheme(), raw));
    }
    if url.host().is_none() {
        return Err(format!("missing host in '{}'", raw));
    }
    Ok(url)
}

/// Extracts the host of a URL such as `http://10.0.0.5:3001/x`, without
/// IPv6 brackets.
pub fn url_host(url: &str) -> Option<String> {
    let url = Url::parse(url.trim()).ok()?;
    let host = match url.host()? {
        Host::Domain(domain) => domain.to_string(),
        Host::Ipv4(ip) => ip.to_string(),
        Host::Ipv6(ip) => ip.to_string(),
    };
    Some(host)
}

fn host_is_local(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(domain) => domain.trim_end_matches('.').eq_ignore_ascii_case("localhost"),
        Host::Ipv4(ip) => ip.is_loopback() || ip.is_unspecified(),
        Host::Ipv6(ip) => match ip.to_ipv4_mapped() {
            Some(v4) => v4.is_loopback() || v4.is_unspecified(),
            None => ip.is_loopback() || ip.is_unspecified(),
        },
    }
}

/// Returns true when the host only reaches the local machine. Accepts
/// shorthand IPv4 forms (`127.1`) and bracketed IPv6 literals.
pub fn is_local_host(host: &str) -> bool {
    let host = host.trim();
    let parsed = if host.contains(':') && !host.starts_with('[') {
        Host::parse(&format!("[{}]", host))
    } else {
        Host::parse(host)
    };
    match parsed {
        Ok(Host::Domain(domain)) => host_is_local(&Host::Domain(domain.as_str())),
        Ok(Host::Ipv4(ip)) => host_is_local(&Host::Ipv4(ip)),
        Ok(Host::Ipv6(ip)) => host_is_local(&Host::Ipv6(ip)),
        Err(_) => false,
    }
}

/// Returns true when the URL points at the local machine.
pub fn is_local_url(url: &str) -> bool {
    Url::parse(url.trim())
        .ok()
        .and_then(|url| url.host().map(|host| host_is_local(&host)))
        .unwrap_or(false)
}

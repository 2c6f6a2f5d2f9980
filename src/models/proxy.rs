use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, RotatorError};

/// Fail count at which a proxy is deactivated
pub const MAX_FAIL_COUNT: u32 = 5;

/// Response time (ms) below which a candidate counts as healthy
pub const HEALTHY_RESPONSE_TIME_MS: u32 = 10_000;

/// Proxy protocol type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    #[default]
    Http,
    Https,
    Socks5,
}

impl ProxyProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
            ProxyProtocol::Socks5 => "socks5",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "http" => Some(ProxyProtocol::Http),
            "https" => Some(ProxyProtocol::Https),
            "socks5" => Some(ProxyProtocol::Socks5),
            _ => None,
        }
    }

    /// Port assumed when a URL descriptor omits one
    pub fn default_port(&self) -> u16 {
        match self {
            ProxyProtocol::Http => 80,
            ProxyProtocol::Https => 443,
            ProxyProtocol::Socks5 => 1080,
        }
    }
}

impl std::fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Proxy record as stored in the pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proxy {
    pub id: i32,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub protocol: ProxyProtocol,
    pub is_active: bool,
    pub last_checked: Option<DateTime<Utc>>,
    /// Milliseconds, 0 = never measured
    pub response_time: u32,
    pub fail_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Proxy {
    /// `host:port` of the upstream proxy
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Eligible for selection
    pub fn is_candidate(&self) -> bool {
        self.is_active && self.fail_count < MAX_FAIL_COUNT
    }

    /// Candidate that has not proven slow
    pub fn is_healthy(&self) -> bool {
        self.is_candidate() && self.response_time < HEALTHY_RESPONSE_TIME_MS
    }

    /// Upstream address `<protocol>://[user[:pass]@]<host>:<port>` handed to the connector.
    pub fn upstream_url(&self) -> Result<Url> {
        let mut url = Url::parse(&format!(
            "{}://{}:{}",
            self.protocol.as_str(),
            self.host,
            self.port
        ))?;

        if let Some(username) = self.username.as_deref().filter(|u| !u.is_empty()) {
            url.set_username(username).map_err(|_| {
                RotatorError::InvalidDescriptor(format!(
                    "cannot embed credentials for {}",
                    self.address()
                ))
            })?;
            url.set_password(self.password.as_deref()).map_err(|_| {
                RotatorError::InvalidDescriptor(format!(
                    "cannot embed credentials for {}",
                    self.address()
                ))
            })?;
        }

        Ok(url)
    }
}

/// A validated proxy that has not been stored yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProxy {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub protocol: ProxyProtocol,
    pub is_active: bool,
}

impl NewProxy {
    pub fn new(host: impl Into<String>, port: u16, protocol: ProxyProtocol) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
            protocol,
            is_active: true,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Aggregate pool counters, recomputed on every read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyStats {
    pub total_proxies: i64,
    pub active_proxies: i64,
    pub healthy_proxies: i64,
    pub failed_proxies: i64,
}

/// Request to manually add a proxy
#[derive(Debug, Clone, Deserialize)]
pub struct CreateProxyRequest {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u32,
    pub username: Option<String>,
    pub password: Option<String>,
    pub protocol: Option<String>,
}

impl TryFrom<CreateProxyRequest> for NewProxy {
    type Error = RotatorError;

    fn try_from(req: CreateProxyRequest) -> Result<Self> {
        let host = req.host.trim();
        if host.is_empty() || req.port == 0 {
            return Err(RotatorError::InvalidRequest(
                "Host and port are required".to_string(),
            ));
        }

        let port = u16::try_from(req.port).map_err(|_| {
            RotatorError::InvalidRequest(format!("Port out of range: {}", req.port))
        })?;

        let protocol = match req.protocol.as_deref().map(str::trim) {
            None | Some("") => ProxyProtocol::Http,
            Some(p) => ProxyProtocol::from_str(p).ok_or_else(|| {
                RotatorError::InvalidRequest(format!("Unsupported protocol: {}", p))
            })?,
        };

        Ok(NewProxy {
            host: host.to_string(),
            port,
            username: req.username.filter(|u| !u.is_empty()),
            password: req.password.filter(|p| !p.is_empty()),
            protocol,
            is_active: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_proxy() -> Proxy {
        Proxy {
            id: 1,
            host: "127.0.0.1".to_string(),
            port: 8080,
            username: None,
            password: None,
            protocol: ProxyProtocol::Http,
            is_active: true,
            last_checked: None,
            response_time: 0,
            fail_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_proxy_protocol_parsing_and_defaults() {
        assert_eq!(ProxyProtocol::from_str("HTTP"), Some(ProxyProtocol::Http));
        assert_eq!(ProxyProtocol::from_str("https"), Some(ProxyProtocol::Https));
        assert_eq!(ProxyProtocol::from_str("SOCKS5"), Some(ProxyProtocol::Socks5));
        assert_eq!(ProxyProtocol::from_str("socks4"), None);

        assert_eq!(ProxyProtocol::Http.default_port(), 80);
        assert_eq!(ProxyProtocol::Https.default_port(), 443);
        assert_eq!(ProxyProtocol::Socks5.default_port(), 1080);
        assert_eq!(ProxyProtocol::Socks5.to_string(), "socks5");
    }

    #[test]
    fn test_candidate_and_healthy_tiers() {
        let mut proxy = base_proxy();
        assert!(proxy.is_candidate());
        assert!(proxy.is_healthy());

        proxy.response_time = 10_000;
        assert!(proxy.is_candidate());
        assert!(!proxy.is_healthy());

        proxy.response_time = 50;
        proxy.fail_count = 5;
        assert!(!proxy.is_candidate());
        assert!(!proxy.is_healthy());

        proxy.fail_count = 0;
        proxy.is_active = false;
        assert!(!proxy.is_candidate());
    }

    #[test]
    fn test_upstream_url_formats() {
        let mut proxy = base_proxy();
        assert_eq!(proxy.upstream_url().unwrap().as_str(), "http://127.0.0.1:8080/");

        proxy.protocol = ProxyProtocol::Socks5;
        proxy.port = 1080;
        assert_eq!(
            proxy.upstream_url().unwrap().as_str(),
            "socks5://127.0.0.1:1080"
        );
    }

    #[test]
    fn test_upstream_url_with_auth() {
        let mut proxy = base_proxy();
        proxy.username = Some("alice".to_string());
        proxy.password = Some("secret".to_string());

        let url = proxy.upstream_url().unwrap();
        assert_eq!(url.username(), "alice");
        assert_eq!(url.password(), Some("secret"));
        assert_eq!(url.host_str(), Some("127.0.0.1"));
        assert_eq!(url.port(), Some(8080));

        // Reserved characters in stored credentials are encoded once
        proxy.username = Some("us@er".to_string());
        proxy.password = Some("p@ss:word".to_string());
        let url = proxy.upstream_url().unwrap();
        assert_eq!(url.username(), "us%40er");
        assert_eq!(url.password(), Some("p%40ss%3Aword"));
    }

    #[test]
    fn test_password_is_not_serialized() {
        let mut proxy = base_proxy();
        proxy.username = Some("alice".to_string());
        proxy.password = Some("secret".to_string());

        let json = serde_json::to_value(&proxy).unwrap();
        assert_eq!(json["username"], "alice");
        assert!(json.get("password").is_none());
        assert_eq!(json["protocol"], "http");
    }

    #[test]
    fn test_create_request_defaults_and_validation() {
        let req = CreateProxyRequest {
            host: "10.0.0.1".to_string(),
            port: 3128,
            username: None,
            password: None,
            protocol: None,
        };
        let new = NewProxy::try_from(req).unwrap();
        assert_eq!(new.protocol, ProxyProtocol::Http);
        assert!(new.is_active);

        let missing_host = CreateProxyRequest {
            host: "".to_string(),
            port: 3128,
            username: None,
            password: None,
            protocol: None,
        };
        assert!(matches!(
            NewProxy::try_from(missing_host),
            Err(RotatorError::InvalidRequest(_))
        ));

        let bad_port = CreateProxyRequest {
            host: "10.0.0.1".to_string(),
            port: 70_000,
            username: None,
            password: None,
            protocol: Some("socks5".to_string()),
        };
        assert!(NewProxy::try_from(bad_port).is_err());
    }
}

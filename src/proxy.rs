//! The central value type: a single candidate proxy and its protocol.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Proxy protocol. `Https` proxy entries are folded into `Http` by the parser before a `Proxy`
/// is ever constructed (see `parser.rs`) — HTTPS proxies are just HTTP CONNECT endpoints as far
/// as the tunneling connector is concerned, so there is no separate variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Socks4,
    Socks5,
}

impl ProxyProtocol {
    pub fn name(&self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Socks4 => "socks4",
            ProxyProtocol::Socks5 => "socks5",
        }
    }

    /// Parses a protocol token from the parser's `protocol` capture group, folding `https` into
    /// `Http`. Returns `None` for anything else (the caller falls back to the source's default).
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "http" | "https" => Some(ProxyProtocol::Http),
            "socks4" => Some(ProxyProtocol::Socks4),
            "socks5" => Some(ProxyProtocol::Socks5),
            _ => None,
        }
    }
}

impl fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single candidate proxy.
///
/// Identity for equality/hashing is `(protocol, host, port, username, password)`; `timeout` and
/// `exit_ip` are observation fields filled in exactly once, by a successful check, and are
/// excluded from equality so that storing the same endpoint twice (once bare, once checked)
/// can never happen.
#[derive(Debug, Clone)]
pub struct Proxy {
    pub protocol: ProxyProtocol,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Option<f64>,
    pub exit_ip: Option<String>,
}

impl Proxy {
    pub fn new(
        protocol: ProxyProtocol,
        host: impl Into<String>,
        port: u16,
        username: Option<String>,
        password: Option<String>,
    ) -> Self {
        Self {
            protocol,
            host: host.into(),
            port,
            username,
            password,
            timeout: None,
            exit_ip: None,
        }
    }

    fn identity(&self) -> (ProxyProtocol, &str, u16, Option<&str>, Option<&str>) {
        (
            self.protocol,
            self.host.as_str(),
            self.port,
            self.username.as_deref(),
            self.password.as_deref(),
        )
    }

    pub fn is_checked(&self) -> bool {
        self.timeout.is_some()
    }

    pub fn is_anonymous(&self, real_ip: Option<&str>) -> bool {
        match (&self.exit_ip, real_ip) {
            (Some(exit_ip), Some(real_ip)) => exit_ip != real_ip,
            _ => false,
        }
    }

    /// Canonical textual form: `[proto://][user:pass@]host:port`.
    pub fn as_string(&self, include_protocol: bool) -> String {
        let mut out = String::new();
        if include_protocol {
            out.push_str(self.protocol.name());
            out.push_str("://");
        }
        if let (Some(user), Some(pass)) = (&self.username, &self.password) {
            out.push_str(user);
            out.push(':');
            out.push_str(pass);
            out.push('@');
        }
        out.push_str(&self.host);
        out.push(':');
        out.push_str(&self.port.to_string());
        out
    }
}

impl PartialEq for Proxy {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for Proxy {}

impl std::hash::Hash for Proxy {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_ignores_observation_fields() {
        let mut a = Proxy::new(ProxyProtocol::Http, "1.2.3.4", 8080, None, None);
        let b = Proxy::new(ProxyProtocol::Http, "1.2.3.4", 8080, None, None);
        a.timeout = Some(0.5);
        a.exit_ip = Some("9.9.9.9".to_string());
        assert_eq!(a, b);
    }

    #[test]
    fn different_credentials_are_distinct() {
        let a = Proxy::new(
            ProxyProtocol::Http,
            "1.2.3.4",
            8080,
            Some("u".into()),
            Some("p".into()),
        );
        let b = Proxy::new(ProxyProtocol::Http, "1.2.3.4", 8080, None, None);
        assert_ne!(a, b);
    }

    #[test]
    fn as_string_omits_credentials_iff_absent() {
        let p = Proxy::new(ProxyProtocol::Socks5, "1.2.3.4", 1080, None, None);
        assert_eq!(p.as_string(true), "socks5://1.2.3.4:1080");
        assert_eq!(p.as_string(false), "1.2.3.4:1080");

        let p = Proxy::new(
            ProxyProtocol::Socks5,
            "1.2.3.4",
            1080,
            Some("u".into()),
            Some("p".into()),
        );
        assert_eq!(p.as_string(true), "socks5://u:p@1.2.3.4:1080");
    }

    #[test]
    fn anonymity_requires_known_exit_ip() {
        let mut p = Proxy::new(ProxyProtocol::Http, "1.2.3.4", 80, None, None);
        assert!(!p.is_anonymous(Some("9.9.9.9")));
        p.exit_ip = Some("1.2.3.4".to_string());
        assert!(!p.is_anonymous(Some("1.2.3.4")));
        p.exit_ip = Some("5.5.5.5".to_string());
        assert!(p.is_anonymous(Some("1.2.3.4")));
        assert!(!p.is_anonymous(None));
    }
}

//! Immutable, validated settings derived from [`crate::config::Config`]. Construction is where
//! the one-shot check-website classification (C4) and the fd-limit negotiation (§4.8) happen.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::warn;
use url::Url;

use crate::classifier::{classify, CheckWebsiteType};
use crate::config::Config;
use crate::proxy::ProxyProtocol;

pub struct Settings {
    pub check_website: String,
    pub check_website_type: CheckWebsiteType,
    pub real_ip: Option<String>,
    pub enable_geolocation: bool,
    pub output_json: bool,
    pub output_txt: bool,
    pub output_path: String,
    pub max_connections: usize,
    pub timeout: Duration,
    pub source_timeout: Duration,
    pub sources: HashMap<ProxyProtocol, Vec<String>>,
    pub sort_by_speed: bool,
    pub geoip_path: Option<String>,
    pub shuffle_seed: Option<u64>,
}

impl Settings {
    pub async fn from_config(config: Config, client: &reqwest::Client) -> Result<Self> {
        if config.timeout <= 0.0 {
            bail!("timeout must be > 0");
        }
        if config.source_timeout <= 0.0 {
            bail!("source_timeout must be > 0");
        }
        if !config.output.json && !config.output.txt {
            bail!("at least one of output.json / output.txt must be true");
        }
        if config.enable_geolocation && (!config.output.json || config.geoip_path.is_none()) {
            bail!("enable_geolocation requires output.json and a geoip_path");
        }

        let mut sources = HashMap::new();
        for (protocol, proto_config) in [
            (ProxyProtocol::Http, &config.http),
            (ProxyProtocol::Socks4, &config.socks4),
            (ProxyProtocol::Socks5, &config.socks5),
        ] {
            if proto_config.enabled {
                if proto_config.sources.is_empty() {
                    bail!("protocol {protocol} is enabled but has no sources configured");
                }
                sources.insert(protocol, proto_config.sources.clone());
            }
        }

        let mut check_website_type = CheckWebsiteType::Unknown;
        let mut real_ip = None;
        if !config.check_website.is_empty() {
            let url = Url::parse(&config.check_website).context("check_website is not a valid URL")?;
            if url.scheme() != "http" && url.scheme() != "https" {
                bail!("check_website must be an http(s) URL");
            }
            if url.scheme() == "http" {
                warn!(check_website = %config.check_website, "check_website uses plain http; exit IPs may be visible to network observers");
            }
            let classification = classify(client, &config.check_website, Duration::from_secs_f64(config.timeout)).await;
            check_website_type = classification.kind;
            real_ip = classification.real_ip;
        }

        let enable_geolocation = config.enable_geolocation && matches!(check_website_type, CheckWebsiteType::PlainIp | CheckWebsiteType::HttpbinIp);

        let supported_ceiling = supported_max_connections();
        let requested = if config.max_connections == 0 {
            // The original leaves this case genuinely unbounded (no semaphore at all). A semaphore
            // always needs a concrete permit count, so fall back to its practical maximum rather
            // than fabricating a fixed number when the platform ceiling is unknown.
            supported_ceiling.unwrap_or(tokio::sync::Semaphore::MAX_PERMITS)
        } else {
            config.max_connections as usize
        };
        let max_connections = match supported_ceiling {
            Some(ceiling) if requested > ceiling => {
                warn!(requested, ceiling, "clamping max_connections to the process's supported file-descriptor ceiling");
                ceiling
            }
            _ => requested,
        };

        Ok(Self {
            check_website: config.check_website,
            check_website_type,
            real_ip,
            enable_geolocation,
            output_json: config.output.json,
            output_txt: config.output.txt,
            output_path: config.output.path,
            max_connections,
            timeout: Duration::from_secs_f64(config.timeout),
            source_timeout: Duration::from_secs_f64(config.source_timeout),
            sources,
            sort_by_speed: config.sort_by_speed,
            geoip_path: config.geoip_path,
            shuffle_seed: config.shuffle_seed,
        })
    }

    /// Checking is active iff a check-website was configured; an empty one is the documented
    /// "scrape only" mode and short-circuits both the checker stage and the output pre-filter.
    pub fn checking_enabled(&self) -> bool {
        !self.check_website.is_empty()
    }
}

/// The maximum number of concurrent connections the process can actually sustain, derived from
/// the POSIX open-file rlimit. `None` means "no cap known" (the limit is infinite).
#[cfg(unix)]
fn supported_max_connections() -> Option<usize> {
    use nix::sys::resource::{getrlimit, setrlimit, Resource};

    let (soft, hard) = getrlimit(Resource::RLIMIT_NOFILE).ok()?;
    let soft = if soft < hard {
        let _ = setrlimit(Resource::RLIMIT_NOFILE, hard, hard);
        hard
    } else {
        soft
    };
    if soft == nix::sys::resource::RLIM_INFINITY {
        None
    } else {
        Some(soft as usize)
    }
}

/// Windows has no `rlimit`-style fd accounting; the original falls back to a fixed 512 there
/// (a select-based event loop's practical ceiling), so the cap is hardcoded rather than probed.
#[cfg(windows)]
fn supported_max_connections() -> Option<usize> {
    Some(512)
}

#[cfg(not(any(unix, windows)))]
fn supported_max_connections() -> Option<usize> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OutputConfig, ProtocolConfig};

    fn base_config() -> Config {
        Config {
            timeout: 5.0,
            source_timeout: 10.0,
            max_connections: 100,
            sort_by_speed: false,
            check_website: String::new(),
            enable_geolocation: false,
            geoip_path: None,
            debug: false,
            output: OutputConfig { json: true, txt: false, path: "out".to_string() },
            http: ProtocolConfig { enabled: true, sources: vec!["https://example.test/a.txt".to_string()] },
            socks4: ProtocolConfig::default(),
            socks5: ProtocolConfig::default(),
            shuffle_seed: None,
        }
    }

    #[tokio::test]
    async fn rejects_zero_timeout() {
        let mut config = base_config();
        config.timeout = 0.0;
        let client = reqwest::Client::new();
        assert!(Settings::from_config(config, &client).await.is_err());
    }

    #[tokio::test]
    async fn rejects_geolocation_without_geoip_path() {
        let mut config = base_config();
        config.enable_geolocation = true;
        let client = reqwest::Client::new();
        assert!(Settings::from_config(config, &client).await.is_err());
    }

    #[tokio::test]
    async fn rejects_enabled_protocol_with_no_sources() {
        let mut config = base_config();
        config.socks5.enabled = true;
        let client = reqwest::Client::new();
        assert!(Settings::from_config(config, &client).await.is_err());
    }

    #[tokio::test]
    async fn empty_check_website_stays_unknown() {
        let config = base_config();
        let client = reqwest::Client::new();
        let settings = Settings::from_config(config, &client).await.unwrap();
        assert_eq!(settings.check_website_type, CheckWebsiteType::Unknown);
        assert!(!settings.enable_geolocation);
    }
}

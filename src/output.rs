//! C7: writes the checked, de-duplicated proxy set to disk in up to two formats, grouped,
//! sorted, and (for JSON) enriched with GeoIP data.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

use crate::classifier::CheckWebsiteType;
use crate::geoip::GeoIpReader;
use crate::proxy::{Proxy, ProxyProtocol};
use crate::settings::Settings;
use crate::sort::{natural_sort_key, timeout_sort_key, PROTOCOL_ORDER};
use crate::storage::ProxyStorage;

#[derive(Serialize)]
struct JsonProxy {
    protocol: ProxyProtocol,
    username: Option<String>,
    password: Option<String>,
    host: String,
    port: u16,
    exit_ip: Option<String>,
    timeout: Option<f64>,
    geolocation: Option<Value>,
}

/// Drops unchecked proxies (when checking is enabled — i.e. always, since this pipeline always
/// checks what it scrapes) and writes every output mode the settings have turned on.
pub async fn save(storage: &ProxyStorage, settings: &Settings) -> anyhow::Result<()> {
    if settings.checking_enabled() {
        storage.drop_unchecked().await;
    }
    let proxies = storage.snapshot().await;

    if settings.output_txt {
        write_txt(&proxies, settings).await?;
    }
    if settings.output_json {
        write_json(&proxies, settings).await?;
    }
    Ok(())
}

fn sorted(proxies: &[Proxy], sort_by_speed: bool) -> Vec<Proxy> {
    let mut sorted = proxies.to_vec();
    if sort_by_speed {
        sorted.sort_by(|a, b| timeout_sort_key(a).partial_cmp(&timeout_sort_key(b)).unwrap());
    } else {
        sorted.sort_by_key(natural_sort_key);
    }
    sorted
}

async fn write_txt(proxies: &[Proxy], settings: &Settings) -> anyhow::Result<()> {
    // sort_by_speed is meaningless without any recorded timeouts.
    let sort_by_speed = settings.sort_by_speed && settings.checking_enabled();
    let all_sorted = sorted(proxies, sort_by_speed);
    let root = Path::new(&settings.output_path);
    write_tree(&root.join("proxies"), &all_sorted).await?;

    if settings.check_website_type != CheckWebsiteType::Unknown {
        let anonymous: Vec<Proxy> = all_sorted
            .iter()
            .filter(|p| p.is_anonymous(settings.real_ip.as_deref()))
            .cloned()
            .collect();
        write_tree(&root.join("proxies_anonymous"), &anonymous).await?;
    }
    Ok(())
}

async fn write_tree(dir: &Path, proxies: &[Proxy]) -> anyhow::Result<()> {
    if tokio::fs::try_exists(dir).await.unwrap_or(false) {
        tokio::fs::remove_dir_all(dir).await?;
    }
    tokio::fs::create_dir_all(dir).await?;

    let all_lines: Vec<String> = proxies.iter().map(|p| p.as_string(true)).collect();
    tokio::fs::write(dir.join("all.txt"), all_lines.join("\n")).await?;

    for protocol in PROTOCOL_ORDER {
        let lines: Vec<String> = proxies
            .iter()
            .filter(|p| p.protocol == protocol)
            .map(|p| p.as_string(false))
            .collect();
        tokio::fs::write(dir.join(format!("{protocol}.txt")), lines.join("\n")).await?;
    }
    Ok(())
}

async fn write_json(proxies: &[Proxy], settings: &Settings) -> anyhow::Result<()> {
    // JSON output is always ordered by timeout ascending, regardless of sort_by_speed.
    let mut by_timeout = proxies.to_vec();
    by_timeout.sort_by(|a, b| timeout_sort_key(a).partial_cmp(&timeout_sort_key(b)).unwrap());

    let geoip = match (&settings.geoip_path, settings.enable_geolocation) {
        (Some(path), true) => Some(GeoIpReader::open(Path::new(path))?),
        _ => None,
    };

    // Routed through `serde_json::to_value` rather than serialized straight from `JsonProxy`:
    // `serde_json::Map` is BTreeMap-backed without the `preserve_order` feature (not enabled in
    // this crate), so converting to `Value` first sorts each object's keys alphabetically.
    let entries: Vec<Value> = by_timeout
        .iter()
        .map(|p| {
            let json_proxy = JsonProxy {
                protocol: p.protocol,
                username: p.username.clone(),
                password: p.password.clone(),
                host: p.host.clone(),
                port: p.port,
                exit_ip: p.exit_ip.clone(),
                timeout: p.timeout.map(|t| (t * 100.0).round() / 100.0),
                geolocation: p
                    .exit_ip
                    .as_deref()
                    .and_then(|ip| geoip.as_ref().and_then(|reader| reader.lookup(ip))),
            };
            serde_json::to_value(&json_proxy).unwrap_or(Value::Null)
        })
        .collect();

    let root = PathBuf::from(&settings.output_path);
    tokio::fs::create_dir_all(&root).await?;
    tokio::fs::write(root.join("proxies.json"), serde_json::to_string(&entries)?).await?;
    tokio::fs::write(root.join("proxies_pretty.json"), serde_json::to_string_pretty(&entries)?).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checked(protocol: ProxyProtocol, host: &str, port: u16, timeout: f64, exit_ip: &str) -> Proxy {
        let mut p = Proxy::new(protocol, host, port, None, None);
        p.timeout = Some(timeout);
        p.exit_ip = Some(exit_ip.to_string());
        p
    }

    #[test]
    fn sorted_by_speed_orders_ascending_timeout() {
        let proxies = vec![
            checked(ProxyProtocol::Http, "1.1.1.1", 80, 0.9, "9.9.9.9"),
            checked(ProxyProtocol::Http, "2.2.2.2", 80, 0.1, "9.9.9.9"),
        ];
        let out = sorted(&proxies, true);
        assert_eq!(out[0].host, "2.2.2.2");
    }

    #[test]
    fn sorted_naturally_orders_by_protocol_then_octets() {
        let proxies = vec![
            checked(ProxyProtocol::Socks5, "1.1.1.1", 80, 0.1, "9.9.9.9"),
            checked(ProxyProtocol::Http, "2.2.2.2", 80, 0.9, "9.9.9.9"),
        ];
        let out = sorted(&proxies, false);
        assert_eq!(out[0].host, "2.2.2.2");
    }
}

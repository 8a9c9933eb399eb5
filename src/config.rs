//! On-disk TOML configuration, mirroring the file shape 1:1 before it is validated and converted
//! into an immutable [`crate::settings::Settings`].

use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub timeout: f64,
    #[serde(default)]
    pub source_timeout: f64,
    #[serde(default)]
    pub max_connections: u32,
    #[serde(default)]
    pub sort_by_speed: bool,
    #[serde(default)]
    pub check_website: String,
    #[serde(default)]
    pub enable_geolocation: bool,
    #[serde(default)]
    pub geoip_path: Option<String>,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub http: ProtocolConfig,
    #[serde(default)]
    pub socks4: ProtocolConfig,
    #[serde(default)]
    pub socks5: ProtocolConfig,
    #[serde(default)]
    pub shuffle_seed: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct OutputConfig {
    #[serde(default)]
    pub json: bool,
    #[serde(default)]
    pub txt: bool,
    #[serde(default = "default_output_path")]
    pub path: String,
}

fn default_output_path() -> String {
    "out".to_string()
}

#[derive(Debug, Deserialize, Default)]
pub struct ProtocolConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub sources: Vec<String>,
}

/// Reads and parses the config file. Any I/O or TOML error here is fatal: it is reported before
/// the rest of the pipeline (and its logging setup) ever starts.
pub async fn load(path: &Path) -> anyhow::Result<Config> {
    let text = tokio::fs::read_to_string(path).await?;
    let config: Config = toml::from_str(&text)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_document() {
        let toml = r#"
            timeout = 5.0
            source_timeout = 10.0
            max_connections = 512
            check_website = "https://api.ipify.org?format=json"

            [output]
            json = true
            txt = false
            path = "out"

            [http]
            enabled = true
            sources = ["https://example.test/http.txt"]

            [socks4]
            enabled = false

            [socks5]
            enabled = false
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.timeout, 5.0);
        assert!(config.output.json);
        assert!(config.http.enabled);
        assert_eq!(config.http.sources.len(), 1);
        assert!(!config.socks4.enabled);
        assert_eq!(config.shuffle_seed, None);
    }
}

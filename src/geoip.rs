//! Thin wrapper around an MMDB GeoIP reader, opened once per output pass.

use std::net::IpAddr;
use std::path::Path;

pub struct GeoIpReader {
    reader: maxminddb::Reader<Vec<u8>>,
}

impl GeoIpReader {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let reader = maxminddb::Reader::open_readfile(path)?;
        Ok(Self { reader })
    }

    /// Looks up `exit_ip` and returns the MMDB record verbatim, whatever shape the configured
    /// database provides (City, Country, ASN, ...) — not projected onto any fixed struct, matching
    /// the original's raw `mmdb_reader.get(...)` dict passed straight into JSON output. Returns
    /// `None` on a parse failure or a miss — both are indistinguishable at the output layer, which
    /// serializes either as JSON `null`.
    pub fn lookup(&self, exit_ip: &str) -> Option<serde_json::Value> {
        let ip: IpAddr = exit_ip.parse().ok()?;
        self.reader.lookup::<serde_json::Value>(ip).ok()
    }
}

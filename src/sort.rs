//! Protocol ordering and sort keys shared by storage grouping and output writing.

use crate::proxy::{Proxy, ProxyProtocol};

/// Canonical protocol order used for grouping and for the `natural` sort key.
pub const PROTOCOL_ORDER: [ProxyProtocol; 3] =
    [ProxyProtocol::Http, ProxyProtocol::Socks4, ProxyProtocol::Socks5];

pub fn protocol_rank(proto: ProxyProtocol) -> usize {
    PROTOCOL_ORDER
        .iter()
        .position(|p| *p == proto)
        .unwrap_or(PROTOCOL_ORDER.len())
}

/// `(protocol_rank, octet1, octet2, octet3, octet4, port)` — a total order over checked and
/// unchecked proxies alike, used when `sort_by_speed = false`.
pub fn natural_sort_key(proxy: &Proxy) -> (usize, u8, u8, u8, u8, u16) {
    let mut octets = [0u8; 4];
    for (i, part) in proxy.host.splitn(4, '.').enumerate() {
        if i < 4 {
            octets[i] = part.parse().unwrap_or(0);
        }
    }
    (
        protocol_rank(proxy.protocol),
        octets[0],
        octets[1],
        octets[2],
        octets[3],
        proxy.port,
    )
}

/// Ascending timeout, used when `sort_by_speed = true`. Unchecked proxies (no timeout) sort last.
pub fn timeout_sort_key(proxy: &Proxy) -> f64 {
    proxy.timeout.unwrap_or(f64::INFINITY)
}

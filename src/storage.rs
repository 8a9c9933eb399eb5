//! In-memory de-duplicating proxy store shared between the scraper and checker stages.

use std::collections::{BTreeMap, HashSet};

use anyhow::{bail, Result};
use tokio::sync::Mutex;

use crate::proxy::{Proxy, ProxyProtocol};
use crate::sort::PROTOCOL_ORDER;

/// Shared, mutex-guarded de-duplicating set of proxies, matching the teacher's
/// `Arc<Mutex<...>>`-around-a-collection idiom for state mutated from many spawned tasks.
pub struct ProxyStorage {
    inner: Mutex<Inner>,
}

struct Inner {
    proxies: HashSet<Proxy>,
    enabled_protocols: HashSet<ProxyProtocol>,
}

impl ProxyStorage {
    pub fn new(protocols: impl IntoIterator<Item = ProxyProtocol>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                proxies: HashSet::new(),
                enabled_protocols: protocols.into_iter().collect(),
            }),
        }
    }

    pub async fn add(&self, proxy: Proxy) {
        let mut inner = self.inner.lock().await;
        inner.enabled_protocols.insert(proxy.protocol);
        inner.proxies.insert(proxy);
    }

    pub async fn remove(&self, proxy: &Proxy) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.proxies.remove(proxy) {
            bail!("attempted to remove a proxy not present in storage: {}", proxy.as_string(true));
        }
        Ok(())
    }

    /// A point-in-time clone of every stored proxy, safe to iterate concurrently with further
    /// mutation of the live storage (the checker stage always dispatches against this snapshot).
    pub async fn snapshot(&self) -> Vec<Proxy> {
        self.inner.lock().await.proxies.iter().cloned().collect()
    }

    pub async fn enabled_protocols(&self) -> HashSet<ProxyProtocol> {
        self.inner.lock().await.enabled_protocols.clone()
    }

    /// Ordered protocol -> proxies, canonical order first, any overridden protocol after.
    pub async fn grouped(&self) -> BTreeMap<usize, (ProxyProtocol, Vec<Proxy>)> {
        let inner = self.inner.lock().await;
        let mut groups: BTreeMap<usize, (ProxyProtocol, Vec<Proxy>)> = BTreeMap::new();
        for proto in &inner.enabled_protocols {
            let rank = PROTOCOL_ORDER.iter().position(|p| p == proto).unwrap_or(PROTOCOL_ORDER.len());
            groups.entry(rank).or_insert_with(|| (*proto, Vec::new()));
        }
        for proxy in &inner.proxies {
            let rank = PROTOCOL_ORDER.iter().position(|p| *p == proxy.protocol).unwrap_or(PROTOCOL_ORDER.len());
            groups.entry(rank).or_insert_with(|| (proxy.protocol, Vec::new())).1.push(proxy.clone());
        }
        groups
    }

    pub async fn count(&self) -> BTreeMap<ProxyProtocol, usize> {
        let inner = self.inner.lock().await;
        let mut counts: BTreeMap<ProxyProtocol, usize> =
            inner.enabled_protocols.iter().map(|p| (*p, 0)).collect();
        for proxy in &inner.proxies {
            *counts.entry(proxy.protocol).or_insert(0) += 1;
        }
        counts
    }

    /// Removes every proxy that was never successfully checked.
    pub async fn drop_unchecked(&self) {
        let mut inner = self.inner.lock().await;
        inner.proxies.retain(|p| p.is_checked());
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.proxies.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_and_snapshot_dedupes() {
        let storage = ProxyStorage::new([ProxyProtocol::Http]);
        storage.add(Proxy::new(ProxyProtocol::Http, "1.2.3.4", 80, None, None)).await;
        storage.add(Proxy::new(ProxyProtocol::Http, "1.2.3.4", 80, None, None)).await;
        assert_eq!(storage.len().await, 1);
    }

    #[tokio::test]
    async fn grouped_keeps_canonical_order_and_includes_empty_enabled_protocols() {
        let storage = ProxyStorage::new([ProxyProtocol::Http, ProxyProtocol::Socks4, ProxyProtocol::Socks5]);
        storage.add(Proxy::new(ProxyProtocol::Socks5, "9.9.9.9", 1080, None, None)).await;
        let groups = storage.grouped().await;
        let ordered: Vec<ProxyProtocol> = groups.values().map(|(proto, _)| *proto).collect();
        assert_eq!(ordered, vec![ProxyProtocol::Http, ProxyProtocol::Socks4, ProxyProtocol::Socks5]);
        let (_, socks5_proxies) = groups.values().find(|(proto, _)| *proto == ProxyProtocol::Socks5).unwrap();
        assert_eq!(socks5_proxies.len(), 1);
        let (_, http_proxies) = groups.values().find(|(proto, _)| *proto == ProxyProtocol::Http).unwrap();
        assert!(http_proxies.is_empty());
    }

    #[tokio::test]
    async fn remove_missing_is_error() {
        let storage = ProxyStorage::new([ProxyProtocol::Http]);
        let p = Proxy::new(ProxyProtocol::Http, "1.2.3.4", 80, None, None);
        assert!(storage.remove(&p).await.is_err());
    }

    #[tokio::test]
    async fn count_includes_zero_for_enabled_protocols() {
        let storage = ProxyStorage::new([ProxyProtocol::Http, ProxyProtocol::Socks5]);
        storage.add(Proxy::new(ProxyProtocol::Http, "1.2.3.4", 80, None, None)).await;
        let counts = storage.count().await;
        assert_eq!(counts[&ProxyProtocol::Http], 1);
        assert_eq!(counts[&ProxyProtocol::Socks5], 0);
    }

    #[tokio::test]
    async fn drop_unchecked_keeps_only_checked() {
        let storage = ProxyStorage::new([ProxyProtocol::Http]);
        let mut checked = Proxy::new(ProxyProtocol::Http, "1.2.3.4", 80, None, None);
        checked.timeout = Some(0.1);
        storage.add(checked).await;
        storage.add(Proxy::new(ProxyProtocol::Http, "5.6.7.8", 80, None, None)).await;
        storage.drop_unchecked().await;
        assert_eq!(storage.len().await, 1);
        assert_eq!(storage.snapshot().await[0].host, "1.2.3.4");
    }
}

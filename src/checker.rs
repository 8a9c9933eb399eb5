//! C6: probes every stored proxy through the configured check-website, records latency and exit
//! IP on success, and evicts it from storage on any failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};
use url::Url;

use crate::classifier::CheckWebsiteType;
use crate::parser::parse_plain_ipv4;
use crate::proxy::Proxy;
use crate::storage::ProxyStorage;
use crate::tunnel::{request_through_tunnel, CheckError};

/// Fires exactly once across the whole checker run, matching the original's single operator-facing
/// warning when the process is hitting the OS file-descriptor ceiling rather than logging it once
/// per failed proxy.
static FD_EXHAUSTION_LOGGED: AtomicBool = AtomicBool::new(false);

pub struct CheckPlan {
    pub check_host: String,
    pub check_port: u16,
    pub check_path: String,
    pub use_tls: bool,
    pub check_website_type: CheckWebsiteType,
    pub real_ip: Option<String>,
    pub timeout: Duration,
    pub max_connections: usize,
    pub shuffle_seed: Option<u64>,
}

impl CheckPlan {
    pub fn from_check_website(check_website: &str, timeout: Duration, max_connections: usize, check_website_type: CheckWebsiteType, real_ip: Option<String>, shuffle_seed: Option<u64>) -> anyhow::Result<Self> {
        let url = Url::parse(check_website)?;
        let use_tls = url.scheme() == "https";
        let check_host = url.host_str().ok_or_else(|| anyhow::anyhow!("check_website has no host"))?.to_string();
        let check_port = url.port().unwrap_or(if use_tls { 443 } else { 80 });
        let mut check_path = url.path().to_string();
        if let Some(query) = url.query() {
            check_path.push('?');
            check_path.push_str(query);
        }
        if check_path.is_empty() {
            check_path.push('/');
        }
        Ok(Self { check_host, check_port, check_path, use_tls, check_website_type, real_ip, timeout, max_connections, shuffle_seed })
    }
}

/// Checks every proxy currently in `storage`, subject to a semaphore of `plan.max_connections`
/// slots, in a randomized (optionally seeded) order. Successes have `timeout`/`exit_ip` set;
/// failures are removed from storage.
pub async fn check_all(storage: Arc<ProxyStorage>, plan: Arc<CheckPlan>) {
    let mut work = storage.snapshot().await;
    match plan.shuffle_seed {
        Some(seed) => work.shuffle(&mut StdRng::seed_from_u64(seed)),
        None => work.shuffle(&mut rand::thread_rng()),
    }

    let semaphore = Arc::new(Semaphore::new(plan.max_connections.max(1)));
    let mut set = JoinSet::new();
    for proxy in work {
        let semaphore = semaphore.clone();
        let storage = storage.clone();
        let plan = plan.clone();
        set.spawn(async move {
            let permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            check_one(&storage, &plan, proxy).await;
            drop(permit);
        });
    }
    while set.join_next().await.is_some() {}
}

async fn check_one(storage: &ProxyStorage, plan: &CheckPlan, mut proxy: Proxy) {
    let start = Instant::now();
    let result = request_through_tunnel(
        &proxy,
        &plan.check_host,
        plan.check_port,
        &plan.check_path,
        plan.use_tls,
        plan.timeout,
    )
    .await;

    let (status, body) = match result {
        Ok(ok) => ok,
        Err(err) => {
            if matches!(err, CheckError::FdExhausted) && !FD_EXHAUSTION_LOGGED.swap(true, Ordering::Relaxed) {
                error!("file descriptors exhausted while checking proxies; lower max_connections");
            }
            debug!(proxy = %proxy.as_string(true), %err, "proxy check failed");
            let _ = storage.remove(&proxy).await;
            return;
        }
    };

    if status >= 400 {
        debug!(proxy = %proxy.as_string(true), status, "proxy check failed");
        let _ = storage.remove(&proxy).await;
        return;
    }

    let elapsed = start.elapsed().as_secs_f64();
    let exit_ip = extract_exit_ip(plan.check_website_type, &body);

    // `Proxy`'s Hash/Eq only consider identity fields, so removing then re-inserting the same
    // (now-mutated) value replaces the bare entry with the checked one under the same key.
    proxy.timeout = Some(elapsed);
    proxy.exit_ip = exit_ip;
    let _ = storage.remove(&proxy).await;
    storage.add(proxy).await;
}

fn extract_exit_ip(kind: CheckWebsiteType, body: &str) -> Option<String> {
    match kind {
        CheckWebsiteType::Unknown => None,
        CheckWebsiteType::PlainIp => parse_plain_ipv4(body),
        CheckWebsiteType::HttpbinIp => serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("origin").and_then(|o| o.as_str()).and_then(parse_plain_ipv4)),
    }
}

//! TXT-backed endpoint group (design component G, "TXT group").
//!
//! TXT records carry no endpoint schema of their own, so every consumer
//! supplies its own `(bytes) -> Option<Endpoint>` parser; records the parser
//! rejects are silently dropped rather than failing the refresh.

use super::cache::{CacheKey, DnsCache, QueryType};
use super::message::{RecordData, Resolver};
use crate::clock::Clock;
use crate::endpoint::Endpoint;
use crate::endpoint_group::EndpointGroup;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

pub type TxtParser = Arc<dyn Fn(&[u8]) -> Option<Endpoint> + Send + Sync>;

/// Resolves `name`'s TXT records on a background refresh loop, handing each
/// record's raw bytes to `parser` and publishing whatever endpoints it
/// returns.
pub struct TxtEndpointGroup {
    tx: watch::Sender<Arc<Vec<Endpoint>>>,
    rx: watch::Receiver<Arc<Vec<Endpoint>>>,
    shutdown_tx: watch::Sender<bool>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    selection_timeout: Duration,
}

impl TxtEndpointGroup {
    pub fn new(
        name: impl Into<String>,
        parser: TxtParser,
        resolver: Arc<Resolver>,
        cache: DnsCache,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let (tx, rx) = watch::channel(Arc::new(Vec::new()));
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let name = name.into();
        let worker_tx = tx.clone();
        let negative_ttl = resolver.config().negative_ttl;
        let handle = tokio::spawn(async move {
            loop {
                let (endpoints, next_refresh) =
                    refresh_once(&name, &parser, &resolver, &cache, clock.as_ref(), negative_ttl).await;
                worker_tx.send_if_modified(|current| {
                    if **current == endpoints {
                        false
                    } else {
                        *current = Arc::new(endpoints);
                        true
                    }
                });

                tokio::select! {
                    _ = tokio::time::sleep(next_refresh) => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        Arc::new(Self {
            tx,
            rx,
            shutdown_tx,
            worker: tokio::sync::Mutex::new(Some(handle)),
            selection_timeout: Duration::from_secs(3),
        })
    }
}

async fn refresh_once(
    name: &str,
    parser: &TxtParser,
    resolver: &Resolver,
    cache: &DnsCache,
    clock: &dyn Clock,
    negative_ttl: Duration,
) -> (Vec<Endpoint>, Duration) {
    let now = clock.now_nanos();
    let key = CacheKey { name: name.to_string(), query_type: QueryType::Txt };
    let records = cache
        .get_or_resolve(key, now, negative_ttl, || async {
            resolver.resolve(name, QueryType::Txt).await.unwrap_or_default()
        })
        .await;

    let min_ttl_secs = records.iter().map(|r| r.ttl).min();
    let endpoints = records
        .into_iter()
        .filter_map(|record| match record.data {
            RecordData::Txt(bytes) => parser(&bytes),
            _ => None,
        })
        .collect();

    let next_refresh =
        min_ttl_secs.map(|secs| Duration::from_secs(secs as u64)).unwrap_or(negative_ttl).max(MIN_REFRESH_INTERVAL);

    (endpoints, next_refresh)
}

#[async_trait]
impl EndpointGroup for TxtEndpointGroup {
    fn snapshot(&self) -> Arc<Vec<Endpoint>> {
        self.rx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Arc<Vec<Endpoint>>> {
        self.tx.subscribe()
    }

    fn selection_timeout(&self) -> Duration {
        self.selection_timeout
    }

    fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Ok(mut guard) = self.worker.try_lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

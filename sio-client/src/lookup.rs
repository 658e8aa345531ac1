//! URL-keyed manager cache.
//!
//! `ManagerRegistry` lets sockets for different namespaces of one endpoint
//! share a single transport. It is an ordinary value owned by the
//! application; there is no process-wide instance.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use tracing::debug;
use url::Url;

use sio_core::config::ClientConfig;
use sio_core::error::{SioError, SioResult};

use crate::manager::{normalize_namespace, Manager};
use crate::socket::{Socket, SocketOptions};
use crate::transport::Transport;

/// Builds a fresh transport for each new manager.
pub type TransportFactory = Box<dyn Fn() -> Box<dyn Transport> + Send + Sync>;

/// Components of a connection URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUrl {
    /// The URL the manager connects to: scheme, host and port only.
    pub endpoint: Url,
    /// `scheme://host:port`, with default ports filled in.
    pub cache_key: String,
    /// Namespace taken from the URL path.
    pub namespace: String,
    /// Query parameters from the URL.
    pub query: BTreeMap<String, String>,
}

/// Split a connection URL into endpoint, cache key, namespace and query.
/// A URL without a scheme is treated as `https`.
pub fn parse_endpoint(input: &str) -> SioResult<ParsedUrl> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(SioError::InvalidUrl("empty url".into()));
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else if let Some(rest) = trimmed.strip_prefix("//") {
        format!("https://{rest}")
    } else {
        format!("https://{trimmed}")
    };

    let url =
        Url::parse(&with_scheme).map_err(|e| SioError::InvalidUrl(format!("{input}: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| SioError::InvalidUrl(format!("{input}: missing host")))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| SioError::InvalidUrl(format!("{input}: unknown port")))?;

    let cache_key = format!("{}://{}:{}", url.scheme(), host, port);
    let namespace = normalize_namespace(url.path());
    let query = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut endpoint = url.clone();
    endpoint.set_path("/");
    endpoint.set_query(None);
    endpoint.set_fragment(None);

    Ok(ParsedUrl {
        endpoint,
        cache_key,
        namespace,
        query,
    })
}

/// Cache of managers keyed by endpoint.
///
/// The registry also owns the uncached managers it creates, so their
/// sockets stay usable until `close_all` or until the registry is dropped.
/// Uncached managers that are disconnected and whose sockets are no longer
/// held anywhere are released on the next `connect_with`.
pub struct ManagerRegistry {
    factory: TransportFactory,
    defaults: ClientConfig,
    managers: Mutex<HashMap<String, Manager>>,
    detached: Mutex<Vec<Manager>>,
}

impl ManagerRegistry {
    pub fn new<F>(factory: F, defaults: ClientConfig) -> Self
    where
        F: Fn() -> Box<dyn Transport> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            defaults,
            managers: Mutex::new(HashMap::new()),
            detached: Mutex::new(Vec::new()),
        }
    }

    /// Socket for `url` using the registry's default configuration.
    pub fn connect(&self, url: &str) -> SioResult<Socket> {
        let defaults = self.defaults.clone();
        self.connect_with(url, &defaults, SocketOptions::default())
    }

    /// Socket for `url`. Reuses the cached manager for the endpoint unless
    /// `force_new` is set or that manager already has the namespace, in
    /// which case a separate, uncached manager is created.
    pub fn connect_with(
        &self,
        url: &str,
        config: &ClientConfig,
        options: SocketOptions,
    ) -> SioResult<Socket> {
        let parsed = parse_endpoint(url)?;
        let config = merge_query(config, &parsed);
        self.prune_detached();

        let manager = {
            let mut managers = self.managers.lock();
            let cached = managers.get(&parsed.cache_key).cloned();
            let namespace_taken = cached
                .as_ref()
                .is_some_and(|m| m.has_namespace(&parsed.namespace));

            if config.force_new || namespace_taken {
                debug!("creating uncached manager for {}", parsed.cache_key);
                let manager = self.build(&parsed, config)?;
                self.detached.lock().push(manager.clone());
                manager
            } else if let Some(manager) = cached {
                debug!("reusing manager for {}", parsed.cache_key);
                manager
            } else {
                debug!("caching new manager for {}", parsed.cache_key);
                let manager = self.build(&parsed, config)?;
                managers.insert(parsed.cache_key.clone(), manager.clone());
                manager
            }
        };

        Ok(manager.socket(&parsed.namespace, options))
    }

    /// A new manager for `url`, never cached. The caller owns it.
    pub fn manager(&self, url: &str, config: &ClientConfig) -> SioResult<Manager> {
        let parsed = parse_endpoint(url)?;
        let config = merge_query(config, &parsed);
        self.build(&parsed, config)
    }

    /// The cached manager for `url`'s endpoint, if any.
    pub fn cached(&self, url: &str) -> SioResult<Option<Manager>> {
        let parsed = parse_endpoint(url)?;
        Ok(self.managers.lock().get(&parsed.cache_key).cloned())
    }

    /// Number of uncached managers still owned by the registry.
    pub fn detached_count(&self) -> usize {
        self.detached.lock().len()
    }

    /// Number of cached managers.
    pub fn len(&self) -> usize {
        self.managers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.lock().is_empty()
    }

    /// Close and forget every manager this registry created.
    pub fn close_all(&self) {
        let mut managers: Vec<Manager> = self.managers.lock().drain().map(|(_, m)| m).collect();
        managers.append(&mut self.detached.lock());
        for manager in managers {
            if let Err(e) = manager.close() {
                debug!("manager for {} already stopped: {}", manager.url(), e);
            }
        }
    }

    fn prune_detached(&self) {
        let mut detached = self.detached.lock();
        let before = detached.len();
        detached.retain(|m| !m.is_unused());
        if detached.len() < before {
            debug!("released {} unused managers", before - detached.len());
        }
    }

    fn build(&self, parsed: &ParsedUrl, config: ClientConfig) -> SioResult<Manager> {
        Manager::new(parsed.endpoint.as_str(), config, (self.factory)())
    }
}

/// Query parameters from the URL fill in keys the config does not set.
fn merge_query(config: &ClientConfig, parsed: &ParsedUrl) -> ClientConfig {
    let mut config = config.clone();
    for (key, value) in &parsed.query {
        config
            .query
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }
    config
}

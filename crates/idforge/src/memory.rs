//! In-process backends for tests, demos and single-node deployments.
//!
//! [`MemoryScriptStore`] understands only [`INCREMENT_SCRIPT`].
//! [`MemoryCoordinator`] keeps a versioned node tree behind one lock. Both
//! are cheap to clone; clones share state.

use core::{
    future::{Future, ready},
    time::Duration,
};
use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use dashmap::DashMap;
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};

#[cfg(not(feature = "parking-lot"))]
use crate::generator::PoisonError;
use crate::{
    CoordinationClient, CoordinationError, CreateMode, INCREMENT_SCRIPT, NodeStat, ScriptExecutor,
    ScriptValue, StoreError, generator::Mutex,
};

/// Counters held in a concurrent map, with the local clock standing in for
/// the server's.
#[derive(Clone, Debug, Default)]
pub struct MemoryScriptStore {
    counters: Arc<DashMap<String, i64>>,
}

impl MemoryScriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter, if it was ever touched.
    pub fn counter(&self, key: &str) -> Option<i64> {
        self.counters.get(key).map(|value| *value)
    }

    pub fn set_counter(&self, key: &str, value: i64) {
        self.counters.insert(key.to_string(), value);
    }

    fn run_increment(&self, keys: &[String], args: &[String]) -> Result<Vec<ScriptValue>, StoreError> {
        let ([key], [step]) = (keys, args) else {
            return Err(StoreError::Script(
                "wrong number of keys or arguments".to_string(),
            ));
        };
        let step: i64 = step
            .parse()
            .map_err(|_| StoreError::Script("value is not an integer or out of range".to_string()))?;

        let count = {
            let mut counter = self.counters.entry(key.clone()).or_insert(0);
            *counter = counter.checked_add(step).ok_or_else(|| {
                StoreError::Script("increment or decrement would overflow".to_string())
            })?;
            *counter
        };

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| StoreError::Script("clock is before the unix epoch".to_string()))?;
        Ok(vec![
            ScriptValue::Bulk(now.as_secs().to_string()),
            ScriptValue::Bulk(now.subsec_micros().to_string()),
            ScriptValue::Int(count),
        ])
    }
}

impl ScriptExecutor for MemoryScriptStore {
    fn eval(
        &self,
        script: &str,
        keys: &[String],
        args: &[String],
    ) -> impl Future<Output = Result<Vec<ScriptValue>, StoreError>> + Send {
        let reply = if script == INCREMENT_SCRIPT {
            self.run_increment(keys, args)
        } else {
            Err(StoreError::Script("unknown script".to_string()))
        };
        ready(reply)
    }
}

#[derive(Clone, Debug)]
struct Node {
    data: Vec<u8>,
    version: i32,
    mode: CreateMode,
}

#[derive(Debug, Default)]
struct Shared {
    nodes: Mutex<BTreeMap<String, Node>>,
    connected: AtomicBool,
    connects: AtomicUsize,
    closes: AtomicUsize,
}

/// A node tree with the coordination service's versioning rules.
///
/// Every operation except `connect` fails with
/// [`CoordinationError::ConnectionLoss`] while disconnected. Closing drops
/// ephemeral nodes.
#[derive(Clone, Debug, Default)]
pub struct MemoryCoordinator {
    shared: Arc<Shared>,
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `connect` calls.
    pub fn connect_count(&self) -> usize {
        self.shared.connects.load(Ordering::Acquire)
    }

    /// Number of `close` calls.
    pub fn close_count(&self) -> usize {
        self.shared.closes.load(Ordering::Acquire)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.with_nodes(|nodes| nodes.contains_key(path))
    }

    /// Seeds a persistent node at `version`, bypassing the connection.
    pub fn insert(&self, path: &str, version: i32) {
        self.with_nodes(|nodes| {
            nodes.insert(
                path.to_string(),
                Node {
                    data: Vec::new(),
                    version,
                    mode: CreateMode::Persistent,
                },
            );
        });
    }

    /// Data currently stored at `path`.
    pub fn data(&self, path: &str) -> Option<Vec<u8>> {
        self.with_nodes(|nodes| nodes.get(path).map(|node| node.data.clone()))
    }

    fn with_nodes<R>(&self, f: impl FnOnce(&mut BTreeMap<String, Node>) -> R) -> R {
        #[cfg(feature = "parking-lot")]
        let mut nodes = self.shared.nodes.lock();
        #[cfg(not(feature = "parking-lot"))]
        let mut nodes = self
            .shared
            .nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut nodes)
    }

    fn connected<R>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, Node>) -> Result<R, CoordinationError>,
    ) -> Result<R, CoordinationError> {
        if !self.shared.connected.load(Ordering::Acquire) {
            return Err(CoordinationError::ConnectionLoss);
        }
        self.with_nodes(f)
    }
}

fn parent_of(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) if path.len() > 1 => Some("/"),
        Some(0) | None => None,
        Some(i) => Some(&path[..i]),
    }
}

fn child_prefix(path: &str) -> String {
    if path == "/" {
        "/".to_string()
    } else {
        format!("{path}/")
    }
}

fn stat_of(nodes: &BTreeMap<String, Node>, path: &str, node: &Node) -> NodeStat {
    NodeStat {
        version: node.version,
        num_children: direct_children(nodes, path).count() as i32,
    }
}

fn direct_children<'a>(
    nodes: &'a BTreeMap<String, Node>,
    path: &str,
) -> impl Iterator<Item = &'a str> {
    let prefix = child_prefix(path);
    let skip = prefix.len();
    nodes
        .range(prefix.clone()..)
        .map(|(key, _)| key.as_str())
        .take_while(move |key| key.starts_with(&prefix))
        .filter_map(move |key| {
            let name = &key[skip..];
            (!name.contains('/')).then_some(name)
        })
}

fn node_exists(nodes: &BTreeMap<String, Node>, path: &str) -> bool {
    path == "/" || nodes.contains_key(path)
}

impl CoordinationClient for MemoryCoordinator {
    fn connect(
        &self,
        _session_timeout: Duration,
        _connection_timeout: Duration,
    ) -> impl Future<Output = Result<(), CoordinationError>> + Send {
        self.shared.connected.store(true, Ordering::Release);
        self.shared.connects.fetch_add(1, Ordering::AcqRel);
        ready(Ok(()))
    }

    fn close(&self) -> impl Future<Output = Result<(), CoordinationError>> + Send {
        self.shared.connected.store(false, Ordering::Release);
        self.shared.closes.fetch_add(1, Ordering::AcqRel);
        self.with_nodes(|nodes| nodes.retain(|_, node| node.mode == CreateMode::Persistent));
        ready(Ok(()))
    }

    fn exists(
        &self,
        path: &str,
    ) -> impl Future<Output = Result<Option<NodeStat>, CoordinationError>> + Send {
        ready(self.connected(|nodes| {
            let nodes: &BTreeMap<_, _> = nodes;
            Ok(nodes.get(path).map(|node| stat_of(nodes, path, node)))
        }))
    }

    fn create(
        &self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
    ) -> impl Future<Output = Result<(), CoordinationError>> + Send {
        ready(self.connected(|nodes| {
            if node_exists(nodes, path) {
                return Err(CoordinationError::NodeExists(path.to_string()));
            }
            let mut parent = parent_of(path);
            while let Some(dir) = parent.filter(|dir| *dir != "/") {
                nodes.entry(dir.to_string()).or_insert_with(|| Node {
                    data: Vec::new(),
                    version: 0,
                    mode: CreateMode::Persistent,
                });
                parent = parent_of(dir);
            }
            nodes.insert(
                path.to_string(),
                Node {
                    data: data.to_vec(),
                    version: 0,
                    mode,
                },
            );
            Ok(())
        }))
    }

    fn set_data(
        &self,
        path: &str,
        data: &[u8],
        version: i32,
    ) -> impl Future<Output = Result<NodeStat, CoordinationError>> + Send {
        ready(self.connected(|nodes| {
            let node = nodes
                .get_mut(path)
                .ok_or_else(|| CoordinationError::NoNode(path.to_string()))?;
            if version != crate::ANY_VERSION && version != node.version {
                return Err(CoordinationError::BadVersion(path.to_string()));
            }
            node.data = data.to_vec();
            node.version = node.version.wrapping_add(1);
            let version = node.version;
            Ok(NodeStat {
                version,
                num_children: direct_children(nodes, path).count() as i32,
            })
        }))
    }

    fn delete(&self, path: &str) -> impl Future<Output = Result<(), CoordinationError>> + Send {
        ready(self.connected(|nodes| {
            if nodes.remove(path).is_none() {
                return Err(CoordinationError::NoNode(path.to_string()));
            }
            let prefix = child_prefix(path);
            nodes.retain(|key, _| !key.starts_with(&prefix));
            Ok(())
        }))
    }

    fn children(
        &self,
        path: &str,
    ) -> impl Future<Output = Result<Vec<String>, CoordinationError>> + Send {
        ready(self.connected(|nodes| {
            if !node_exists(nodes, path) {
                return Err(CoordinationError::NoNode(path.to_string()));
            }
            Ok(direct_children(nodes, path).map(str::to_string).collect())
        }))
    }
}

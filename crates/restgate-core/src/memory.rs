//! In-memory service implementations.
//!
//! Used by `restgate serve` for standalone runs and by the test suites.
//! They hold everything in process memory and lose it on exit.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch, RwLock};
use tracing::debug;

use crate::services::{
    ActionService, DataBroker, ModuleInfo, MountPointService, NotificationService, RpcService,
    SchemaContext, SchemaService, ServiceHandleSet,
};

fn normalize_path(path: &str) -> String {
    path.trim_matches('/').to_string()
}

/// Data broker backed by an ordered map of path -> JSON subtree.
#[derive(Default)]
pub struct MemoryDataBroker {
    store: RwLock<BTreeMap<String, serde_json::Value>>,
}

impl MemoryDataBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored subtrees.
    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.read().await.is_empty()
    }
}

#[async_trait]
impl DataBroker for MemoryDataBroker {
    async fn read(&self, path: &str) -> anyhow::Result<Option<serde_json::Value>> {
        Ok(self.store.read().await.get(&normalize_path(path)).cloned())
    }

    async fn put(&self, path: &str, value: serde_json::Value) -> anyhow::Result<()> {
        let key = normalize_path(path);
        if key.is_empty() {
            anyhow::bail!("Cannot replace the datastore root");
        }
        debug!(path = %key, "Datastore put");
        self.store.write().await.insert(key, value);
        Ok(())
    }

    async fn delete(&self, path: &str) -> anyhow::Result<bool> {
        Ok(self.store.write().await.remove(&normalize_path(path)).is_some())
    }
}

type OperationFn = Box<dyn Fn(serde_json::Value) -> serde_json::Value + Send + Sync>;

/// Name-keyed table of synchronous operations.
///
/// Serves both as an [`RpcService`] (keyed by RPC name) and an
/// [`ActionService`] (keyed by data path).
#[derive(Default)]
pub struct OperationRegistry {
    operations: HashMap<String, OperationFn>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, op: F)
    where
        F: Fn(serde_json::Value) -> serde_json::Value + Send + Sync + 'static,
    {
        self.operations.insert(normalize_path(name), Box::new(op));
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn call(&self, name: &str, input: serde_json::Value) -> Option<serde_json::Value> {
        self.operations.get(&normalize_path(name)).map(|op| op(input))
    }
}

#[async_trait]
impl RpcService for OperationRegistry {
    async fn invoke(
        &self,
        name: &str,
        input: serde_json::Value,
    ) -> anyhow::Result<Option<serde_json::Value>> {
        Ok(self.call(name, input))
    }
}

#[async_trait]
impl ActionService for OperationRegistry {
    async fn invoke(
        &self,
        path: &str,
        input: serde_json::Value,
    ) -> anyhow::Result<Option<serde_json::Value>> {
        Ok(self.call(path, input))
    }
}

/// Fixed list of notification stream names.
#[derive(Debug, Clone, Default)]
pub struct StaticNotificationService {
    streams: Vec<String>,
}

impl StaticNotificationService {
    pub fn new(streams: Vec<String>) -> Self {
        Self { streams }
    }
}

impl NotificationService for StaticNotificationService {
    fn streams(&self) -> Vec<String> {
        self.streams.clone()
    }
}

/// Fixed list of mount point identifiers.
#[derive(Debug, Clone, Default)]
pub struct StaticMountPointService {
    mount_points: Vec<String>,
}

impl StaticMountPointService {
    pub fn new(mount_points: Vec<String>) -> Self {
        Self { mount_points }
    }
}

impl MountPointService for StaticMountPointService {
    fn mount_points(&self) -> Vec<String> {
        self.mount_points.clone()
    }
}

/// Schema service holding one replaceable context.
pub struct MemorySchemaService {
    current: watch::Sender<Arc<SchemaContext>>,
    updates: broadcast::Sender<Arc<SchemaContext>>,
    available: AtomicBool,
}

impl MemorySchemaService {
    pub fn new(modules: Vec<ModuleInfo>) -> Self {
        let (current, _) = watch::channel(Arc::new(SchemaContext::new(1, modules)));
        let (updates, _) = broadcast::channel(16);
        Self {
            current,
            updates,
            available: AtomicBool::new(true),
        }
    }

    /// Replace the module set, bumping the generation and notifying subscribers.
    pub fn update(&self, modules: Vec<ModuleInfo>) -> Arc<SchemaContext> {
        let generation = self.current.borrow().generation + 1;
        let ctx = Arc::new(SchemaContext::new(generation, modules));
        self.current.send_replace(ctx.clone());
        // No subscribers is fine
        let _ = self.updates.send(ctx.clone());
        debug!(generation, "Schema context updated");
        ctx
    }

    /// Simulate the service becoming unreachable (or reachable again).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

impl SchemaService for MemorySchemaService {
    fn current_context(&self) -> anyhow::Result<Arc<SchemaContext>> {
        if !self.available.load(Ordering::SeqCst) {
            anyhow::bail!("Schema service is unavailable");
        }
        Ok(self.current.borrow().clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<Arc<SchemaContext>> {
        self.updates.subscribe()
    }
}

/// The modules every standalone deployment advertises.
pub fn base_modules() -> Vec<ModuleInfo> {
    vec![
        ModuleInfo {
            name: "ietf-yang-library".into(),
            revision: Some("2019-01-04".into()),
            namespace: "urn:ietf:params:xml:ns:yang:ietf-yang-library".into(),
        },
        ModuleInfo {
            name: "ietf-restconf-monitoring".into(),
            revision: Some("2017-01-26".into()),
            namespace: "urn:ietf:params:xml:ns:yang:ietf-restconf-monitoring".into(),
        },
    ]
}

/// In-memory services plus typed handles to the ones callers may want to poke.
pub struct MemoryServices {
    pub data_broker: Arc<MemoryDataBroker>,
    pub schema: Arc<MemorySchemaService>,
    pub handles: ServiceHandleSet,
}

impl MemoryServices {
    /// Build a full in-memory service set.
    ///
    /// `rpcs` backs both the RPC and action services.
    pub fn new(rpcs: OperationRegistry, modules: Vec<ModuleInfo>) -> Self {
        let data_broker = Arc::new(MemoryDataBroker::new());
        let schema = Arc::new(MemorySchemaService::new(modules));
        let operations = Arc::new(rpcs);
        let handles = ServiceHandleSet::new(
            data_broker.clone(),
            operations.clone(),
            operations,
            Arc::new(StaticNotificationService::new(vec!["NETCONF".into()])),
            Arc::new(StaticMountPointService::default()),
            schema.clone(),
        );
        Self {
            data_broker,
            schema,
            handles,
        }
    }
}

impl Default for MemoryServices {
    fn default() -> Self {
        Self::new(OperationRegistry::new(), base_modules())
    }
}

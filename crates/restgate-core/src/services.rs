//! Backend service traits and the handle bundle the gateway is built from.
//!
//! The gateway never owns these services. Whatever assembles the larger
//! system creates them, hands `Arc` clones to the gateway, and tears them
//! down after the gateway has stopped.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// A single data-model module known to the schema service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    pub namespace: String,
}

/// Compiled view of the available data-model definitions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaContext {
    /// Bumped by the schema service every time the module set changes.
    pub generation: u64,
    pub modules: Vec<ModuleInfo>,
}

impl SchemaContext {
    pub fn new(generation: u64, modules: Vec<ModuleInfo>) -> Self {
        Self {
            generation,
            modules,
        }
    }

    pub fn module(&self, name: &str) -> Option<&ModuleInfo> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// Check that no (name, revision) pair appears twice.
    ///
    /// Returns the first duplicated module name.
    pub fn find_duplicate(&self) -> Option<&str> {
        let mut seen = HashSet::new();
        self.modules
            .iter()
            .find(|m| !seen.insert((m.name.as_str(), m.revision.as_deref())))
            .map(|m| m.name.as_str())
    }
}

/// Transactional access to configuration and operational data.
#[async_trait]
pub trait DataBroker: Send + Sync + 'static {
    /// Read the subtree at `path`. `None` when nothing is stored there.
    async fn read(&self, path: &str) -> anyhow::Result<Option<serde_json::Value>>;

    /// Replace the subtree at `path`.
    async fn put(&self, path: &str, value: serde_json::Value) -> anyhow::Result<()>;

    /// Remove the subtree at `path`. Returns whether anything was removed.
    async fn delete(&self, path: &str) -> anyhow::Result<bool>;
}

/// Invocation of global RPC operations.
#[async_trait]
pub trait RpcService: Send + Sync + 'static {
    /// Invoke the RPC `name`. `Ok(None)` means no such RPC is registered.
    async fn invoke(
        &self,
        name: &str,
        input: serde_json::Value,
    ) -> anyhow::Result<Option<serde_json::Value>>;
}

/// Invocation of actions bound to a data node.
#[async_trait]
pub trait ActionService: Send + Sync + 'static {
    /// Invoke the action at `path`. `Ok(None)` means no such action.
    async fn invoke(
        &self,
        path: &str,
        input: serde_json::Value,
    ) -> anyhow::Result<Option<serde_json::Value>>;
}

/// Source of notification streams.
pub trait NotificationService: Send + Sync + 'static {
    /// Names of the streams clients may subscribe to.
    fn streams(&self) -> Vec<String>;
}

/// Registry of mounted remote devices.
pub trait MountPointService: Send + Sync + 'static {
    fn mount_points(&self) -> Vec<String>;
}

/// Provider of the current schema context.
pub trait SchemaService: Send + Sync + 'static {
    /// Snapshot of the current context. Fails when the service is unreachable.
    fn current_context(&self) -> anyhow::Result<Arc<SchemaContext>>;

    /// Subscribe to context replacements.
    fn subscribe(&self) -> broadcast::Receiver<Arc<SchemaContext>>;
}

/// Bundle of externally owned backend services.
///
/// Cloning is cheap; all clones point at the same services.
#[derive(Clone)]
pub struct ServiceHandleSet {
    pub data_broker: Arc<dyn DataBroker>,
    pub rpc: Arc<dyn RpcService>,
    pub action: Arc<dyn ActionService>,
    pub notification: Arc<dyn NotificationService>,
    pub mount_point: Arc<dyn MountPointService>,
    pub schema: Arc<dyn SchemaService>,
}

impl ServiceHandleSet {
    pub fn new(
        data_broker: Arc<dyn DataBroker>,
        rpc: Arc<dyn RpcService>,
        action: Arc<dyn ActionService>,
        notification: Arc<dyn NotificationService>,
        mount_point: Arc<dyn MountPointService>,
        schema: Arc<dyn SchemaService>,
    ) -> Self {
        Self {
            data_broker,
            rpc,
            action,
            notification,
            mount_point,
            schema,
        }
    }
}

impl std::fmt::Debug for ServiceHandleSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHandleSet").finish_non_exhaustive()
    }
}

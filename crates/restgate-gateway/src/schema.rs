//! Schema context lifecycle.
//!
//! Keeps the gateway's view of the schema context current while it is open,
//! and mirrors the module list into the data broker so clients can read it
//! back as `ietf-yang-library:modules-state`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use restgate_core::error::{GatewayError, Result};
use restgate_core::services::{DataBroker, SchemaContext, SchemaService};

use crate::lifecycle::Lifecycle;

/// Datastore path the module list is published under.
pub const MODULES_STATE_PATH: &str = "ietf-yang-library:modules-state";

type ContextSlot = Arc<watch::Sender<Option<Arc<SchemaContext>>>>;

/// Read-only view of the current schema context.
///
/// `None` while the lifecycle is closed.
#[derive(Clone)]
pub struct SchemaContextHandle {
    rx: watch::Receiver<Option<Arc<SchemaContext>>>,
}

impl SchemaContextHandle {
    pub fn current(&self) -> Option<Arc<SchemaContext>> {
        self.rx.borrow().clone()
    }
}

pub struct SchemaContextLifecycle {
    broker: Arc<dyn DataBroker>,
    schema: Arc<dyn SchemaService>,
    current: ContextSlot,
    follower: Option<JoinHandle<()>>,
}

impl SchemaContextLifecycle {
    pub fn new(broker: Arc<dyn DataBroker>, schema: Arc<dyn SchemaService>) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            broker,
            schema,
            current: Arc::new(tx),
            follower: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.follower.is_some()
    }

    pub fn handle(&self) -> SchemaContextHandle {
        SchemaContextHandle {
            rx: self.current.subscribe(),
        }
    }

    /// Acquire the current schema context and follow its replacements.
    ///
    /// Idempotent. Fails with [`GatewayError::Initialization`] when the
    /// schema service is unreachable or hands out an inconsistent context.
    pub async fn open(&mut self) -> Result<()> {
        if self.is_open() {
            debug!("Schema context already open");
            return Ok(());
        }

        // Subscribe before the snapshot so no replacement slips in between.
        let updates = self.schema.subscribe();
        let ctx = self.schema.current_context().map_err(|e| {
            GatewayError::Initialization(format!("Schema service unreachable: {e}"))
        })?;
        check_consistent(&ctx)?;

        publish_modules(self.broker.as_ref(), &ctx)
            .await
            .map_err(|e| {
                GatewayError::Initialization(format!("Failed to publish module list: {e}"))
            })?;

        info!(
            generation = ctx.generation,
            modules = ctx.modules.len(),
            "Schema context opened"
        );
        self.current.send_replace(Some(ctx));
        self.follower = Some(tokio::spawn(follow_updates(
            updates,
            self.schema.clone(),
            self.broker.clone(),
            self.current.clone(),
        )));
        Ok(())
    }

    /// Stop following schema updates and drop the current context.
    ///
    /// No-op when not open. Never fails.
    pub fn close(&mut self) {
        let Some(follower) = self.follower.take() else {
            return;
        };
        follower.abort();
        self.current.send_replace(None);
        info!("Schema context closed");
    }
}

impl Drop for SchemaContextLifecycle {
    fn drop(&mut self) {
        if let Some(follower) = self.follower.take() {
            follower.abort();
        }
    }
}

#[async_trait]
impl Lifecycle for SchemaContextLifecycle {
    fn name(&self) -> &str {
        "schema-context"
    }

    async fn initialize(&mut self) -> Result<()> {
        self.open().await
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.close();
        Ok(())
    }
}

fn check_consistent(ctx: &SchemaContext) -> Result<()> {
    match ctx.find_duplicate() {
        Some(name) => Err(GatewayError::Initialization(format!(
            "Schema context generation {} lists module '{name}' more than once",
            ctx.generation
        ))),
        None => Ok(()),
    }
}

async fn publish_modules(broker: &dyn DataBroker, ctx: &SchemaContext) -> anyhow::Result<()> {
    let modules: Vec<serde_json::Value> = ctx
        .modules
        .iter()
        .map(|m| {
            json!({
                "name": m.name,
                "revision": m.revision.clone().unwrap_or_default(),
                "namespace": m.namespace,
            })
        })
        .collect();
    broker
        .put(
            MODULES_STATE_PATH,
            json!({
                "module-set-id": ctx.generation.to_string(),
                "module": modules,
            }),
        )
        .await
}

async fn follow_updates(
    mut updates: broadcast::Receiver<Arc<SchemaContext>>,
    schema: Arc<dyn SchemaService>,
    broker: Arc<dyn DataBroker>,
    current: ContextSlot,
) {
    loop {
        let ctx = match updates.recv().await {
            Ok(ctx) => ctx,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Missed schema updates, resynchronizing");
                match schema.current_context() {
                    Ok(ctx) => ctx,
                    Err(e) => {
                        warn!(error = %e, "Schema resync failed");
                        continue;
                    }
                }
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("Schema update channel closed");
                return;
            }
        };

        let stale = current
            .borrow()
            .as_ref()
            .is_some_and(|c| c.generation >= ctx.generation);
        if stale {
            continue;
        }
        if let Err(e) = check_consistent(&ctx) {
            warn!(error = %e, "Ignoring inconsistent schema context");
            continue;
        }
        if let Err(e) = publish_modules(broker.as_ref(), &ctx).await {
            warn!(error = %e, "Failed to republish module list");
        }
        info!(generation = ctx.generation, "Schema context updated");
        current.send_replace(Some(ctx));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use restgate_core::memory::{base_modules, MemoryServices};
    use restgate_core::services::ModuleInfo;

    fn lifecycle(services: &MemoryServices) -> SchemaContextLifecycle {
        SchemaContextLifecycle::new(
            services.handles.data_broker.clone(),
            services.handles.schema.clone(),
        )
    }

    async fn wait_for_generation(handle: &SchemaContextHandle, generation: u64) -> bool {
        for _ in 0..100 {
            if handle.current().is_some_and(|c| c.generation == generation) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_open_publishes_modules() {
        let services = MemoryServices::default();
        let mut schema = lifecycle(&services);

        schema.open().await.unwrap();
        assert!(schema.is_open());

        let published = services
            .handles
            .data_broker
            .read(MODULES_STATE_PATH)
            .await
            .unwrap()
            .expect("modules-state published");
        assert_eq!(published["module-set-id"], "1");
        assert_eq!(published["module"].as_array().unwrap().len(), 2);
        schema.close();
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let services = MemoryServices::default();
        let mut schema = lifecycle(&services);
        schema.open().await.unwrap();
        schema.open().await.unwrap();
        assert_eq!(schema.handle().current().unwrap().generation, 1);
        schema.close();
    }

    #[tokio::test]
    async fn test_open_fails_when_service_unreachable() {
        let services = MemoryServices::default();
        services.schema.set_available(false);
        let mut schema = lifecycle(&services);

        let err = schema.open().await.unwrap_err();
        assert!(matches!(err, GatewayError::Initialization(_)));
        assert!(!schema.is_open());
        assert!(schema.handle().current().is_none());
    }

    #[tokio::test]
    async fn test_open_rejects_duplicate_modules() {
        let mut modules = base_modules();
        modules.push(modules[0].clone());
        let services = MemoryServices::new(Default::default(), modules);
        let mut schema = lifecycle(&services);

        assert!(matches!(
            schema.open().await,
            Err(GatewayError::Initialization(_))
        ));
    }

    #[tokio::test]
    async fn test_follows_schema_updates() {
        let services = MemoryServices::default();
        let mut schema = lifecycle(&services);
        schema.open().await.unwrap();
        let handle = schema.handle();

        let mut modules = base_modules();
        modules.push(ModuleInfo {
            name: "network-topology".into(),
            revision: Some("2013-10-21".into()),
            namespace: "urn:TBD:params:xml:ns:yang:network-topology".into(),
        });
        services.schema.update(modules);

        assert!(wait_for_generation(&handle, 2).await);
        let published = services
            .handles
            .data_broker
            .read(MODULES_STATE_PATH)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(published["module"].as_array().unwrap().len(), 3);
        schema.close();
    }

    #[tokio::test]
    async fn test_close_without_open_is_noop() {
        let services = MemoryServices::default();
        let mut schema = lifecycle(&services);
        schema.close();
        assert!(!schema.is_open());
    }

    #[tokio::test]
    async fn test_close_clears_context_and_stops_following() {
        let services = MemoryServices::default();
        let mut schema = lifecycle(&services);
        schema.open().await.unwrap();
        let handle = schema.handle();

        schema.close();
        assert!(handle.current().is_none());

        services.schema.update(vec![]);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.current().is_none());
    }
}

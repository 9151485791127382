//! Gateway module: wires the schema lifecycle, protocol handler and
//! discovery endpoint onto an HTTP listener and sequences start/stop.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::Router;
use tracing::{debug, error, info, warn};

use restgate_core::config::{Config, ListenAddress};
use restgate_core::error::{GatewayError, Result};
use restgate_core::services::ServiceHandleSet;
use restgate_core::streams::StreamsConfiguration;

use crate::discovery::RootDiscoveryEndpoint;
use crate::handler::ProtocolHandlerFactory;
use crate::lifecycle::Lifecycle;
use crate::schema::SchemaContextLifecycle;
use crate::server::{HttpListener, SharedListener};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Created,
    /// Schema open and handler trees attached.
    Initialized,
    /// Owned listener confirmed running.
    Started,
    /// Terminal.
    Stopped,
}

/// The listener the gateway serves from, and whether it may stop it.
pub enum ListenerSlot {
    /// Built by the gateway; started and stopped by it.
    Owned(HttpListener),
    /// Supplied by another component, which decides when it starts and stops.
    Shared(SharedListener),
}

impl ListenerSlot {
    async fn attach_all(&mut self, trees: Vec<(String, Router)>) -> Result<()> {
        match self {
            Self::Owned(listener) => listener.attach_all(trees),
            Self::Shared(shared) => shared.lock().await.attach_all(trees),
        }
    }
}

pub struct GatewayModule {
    services: ServiceHandleSet,
    address: ListenAddress,
    streams: StreamsConfiguration,
    shutdown_timeout: Duration,
    shared_listener: Option<SharedListener>,
    discovery: RootDiscoveryEndpoint,
    schema: Option<SchemaContextLifecycle>,
    listener: Option<ListenerSlot>,
    state: ModuleState,
}

impl GatewayModule {
    pub fn new(
        services: ServiceHandleSet,
        address: ListenAddress,
        streams: StreamsConfiguration,
    ) -> Self {
        let discovery = RootDiscoveryEndpoint::new(address.context_path());
        Self {
            services,
            address,
            streams,
            shutdown_timeout: Duration::from_secs(5),
            shared_listener: None,
            discovery,
            schema: None,
            listener: None,
            state: ModuleState::Created,
        }
    }

    /// Build from the `restconf` and `streams` config sections.
    pub fn from_config(services: ServiceHandleSet, config: &Config) -> Result<Self> {
        Ok(Self::new(services, config.listen_address()?, config.streams())
            .with_shutdown_timeout(config.shutdown_timeout()))
    }

    /// Serve from an externally owned listener instead of building one.
    ///
    /// The gateway attaches its handler trees to it but never starts or
    /// stops it.
    pub fn with_shared_listener(mut self, listener: SharedListener) -> Self {
        self.shared_listener = Some(listener);
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn state(&self) -> ModuleState {
        self.state
    }

    pub fn address(&self) -> &ListenAddress {
        &self.address
    }

    pub fn discovery(&self) -> &RootDiscoveryEndpoint {
        &self.discovery
    }

    pub fn is_listener_owned(&self) -> bool {
        match &self.listener {
            Some(ListenerSlot::Owned(_)) => true,
            Some(ListenerSlot::Shared(_)) => false,
            None => self.shared_listener.is_none(),
        }
    }

    /// Address the listener is bound to, if it is running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        match self.listener.as_ref()? {
            ListenerSlot::Owned(listener) => listener.local_addr(),
            ListenerSlot::Shared(shared) => shared.lock().await.local_addr(),
        }
    }

    /// Initialize the gateway. Returns whether it succeeded.
    ///
    /// Failures are logged and rolled back; the module stays `Created` so
    /// the call may be retried.
    pub async fn init(&mut self) -> bool {
        self.try_init().await.is_ok()
    }

    /// Start the owned listener.
    ///
    /// No-op when already running, and for a shared listener.
    pub async fn start_server(&mut self) -> Result<()> {
        match self.listener.as_mut() {
            None => Err(GatewayError::ServerStart(format!(
                "Gateway is {:?}; initialize it before starting the server",
                self.state
            ))),
            Some(ListenerSlot::Shared(_)) => {
                debug!("Listener is shared, leaving start to its owner");
                Ok(())
            }
            Some(ListenerSlot::Owned(listener)) => {
                if listener.is_running() {
                    return Ok(());
                }
                listener.start().await?;
                self.state = ModuleState::Started;
                Ok(())
            }
        }
    }

    /// Stop the gateway. Returns overall success.
    ///
    /// The schema context is always closed first. An owned listener is
    /// stopped afterwards; a shared one is left running.
    pub async fn stop(&mut self) -> bool {
        self.try_stop().await.is_ok()
    }

    async fn try_init(&mut self) -> Result<()> {
        match self.state {
            ModuleState::Created => {}
            ModuleState::Initialized | ModuleState::Started => {
                debug!("Gateway already initialized");
                return Ok(());
            }
            ModuleState::Stopped => {
                warn!("Gateway has been stopped and cannot be initialized again");
                return Err(GatewayError::Initialization(
                    "Gateway has been stopped".into(),
                ));
            }
        }

        let started = Instant::now();
        match self.init_procedure().await {
            Ok(()) => {
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    state = ?self.state,
                    "RESTCONF gateway initialized"
                );
                Ok(())
            }
            Err(e) => {
                error!(error = %e, kind = e.kind(), "RESTCONF gateway initialization failed");
                self.rollback().await;
                Err(e)
            }
        }
    }

    async fn init_procedure(&mut self) -> Result<()> {
        let schema = self.schema.get_or_insert_with(|| {
            SchemaContextLifecycle::new(
                self.services.data_broker.clone(),
                self.services.schema.clone(),
            )
        });
        schema.open().await?;

        info!(streams = ?self.streams, "Building protocol handler");
        let handler = ProtocolHandlerFactory::build(&self.services, schema, &self.streams)?;

        info!(
            addr = %self.address.socket_addr(),
            context_path = self.address.context_path(),
            "Attaching handler trees"
        );
        let mut slot = match &self.shared_listener {
            Some(shared) => ListenerSlot::Shared(shared.clone()),
            None => ListenerSlot::Owned(
                HttpListener::new(self.address.socket_addr())
                    .with_shutdown_timeout(self.shutdown_timeout),
            ),
        };
        slot.attach_all(vec![
            (
                self.address.context_path().to_string(),
                handler.into_router(),
            ),
            (
                RootDiscoveryEndpoint::MOUNT_PATH.to_string(),
                self.discovery.router(),
            ),
        ])
        .await?;

        let owned = matches!(slot, ListenerSlot::Owned(_));
        self.listener = Some(slot);
        self.state = ModuleState::Initialized;

        if owned {
            self.start_server().await?;
        }
        Ok(())
    }

    /// Undo a partial initialization.
    async fn rollback(&mut self) {
        if let Some(schema) = self.schema.as_mut() {
            schema.close();
        }
        if let Some(ListenerSlot::Owned(mut listener)) = self.listener.take() {
            if let Err(e) = listener.stop().await {
                warn!(error = %e, "Failed to stop listener during rollback");
            }
        }
        self.state = ModuleState::Created;
    }

    async fn try_stop(&mut self) -> Result<()> {
        if self.state == ModuleState::Stopped {
            debug!("Gateway already stopped");
            return Ok(());
        }

        if let Some(schema) = self.schema.as_mut() {
            schema.close();
        }

        let result = match self.listener.take() {
            Some(ListenerSlot::Owned(mut listener)) => listener.stop().await,
            Some(ListenerSlot::Shared(_)) => {
                debug!("Leaving shared listener to its owner");
                Ok(())
            }
            None => Ok(()),
        };
        self.state = ModuleState::Stopped;

        match &result {
            Ok(()) => info!("RESTCONF gateway stopped"),
            Err(e) => error!(error = %e, "RESTCONF gateway stopped with errors"),
        }
        result
    }
}

#[async_trait]
impl Lifecycle for GatewayModule {
    fn name(&self) -> &str {
        "restconf-gateway"
    }

    async fn initialize(&mut self) -> Result<()> {
        self.try_init().await
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.try_stop().await
    }
}

//! Uniform start/stop contract for subsystems hosted together.
//!
//! Each subsystem implements [`Lifecycle`] on its own; a host composes them
//! with a [`LifecycleGroup`], which initializes in registration order and
//! shuts down in reverse.

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use restgate_core::error::{GatewayError, Result};

#[async_trait]
pub trait Lifecycle: Send + 'static {
    /// Name used in log output.
    fn name(&self) -> &str;

    /// Acquire resources and begin operation.
    async fn initialize(&mut self) -> Result<()>;

    /// Release resources. Should be idempotent.
    async fn shutdown(&mut self) -> Result<()>;
}

/// Ordered list of lifecycle members.
#[derive(Default)]
pub struct LifecycleGroup {
    members: Vec<Box<dyn Lifecycle>>,
    /// Number of leading members that are currently initialized.
    initialized: usize,
}

impl LifecycleGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, member: Box<dyn Lifecycle>) {
        debug!(member = member.name(), "Registered lifecycle member");
        self.members.push(member);
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Initialize members that are not yet running, in registration order.
    ///
    /// On the first failure, the members initialized so far are shut down
    /// in reverse order and the failure is returned.
    pub async fn initialize_all(&mut self) -> Result<()> {
        while self.initialized < self.members.len() {
            let member = &mut self.members[self.initialized];
            let name = member.name().to_string();
            if let Err(e) = member.initialize().await {
                error!(member = %name, error = %e, "Lifecycle member failed to initialize");
                if let Err(rollback) = self.shutdown_all().await {
                    warn!(error = %rollback, "Rollback after failed initialization was incomplete");
                }
                return Err(e);
            }
            info!(member = %name, "Lifecycle member initialized");
            self.initialized += 1;
        }
        Ok(())
    }

    /// Shut down initialized members in reverse order.
    ///
    /// Every member gets its shutdown call. The first failure is returned,
    /// later ones are only logged.
    pub async fn shutdown_all(&mut self) -> Result<()> {
        let mut first_error: Option<GatewayError> = None;
        while self.initialized > 0 {
            self.initialized -= 1;
            let member = &mut self.members[self.initialized];
            match member.shutdown().await {
                Ok(()) => info!(member = member.name(), "Lifecycle member stopped"),
                Err(e) => {
                    error!(member = member.name(), error = %e, "Lifecycle member failed to stop");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

use super::{Application, Instance, Registry, Status};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("application '{0}' not found")]
    AppNotFound(String),
    #[error("instance '{instance_id}' of application '{app}' not found")]
    InstanceNotFound { app: String, instance_id: String },
    #[error("instance '{instance_id}' already registered for application '{app}'")]
    AlreadyRegistered { app: String, instance_id: String },
}

/// Registry kept in process memory. Clones share the same storage.
#[derive(Clone, Default)]
pub struct InMemoryRegistry {
    apps: Arc<RwLock<BTreeMap<String, Vec<Instance>>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, app: &str, mut instance: Instance) -> Result<(), RegistryError> {
        let mut apps = self.apps.write().await;
        let instances = apps.entry(app.to_string()).or_default();

        if instances.iter().any(|i| i.instance_id == instance.instance_id) {
            return Err(RegistryError::AlreadyRegistered {
                app: app.to_string(),
                instance_id: instance.instance_id,
            });
        }

        let now = Utc::now();
        instance.lease_info.registration_timestamp = now;
        instance.lease_info.last_renewal_timestamp = now;
        instance.lease_info.service_up_timestamp = now;

        info!("Registered instance {} of {}", instance.instance_id, app);
        instances.push(instance);
        Ok(())
    }

    /// Removes the instance; an application without instances is removed too.
    pub async fn deregister(&self, app: &str, instance_id: &str) -> Result<Instance, RegistryError> {
        let mut apps = self.apps.write().await;
        let instances = apps
            .get_mut(app)
            .ok_or_else(|| RegistryError::AppNotFound(app.to_string()))?;

        let pos = instances
            .iter()
            .position(|i| i.instance_id == instance_id)
            .ok_or_else(|| instance_not_found(app, instance_id))?;
        let removed = instances.remove(pos);

        if instances.is_empty() {
            apps.remove(app);
        }

        info!("Deregistered instance {} of {}", instance_id, app);
        Ok(removed)
    }

    pub async fn heartbeat(&self, app: &str, instance_id: &str) -> Result<(), RegistryError> {
        self.update(app, instance_id, |instance| {
            instance.lease_info.last_renewal_timestamp = Utc::now();
        })
        .await
    }

    pub async fn status_override(
        &self,
        app: &str,
        instance_id: &str,
        status: Status,
    ) -> Result<(), RegistryError> {
        self.update(app, instance_id, |instance| {
            instance.overridden_status = status;
            instance.status = status;
        })
        .await
    }

    pub async fn remove_status_override(
        &self,
        app: &str,
        instance_id: &str,
        fallback: Status,
    ) -> Result<(), RegistryError> {
        self.update(app, instance_id, |instance| {
            instance.overridden_status = Status::Unknown;
            instance.status = fallback;
        })
        .await
    }

    pub async fn app(&self, app: &str) -> Result<Application, RegistryError> {
        let apps = self.apps.read().await;
        apps.get(app)
            .map(|instances| Application {
                name: app.to_string(),
                instances: instances.clone(),
            })
            .ok_or_else(|| RegistryError::AppNotFound(app.to_string()))
    }

    pub async fn app_instance(&self, app: &str, instance_id: &str) -> Result<Instance, RegistryError> {
        let apps = self.apps.read().await;
        apps.get(app)
            .and_then(|instances| instances.iter().find(|i| i.instance_id == instance_id))
            .cloned()
            .ok_or_else(|| instance_not_found(app, instance_id))
    }

    /// Looks an instance up by id across all applications.
    pub async fn instance(&self, instance_id: &str) -> Result<Instance, RegistryError> {
        let apps = self.apps.read().await;
        apps.values()
            .flatten()
            .find(|i| i.instance_id == instance_id)
            .cloned()
            .ok_or_else(|| instance_not_found("*", instance_id))
    }

    pub async fn snapshot(&self) -> Vec<Application> {
        let apps = self.apps.read().await;
        apps.iter()
            .map(|(name, instances)| Application {
                name: name.clone(),
                instances: instances.clone(),
            })
            .collect()
    }

    async fn update<F>(&self, app: &str, instance_id: &str, f: F) -> Result<(), RegistryError>
    where
        F: FnOnce(&mut Instance),
    {
        let mut apps = self.apps.write().await;
        let instance = apps
            .get_mut(app)
            .and_then(|instances| instances.iter_mut().find(|i| i.instance_id == instance_id))
            .ok_or_else(|| instance_not_found(app, instance_id))?;
        f(instance);
        Ok(())
    }
}

fn instance_not_found(app: &str, instance_id: &str) -> RegistryError {
    RegistryError::InstanceNotFound {
        app: app.to_string(),
        instance_id: instance_id.to_string(),
    }
}

#[async_trait]
impl Registry for InMemoryRegistry {
    async fn apps(&self) -> anyhow::Result<Vec<Application>> {
        Ok(self.snapshot().await)
    }
}

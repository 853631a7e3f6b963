// SPDX-License-Identifier: GPL-3.0-only

use std::collections::HashMap;
use std::sync::Arc;

use stone_volumes::VolumeManager;
use zbus::{fdo, interface};

use crate::error::Result;

/// Volume driver interface
///
/// Every call blocks on filesystem work and quota tools, so each one runs on
/// the blocking pool.
pub struct VolumeDriver {
    manager: Arc<VolumeManager>,
    version: String,
}

impl VolumeDriver {
    pub fn new(manager: Arc<VolumeManager>) -> Self {
        Self {
            manager,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    async fn blocking<T, F>(&self, call: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&VolumeManager) -> Result<T> + Send + 'static,
    {
        let manager = self.manager.clone();
        tokio::task::spawn_blocking(move || call(&manager)).await?
    }

    async fn get_json(&self, name: String) -> Result<String> {
        self.blocking(move |manager| Ok(serde_json::to_string(&manager.get(&name)?)?))
            .await
    }

    async fn list_json(&self) -> Result<String> {
        self.blocking(|manager| Ok(serde_json::to_string(&manager.list())?))
            .await
    }
}

#[interface(name = "org.stone.Volumes1")]
impl VolumeDriver {
    #[zbus(property)]
    async fn version(&self) -> &str {
        &self.version
    }

    /// Create a volume. Options: diskId, fsType, mediaType, size, ioClass, exclusive.
    async fn create(&self, name: String, options: HashMap<String, String>) -> fdo::Result<()> {
        tracing::info!("Create {} {:?}", name, options);
        self.blocking(move |manager| {
            manager.create(&name, &options)?;
            Ok(())
        })
        .await
        .map_err(Into::into)
    }

    async fn remove(&self, name: String) -> fdo::Result<()> {
        tracing::info!("Remove {}", name);
        self.blocking(move |manager| Ok(manager.remove(&name)?))
            .await
            .map_err(Into::into)
    }

    /// Remove a volume whose directory may already be gone.
    async fn force_remove(&self, name: String) -> fdo::Result<()> {
        tracing::info!("Remove {} (forced)", name);
        self.blocking(move |manager| Ok(manager.remove_with(&name, true)?))
            .await
            .map_err(Into::into)
    }

    /// Take a mount reference; returns the directory to serve.
    async fn mount(&self, name: String) -> fdo::Result<String> {
        self.blocking(move |manager| Ok(manager.mount(&name)?.to_string_lossy().to_string()))
            .await
            .map_err(Into::into)
    }

    async fn unmount(&self, name: String) -> fdo::Result<()> {
        self.blocking(move |manager| Ok(manager.unmount(&name)?))
            .await
            .map_err(Into::into)
    }

    async fn path(&self, name: String) -> fdo::Result<String> {
        self.blocking(move |manager| Ok(manager.path(&name)?.to_string_lossy().to_string()))
            .await
            .map_err(Into::into)
    }

    /// `{"Name": ..., "Mountpoint": ...}`
    async fn get(&self, name: String) -> fdo::Result<String> {
        self.get_json(name).await.map_err(Into::into)
    }

    /// JSON array of every volume, in name order.
    async fn list(&self) -> fdo::Result<String> {
        self.list_json().await.map_err(Into::into)
    }
}

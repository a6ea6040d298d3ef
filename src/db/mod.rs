use crate::config::DatabaseConfig;
use crate::error::Error;
use anyhow::Result;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

pub mod memory;
pub mod migrations;
pub mod models;
pub mod repositories;
pub mod store;

pub use memory::MemoryConfigurationStore;
pub use repositories::PgConfigurationStore;
pub use store::ConfigurationStore;

/// Connection pool for the `camera_configs` and `tripwires` tables
pub struct CameraDatabase {
    pool: Arc<PgPool>,
}

impl CameraDatabase {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.url)
            .await
            .map_err(|e| Error::Database(format!("camera store unreachable: {}", e)))?;
        info!(
            "Camera store pool open ({} connection(s) max)",
            config.max_connections
        );

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Create any missing camera and tripwire tables
    pub async fn ensure_schema(&self) -> Result<()> {
        migrations::apply(&self.pool)
            .await
            .map_err(|e| Error::Database(format!("camera schema setup: {}", e)))?;
        info!("Camera schema is current");
        Ok(())
    }

    pub async fn is_reachable(&self) -> bool {
        if let Err(e) = sqlx::query("SELECT 1").execute(&*self.pool).await {
            error!("Camera store did not answer: {}", e);
            return false;
        }
        true
    }

    pub fn store(&self) -> PgConfigurationStore {
        PgConfigurationStore::new(self.pool.clone())
    }
}

/// Pick the store named by the configuration: PostgreSQL when a URL is set,
/// otherwise the in-memory store.
pub async fn open_store(config: &DatabaseConfig) -> Result<Arc<dyn ConfigurationStore>> {
    if config.url.trim().is_empty() {
        info!("No database URL configured, using in-memory configuration store");
        return Ok(Arc::new(MemoryConfigurationStore::new()));
    }

    let database = CameraDatabase::connect(config).await?;
    if !database.is_reachable().await {
        return Err(Error::Database("camera store did not answer".to_string()).into());
    }
    if config.auto_migrate {
        database.ensure_schema().await?;
    }
    Ok(Arc::new(database.store()))
}

use anyhow::Result;
use sqlx::{Executor, PgPool};
use tracing::debug;

/// Schema migrations, applied in order. Every statement is idempotent so the
/// set can run on each start.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_camera_configs",
        r#"
        CREATE TABLE IF NOT EXISTS camera_configs (
            id SERIAL PRIMARY KEY,
            camera_id INTEGER NOT NULL UNIQUE,
            source TEXT UNIQUE,
            name TEXT,
            camera_type TEXT NOT NULL DEFAULT 'entry',
            resolution_width INTEGER NOT NULL DEFAULT 1920,
            resolution_height INTEGER NOT NULL DEFAULT 1080,
            fps INTEGER NOT NULL DEFAULT 30,
            gpu_id INTEGER NOT NULL DEFAULT 0,
            is_active BOOLEAN NOT NULL DEFAULT FALSE,
            status TEXT NOT NULL DEFAULT 'active',
            location TEXT,
            location_description TEXT,
            ip_address TEXT,
            stream_url TEXT,
            username TEXT,
            password TEXT,
            manufacturer TEXT,
            model TEXT,
            firmware_version TEXT,
            onvif_supported BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "002_tripwires",
        r#"
        CREATE TABLE IF NOT EXISTS tripwires (
            id SERIAL PRIMARY KEY,
            camera_id INTEGER NOT NULL REFERENCES camera_configs (camera_id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            position DOUBLE PRECISION NOT NULL,
            spacing DOUBLE PRECISION NOT NULL DEFAULT 0.01,
            direction TEXT NOT NULL,
            detection_type TEXT NOT NULL DEFAULT 'entry',
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "003_indexes",
        r#"
        CREATE INDEX IF NOT EXISTS idx_camera_configs_active ON camera_configs (is_active);
        CREATE INDEX IF NOT EXISTS idx_tripwires_camera_id ON tripwires (camera_id);
        "#,
    ),
];

pub async fn apply(pool: &PgPool) -> Result<()> {
    for (name, sql) in MIGRATIONS {
        pool.execute(*sql).await?;
        debug!("Schema step {} applied", name);
    }

    Ok(())
}

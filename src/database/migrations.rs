use crate::error::Result;
use sqlx::{Executor, PgPool};
use tracing::info;

/// Run all pending migrations in version order
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    create_migrations_table(pool).await?;

    for (version, name, sql) in get_migrations() {
        if is_migration_applied(pool, version).await? {
            continue;
        }

        info!(version = version, name = name, "Applying migration");

        // A bare &str without binds runs over the simple query protocol,
        // which accepts several statements at once.
        pool.execute(sql).await?;
        record_migration(pool, version, name).await?;

        info!(version = version, name = name, "Migration applied successfully");
    }

    Ok(())
}

async fn create_migrations_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn is_migration_applied(pool: &PgPool, version: i32) -> Result<bool> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM schema_migrations WHERE version = $1",
    )
    .bind(version)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

async fn record_migration(pool: &PgPool, version: i32, name: &str) -> Result<()> {
    sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
        .bind(version)
        .bind(name)
        .execute(pool)
        .await?;

    Ok(())
}

fn get_migrations() -> Vec<(i32, &'static str, &'static str)> {
    vec![
        (1, "proxies_table", MIGRATION_001_PROXIES),
        (2, "candidate_index", MIGRATION_002_CANDIDATE_INDEX),
    ]
}

// Migration 1: proxy pool table
const MIGRATION_001_PROXIES: &str = r#"
CREATE TABLE IF NOT EXISTS proxies (
    id SERIAL PRIMARY KEY,
    host VARCHAR(255) NOT NULL,
    port INTEGER NOT NULL CHECK (port BETWEEN 1 AND 65535),
    username VARCHAR(255),
    password VARCHAR(255),
    protocol VARCHAR(20) NOT NULL DEFAULT 'http',
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    last_checked TIMESTAMPTZ,
    response_time INTEGER NOT NULL DEFAULT 0 CHECK (response_time >= 0),
    fail_count INTEGER NOT NULL DEFAULT 0 CHECK (fail_count >= 0),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT unique_proxy_host_port UNIQUE (host, port)
);

CREATE INDEX IF NOT EXISTS idx_proxies_created_at ON proxies(created_at DESC);
"#;

// Migration 2: index backing the candidate query
const MIGRATION_002_CANDIDATE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_proxies_candidates
    ON proxies(is_active, fail_count, response_time);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_strictly_ordered() {
        let versions: Vec<i32> = get_migrations().iter().map(|(v, _, _)| *v).collect();
        let mut sorted = versions.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(versions, sorted);
    }

    #[test]
    fn test_schema_enforces_unique_address() {
        assert!(MIGRATION_001_PROXIES.contains("UNIQUE (host, port)"));
    }
}

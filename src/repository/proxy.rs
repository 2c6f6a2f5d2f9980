use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::{debug, info};

use super::{HealthOutcome, ProxyStore};
use crate::error::{Result, RotatorError};
use crate::models::{NewProxy, Proxy, ProxyProtocol, ProxyStats, MAX_FAIL_COUNT};

const PROXY_COLUMNS: &str = r#"
    id, host, port, username, password, protocol, is_active,
    last_checked, response_time, fail_count, created_at, updated_at
"#;

/// Row shape of the `proxies` table
#[derive(Debug, FromRow)]
struct ProxyRow {
    id: i32,
    host: String,
    port: i32,
    username: Option<String>,
    password: Option<String>,
    protocol: String,
    is_active: bool,
    last_checked: Option<DateTime<Utc>>,
    response_time: i32,
    fail_count: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProxyRow> for Proxy {
    type Error = RotatorError;

    fn try_from(row: ProxyRow) -> Result<Self> {
        let protocol = ProxyProtocol::from_str(&row.protocol).ok_or_else(|| {
            RotatorError::Internal(format!(
                "proxy {} has unknown protocol {}",
                row.id, row.protocol
            ))
        })?;
        let port = u16::try_from(row.port).map_err(|_| {
            RotatorError::Internal(format!("proxy {} has invalid port {}", row.id, row.port))
        })?;

        Ok(Proxy {
            id: row.id,
            host: row.host,
            port,
            username: row.username,
            password: row.password,
            protocol,
            is_active: row.is_active,
            last_checked: row.last_checked,
            response_time: row.response_time.max(0) as u32,
            fail_count: row.fail_count.max(0) as u32,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_proxies(rows: Vec<ProxyRow>) -> Result<Vec<Proxy>> {
    rows.into_iter().map(Proxy::try_from).collect()
}

/// Postgres-backed pool store
#[derive(Clone)]
pub struct ProxyRepository {
    pool: PgPool,
}

impl ProxyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProxyStore for ProxyRepository {
    async fn insert(&self, proxy: &NewProxy) -> Result<Proxy> {
        let result = sqlx::query_as::<_, ProxyRow>(&format!(
            r#"
            INSERT INTO proxies (host, port, username, password, protocol, is_active)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            PROXY_COLUMNS
        ))
        .bind(&proxy.host)
        .bind(proxy.port as i32)
        .bind(&proxy.username)
        .bind(&proxy.password)
        .bind(proxy.protocol.as_str())
        .bind(proxy.is_active)
        .fetch_one(&self.pool)
        .await;

        let row = match result {
            Ok(row) => row,
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(RotatorError::DuplicateKey {
                    host: proxy.host.clone(),
                    port: proxy.port,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let created = Proxy::try_from(row)?;
        info!(id = created.id, address = %created.address(), "Created proxy");
        Ok(created)
    }

    async fn list_candidates(&self) -> Result<Vec<Proxy>> {
        let rows = sqlx::query_as::<_, ProxyRow>(&format!(
            r#"
            SELECT {}
            FROM proxies
            WHERE is_active = TRUE AND fail_count < $1
            ORDER BY response_time ASC, fail_count ASC
            "#,
            PROXY_COLUMNS
        ))
        .bind(MAX_FAIL_COUNT as i32)
        .fetch_all(&self.pool)
        .await?;

        into_proxies(rows)
    }

    async fn list_all(&self) -> Result<Vec<Proxy>> {
        let rows = sqlx::query_as::<_, ProxyRow>(&format!(
            "SELECT {} FROM proxies ORDER BY created_at DESC, id DESC",
            PROXY_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        into_proxies(rows)
    }

    async fn update_health(&self, id: i32, outcome: HealthOutcome) -> Result<()> {
        // Single-statement updates: Postgres row locks serialize concurrent
        // reports for the same id without touching other rows.
        let result = match outcome {
            HealthOutcome::Success { response_time_ms } => {
                sqlx::query(
                    r#"
                    UPDATE proxies
                    SET fail_count = 0,
                        response_time = $2,
                        last_checked = NOW(),
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(i32::try_from(response_time_ms).unwrap_or(i32::MAX))
                .execute(&self.pool)
                .await?
            }
            HealthOutcome::Failure => {
                sqlx::query(
                    r#"
                    UPDATE proxies
                    SET fail_count = fail_count + 1,
                        is_active = CASE
                            WHEN fail_count + 1 >= $2 THEN FALSE
                            ELSE is_active
                        END,
                        last_checked = NOW(),
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(MAX_FAIL_COUNT as i32)
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            debug!(id = id, "Health update for missing proxy ignored");
        }

        Ok(())
    }

    async fn delete(&self, id: i32) -> Result<()> {
        let result = sqlx::query("DELETE FROM proxies WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RotatorError::ProxyNotFound { id });
        }

        info!(id = id, "Deleted proxy");
        Ok(())
    }

    async fn clear_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM proxies")
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected();
        info!(count = removed, "Cleared proxy pool");
        Ok(removed)
    }

    async fn stats(&self) -> Result<ProxyStats> {
        let (total, active, healthy, failed): (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COUNT(*) FILTER (WHERE is_active),
                COUNT(*) FILTER (WHERE is_active AND fail_count < $1 AND response_time < $2),
                COUNT(*) FILTER (WHERE NOT is_active OR fail_count >= $1)
            FROM proxies
            "#,
        )
        .bind(MAX_FAIL_COUNT as i32)
        .bind(crate::models::HEALTHY_RESPONSE_TIME_MS as i32)
        .fetch_one(&self.pool)
        .await?;

        Ok(ProxyStats {
            total_proxies: total,
            active_proxies: active,
            healthy_proxies: healthy,
            failed_proxies: failed,
        })
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

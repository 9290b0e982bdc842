//! PostgreSQL route store implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

use crate::config::DatabaseConfig;
use crate::error::{RouteError, RouteResult};
use crate::types::{
    Certificate, CertificateId, InstanceId, RouteData, RouteId, RouteRecord, RouteState,
};

use super::RouteStore;

/// PostgreSQL-backed route store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to PostgreSQL and create a new store.
    ///
    /// The required tables are created if they don't exist.
    pub async fn new(url: &str) -> RouteResult<Self> {
        Self::connect(&DatabaseConfig {
            url: url.to_owned(),
            ..DatabaseConfig::default()
        })
        .await
    }

    /// Connect using pool settings from configuration.
    pub async fn connect(config: &DatabaseConfig) -> RouteResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;

        Ok(store)
    }

    /// Create a store from an existing connection pool.
    pub async fn from_pool(pool: PgPool) -> RouteResult<Self> {
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Ensure the required tables and indexes exist.
    async fn ensure_schema(&self) -> RouteResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS routes (
                id TEXT PRIMARY KEY,
                instance_id TEXT NOT NULL UNIQUE,
                state TEXT NOT NULL,
                domain_external TEXT NOT NULL,
                domain_internal TEXT,
                dist_id TEXT,
                origin TEXT NOT NULL,
                path TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                deleted_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_routes_state
            ON routes (state)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS certificates (
                id TEXT PRIMARY KEY,
                route_id TEXT NOT NULL UNIQUE REFERENCES routes(id) ON DELETE CASCADE,
                domain TEXT NOT NULL,
                cert_url TEXT NOT NULL,
                certificate BYTEA NOT NULL,
                expires TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_certificates_expires
            ON certificates (expires)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Parse a joined row into a RouteRecord.
    fn row_to_record(row: &sqlx::postgres::PgRow) -> RouteResult<RouteRecord> {
        let id: String = row.get("id");
        let instance_id: String = row.get("instance_id");
        let state_str: String = row.get("state");
        let domain_external: String = row.get("domain_external");
        let domain_internal: Option<String> = row.get("domain_internal");
        let dist_id: Option<String> = row.get("dist_id");
        let origin: String = row.get("origin");
        let path: String = row.get("path");
        let created_at: DateTime<Utc> = row.get("created_at");
        let updated_at: DateTime<Utc> = row.get("updated_at");
        let deleted_at: Option<DateTime<Utc>> = row.get("deleted_at");

        let cert_id: Option<String> = row.get("cert_id");
        let certificate = match cert_id {
            Some(cert_id) => {
                let domain: String = row.get("cert_domain");
                let cert_url: String = row.get("cert_url");
                let pem: Vec<u8> = row.get("cert_pem");
                let expires: DateTime<Utc> = row.get("cert_expires");
                let cert_created_at: DateTime<Utc> = row.get("cert_created_at");
                let cert_updated_at: DateTime<Utc> = row.get("cert_updated_at");

                Some(Certificate {
                    id: CertificateId::new(cert_id),
                    route_id: RouteId::new(id.clone()),
                    domain,
                    cert_url,
                    certificate: pem,
                    expires,
                    created_at: cert_created_at,
                    updated_at: cert_updated_at,
                })
            }
            None => None,
        };

        let state: RouteState = state_str.parse().map_err(|e| {
            RouteError::internal(format!("failed to parse state '{state_str}': {e}"))
        })?;

        Ok(RouteRecord {
            data: RouteData {
                id: RouteId::new(id),
                instance_id: InstanceId::new(instance_id),
                domain_external,
                domain_internal,
                dist_id,
                origin,
                path,
                certificate,
                created_at,
                updated_at,
                deleted_at,
            },
            state,
        })
    }

    async fn upsert_route(&self, record: &RouteRecord) -> RouteResult<()> {
        sqlx::query(
            r#"
            INSERT INTO routes (
                id, instance_id, state, domain_external, domain_internal,
                dist_id, origin, path, created_at, updated_at, deleted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                state = EXCLUDED.state,
                domain_external = EXCLUDED.domain_external,
                domain_internal = EXCLUDED.domain_internal,
                dist_id = EXCLUDED.dist_id,
                origin = EXCLUDED.origin,
                path = EXCLUDED.path,
                updated_at = EXCLUDED.updated_at,
                deleted_at = EXCLUDED.deleted_at
            "#,
        )
        .bind(record.data.id.as_str())
        .bind(record.data.instance_id.as_str())
        .bind(record.state.as_str())
        .bind(&record.data.domain_external)
        .bind(&record.data.domain_internal)
        .bind(&record.data.dist_id)
        .bind(&record.data.origin)
        .bind(&record.data.path)
        .bind(record.data.created_at)
        .bind(record.data.updated_at)
        .bind(record.data.deleted_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_certificate(&self, certificate: &Certificate) -> RouteResult<()> {
        sqlx::query(
            r#"
            INSERT INTO certificates (
                id, route_id, domain, cert_url, certificate,
                expires, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (route_id) DO UPDATE SET
                domain = EXCLUDED.domain,
                cert_url = EXCLUDED.cert_url,
                certificate = EXCLUDED.certificate,
                expires = EXCLUDED.expires,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(certificate.id.as_str())
        .bind(certificate.route_id.as_str())
        .bind(&certificate.domain)
        .bind(&certificate.cert_url)
        .bind(&certificate.certificate)
        .bind(certificate.expires)
        .bind(certificate.created_at)
        .bind(certificate.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

const SELECT_ROUTE: &str = r#"
    SELECT r.id, r.instance_id, r.state, r.domain_external, r.domain_internal,
           r.dist_id, r.origin, r.path, r.created_at, r.updated_at, r.deleted_at,
           c.id AS cert_id, c.domain AS cert_domain, c.cert_url,
           c.certificate AS cert_pem, c.expires AS cert_expires,
           c.created_at AS cert_created_at, c.updated_at AS cert_updated_at
"#;

#[async_trait]
impl RouteStore for PostgresStore {
    async fn insert(&self, record: &RouteRecord) -> RouteResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO routes (
                id, instance_id, state, domain_external, domain_internal,
                dist_id, origin, path, created_at, updated_at, deleted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(record.data.id.as_str())
        .bind(record.data.instance_id.as_str())
        .bind(record.state.as_str())
        .bind(&record.data.domain_external)
        .bind(&record.data.domain_internal)
        .bind(&record.data.dist_id)
        .bind(&record.data.origin)
        .bind(&record.data.path)
        .bind(record.data.created_at)
        .bind(record.data.updated_at)
        .bind(record.data.deleted_at)
        .execute(&self.pool)
        .await;

        if let Err(err) = result {
            if let sqlx::Error::Database(ref db) = err {
                if db.constraint() == Some("routes_instance_id_key") {
                    return Err(RouteError::InstanceAlreadyExists(
                        record.data.instance_id.to_string(),
                    ));
                }
            }
            return Err(err.into());
        }

        if let Some(certificate) = &record.data.certificate {
            self.upsert_certificate(certificate).await?;
        }

        Ok(())
    }

    async fn save(&self, record: &RouteRecord) -> RouteResult<()> {
        self.upsert_route(record).await?;

        if let Some(certificate) = &record.data.certificate {
            self.upsert_certificate(certificate).await?;
        }

        Ok(())
    }

    async fn find_by_instance(&self, instance_id: &InstanceId) -> RouteResult<RouteRecord> {
        let query = format!(
            r#"
            {SELECT_ROUTE}
            FROM routes r
            LEFT JOIN certificates c ON c.route_id = r.id
            WHERE r.instance_id = $1
            "#
        );

        let row = sqlx::query(&query)
            .bind(instance_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Self::row_to_record(&r),
            None => Err(RouteError::InstanceDoesNotExist(instance_id.to_string())),
        }
    }

    async fn save_certificate(&self, certificate: &Certificate) -> RouteResult<()> {
        self.upsert_certificate(certificate).await
    }

    async fn renewable(&self, threshold: DateTime<Utc>) -> RouteResult<Vec<RouteRecord>> {
        let query = format!(
            r#"
            {SELECT_ROUTE}
            FROM routes r
            INNER JOIN certificates c ON c.route_id = r.id
            WHERE r.state = $1 AND c.expires < $2
            ORDER BY c.expires ASC
            "#
        );

        let rows = sqlx::query(&query)
            .bind(RouteState::Provisioned.as_str())
            .bind(threshold)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_record).collect()
    }
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore").finish_non_exhaustive()
    }
}

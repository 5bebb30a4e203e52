//! Connection setup, schema sync, and the deadline wrapper every store
//! operation runs under.

use std::future::Future;
use std::time::Duration;

use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema,
};
use tracing::{Instrument, Span};

use crate::config::DatabaseConfig;
use crate::entities::{comment, post, user};
use crate::error::{BlogError, Result};

/// Shared handle to the database plus the per-operation deadline.
#[derive(Clone, Debug)]
pub struct Storage {
    conn: DatabaseConnection,
    query_timeout: Duration,
}

impl Storage {
    pub fn new(conn: DatabaseConnection, query_timeout: Duration) -> Self {
        Self { conn, query_timeout }
    }

    /// Open the pool described by `config`.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let mut opts = ConnectOptions::new(config.url.clone());
        opts.max_connections(config.max_connections)
            .connect_timeout(config.connect_timeout)
            .acquire_timeout(config.connect_timeout)
            .sqlx_logging(false);

        let conn = Database::connect(opts).await?;
        tracing::info!(max_connections = config.max_connections, "database connected");
        Ok(Self::new(conn, config.query_timeout))
    }

    pub fn conn(&self) -> &DatabaseConnection {
        &self.conn
    }

    /// Run `op` inside `span` and fail with `StorageUnavailable` if it does not
    /// finish before the deadline. Dropping an open transaction rolls it back.
    pub async fn bounded<T, F>(&self, span: &Span, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.query_timeout, fut.instrument(span.clone())).await {
            Ok(result) => {
                if let Err(err) = &result {
                    span.in_scope(|| {
                        if err.is_retryable() {
                            tracing::warn!(op, error = %err, "storage operation failed, retryable");
                        } else {
                            tracing::debug!(op, error = %err, "operation rejected");
                        }
                    });
                }
                result
            }
            Err(_) => {
                span.in_scope(|| {
                    tracing::warn!(op, timeout = ?self.query_timeout, "storage deadline exceeded")
                });
                Err(BlogError::StorageUnavailable(format!(
                    "{op} did not complete within {:?}",
                    self.query_timeout
                )))
            }
        }
    }
}

/// Create the `user`, `post` and `comment` tables if they are missing.
/// Order matters: later tables reference earlier ones.
pub async fn sync_schema(storage: &Storage) -> Result<()> {
    let conn = storage.conn();
    create_table(conn, user::Entity).await?;
    create_table(conn, post::Entity).await?;
    create_table(conn, comment::Entity).await?;
    tracing::info!("schema in sync");
    Ok(())
}

async fn create_table<E: EntityTrait>(conn: &DatabaseConnection, entity: E) -> Result<()> {
    let backend = conn.get_database_backend();
    let schema = Schema::new(backend);
    let mut stmt = schema.create_table_from_entity(entity);
    stmt.if_not_exists();
    conn.execute(backend.build(&stmt)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stalled(timeout: Duration) -> Storage {
        Storage::new(DatabaseConnection::Disconnected, timeout)
    }

    #[tokio::test]
    async fn deadline_expiry_is_retryable_unavailability() {
        let storage = stalled(Duration::from_millis(10));
        let err = storage
            .bounded(&Span::none(), "stall", std::future::pending::<Result<()>>())
            .await
            .unwrap_err();

        assert!(matches!(&err, BlogError::StorageUnavailable(msg) if msg.starts_with("stall")));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn finished_work_beats_a_zero_deadline() {
        let storage = stalled(Duration::ZERO);
        let value = storage
            .bounded(&Span::none(), "ready", async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);

        let err = storage
            .bounded(&Span::none(), "rejected", async {
                Err::<(), _>(BlogError::NotFound("post".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BlogError::NotFound(_)));
        assert!(!err.is_retryable());
    }
}

//! services/desk/src/adapters/db.rs
//!
//! This module contains the Postgres document store, the concrete implementation
//! of the `DocumentStore` port from the `core` crate. Documents are JSONB rows
//! keyed by path; a trigger publishes every change on a notification channel
//! that subscriptions listen to.

use async_trait::async_trait;
use loan_desk_core::document::{into_object, merge_fields, union_into_list};
use loan_desk_core::ports::{
    CollectionPath, CollectionSnapshot, DocumentPath, DocumentSnapshot, DocumentStore, OrderBy,
    PortError, PortResult, SnapshotStream, StoredDocument, WriteMode,
};
use serde_json::Value;
use sqlx::postgres::PgListener;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::debug;

/// Notification channel written by the `documents_notify` trigger.
const CHANGES_CHANNEL: &str = "document_changes";

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A document store adapter that implements the `DocumentStore` port over Postgres.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    /// Creates a new `PgDocumentStore`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    async fn read(&self, path: &DocumentPath) -> PortResult<Option<Value>> {
        let data = sqlx::query_scalar::<_, Json<Value>>("SELECT data FROM documents WHERE path = $1")
            .bind(path.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(data.map(|Json(value)| value))
    }

    async fn read_collection(&self, path: &CollectionPath, order: &OrderBy) -> PortResult<CollectionSnapshot> {
        let sql = if order.descending {
            "SELECT path, data FROM documents WHERE collection = $1 ORDER BY data->>$2 DESC NULLS LAST, path"
        } else {
            "SELECT path, data FROM documents WHERE collection = $1 ORDER BY data->>$2 ASC NULLS LAST, path"
        };
        let records = sqlx::query_as::<_, DocumentRecord>(sql)
            .bind(path.as_str())
            .bind(&order.field)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(CollectionSnapshot {
            documents: records.into_iter().map(DocumentRecord::to_domain).collect(),
        })
    }

    async fn listen(&self) -> PortResult<PgListener> {
        let mut listener = PgListener::connect_with(&self.pool).await.map_err(unexpected)?;
        listener.listen(CHANGES_CHANNEL).await.map_err(unexpected)?;
        Ok(listener)
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct DocumentRecord {
    path: String,
    data: Json<Value>,
}
impl DocumentRecord {
    fn to_domain(self) -> StoredDocument {
        let id = self.path.rsplit('/').next().unwrap_or_default().to_string();
        StoredDocument { id, data: self.data.0 }
    }
}

//=========================================================================================
// `DocumentStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get(&self, path: &DocumentPath) -> PortResult<Option<Value>> {
        self.read(path).await
    }

    async fn set(&self, path: &DocumentPath, data: Value, mode: WriteMode) -> PortResult<()> {
        let data = into_object(data)?;
        let sql = match mode {
            WriteMode::Replace => {
                "INSERT INTO documents (path, collection, data) VALUES ($1, $2, $3) \
                 ON CONFLICT (path) DO UPDATE SET data = EXCLUDED.data, updated_at = now()"
            }
            WriteMode::Merge => {
                "INSERT INTO documents (path, collection, data) VALUES ($1, $2, $3) \
                 ON CONFLICT (path) DO UPDATE SET data = documents.data || EXCLUDED.data, updated_at = now()"
            }
        };
        sqlx::query(sql)
            .bind(path.as_str())
            .bind(path.collection())
            .bind(Json(Value::Object(data)))
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn append_to_list(
        &self,
        path: &DocumentPath,
        field: &str,
        items: Vec<Value>,
        fields: Value,
    ) -> PortResult<()> {
        let patch = into_object(fields)?;
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        // Make sure the row exists so that it can be locked.
        sqlx::query(
            "INSERT INTO documents (path, collection) VALUES ($1, $2) ON CONFLICT (path) DO NOTHING",
        )
        .bind(path.as_str())
        .bind(path.collection())
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        let Json(current) =
            sqlx::query_scalar::<_, Json<Value>>("SELECT data FROM documents WHERE path = $1 FOR UPDATE")
                .bind(path.as_str())
                .fetch_one(&mut *tx)
                .await
                .map_err(unexpected)?;

        let mut document = into_object(current)?;
        merge_fields(&mut document, patch);
        union_into_list(&mut document, field, items);

        sqlx::query("UPDATE documents SET data = $2, updated_at = now() WHERE path = $1")
            .bind(path.as_str())
            .bind(Json(Value::Object(document)))
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        tx.commit().await.map_err(unexpected)?;
        Ok(())
    }

    async fn subscribe(&self, path: &DocumentPath) -> PortResult<SnapshotStream<DocumentSnapshot>> {
        // Listen before the first read so no change can slip in between.
        let mut listener = self.listen().await?;
        let store = self.clone();
        let path = path.clone();

        let stream = async_stream::stream! {
            match store.read(&path).await {
                Ok(data) => { yield Ok(DocumentSnapshot { path: path.clone(), data }); }
                Err(e) => { yield Err(e); return; }
            }
            loop {
                match listener.recv().await {
                    Ok(notification) if notification.payload() == path.as_str() => {
                        yield store
                            .read(&path)
                            .await
                            .map(|data| DocumentSnapshot { path: path.clone(), data });
                    }
                    Ok(_) => {}
                    Err(e) => {
                        yield Err(unexpected(e));
                        return;
                    }
                }
            }
        };
        debug!("Subscribed to a document");
        Ok(Box::pin(stream))
    }

    async fn subscribe_collection(
        &self,
        path: &CollectionPath,
        order: OrderBy,
    ) -> PortResult<SnapshotStream<CollectionSnapshot>> {
        let mut listener = self.listen().await?;
        let store = self.clone();
        let path = path.clone();

        let stream = async_stream::stream! {
            match store.read_collection(&path, &order).await {
                Ok(snapshot) => { yield Ok(snapshot); }
                Err(e) => { yield Err(e); return; }
            }
            loop {
                match listener.recv().await {
                    Ok(notification) if path.contains(notification.payload()) => {
                        yield store.read_collection(&path, &order).await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        yield Err(unexpected(e));
                        return;
                    }
                }
            }
        };
        debug!("Subscribed to a collection");
        Ok(Box::pin(stream))
    }
}

use std::ops::Deref;
use std::sync::Arc;

use futures::Stream;
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Notification, Surreal,
};

use super::types::StoredObject;
use crate::error::AppError;

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

pub trait ProvidesDb {
    fn db(&self) -> &Arc<SurrealDbClient>;
}

impl SurrealDbClient {
    /// Connect, sign in and select namespace/database.
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;
        db.signin(Root { username, password }).await?;
        db.use_ns(namespace).use_db(database).await?;
        Ok(SurrealDbClient { client: db })
    }

    /// Build runtime indexes for the content/operation/memory-record tables
    /// (spec §3, §4.6). Idempotent; safe to call on every startup.
    pub async fn ensure_initialized(&self, embedding_dimension: usize) -> Result<(), AppError> {
        super::indexes::ensure_runtime_indexes(self, embedding_dimension).await
    }

    pub async fn drop_table<T>(&self) -> Result<Vec<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client.delete(T::table_name()).await
    }

    /// Store an object, requires the struct to implement `StoredObject`.
    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    /// Insert-or-replace by id, preserving no prior fields (used by the write engine's
    /// `upsert` step semantics, spec §4.5).
    pub async fn upsert_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .upsert((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    pub async fn get_all_stored_items<T>(&self) -> Result<Vec<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select(T::table_name()).await
    }

    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }

    pub async fn delete_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.delete((T::table_name(), id)).await
    }

    /// Listen to a table for live updates, requires the struct to implement `StoredObject`.
    pub async fn listen<T>(
        &self,
    ) -> Result<impl Stream<Item = Result<Notification<T>, Error>>, Error>
    where
        T: for<'de> StoredObject + std::marker::Unpin,
    {
        self.client.select(T::table_name()).live().await
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;
        db.use_ns(namespace).use_db(database).await?;
        Ok(SurrealDbClient { client: db })
    }
}

#[cfg(test)]
mod tests {
    use crate::stored_object;

    use super::*;
    use uuid::Uuid;

    stored_object!(Dummy, "dummy", {
        name: String
    });

    #[tokio::test]
    async fn test_crud_roundtrip() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("failed to start in-memory surrealdb");

        let dummy = Dummy {
            id: "abc".to_string(),
            name: "first".to_string(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };

        let stored = db.store_item(dummy.clone()).await.expect("store");
        assert!(stored.is_some());

        let fetched = db.get_item::<Dummy>(&dummy.id).await.expect("fetch");
        assert_eq!(fetched, Some(dummy.clone()));

        let all = db.get_all_stored_items::<Dummy>().await.expect("fetch all");
        assert!(all.contains(&dummy));

        let deleted = db.delete_item::<Dummy>(&dummy.id).await.expect("delete");
        assert_eq!(deleted, Some(dummy));

        let fetch_post = db.get_item::<Dummy>("abc").await.expect("fetch post delete");
        assert!(fetch_post.is_none());
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database).await.expect("in-memory db");

        let first = Dummy {
            id: "x".into(),
            name: "A".into(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        db.store_item(first).await.expect("store");

        let second = Dummy {
            id: "x".into(),
            name: "B".into(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        db.upsert_item(second).await.expect("upsert");

        let fetched = db.get_item::<Dummy>("x").await.expect("fetch").expect("present");
        assert_eq!(fetched.name, "B");
    }
}

//! Thin async façade over the synchronous `shard_storage::Engine`, fronting
//! it with the `EngineApi` boundary for callers that want to drive the
//! engine from async code.
//!
//! Kept deliberately thin: construction and dispatch only. All CRUD and
//! transaction logic lives in `shard-storage`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use shard_common::{EngineApi, EngineMetadata, Pk, StorageError, TxId};
use shard_storage::{Engine, EngineOptions};

/// Async façade around a synchronous `Engine`. Every call runs on the
/// blocking thread pool (`tokio::task::spawn_blocking`), since the engine
/// holds no async state and never yields mid-operation.
pub struct ShardFacade {
    engine: Arc<Engine>,
}

impl ShardFacade {
    pub fn open(path: &Path, opts: EngineOptions) -> Result<Self, StorageError> {
        Ok(Self { engine: Arc::new(Engine::open(path, &opts)?) })
    }

    async fn spawn<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Engine) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        match tokio::task::spawn_blocking(move || f(&engine)).await {
            Ok(result) => result,
            Err(join_err) => Err(StorageError::Usage(format!("engine task panicked: {join_err}"))),
        }
    }
}

#[async_trait]
impl EngineApi for ShardFacade {
    async fn begin_tx(&self) -> Result<TxId, StorageError> {
        self.spawn(|engine| Ok(engine.begin_tx())).await
    }

    async fn commit(&self, tx: TxId) -> Result<(), StorageError> {
        self.spawn(move |engine| engine.commit(tx)).await
    }

    async fn rollback(&self, tx: TxId) -> Result<(), StorageError> {
        self.spawn(move |engine| engine.rollback(tx)).await
    }

    async fn insert(&self, bytes: Vec<u8>, tx: Option<TxId>) -> Result<Pk, StorageError> {
        self.spawn(move |engine| engine.insert(bytes, tx)).await
    }

    async fn insert_batch(
        &self,
        items: Vec<Vec<u8>>,
        tx: Option<TxId>,
    ) -> Result<Vec<Pk>, StorageError> {
        self.spawn(move |engine| engine.insert_batch(items, tx)).await
    }

    async fn update(&self, pk: Pk, bytes: Vec<u8>, tx: Option<TxId>) -> Result<(), StorageError> {
        self.spawn(move |engine| engine.update(pk, bytes, tx)).await
    }

    async fn delete(&self, pk: Pk, tx: Option<TxId>) -> Result<(), StorageError> {
        self.spawn(move |engine| engine.delete(pk, tx)).await
    }

    async fn select(&self, pk: Pk, tx: Option<TxId>) -> Result<Option<Vec<u8>>, StorageError> {
        self.spawn(move |engine| engine.select(pk, tx)).await
    }

    async fn select_many(
        &self,
        pks: Vec<Pk>,
        tx: Option<TxId>,
    ) -> Result<Vec<Option<Vec<u8>>>, StorageError> {
        self.spawn(move |engine| engine.select_many(pks, tx)).await
    }

    async fn metadata(&self, tx: Option<TxId>) -> Result<EngineMetadata, StorageError> {
        self.spawn(move |engine| engine.metadata(tx)).await
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.spawn(|engine| engine.close()).await
    }
}

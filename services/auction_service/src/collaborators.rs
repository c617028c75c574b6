//! Trait seams for the external services the engine consults.
//!
//! The engine only ever *reads* from these collaborators: a ban-status check
//! before admitting a bid, and a one-time product snapshot when an auction
//! is created.  Both are I/O-bound in production (user service, catalog
//! service), so callers resolve them *before* entering the per-auction
//! critical section and accept slightly stale answers.
//!
//! In-memory implementations are provided for tests and local development.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use veiling_common::{ProductId, UserId};

use crate::error::{EngineError, Result};

/// Opaque product snapshot, fetched once at auction creation and never
/// re-fetched while the auction runs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub product_id: ProductId,
    pub title: String,
    pub image_url: Option<String>,
    pub categories: Vec<String>,
}

/// Ban-status lookup, backed by the user service in production.
#[async_trait]
pub trait BanRegistry: Send + Sync + 'static {
    async fn is_banned(&self, user: UserId) -> Result<bool>;
}

/// Product snapshot lookup, backed by the catalog service in production.
#[async_trait]
pub trait ProductCatalog: Send + Sync + 'static {
    async fn snapshot(&self, product: ProductId) -> Result<ProductSnapshot>;
}

/// In-memory ban list.
#[derive(Clone, Default)]
pub struct MemoryBanRegistry {
    banned: Arc<RwLock<HashMap<UserId, ()>>>,
}

impl MemoryBanRegistry {
    pub async fn ban(&self, user: UserId) {
        self.banned.write().await.insert(user, ());
    }

    pub async fn unban(&self, user: UserId) {
        self.banned.write().await.remove(&user);
    }
}

#[async_trait]
impl BanRegistry for MemoryBanRegistry {
    async fn is_banned(&self, user: UserId) -> Result<bool> {
        Ok(self.banned.read().await.contains_key(&user))
    }
}

/// In-memory catalog.
#[derive(Clone, Default)]
pub struct MemoryCatalog {
    products: Arc<RwLock<HashMap<ProductId, ProductSnapshot>>>,
}

impl MemoryCatalog {
    pub async fn put(&self, snapshot: ProductSnapshot) {
        self.products
            .write()
            .await
            .insert(snapshot.product_id, snapshot);
    }
}

#[async_trait]
impl ProductCatalog for MemoryCatalog {
    async fn snapshot(&self, product: ProductId) -> Result<ProductSnapshot> {
        self.products
            .read()
            .await
            .get(&product)
            .cloned()
            .ok_or_else(|| EngineError::Storage(format!("product {product} not in catalog")))
    }
}

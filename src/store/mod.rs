//! Storage port trait (§4.B) — core logic depends only on [`StoreAdapter`],
//! never on sqlx directly.

pub mod models;
pub mod mysql;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::StoreError;
use models::{FlowInfo, MdInfo, Plate};

pub type Result<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait StoreAdapter: Send + Sync {
    async fn load_plates(&self) -> Result<Vec<Plate>>;
    async fn load_meta(&self) -> Result<Vec<MdInfo>>;
    async fn load_flows(&self) -> Result<Vec<FlowInfo>>;

    /// Applies `updates` (`md_id`, new `current_value`) as one atomic batch.
    /// Any per-row failure rolls back the whole batch.
    async fn update_meta_values(&self, updates: &[(i64, i32)]) -> Result<()>;
}

pub use mysql::MysqlStore;
pub use sqlite::SqliteStore;

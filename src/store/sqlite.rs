//! Sqlite-backed [`StoreAdapter`] (§4.B).

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use super::models::{FlowInfo, MdInfo, Plate};
use super::{Result, StoreAdapter};
use crate::error::StoreError;

pub struct SqliteStore {
    pool: SqlitePool,
}

const PLATE_COLUMNS: &str = "pk_id, plate_type_id, plate_parent_id, station_name, \
     ip_addr, ip_port, login_name, login_password, hard_addr";

const MD_COLUMNS_CURRENT: &str = "pk_id, plate_type_id, plate_control_id, plate_id, \
     plate_hard_addr, tport, init_value, current_value, kind_id, current_value_str, \
     name, unit, min_value, max_value";

const MD_COLUMNS_CUR: &str = "pk_id, plate_type_id, plate_control_id, plate_id, \
     plate_hard_addr, tport, init_value, current_value, kind_id, curValue_str AS current_value_str, \
     name, unit, min_value, max_value";

impl SqliteStore {
    pub async fn connect(path: &str) -> Result<Self> {
        let url = format!("sqlite://{path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self { pool })
    }

    /// `current_value_str` may be stored under either name (§4.B); try the
    /// canonical column first and fall back to the `curValue_str` spelling
    /// on any failure (the "no such column" error surfaces at prepare time
    /// as `sqlx::Error::Database`, not `ColumnNotFound`).
    async fn load_meta_rows(&self) -> Result<Vec<MdInfo>> {
        let query = format!("SELECT {MD_COLUMNS_CURRENT} FROM ne_md_info");
        match sqlx::query_as::<_, MdInfo>(&query)
            .fetch_all(&self.pool)
            .await
        {
            Ok(rows) => Ok(rows),
            Err(primary_err) => {
                let fallback = format!("SELECT {MD_COLUMNS_CUR} FROM ne_md_info");
                match sqlx::query_as::<_, MdInfo>(&fallback)
                    .fetch_all(&self.pool)
                    .await
                {
                    Ok(rows) => Ok(rows),
                    Err(_) => Err(primary_err.into()),
                }
            }
        }
    }
}

#[async_trait]
impl StoreAdapter for SqliteStore {
    async fn load_plates(&self) -> Result<Vec<Plate>> {
        let query = format!("SELECT {PLATE_COLUMNS} FROM ne_plate_type");
        Ok(sqlx::query_as::<_, Plate>(&query)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn load_meta(&self) -> Result<Vec<MdInfo>> {
        self.load_meta_rows().await
    }

    async fn load_flows(&self) -> Result<Vec<FlowInfo>> {
        Ok(
            sqlx::query_as::<_, FlowInfo>("SELECT pk_id, name, flow_type FROM ne_flow_info")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    async fn update_meta_values(&self, updates: &[(i64, i32)]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Transaction(e.to_string()))?;
        for (md_id, value) in updates {
            sqlx::query("UPDATE ne_md_info SET current_value = ? WHERE pk_id = ?")
                .bind(value)
                .bind(md_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Transaction(e.to_string()))?;
        }
        tx.commit()
            .await
            .map_err(|e| StoreError::Transaction(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded_store() -> SqliteStore {
        let store = SqliteStore::connect(":memory:").await.unwrap();
        sqlx::query(
            "CREATE TABLE ne_md_info (
                pk_id INTEGER PRIMARY KEY, plate_type_id INTEGER, plate_control_id INTEGER,
                plate_id INTEGER, plate_hard_addr INTEGER, tport INTEGER, init_value INTEGER,
                current_value INTEGER, kind_id INTEGER, current_value_str TEXT,
                name TEXT, unit TEXT, min_value INTEGER, max_value INTEGER
            )",
        )
        .execute(&store.pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO ne_md_info
             (pk_id, plate_type_id, plate_control_id, plate_id, plate_hard_addr, tport,
              init_value, current_value, kind_id)
             VALUES (42, 3, 7, 0, 2, 5, 0, 0, 1)",
        )
        .execute(&store.pool)
        .await
        .unwrap();
        store
    }

    #[tokio::test]
    async fn update_meta_values_commits_atomically() {
        let store = seeded_store().await;
        store.update_meta_values(&[(42, 1)]).await.unwrap();
        let rows = store.load_meta().await.unwrap();
        assert_eq!(rows[0].current_value, 1);
    }

    #[tokio::test]
    async fn empty_update_is_a_no_op() {
        let store = seeded_store().await;
        store.update_meta_values(&[]).await.unwrap();
        let rows = store.load_meta().await.unwrap();
        assert_eq!(rows[0].current_value, 0);
    }

    #[tokio::test]
    async fn unknown_pk_id_leaves_other_rows_untouched() {
        let store = seeded_store().await;
        store.update_meta_values(&[(42, 9), (9999, 1)]).await.unwrap();
        let rows = store.load_meta().await.unwrap();
        assert_eq!(rows[0].current_value, 9);
    }
}

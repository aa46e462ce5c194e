//! MySQL-backed [`StoreAdapter`] (§4.B). Shares every SQL statement with
//! [`super::sqlite::SqliteStore`] modulo placeholder dialect.

use async_trait::async_trait;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::MySqlPool;

use super::models::{FlowInfo, MdInfo, Plate};
use super::{Result, StoreAdapter};
use crate::config::DatabaseConfig;
use crate::error::StoreError;

pub struct MysqlStore {
    pool: MySqlPool,
}

const PLATE_COLUMNS: &str = "pk_id, plate_type_id, plate_parent_id, station_name, \
     ip_addr, ip_port, login_name, login_password, hard_addr";

const MD_COLUMNS_CURRENT: &str = "pk_id, plate_type_id, plate_control_id, plate_id, \
     plate_hard_addr, tport, init_value, current_value, kind_id, current_value_str, \
     name, unit, min_value, max_value";

const MD_COLUMNS_CUR: &str = "pk_id, plate_type_id, plate_control_id, plate_id, \
     plate_hard_addr, tport, init_value, current_value, kind_id, curValue_str AS current_value_str, \
     name, unit, min_value, max_value";

impl MysqlStore {
    pub async fn connect(cfg: &DatabaseConfig) -> Result<Self> {
        let url = format!(
            "mysql://{}:{}@{}:{}/{}",
            cfg.mysql_user, cfg.mysql_password, cfg.mysql_host, cfg.mysql_port, cfg.mysql_database
        );
        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self { pool })
    }

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
impl StoreAdapter for MysqlStore {
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

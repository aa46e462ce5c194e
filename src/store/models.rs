//! Row types for the three persistent tables (§3, §6).

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Plate {
    pub pk_id: i64,
    pub plate_type_id: i32,
    pub plate_parent_id: i64,
    pub station_name: String,
    pub ip_addr: String,
    pub ip_port: i32,
    pub login_name: String,
    pub login_password: String,
    pub hard_addr: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct MdInfo {
    pub pk_id: i64,
    pub plate_type_id: i32,
    pub plate_control_id: i64,
    pub plate_id: i64,
    pub plate_hard_addr: i32,
    pub tport: i32,
    pub init_value: i32,
    pub current_value: i32,
    pub kind_id: i32,
    pub current_value_str: Option<String>,
    pub name: Option<String>,
    pub unit: Option<String>,
    pub min_value: Option<i32>,
    pub max_value: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct FlowInfo {
    pub pk_id: i64,
    pub name: String,
    pub flow_type: i32,
}

/// Builders used by tests to avoid repeating the full struct literal for
/// every row fixture (§4.M).
#[cfg(test)]
pub mod fixtures {
    use super::*;

    pub fn plate(pk_id: i64, plate_type_id: i32) -> Plate {
        Plate {
            pk_id,
            plate_type_id,
            plate_parent_id: 0,
            station_name: format!("station-{pk_id}"),
            ip_addr: String::new(),
            ip_port: 0,
            login_name: String::new(),
            login_password: String::new(),
            hard_addr: 0,
        }
    }

    pub fn md(pk_id: i64, plate_type_id: i32) -> MdInfo {
        MdInfo {
            pk_id,
            plate_type_id,
            plate_control_id: 0,
            plate_id: 0,
            plate_hard_addr: 0,
            tport: 0,
            init_value: 0,
            current_value: 0,
            kind_id: 1,
            current_value_str: None,
            name: None,
            unit: None,
            min_value: None,
            max_value: None,
        }
    }
}

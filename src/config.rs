//! Configuration loading (§4.I, §6). INI parsing itself is thin glue —
//! the real contract is the set of sections/keys below, mirrored one-to-one
//! into [`Config`].

use std::path::Path;

use crate::error::CoreError;

#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseKind {
    Sqlite,
    Mysql,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub kind: DatabaseKind,
    /// sqlite path, relative to the working directory.
    pub path: String,
    pub mysql_host: String,
    pub mysql_port: u16,
    pub mysql_user: String,
    pub mysql_password: String,
    pub mysql_database: String,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub path: String,
    pub console_output: bool,
}

#[derive(Debug, Clone)]
pub struct IpConfig {
    pub nec_ip: String,
    pub nec_port: u16,
    pub nem_ip: String,
    pub nem_port: u16,
    pub ned_ip: String,
    pub ned_port: u16,
    pub qi_ip: String,
    pub qi_port: u16,
    pub nenet_ip: String,
    pub nenet_ex_ip: String,
    pub nenet_nec_port: u16,
    pub interface_port: u16,
}

impl Default for IpConfig {
    fn default() -> Self {
        Self {
            nec_ip: String::new(),
            nec_port: 0,
            nem_ip: String::new(),
            nem_port: 0,
            ned_ip: String::new(),
            ned_port: 0,
            qi_ip: String::new(),
            qi_port: 0,
            nenet_ip: "127.0.0.1".into(),
            nenet_ex_ip: "127.0.0.1".into(),
            nenet_nec_port: 6001,
            interface_port: 7000,
        }
    }
}

/// `HardIO`, `JFPlate`, and `QJCustom` are consumed by collaborators outside
/// this core (the CAN driver and the QJ custom-port mapper); the core only
/// carries their raw key/value pairs through unparsed.
#[derive(Debug, Clone, Default)]
pub struct PassthroughSection {
    pub entries: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub log: LogConfig,
    pub ip: IpConfig,
    pub hardio: PassthroughSection,
    pub jfplate: PassthroughSection,
    pub qjcustom: PassthroughSection,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let ini = ini::Ini::load_from_file(path.as_ref())
            .map_err(|e| CoreError::Config(format!("failed to read {:?}: {e}", path.as_ref())))?;

        let database_section = ini.section(Some("DATABASE"));
        let database_type = database_section
            .and_then(|s| s.get("Type"))
            .ok_or_else(|| CoreError::Config("missing [DATABASE] Type".into()))?;

        let kind = match database_type {
            "sqlite" | "1" => DatabaseKind::Sqlite,
            "mysql" | "2" => DatabaseKind::Mysql,
            other => {
                return Err(CoreError::Config(format!(
                    "unknown database type: {other}"
                )))
            }
        };

        let path = database_section
            .and_then(|s| s.get("Path"))
            .unwrap_or("nenet.db")
            .to_string();

        let mysql_section = ini.section(Some("MYSQL"));
        let mysql_host = mysql_section
            .and_then(|s| s.get("Host"))
            .unwrap_or("")
            .to_string();
        let mysql_port = mysql_section
            .and_then(|s| s.get("Port"))
            .and_then(|v| v.parse().ok())
            .unwrap_or(3306);
        let mysql_user = mysql_section
            .and_then(|s| s.get("User"))
            .unwrap_or("")
            .to_string();
        let mysql_password = mysql_section
            .and_then(|s| s.get("Password"))
            .unwrap_or("")
            .to_string();
        let mysql_database = mysql_section
            .and_then(|s| s.get("Database"))
            .unwrap_or("")
            .to_string();

        let log_section = ini.section(Some("LOG"));
        let log = LogConfig {
            level: log_section
                .and_then(|s| s.get("Level"))
                .unwrap_or("info")
                .to_string(),
            path: log_section
                .and_then(|s| s.get("Path"))
                .unwrap_or("nenet.log")
                .to_string(),
            console_output: log_section
                .and_then(|s| s.get("ConsoleOutput"))
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
        };

        let ip_section = ini.section(Some("IP"));
        let get = |key: &str| -> String {
            ip_section
                .and_then(|s| s.get(key))
                .unwrap_or("")
                .to_string()
        };
        let get_port = |key: &str, default: u16| -> u16 {
            ip_section
                .and_then(|s| s.get(key))
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        };

        let defaults = IpConfig::default();
        let ip = IpConfig {
            nec_ip: get("NEC_IP"),
            nec_port: get_port("NEC_Port", 0),
            nem_ip: get("NEM_IP"),
            nem_port: get_port("NEM_Port", 0),
            ned_ip: get("NED_IP"),
            ned_port: get_port("NED_Port", 0),
            qi_ip: get("QI_IP"),
            qi_port: get_port("QI_Port", 0),
            nenet_ip: {
                let v = get("NENet_IP");
                if v.is_empty() {
                    defaults.nenet_ip
                } else {
                    v
                }
            },
            nenet_ex_ip: {
                let v = get("NENetEx_IP");
                if v.is_empty() {
                    defaults.nenet_ex_ip
                } else {
                    v
                }
            },
            nenet_nec_port: get_port("NENet_NEC_Port", defaults.nenet_nec_port),
            interface_port: get_port("Interface_Port", defaults.interface_port),
        };

        let passthrough = |name: &str| -> PassthroughSection {
            match ini.section(Some(name)) {
                Some(section) => PassthroughSection {
                    entries: section
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                },
                None => PassthroughSection::default(),
            }
        };

        Ok(Config {
            database: DatabaseConfig {
                kind,
                path,
                mysql_host,
                mysql_port,
                mysql_user,
                mysql_password,
                mysql_database,
            },
            log,
            ip,
            hardio: passthrough("HardIO"),
            jfplate: passthrough("JFPlate"),
            qjcustom: passthrough("QJCustom"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_ini(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_sqlite_config_with_defaults() {
        let file = write_ini(
            "[DATABASE]\nType=sqlite\nPath=nenet.db\n\n[IP]\nNEC_IP=10.0.0.1\nNEC_Port=9000\n",
        );
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.database.kind, DatabaseKind::Sqlite);
        assert_eq!(config.ip.nec_ip, "10.0.0.1");
        assert_eq!(config.ip.nenet_nec_port, 6001);
        assert_eq!(config.ip.interface_port, 7000);
    }

    #[test]
    fn unknown_database_type_is_fatal() {
        let file = write_ini("[DATABASE]\nType=oracle\n");
        let err = Config::load(file.path()).unwrap_err();
        assert!(err.fatal());
    }

    #[test]
    fn missing_database_type_is_fatal() {
        let file = write_ini("[IP]\nNEC_IP=10.0.0.1\n");
        let err = Config::load(file.path()).unwrap_err();
        assert!(err.fatal());
    }
}

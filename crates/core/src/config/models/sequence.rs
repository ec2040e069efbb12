use serde::{Deserialize, Serialize};

use crate::errors::{TaskqError, TaskqResult};
use crate::models::SequenceDriver;

/// 序列存储默认过期时间（秒），仅对带 TTL 的后端生效
pub const DEFAULT_STORE_EXPIRE_SECONDS: u64 = 3600;

/// 序列存储配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SequenceConfig {
    /// 驱动名称，必须在注册表的驱动白名单中
    pub driver: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub table: Option<String>,
    /// Redis 键命名空间
    pub name_space: Option<String>,
    /// 键值存储的键前缀
    pub prefix: Option<String>,
    /// 是否记录调试轨迹
    pub debug: bool,
    pub store_expire_seconds: u64,
    /// 完整连接 URL，设置后覆盖 host/port/user/password/database
    pub url: Option<String>,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            driver: String::new(),
            host: None,
            port: None,
            user: None,
            password: None,
            database: None,
            table: None,
            name_space: None,
            prefix: None,
            debug: false,
            store_expire_seconds: DEFAULT_STORE_EXPIRE_SECONDS,
            url: None,
        }
    }
}

impl SequenceConfig {
    /// 按驱动检查必填字段
    pub fn validate_for(&self, driver: SequenceDriver) -> TaskqResult<()> {
        let required: Vec<(&str, &Option<String>)> = match driver {
            SequenceDriver::PdoMysql | SequenceDriver::Mysqli => vec![
                ("host", &self.host),
                ("user", &self.user),
                ("password", &self.password),
                ("database", &self.database),
                ("table", &self.table),
            ],
            SequenceDriver::Sqlite => vec![("database", &self.database), ("table", &self.table)],
            SequenceDriver::Redis | SequenceDriver::KeyValue => vec![("host", &self.host)],
            SequenceDriver::Memory => vec![],
        };

        // URL 覆盖时只需要表名
        let url_override = self.url.as_deref().is_some_and(|url| !url.is_empty());
        for (name, value) in required {
            if url_override && name != "table" {
                continue;
            }
            if value.as_deref().map_or(true, str::is_empty) {
                return Err(TaskqError::configuration(format!(
                    "Sequence config for driver '{}' requires '{}'",
                    driver, name
                )));
            }
        }

        if let Some(table) = &self.table {
            if !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(TaskqError::configuration(format!(
                    "Invalid sequence table name '{table}'"
                )));
            }
        }

        if driver.is_redis() && self.store_expire_seconds == 0 {
            return Err(TaskqError::configuration(
                "store_expire_seconds must be greater than 0",
            ));
        }

        Ok(())
    }

    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or("taskq_sequence")
    }

    /// 按驱动构建连接 URL
    pub fn connection_url(&self, driver: SequenceDriver) -> String {
        if let Some(url) = self.url.as_deref().filter(|url| !url.is_empty()) {
            return url.to_string();
        }

        let host = self.host.as_deref().unwrap_or("127.0.0.1");
        match driver {
            SequenceDriver::PdoMysql | SequenceDriver::Mysqli => format!(
                "mysql://{}:{}@{}:{}/{}",
                self.user.as_deref().unwrap_or_default(),
                self.password.as_deref().unwrap_or_default(),
                host,
                self.port.unwrap_or(3306),
                self.database.as_deref().unwrap_or_default()
            ),
            SequenceDriver::Sqlite => format!(
                "sqlite://{}?mode=rwc",
                self.database.as_deref().unwrap_or_default()
            ),
            SequenceDriver::Redis | SequenceDriver::KeyValue => {
                let auth = match self.password.as_deref().filter(|p| !p.is_empty()) {
                    Some(password) => format!(":{password}@"),
                    None => String::new(),
                };
                let database = self
                    .database
                    .as_deref()
                    .and_then(|db| db.parse::<i64>().ok())
                    .unwrap_or(0);
                format!(
                    "redis://{}{}:{}/{}",
                    auth,
                    host,
                    self.port.unwrap_or(6379),
                    database
                )
            }
            SequenceDriver::Memory => "memory://".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mysql_config() -> SequenceConfig {
        SequenceConfig {
            driver: "PDOMysql".into(),
            host: Some("db.local".into()),
            user: Some("queue".into()),
            password: Some("pw".into()),
            database: Some("jobs".into()),
            table: Some("sequence".into()),
            ..SequenceConfig::default()
        }
    }

    #[test]
    fn test_mysql_requires_credentials() {
        let config = mysql_config();
        assert!(config.validate_for(SequenceDriver::PdoMysql).is_ok());
        assert_eq!(
            config.connection_url(SequenceDriver::PdoMysql),
            "mysql://queue:pw@db.local:3306/jobs"
        );

        let missing_user = SequenceConfig {
            user: None,
            ..mysql_config()
        };
        let err = missing_user
            .validate_for(SequenceDriver::Mysqli)
            .unwrap_err();
        assert!(err.to_string().contains("'user'"));
    }

    #[test]
    fn test_url_override_skips_credentials() {
        let config = SequenceConfig {
            driver: "Sqlite".into(),
            url: Some("sqlite::memory:".into()),
            table: Some("seq".into()),
            ..SequenceConfig::default()
        };
        assert!(config.validate_for(SequenceDriver::Sqlite).is_ok());
        assert_eq!(config.connection_url(SequenceDriver::Sqlite), "sqlite::memory:");
    }

    #[test]
    fn test_rejects_unsafe_table_name() {
        let config = SequenceConfig {
            table: Some("jobs; DROP TABLE users".into()),
            ..mysql_config()
        };
        assert!(config.validate_for(SequenceDriver::PdoMysql).is_err());
    }

    #[test]
    fn test_redis_url() {
        let config = SequenceConfig {
            driver: "Redis".into(),
            host: Some("cache".into()),
            database: Some("3".into()),
            ..SequenceConfig::default()
        };
        assert!(config.validate_for(SequenceDriver::Redis).is_ok());
        assert_eq!(
            config.connection_url(SequenceDriver::Redis),
            "redis://cache:6379/3"
        );
    }
}

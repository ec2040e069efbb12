use std::fmt;
use std::str::FromStr;

use crate::errors::NotAllowed;

/// 序列存储驱动（封闭列表）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SequenceDriver {
    /// MySQL 关系型存储
    PdoMysql,
    /// MySQL 关系型存储（与 PdoMysql 共用同一实现）
    Mysqli,
    /// 嵌入式 SQLite 关系型存储
    Sqlite,
    /// Redis 哈希 + 列表存储
    Redis,
    /// 键值 + TTL 存储
    KeyValue,
    /// 进程内存储，用于嵌入式部署和测试
    Memory,
}

impl SequenceDriver {
    pub const ALL: [SequenceDriver; 6] = [
        SequenceDriver::PdoMysql,
        SequenceDriver::Mysqli,
        SequenceDriver::Sqlite,
        SequenceDriver::Redis,
        SequenceDriver::KeyValue,
        SequenceDriver::Memory,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SequenceDriver::PdoMysql => "PDOMysql",
            SequenceDriver::Mysqli => "Mysqli",
            SequenceDriver::Sqlite => "Sqlite",
            SequenceDriver::Redis => "Redis",
            SequenceDriver::KeyValue => "KeyValue",
            SequenceDriver::Memory => "Memory",
        }
    }

    /// 是否为 MySQL 系驱动
    pub fn is_mysql(self) -> bool {
        matches!(self, SequenceDriver::PdoMysql | SequenceDriver::Mysqli)
    }

    /// 是否基于 Redis 服务
    pub fn is_redis(self) -> bool {
        matches!(self, SequenceDriver::Redis | SequenceDriver::KeyValue)
    }
}

impl fmt::Display for SequenceDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SequenceDriver {
    type Err = NotAllowed;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SequenceDriver::ALL
            .into_iter()
            .find(|driver| driver.as_str() == s)
            .ok_or_else(|| NotAllowed::Driver(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_names_round_trip() {
        for driver in SequenceDriver::ALL {
            assert_eq!(driver.as_str().parse::<SequenceDriver>(), Ok(driver));
        }
        assert_eq!(
            "Memcached".parse::<SequenceDriver>(),
            Err(NotAllowed::Driver("Memcached".to_string()))
        );
    }
}

use serde::{Deserialize, Serialize};

/// 默认客户端超时（毫秒），作用于存活探测和前台调用
pub const DEFAULT_CLIENT_TIMEOUT_MS: u64 = 2000;

/// 消息代理实现类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BrokerKind {
    /// 进程内代理
    #[default]
    Memory,
    /// 基于 Redis 列表的代理
    Redis,
}

/// 代理服务端地址
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4730,
        }
    }
}

impl std::fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// 消息代理配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    pub kind: BrokerKind,
    pub servers: Vec<ServerAddress>,
    pub client_timeout_ms: u64,
    /// 队列键前缀（Redis 代理）
    pub queue_prefix: String,
    /// Redis 数据库索引（Redis 代理）
    pub database: i64,
    pub password: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            kind: BrokerKind::Memory,
            servers: vec![ServerAddress::default()],
            client_timeout_ms: DEFAULT_CLIENT_TIMEOUT_MS,
            queue_prefix: "taskq:".to_string(),
            database: 0,
            password: None,
        }
    }
}

impl BrokerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.servers.is_empty() {
            return Err(anyhow::anyhow!("代理服务端列表不能为空"));
        }

        for server in &self.servers {
            if server.host.is_empty() {
                return Err(anyhow::anyhow!("代理主机地址不能为空"));
            }
            if server.port == 0 {
                return Err(anyhow::anyhow!("代理端口必须大于0"));
            }
        }

        if self.client_timeout_ms == 0 {
            return Err(anyhow::anyhow!("客户端超时时间必须大于0"));
        }

        if self.database < 0 {
            return Err(anyhow::anyhow!("Redis数据库索引不能为负数"));
        }

        Ok(())
    }

    /// 服务端列表的字符串形式：`host:port,host:port`
    pub fn servers_string(&self) -> String {
        self.servers
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// 构建指定服务端的 Redis 连接 URL
    pub fn build_url(&self, server: &ServerAddress) -> String {
        let auth = if let Some(password) = &self.password {
            format!(":{password}@")
        } else {
            String::new()
        };
        format!(
            "redis://{}{}:{}/{}",
            auth, server.host, server.port, self.database
        )
    }
}

//! Redis 连接辅助

use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError, RedisResult};
use taskq_core::{TaskqError, TaskqResult};
use tracing::{debug, error};

/// 建立连接并通过 PING 验证可用性
pub async fn open_connection(url: &str, timeout: Duration) -> TaskqResult<MultiplexedConnection> {
    let client = Client::open(url)
        .map_err(|e| TaskqError::configuration(format!("Failed to create Redis client: {e}")))?;

    let mut conn = tokio::time::timeout(timeout, client.get_multiplexed_async_connection())
        .await
        .map_err(|_| {
            TaskqError::Connection(format!(
                "Timed out after {}ms connecting to Redis at {}",
                timeout.as_millis(),
                redact_url(url)
            ))
        })?
        .map_err(|e| {
            TaskqError::Connection(format!(
                "Failed to connect to Redis at {}: {e}",
                redact_url(url)
            ))
        })?;

    test_connection(&mut conn).await?;
    debug!("Successfully connected to Redis at {}", redact_url(url));
    Ok(conn)
}

pub async fn test_connection(conn: &mut MultiplexedConnection) -> TaskqResult<()> {
    let result: RedisResult<String> = redis::cmd("PING").query_async(conn).await;
    match result {
        Ok(response) if response == "PONG" => Ok(()),
        Ok(response) => {
            let error_msg = format!("Unexpected PING response: {response}");
            error!("{}", error_msg);
            Err(TaskqError::Connection(error_msg))
        }
        Err(e) => {
            let error_msg = format!("Redis PING failed: {e}");
            error!("{}", error_msg);
            Err(TaskqError::Connection(error_msg))
        }
    }
}

/// 用 SCAN 游标遍历匹配的键
pub async fn scan_keys(conn: &mut MultiplexedConnection, pattern: &str) -> RedisResult<Vec<String>> {
    let mut keys = Vec::new();
    let mut cursor: u64 = 0;
    loop {
        let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(200)
            .query_async(conn)
            .await?;
        keys.extend(batch);
        if next == 0 {
            break;
        }
        cursor = next;
    }
    keys.sort();
    keys.dedup();
    Ok(keys)
}

fn is_connection_failure(e: &RedisError) -> bool {
    e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout()
}

/// 序列存储场景下的错误映射
pub fn sequence_error(e: RedisError) -> TaskqError {
    if is_connection_failure(&e) {
        TaskqError::Connection(format!("Redis connection failed: {e}"))
    } else {
        TaskqError::sequence(format!("Redis command failed: {e}"))
    }
}

/// 代理场景下的错误映射
pub fn broker_error(e: RedisError) -> TaskqError {
    if is_connection_failure(&e) {
        TaskqError::ServerDown(format!("Redis broker is not reachable: {e}"))
    } else {
        TaskqError::broker(format!("Redis command failed: {e}"))
    }
}

/// 隐藏 URL 中的密码
pub fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &url[..scheme_end], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}

use std::time::Duration;

use async_trait::async_trait;
use sqlx::any::{install_default_drivers, AnyRow};
use sqlx::{AnyConnection, Connection, Row};
use taskq_core::config::SequenceConfig;
use taskq_core::models::sequence_record::{format_sequence_date, sequence_timestamp};
use taskq_core::models::{NewSequenceRecord, SequenceDriver, SequenceRecord};
use taskq_core::{TaskqError, TaskqResult};
use tracing::{debug, instrument};

use super::{DebugTrace, SequenceStore};
use crate::redis_support::redact_url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// 关系型序列存储（MySQL / SQLite）
///
/// 使用单个独占连接，首次操作时建立并确保表结构存在。
/// 排序依赖优先级编码（High=1 < Normal=2 < Low=3），`ORDER BY priority ASC, id ASC`
/// 即优先级从高到低、同优先级先进先出。
pub struct SqlSequenceStore {
    driver: SequenceDriver,
    url: String,
    table: String,
    connection: Option<AnyConnection>,
    trace: DebugTrace,
}

impl SqlSequenceStore {
    pub fn new(driver: SequenceDriver, config: &SequenceConfig) -> Self {
        Self {
            driver,
            url: config.connection_url(driver),
            table: config.table_name().to_string(),
            connection: None,
            trace: DebugTrace::new(config.debug),
        }
    }

    fn is_sqlite(&self) -> bool {
        self.driver == SequenceDriver::Sqlite || self.url.starts_with("sqlite:")
    }

    async fn connection(&mut self) -> TaskqResult<&mut AnyConnection> {
        if self.connection.is_none() {
            install_default_drivers();

            let connect = AnyConnection::connect(&self.url);
            let mut conn = tokio::time::timeout(CONNECT_TIMEOUT, connect)
                .await
                .map_err(|_| {
                    TaskqError::Connection(format!(
                        "Connect failed: timed out connecting to {}",
                        redact_url(&self.url)
                    ))
                })?
                .map_err(|e| TaskqError::Connection(format!("Connect failed: {e}")))?;

            for statement in self.schema_statements() {
                let result = sqlx::query(&statement).execute(&mut conn).await;
                self.trace.track(&statement, result)?;
            }
            debug!("Sequence storage connected: {}", redact_url(&self.url));
            self.connection = Some(conn);
        }

        self.connection
            .as_mut()
            .ok_or_else(|| TaskqError::Internal("sequence connection missing".to_string()))
    }

    fn schema_statements(&self) -> Vec<String> {
        let table = &self.table;
        if self.is_sqlite() {
            vec![
                format!(
                    "CREATE TABLE IF NOT EXISTS `{table}` (\
                     `id` INTEGER PRIMARY KEY AUTOINCREMENT, \
                     `task` TEXT NOT NULL, \
                     `params` TEXT NOT NULL, \
                     `priority` INTEGER NOT NULL, \
                     `source` TEXT NOT NULL, \
                     `date` TEXT NOT NULL)"
                ),
                format!(
                    "CREATE INDEX IF NOT EXISTS `idx_{table}_priority_id` ON `{table}` (`priority`, `id`)"
                ),
            ]
        } else {
            vec![format!(
                "CREATE TABLE IF NOT EXISTS `{table}` (\
                 `id` BIGINT NOT NULL AUTO_INCREMENT, \
                 `task` VARCHAR(255) NOT NULL, \
                 `params` LONGTEXT NOT NULL, \
                 `priority` BIGINT NOT NULL, \
                 `source` VARCHAR(255) NOT NULL, \
                 `date` VARCHAR(32) NOT NULL, \
                 PRIMARY KEY (`id`), \
                 KEY `idx_priority_id` (`priority`, `id`)\
                 ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4"
            )]
        }
    }

    fn select_columns(&self) -> String {
        format!(
            "SELECT `id`, `task`, `params`, `priority`, `source`, `date` FROM `{}`",
            self.table
        )
    }

    fn decode_row(row: &AnyRow) -> TaskqResult<SequenceRecord> {
        let params: String = row.try_get("params")?;
        let date: String = row.try_get("date")?;
        SequenceRecord::from_row(
            row.try_get("id")?,
            row.try_get("task")?,
            &params,
            row.try_get("priority")?,
            row.try_get("source")?,
            &date,
        )
    }
}

#[async_trait]
impl SequenceStore for SqlSequenceStore {
    fn driver(&self) -> SequenceDriver {
        self.driver
    }

    #[instrument(skip(self), fields(table = %self.table))]
    async fn count(&mut self) -> TaskqResult<u64> {
        let query = format!("SELECT COUNT(`id`) FROM `{}`", self.table);
        let conn = self.connection().await?;
        let result = sqlx::query_scalar::<_, i64>(&query).fetch_one(conn).await;
        let count = self.trace.track(&query, result)?;
        Ok(count.max(0) as u64)
    }

    #[instrument(skip(self), fields(table = %self.table))]
    async fn fetch_all(&mut self, limit: usize) -> TaskqResult<Vec<SequenceRecord>> {
        let mut query = format!("{} ORDER BY `priority` ASC, `id` ASC", self.select_columns());
        if limit > 0 {
            query.push_str(&format!(" LIMIT {limit}"));
        }

        let conn = self.connection().await?;
        let result = sqlx::query(&query).fetch_all(conn).await;
        let rows = self.trace.track(&query, result)?;
        rows.iter().map(Self::decode_row).collect()
    }

    #[instrument(skip(self), fields(table = %self.table))]
    async fn fetch(&mut self, id: i64) -> TaskqResult<Option<SequenceRecord>> {
        let query = format!("{} WHERE `id` = ? LIMIT 1", self.select_columns());
        let conn = self.connection().await?;
        let result = sqlx::query(&query).bind(id).fetch_optional(conn).await;
        let row = self.trace.track(format!("{query} [id => {id}]"), result)?;
        row.as_ref().map(Self::decode_row).transpose()
    }

    #[instrument(skip(self, record), fields(table = %self.table, task = %record.task))]
    async fn store(&mut self, record: &NewSequenceRecord, id: Option<i64>) -> TaskqResult<i64> {
        record.validate()?;
        let params = record.params_blob()?;
        let date = format_sequence_date(&sequence_timestamp());

        let existing = match id {
            Some(id) => self.fetch(id).await?.map(|record| record.id),
            None => None,
        };

        let table = self.table.clone();
        let conn = self.connection().await?;
        let (query, result) = match existing {
            Some(id) => {
                let query = format!(
                    "UPDATE `{table}` SET `task` = ?, `params` = ?, `priority` = ?, `source` = ?, `date` = ? WHERE `id` = ?"
                );
                let result = sqlx::query(&query)
                    .bind(record.task.clone())
                    .bind(params)
                    .bind(record.priority.code())
                    .bind(record.source.clone())
                    .bind(date)
                    .bind(id)
                    .execute(conn)
                    .await
                    .map(|_| Some(id));
                (query, result)
            }
            None => {
                let query = format!(
                    "INSERT INTO `{table}` (`task`, `params`, `priority`, `source`, `date`) VALUES (?, ?, ?, ?, ?)"
                );
                let result = sqlx::query(&query)
                    .bind(record.task.clone())
                    .bind(params)
                    .bind(record.priority.code())
                    .bind(record.source.clone())
                    .bind(date)
                    .execute(conn)
                    .await
                    .map(|done| done.last_insert_id());
                (query, result)
            }
        };

        match self.trace.track(query, result)? {
            Some(id) => Ok(id),
            None => Err(TaskqError::sequence("Unable store task into storage")),
        }
    }

    #[instrument(skip(self), fields(table = %self.table))]
    async fn remove(&mut self, id: i64) -> TaskqResult<bool> {
        let query = format!("DELETE FROM `{}` WHERE `id` = ?", self.table);
        let conn = self.connection().await?;
        let result = sqlx::query(&query).bind(id).execute(conn).await;
        let done = self.trace.track(format!("{query} [id => {id}]"), result)?;
        Ok(done.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(table = %self.table))]
    async fn remove_all(&mut self) -> TaskqResult<bool> {
        let query = if self.is_sqlite() {
            format!("DELETE FROM `{}`", self.table)
        } else {
            format!("TRUNCATE TABLE `{}`", self.table)
        };
        let conn = self.connection().await?;
        let result = sqlx::query(&query).execute(conn).await;
        self.trace.track(&query, result)?;
        Ok(true)
    }

    fn debug_trace(&self) -> &[String] {
        self.trace.entries()
    }

    async fn close(&mut self) -> TaskqResult<()> {
        if let Some(conn) = self.connection.take() {
            conn.close().await?;
        }
        Ok(())
    }
}

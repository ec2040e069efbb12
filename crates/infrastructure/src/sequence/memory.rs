use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use taskq_core::models::{sequence_timestamp, NewSequenceRecord, SequenceDriver, SequenceRecord};
use taskq_core::TaskqResult;

use super::{DebugTrace, SequenceStore};

#[derive(Debug, Default)]
struct MemoryTable {
    last_id: i64,
    records: BTreeMap<i64, SequenceRecord>,
}

/// 进程内共享的记录表
#[derive(Debug, Default, Clone)]
pub struct MemorySequenceTable {
    inner: Arc<Mutex<MemoryTable>>,
}

impl MemorySequenceTable {
    fn lock(&self) -> MutexGuard<'_, MemoryTable> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// 进程内序列存储
pub struct MemorySequenceStore {
    table: MemorySequenceTable,
    trace: DebugTrace,
}

impl MemorySequenceStore {
    pub fn new(table: MemorySequenceTable, debug: bool) -> Self {
        Self {
            table,
            trace: DebugTrace::new(debug),
        }
    }
}

#[async_trait]
impl SequenceStore for MemorySequenceStore {
    fn driver(&self) -> SequenceDriver {
        SequenceDriver::Memory
    }

    async fn count(&mut self) -> TaskqResult<u64> {
        let count = self.table.lock().records.len() as u64;
        self.trace.record(true, "count");
        Ok(count)
    }

    async fn fetch_all(&mut self, limit: usize) -> TaskqResult<Vec<SequenceRecord>> {
        let mut records: Vec<SequenceRecord> = self.table.lock().records.values().cloned().collect();
        records.sort_by(SequenceRecord::storage_order);
        if limit > 0 {
            records.truncate(limit);
        }
        self.trace.record(true, format!("fetch_all limit={limit}"));
        Ok(records)
    }

    async fn fetch(&mut self, id: i64) -> TaskqResult<Option<SequenceRecord>> {
        let record = self.table.lock().records.get(&id).cloned();
        self.trace.record(true, format!("fetch id={id}"));
        Ok(record)
    }

    async fn store(&mut self, record: &NewSequenceRecord, id: Option<i64>) -> TaskqResult<i64> {
        record.validate()?;
        let mut table = self.table.lock();

        let id = match id {
            Some(id) if table.records.contains_key(&id) => id,
            _ => {
                table.last_id += 1;
                table.last_id
            }
        };
        table
            .records
            .insert(id, SequenceRecord::from_new(id, record, sequence_timestamp()));
        drop(table);

        self.trace.record(true, format!("store id={id}"));
        Ok(id)
    }

    async fn remove(&mut self, id: i64) -> TaskqResult<bool> {
        let removed = self.table.lock().records.remove(&id).is_some();
        self.trace.record(removed, format!("remove id={id}"));
        Ok(removed)
    }

    async fn remove_all(&mut self) -> TaskqResult<bool> {
        self.table.lock().records.clear();
        self.trace.record(true, "remove_all");
        Ok(true)
    }

    fn debug_trace(&self) -> &[String] {
        self.trace.entries()
    }

    async fn close(&mut self) -> TaskqResult<()> {
        Ok(())
    }
}

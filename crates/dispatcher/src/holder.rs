use std::collections::BTreeMap;

use serde_json::Value;
use taskq_core::models::{HolderKey, Priority};
use taskq_core::{TaskqError, TaskqResult};

/// 暂存条目
#[derive(Debug, Clone, PartialEq)]
pub struct HolderEntry {
    pub task: String,
    pub params: Value,
    pub priority: Priority,
}

impl HolderEntry {
    pub fn new(task: impl Into<String>, params: Value, priority: Priority) -> Self {
        Self {
            task: task.into(),
            params,
            priority,
        }
    }
}

/// 分组视图：任务名 -> 优先级 -> 按加入顺序排列的参数
pub type HolderGroups = BTreeMap<String, BTreeMap<Priority, Vec<Value>>>;

/// 会话内的任务暂存器
///
/// 每次调用 `attach` 都新增一个独立条目，相同内容不会去重。
/// 条目只存在于进程内存中，进程崩溃即丢失。
#[derive(Debug, Default)]
pub struct TaskHolder {
    entries: Vec<(HolderKey, HolderEntry)>,
    next_key: u64,
}

impl TaskHolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, entry: HolderEntry) -> TaskqResult<HolderKey> {
        let next = self
            .next_key
            .checked_add(1)
            .ok_or_else(|| TaskqError::Holder("Unable attach object".to_string()))?;
        self.next_key = next;

        let key = HolderKey(next);
        self.entries.push((key, entry));
        Ok(key)
    }

    pub fn contains(&self, key: HolderKey) -> bool {
        self.entries.iter().any(|(k, _)| *k == key)
    }

    pub fn retrieve(&self, key: HolderKey) -> Option<&HolderEntry> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, entry)| entry)
    }

    /// 移除条目，不存在时返回 None
    pub fn detach(&mut self, key: HolderKey) -> Option<HolderEntry> {
        let index = self.entries.iter().position(|(k, _)| *k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn group_by_task_name(&self) -> HolderGroups {
        group(self.entries.iter().map(|(_, entry)| entry.clone()))
    }

    /// 取出全部条目并分组，暂存器随之清空
    pub fn drain_groups(&mut self) -> HolderGroups {
        group(self.entries.drain(..).map(|(_, entry)| entry))
    }
}

fn group(entries: impl Iterator<Item = HolderEntry>) -> HolderGroups {
    let mut groups = HolderGroups::new();
    for entry in entries {
        groups
            .entry(entry.task)
            .or_default()
            .entry(entry.priority)
            .or_default()
            .push(entry.params);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identical_entries_are_kept_apart() {
        let mut holder = TaskHolder::new();
        let first = holder
            .attach(HolderEntry::new("A", json!({"x": 1}), Priority::High))
            .unwrap();
        let second = holder
            .attach(HolderEntry::new("A", json!({"x": 1}), Priority::High))
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(holder.len(), 2);
        assert_eq!(
            holder.group_by_task_name()["A"][&Priority::High],
            vec![json!({"x": 1}), json!({"x": 1})]
        );
    }

    #[test]
    fn test_groups_keep_insertion_order() {
        let mut holder = TaskHolder::new();
        holder.attach(HolderEntry::new("A", json!({"x": 1}), Priority::High)).unwrap();
        holder.attach(HolderEntry::new("B", json!({"y": 1}), Priority::Low)).unwrap();
        holder.attach(HolderEntry::new("A", json!({"x": 2}), Priority::High)).unwrap();
        holder.attach(HolderEntry::new("A", json!({"x": 3}), Priority::Normal)).unwrap();

        let groups = holder.group_by_task_name();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["A"][&Priority::High], vec![json!({"x": 1}), json!({"x": 2})]);
        assert_eq!(groups["A"][&Priority::Normal], vec![json!({"x": 3})]);
        assert_eq!(groups["B"][&Priority::Low], vec![json!({"y": 1})]);
        assert_eq!(holder.len(), 4);
    }

    #[test]
    fn test_drain_empties_holder() {
        let mut holder = TaskHolder::new();
        let key = holder
            .attach(HolderEntry::new("A", json!({"x": 1}), Priority::Normal))
            .unwrap();
        assert!(holder.contains(key));

        let groups = holder.drain_groups();
        assert_eq!(groups["A"][&Priority::Normal].len(), 1);
        assert!(holder.is_empty());
        assert!(holder.drain_groups().is_empty());
        assert!(!holder.contains(key));
    }

    #[test]
    fn test_detach_removes_single_entry() {
        let mut holder = TaskHolder::new();
        let keep = holder
            .attach(HolderEntry::new("A", json!({"x": 1}), Priority::Normal))
            .unwrap();
        let gone = holder
            .attach(HolderEntry::new("A", json!({"x": 2}), Priority::Normal))
            .unwrap();

        assert_eq!(holder.detach(gone).map(|e| e.params), Some(json!({"x": 2})));
        assert!(holder.detach(gone).is_none());
        assert_eq!(holder.retrieve(keep).map(|e| e.task.as_str()), Some("A"));
        assert_eq!(holder.len(), 1);
    }
}

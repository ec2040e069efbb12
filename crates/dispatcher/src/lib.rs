//! 任务分发层
//!
//! 生产者通过 [`Dispatcher`] 提交任务，按存储类型立即投递、写入序列存储
//! 或暂存到会话结束；[`SequenceDrainer`] 把序列存储中的记录回放到代理。

pub mod dispatcher;
pub mod drainer;
pub mod holder;
pub mod observer;

pub use dispatcher::{Dispatcher, HolderErrors};
pub use drainer::{DrainReport, SequenceDrainer};
pub use holder::{HolderEntry, HolderGroups, TaskHolder};
pub use observer::{CallObserver, LoggingObserver};

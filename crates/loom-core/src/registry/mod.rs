//! Task registry and scheduling.
//!
//! - `record`: TaskRecord（1 タスクの状態）
//! - `retry`: ExecutionPolicy / RetryPolicy
//! - `dependency`: 依存グラフ
//! - `scheduler`: 優先度順・依存解決の判定
//! - `store`: TaskRegistry（唯一の状態遷移入口）

pub mod dependency;
pub mod record;
pub mod retry;
pub mod scheduler;
pub mod store;

pub use dependency::DependencyGraph;
pub use record::TaskRecord;
pub use retry::{ExecutionPolicy, RetryPolicy};
pub use scheduler::{Candidate, Readiness};
pub use store::{Admission, Completion, NewTask, TaskCounts, TaskRegistry, wait_outcome};

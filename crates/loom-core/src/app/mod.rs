//! App - アプリケーション層
//!
//! registry・exec・ports を組み合わせて外部 API を提供します。
//!
//! # 主要コンポーネント
//! - **EngineBuilder**: エンジンの構築とワイヤリング
//! - **TaskManager**: タスクの登録・実行・取消・照会
//! - **FlowManager**: 長時間フローの同時実行上限と保持期間
//! - **EventPublisher**: ライフサイクルイベントの非同期配送
//! - **CleanupLoop**: 保持期間切れの定期回収

pub mod builder;
pub mod flows;
pub mod gc_loop;
pub mod manager;
pub mod publisher;
pub mod spec;
pub mod status;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, EngineBuilder};
pub use self::flows::{FlowManager, FlowRequest};
pub use self::gc_loop::CleanupLoop;
pub use self::manager::TaskManager;
pub use self::publisher::EventPublisher;
pub use self::spec::TaskSpec;
pub use self::status::{FlowView, TaskView};

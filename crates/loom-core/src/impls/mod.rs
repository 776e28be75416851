//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **NoopEventSink**: 既定の EventSink（何もしない）
//! - **TracingEventSink**: イベントを tracing ログに流す
//! - **CollectingEventSink**: イベントをメモリに溜める（テスト・デモ用）

pub mod collecting_sink;
pub mod noop_sink;
pub mod tracing_sink;

// 主要な型を再エクスポート
pub use self::collecting_sink::CollectingEventSink;
pub use self::noop_sink::NoopEventSink;
pub use self::tracing_sink::TracingEventSink;

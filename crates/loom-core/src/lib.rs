//! loom-core
//!
//! In-process task execution engine.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, state, outcome, errors, events, decision, flow）
//! - **ports**: 抽象化レイヤー（Clock, IdGenerator, EventSink, FlowRunner）
//! - **registry**: タスクレジストリ・依存グラフ・スケジューリング順序・リトライ方針
//! - **exec**: 3 種類のエグゼキュータ（sequential / pooled / cooperative）と期限管理
//! - **app**: TaskManager / FlowManager / EngineBuilder
//! - **impls**: EventSink 実装（noop / tracing / collecting）
//! - **config**: TOML 設定

pub mod app;
pub mod config;
pub mod domain;
pub mod exec;
pub mod impls;
pub mod ports;
pub mod registry;

pub use app::{EngineBuilder, FlowManager, FlowRequest, TaskManager, TaskSpec};
pub use config::EngineConfig;
pub use domain::{Priority, TaskError, TaskId, TaskStatus};
pub use exec::{TaskContext, Work};

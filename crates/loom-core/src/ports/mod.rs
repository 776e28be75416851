//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部の協調者（時計、ID 採番、イベント観測者、フロー本体）への
//! インターフェースを提供し、実装の詳細を隠蔽します。

pub mod clock;
pub mod event_sink;
pub mod flow_runner;
pub mod id_generator;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::{EventSink, EventSinkError};
pub use self::flow_runner::{FlowInput, FlowRunner, PriorResult};
pub use self::id_generator::{IdGenerator, UlidGenerator};

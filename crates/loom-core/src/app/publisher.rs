//! Event publisher - ライフサイクルイベントの配送
//!
//! # フロー
//! 1. レジストリが状態遷移のたびに `publish()`（非同期チャネルへ送るだけ、ブロックしない）
//! 2. 配送ループが 1 件ずつ EventSink の種別メソッドを呼ぶ
//! 3. Sink の失敗・panic は warn ログを出して握りつぶす
//!
//! チャネルは 1 本なので、同一タスクのイベントは遷移順に届きます。
//!
//! # バックログ
//! Sink が遅いと未配送のイベントが溜まる。進捗イベントは未配送分が
//! `progress_backlog` に達したら捨てる（次の進捗で上書きされる情報なので）。
//! 作成・開始・終端イベントは捨てない。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::{EventDetail, TaskEvent};
use crate::ports::EventSink;
use crate::ports::event_sink::dispatch;

enum Message {
    Event(TaskEvent),
    Flush(oneshot::Sender<()>),
}

/// Undelivered progress events allowed before new ones are dropped.
pub const DEFAULT_PROGRESS_BACKLOG: usize = 1024;

/// Cheap handle for emitting events.
#[derive(Clone)]
pub struct EventPublisher {
    tx: mpsc::UnboundedSender<Message>,
    // 未配送の進捗イベント数
    pending_progress: Arc<AtomicUsize>,
    progress_backlog: usize,
}

impl EventPublisher {
    /// Start the delivery loop on the current tokio runtime.
    ///
    /// The loop ends once every publisher handle is dropped.
    pub fn spawn(sink: Arc<dyn EventSink>) -> (Self, JoinHandle<()>) {
        Self::spawn_with_backlog(sink, DEFAULT_PROGRESS_BACKLOG)
    }

    pub fn spawn_with_backlog(
        sink: Arc<dyn EventSink>,
        progress_backlog: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending_progress = Arc::new(AtomicUsize::new(0));
        let handle = tokio::spawn(publisher_loop(rx, sink, pending_progress.clone()));
        let publisher = Self {
            tx,
            pending_progress,
            progress_backlog,
        };
        (publisher, handle)
    }

    /// Fire-and-forget. Progress events are dropped while the backlog is full.
    pub fn publish(&self, event: TaskEvent) {
        let progress = is_progress(&event);
        if progress && !self.reserve_progress_slot() {
            debug!(task_id = %event.task_id, "event backlog full, dropping progress");
            return;
        }
        if self.tx.send(Message::Event(event)).is_err() {
            if progress {
                self.pending_progress.fetch_sub(1, Ordering::AcqRel);
            }
            debug!("event loop stopped, dropping event");
        }
    }

    fn reserve_progress_slot(&self) -> bool {
        self.pending_progress
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.progress_backlog).then_some(n + 1)
            })
            .is_ok()
    }

    /// Wait until every event published before this call has been delivered.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Message::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

fn is_progress(event: &TaskEvent) -> bool {
    matches!(event.detail, EventDetail::Progress { .. })
}

async fn publisher_loop(
    mut rx: mpsc::UnboundedReceiver<Message>,
    sink: Arc<dyn EventSink>,
    pending_progress: Arc<AtomicUsize>,
) {
    while let Some(message) = rx.recv().await {
        match message {
            Message::Event(event) => {
                if is_progress(&event) {
                    pending_progress.fetch_sub(1, Ordering::AcqRel);
                }
                deliver(sink.as_ref(), &event).await;
            }
            Message::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    debug!("event publisher loop finished");
}

async fn deliver(sink: &dyn EventSink, event: &TaskEvent) {
    match AssertUnwindSafe(dispatch(sink, event)).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(task_id = %event.task_id, kind = ?event.kind(), error = %e, "event sink failed");
        }
        Err(_) => {
            warn!(task_id = %event.task_id, kind = ?event.kind(), "event sink panicked");
        }
    }
}

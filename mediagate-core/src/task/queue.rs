//! Single-worker task queue
//!
//! One worker consumes a FIFO queue; submission never blocks. A failing or
//! cancelled task only ends itself: the worker records the outcome, clears
//! the stop signal, and moves on.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;

use crate::Result;

use super::status::StatusBoard;
use super::stop::StopSignal;

/// Which processor's stop signal a task listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorKind {
    Media,
    Watchlist,
    Actor,
}

impl ProcessorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Media => "media",
            Self::Watchlist => "watchlist",
            Self::Actor => "actor",
        }
    }
}

/// Handles a running task uses to report progress and observe cancellation.
#[derive(Clone)]
pub struct TaskContext {
    pub stop: StopSignal,
    status: StatusBoard,
}

impl TaskContext {
    #[must_use]
    pub fn new(stop: StopSignal, status: StatusBoard) -> Self {
        Self { stop, status }
    }

    /// Standalone context for direct invocations (tests, webhook-inline
    /// flows that bypass the queue).
    #[must_use]
    pub fn detached() -> Self {
        Self {
            stop: StopSignal::new(),
            status: StatusBoard::new(),
        }
    }

    pub fn update(&self, progress: i32, message: &str) {
        self.status.update(progress, message);
    }

    pub fn check_stop(&self) -> Result<()> {
        self.stop.check()
    }
}

type TaskFn = Box<dyn FnOnce(TaskContext) -> BoxFuture<'static, Result<()>> + Send>;

struct QueuedTask {
    name: String,
    processor: ProcessorKind,
    run: TaskFn,
}

/// Per-processor stop signals; all long-running work shares these three.
#[derive(Clone, Default)]
pub struct StopSignals {
    media: StopSignal,
    watchlist: StopSignal,
    actor: StopSignal,
}

impl StopSignals {
    #[must_use]
    pub fn get(&self, kind: ProcessorKind) -> StopSignal {
        match kind {
            ProcessorKind::Media => self.media.clone(),
            ProcessorKind::Watchlist => self.watchlist.clone(),
            ProcessorKind::Actor => self.actor.clone(),
        }
    }

    pub fn signal_all(&self) {
        self.media.signal_stop();
        self.watchlist.signal_stop();
        self.actor.signal_stop();
    }
}

#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<QueuedTask>,
    status: StatusBoard,
    stops: StopSignals,
}

impl TaskQueue {
    /// Start the worker and return the submission handle.
    #[must_use]
    pub fn start() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let status = StatusBoard::new();
        let stops = StopSignals::default();

        tokio::spawn(worker_loop(rx, status.clone(), stops.clone()));

        Self { tx, status, stops }
    }

    /// Non-blocking submission; the task waits its turn in FIFO order.
    pub fn submit<F>(&self, name: impl Into<String>, processor: ProcessorKind, run: F)
    where
        F: FnOnce(TaskContext) -> BoxFuture<'static, Result<()>> + Send + 'static,
    {
        let name = name.into();
        let task = QueuedTask {
            name: name.clone(),
            processor,
            run: Box::new(run),
        };
        if self.tx.send(task).is_err() {
            tracing::error!(task = %name, "task worker is gone; submission dropped");
        } else {
            tracing::info!(task = %name, "任务已加入等待队列");
        }
    }

    #[must_use]
    pub fn status(&self) -> &StatusBoard {
        &self.status
    }

    /// Request cancellation of whatever is running (and anything queued
    /// behind it that polls the same signals).
    pub fn signal_stop(&self) {
        self.stops.signal_all();
    }

    #[must_use]
    pub fn stop_signal(&self, kind: ProcessorKind) -> StopSignal {
        self.stops.get(kind)
    }
}

async fn worker_loop(
    mut rx: mpsc::UnboundedReceiver<QueuedTask>,
    status: StatusBoard,
    stops: StopSignals,
) {
    tracing::debug!("task worker started");
    while let Some(task) = rx.recv().await {
        let stop = stops.get(task.processor);
        stop.clear();
        status.begin(&task.name);
        tracing::info!(task = %task.name, "后台任务开始执行");

        let ctx = TaskContext::new(stop.clone(), status.clone());
        let outcome = std::panic::AssertUnwindSafe((task.run)(ctx))
            .catch_unwind()
            .await;

        let (message, completed) = match outcome {
            Ok(Ok(())) if stop.is_stop_requested() => ("任务已成功中断。".to_string(), false),
            Ok(Ok(())) => ("处理完成。".to_string(), true),
            Ok(Err(e)) if e.is_cancelled() || stop.is_stop_requested() => {
                ("任务已成功中断。".to_string(), false)
            }
            Ok(Err(e)) => {
                tracing::error!(task = %task.name, error = %e, "task failed");
                (format!("出错: {e}"), false)
            }
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic".to_string());
                tracing::error!(task = %task.name, detail, "task panicked");
                (format!("出错: {detail}"), false)
            }
        };

        status.finish(&message, completed);
        stop.clear();
        tracing::info!(task = %task.name, %message, "后台任务结束");
    }
    tracing::info!("task worker shutting down");
}

// The queue drops naturally with the last sender; sending a shutdown task is
// unnecessary because the worker is a daemon for the process lifetime.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn wait_until_idle(queue: &TaskQueue) {
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let s = queue.status().snapshot();
            if !s.is_running && s.last_action.is_some() {
                return;
            }
        }
        panic!("queue never went idle");
    }

    #[tokio::test]
    async fn test_tasks_run_in_submission_order() {
        let queue = TaskQueue::start();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            queue.submit(format!("t{i}"), ProcessorKind::Media, move |_ctx| {
                Box::pin(async move {
                    order.lock().push(i);
                    Ok(())
                })
            });
        }

        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if order.lock().len() == 3 {
                break;
            }
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_error_reports_and_worker_survives() {
        let queue = TaskQueue::start();
        queue.submit("爆炸任务", ProcessorKind::Media, |_ctx| {
            Box::pin(async { Err(Error::Internal("boom".to_string())) })
        });
        wait_until_idle(&queue).await;
        let status = queue.status().snapshot();
        assert!(status.message.starts_with("出错: "), "got {}", status.message);

        // A later task still runs.
        let ran = Arc::new(AtomicUsize::new(0));
        let flag = ran.clone();
        queue.submit("后续任务", ProcessorKind::Media, move |_ctx| {
            Box::pin(async move {
                flag.store(1, Ordering::SeqCst);
                Ok(())
            })
        });
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if ran.load(Ordering::SeqCst) == 1 {
                break;
            }
        }
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(queue.status().snapshot().message, "处理完成。");
    }

    #[tokio::test]
    async fn test_cancelled_task_reports_interrupt() {
        let queue = TaskQueue::start();
        queue.submit("可取消任务", ProcessorKind::Media, |ctx| {
            Box::pin(async move {
                ctx.stop.signal_stop();
                ctx.check_stop()?;
                Ok(())
            })
        });
        wait_until_idle(&queue).await;
        assert_eq!(queue.status().snapshot().message, "任务已成功中断。");
        // The stop signal is cleared for the next task.
        assert!(!queue.stop_signal(ProcessorKind::Media).is_stop_requested());
    }

    #[tokio::test]
    async fn test_completion_clamps_progress() {
        let queue = TaskQueue::start();
        queue.submit("进度任务", ProcessorKind::Media, |ctx| {
            Box::pin(async move {
                ctx.update(37, "half way");
                Ok(())
            })
        });
        wait_until_idle(&queue).await;
        let status = queue.status().snapshot();
        assert_eq!(status.progress, 100);
        assert_eq!(status.message, "处理完成。");
    }
}

//! Worker status board
//!
//! Status mutations take a short lock only at begin/progress/end; the lock
//! is never held across task execution.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub is_running: bool,
    pub current_action: String,
    pub progress: i32,
    pub message: String,
    pub last_action: Option<String>,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self {
            is_running: false,
            current_action: "无".to_string(),
            progress: 0,
            message: "等待任务".to_string(),
            last_action: None,
        }
    }
}

#[derive(Clone, Default)]
pub struct StatusBoard {
    inner: Arc<Mutex<TaskStatus>>,
}

impl StatusBoard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, action: &str) {
        let mut status = self.inner.lock();
        status.is_running = true;
        status.current_action = action.to_string();
        status.last_action = Some(action.to_string());
        status.progress = 0;
        status.message = format!("{action} 初始化...");
    }

    /// Progress callbacks from inside tasks. A negative progress leaves the
    /// previous value in place (message-only updates).
    pub fn update(&self, progress: i32, message: &str) {
        let mut status = self.inner.lock();
        if progress >= 0 {
            status.progress = progress.min(100);
        }
        status.message = message.to_string();
    }

    pub fn finish(&self, message: &str, completed: bool) {
        let mut status = self.inner.lock();
        if completed {
            status.progress = 100;
        }
        status.message = message.to_string();
        status.is_running = false;
        status.current_action = "无 (空闲)".to_string();
    }

    #[must_use]
    pub fn snapshot(&self) -> TaskStatus {
        self.inner.lock().clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.lock().is_running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let board = StatusBoard::new();
        let initial = board.snapshot();
        assert!(!initial.is_running);
        assert_eq!(initial.message, "等待任务");

        board.begin("同步元数据");
        assert!(board.is_running());
        assert_eq!(board.snapshot().progress, 0);

        board.update(40, "处理中 4/10");
        assert_eq!(board.snapshot().progress, 40);

        // Message-only update keeps progress.
        board.update(-1, "仍在处理");
        assert_eq!(board.snapshot().progress, 40);

        board.finish("处理完成。", true);
        let done = board.snapshot();
        assert!(!done.is_running);
        assert_eq!(done.progress, 100);
        assert_eq!(done.current_action, "无 (空闲)");
        assert_eq!(done.last_action.as_deref(), Some("同步元数据"));
    }

    #[test]
    fn test_progress_clamped_to_100() {
        let board = StatusBoard::new();
        board.begin("x");
        board.update(250, "overshoot");
        assert_eq!(board.snapshot().progress, 100);
    }
}

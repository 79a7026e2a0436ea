//! Cron scheduling
//!
//! Thin wrapper over `tokio-cron-scheduler`: jobs are registered under
//! stable string IDs, re-registering an ID removes the previous job first,
//! and firing only ever submits to the task queue — cron never executes
//! work inline.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::{Error, Result};

/// Fixed weekly revival check for ended series.
pub const REVIVAL_CHECK_JOB_ID: &str = "weekly-revival-check";
pub const REVIVAL_CHECK_CRON: &str = "0 5 * * sun";

pub const HIGH_FREQ_CHAIN_JOB_ID: &str = "high-freq-task-chain";
pub const LOW_FREQ_CHAIN_JOB_ID: &str = "low-freq-task-chain";
pub const SESSION_GC_JOB_ID: &str = "session-gc";
pub const SESSION_GC_CRON: &str = "*/5 * * * *";

pub struct Scheduler {
    inner: JobScheduler,
    // Jobs are keyed by uuid inside the scheduler; callers only ever see
    // the string IDs.
    jobs: Arc<Mutex<HashMap<String, uuid::Uuid>>>,
}

impl Scheduler {
    pub async fn new() -> Result<Self> {
        let inner = JobScheduler::new()
            .await
            .map_err(|e| Error::Internal(format!("scheduler init failed: {e}")))?;
        Ok(Self {
            inner,
            jobs: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub async fn start(&self) -> Result<()> {
        self.inner
            .start()
            .await
            .map_err(|e| Error::Internal(format!("scheduler start failed: {e}")))?;
        tracing::info!("定时任务调度器已启动");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner
            .shutdown()
            .await
            .map_err(|e| Error::Internal(format!("scheduler shutdown failed: {e}")))?;
        Ok(())
    }

    /// Register (or re-register) a cron job. Any job previously registered
    /// under the same ID is removed first.
    pub async fn replace_job<F>(&self, job_id: &str, cron: &str, fire: F) -> Result<()>
    where
        F: Fn() + Send + Sync + Clone + 'static,
    {
        self.remove_job(job_id).await?;

        let schedule = to_seconds_cron(cron);
        let job = Job::new_async(schedule.as_str(), move |_uuid, _lock| {
            let fire = fire.clone();
            Box::pin(async move {
                fire();
            })
        })
        .map_err(|e| Error::InvalidInput(format!("invalid cron '{cron}': {e}")))?;

        let uuid = self
            .inner
            .add(job)
            .await
            .map_err(|e| Error::Internal(format!("failed to add job {job_id}: {e}")))?;
        self.jobs.lock().insert(job_id.to_string(), uuid);

        tracing::info!(job_id, cron, plan = %describe_cron(cron), "已设置定时任务");
        Ok(())
    }

    pub async fn remove_job(&self, job_id: &str) -> Result<()> {
        let existing = self.jobs.lock().remove(job_id);
        if let Some(uuid) = existing {
            self.inner
                .remove(&uuid)
                .await
                .map_err(|e| Error::Internal(format!("failed to remove job {job_id}: {e}")))?;
            tracing::debug!(job_id, "移除旧的定时任务");
        }
        Ok(())
    }

    #[must_use]
    pub fn has_job(&self, job_id: &str) -> bool {
        self.jobs.lock().contains_key(job_id)
    }

    /// Next fire time for a registered job.
    pub async fn next_run(&self, job_id: &str) -> Result<Option<DateTime<Utc>>> {
        let uuid = self.jobs.lock().get(job_id).copied();
        match uuid {
            Some(uuid) => {
                let mut inner = self.inner.clone();
                inner
                    .next_tick_for_job(uuid)
                    .await
                    .map_err(|e| Error::Internal(format!("next tick lookup failed: {e}")))
            }
            None => Ok(None),
        }
    }
}

/// The scheduler wants a seconds field; standard five-field expressions get
/// one prepended.
#[must_use]
pub fn to_seconds_cron(cron: &str) -> String {
    let fields = cron.split_whitespace().count();
    if fields == 5 {
        format!("0 {cron}")
    } else {
        cron.to_string()
    }
}

/// Human-readable rendering of common cron shapes for log lines; anything
/// unusual falls back to quoting the expression.
#[must_use]
pub fn describe_cron(cron: &str) -> String {
    let parts: Vec<&str> = cron.split_whitespace().collect();
    if parts.len() != 5 {
        return format!("按计划 '{cron}'");
    }
    let (minute, hour, dom, month, dow) = (parts[0], parts[1], parts[2], parts[3], parts[4]);

    let day_names = [
        ("sun", "周日"),
        ("mon", "周一"),
        ("tue", "周二"),
        ("wed", "周三"),
        ("thu", "周四"),
        ("fri", "周五"),
        ("sat", "周六"),
        ("0", "周日"),
        ("1", "周一"),
        ("2", "周二"),
        ("3", "周三"),
        ("4", "周四"),
        ("5", "周五"),
        ("6", "周六"),
        ("7", "周日"),
    ];

    if let Some(step) = minute.strip_prefix("*/") {
        if hour == "*" && dom == "*" && month == "*" && dow == "*" {
            return format!("每隔{step}分钟");
        }
    }
    if let Some(step) = hour.strip_prefix("*/") {
        if dom == "*" && month == "*" && dow == "*" {
            if minute == "0" {
                return format!("每隔{step}小时的整点");
            }
            return format!("每隔{step}小时的第{minute}分钟");
        }
    }

    if let (Ok(m), Ok(h)) = (minute.parse::<u32>(), hour.parse::<u32>()) {
        let time = format!("{h}点{m:02}分");
        if dom == "*" && month == "*" && dow == "*" {
            return format!("每天 {time}");
        }
        if dom == "*" && month == "*" {
            let day = day_names
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(dow))
                .map(|(_, v)| *v);
            if let Some(day) = day {
                return format!("每{day} {time}");
            }
        }
        if month == "*" && dow == "*" {
            if dom == "1" {
                return format!("每月的第一天 {time}");
            }
            return format!("每月{dom}号 {time}");
        }
    }

    format!("按计划 '{cron}'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_seconds_cron() {
        assert_eq!(to_seconds_cron("0 5 * * sun"), "0 0 5 * * sun");
        assert_eq!(to_seconds_cron("0 0 5 * * sun"), "0 0 5 * * sun");
        assert_eq!(to_seconds_cron("*/5 * * * *"), "0 */5 * * * *");
    }

    #[test]
    fn test_describe_cron() {
        assert_eq!(describe_cron("*/5 * * * *"), "每隔5分钟");
        assert_eq!(describe_cron("0 */6 * * *"), "每隔6小时的整点");
        assert_eq!(describe_cron("30 4 * * *"), "每天 4点30分");
        assert_eq!(describe_cron("0 5 * * sun"), "每周日 5点00分");
        assert_eq!(describe_cron("0 3 1 * *"), "每月的第一天 3点00分");
        assert!(describe_cron("bad expr").starts_with("按计划"));
    }

    #[tokio::test]
    async fn test_replace_job_swaps_registration() {
        let scheduler = Scheduler::new().await.expect("scheduler builds");
        scheduler
            .replace_job("test-job", "0 5 * * sun", || {})
            .await
            .expect("job added");
        assert!(scheduler.has_job("test-job"));

        scheduler
            .replace_job("test-job", "30 4 * * *", || {})
            .await
            .expect("job replaced");
        assert!(scheduler.has_job("test-job"));

        scheduler.remove_job("test-job").await.expect("removed");
        assert!(!scheduler.has_job("test-job"));
    }

    #[tokio::test]
    async fn test_invalid_cron_rejected() {
        let scheduler = Scheduler::new().await.expect("scheduler builds");
        let err = scheduler
            .replace_job("bad", "not a cron", || {})
            .await
            .expect_err("invalid");
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}

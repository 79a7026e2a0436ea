//! Cron-fired task chains
//!
//! A chain runs its configured sequence in order inside a single queued
//! task. It stops at the end of the sequence, on cancellation, or when the
//! wall-clock budget runs out. Every stage polls the chain's shared stop
//! signal.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::Result;

use super::queue::TaskContext;
use super::registry::TaskRegistry;

/// Execute `sequence` under the shared context. `max_runtime_minutes == 0`
/// means unbounded. Unknown keys are skipped with a log line; a failing
/// stage ends only itself.
pub async fn run_chain(
    ctx: TaskContext,
    registry: Arc<TaskRegistry>,
    sequence: Vec<String>,
    max_runtime_minutes: u64,
) -> Result<()> {
    let started = Instant::now();
    let budget = (max_runtime_minutes > 0).then(|| Duration::from_secs(max_runtime_minutes * 60));
    let total = sequence.len();

    for (index, key) in sequence.iter().enumerate() {
        ctx.check_stop()?;

        if let Some(budget) = budget {
            if budget_exceeded(started, budget) {
                tracing::warn!(
                    elapsed_minutes = started.elapsed().as_secs() / 60,
                    max_runtime_minutes,
                    "chain budget exhausted, stopping before stage {key}"
                );
                ctx.update(
                    -1,
                    &format!("任务链达到最大运行时长 {max_runtime_minutes} 分钟，提前结束"),
                );
                break;
            }
        }

        let Some(entry) = registry.get(key) else {
            tracing::error!(key, "chain stage not found in task registry");
            continue;
        };

        let progress = (index * 100 / total.max(1)) as i32;
        ctx.update(
            progress,
            &format!("任务链阶段 {}/{}: {}", index + 1, total, entry.display_name),
        );
        tracing::info!(stage = %entry.display_name, "chain stage starting");

        match entry.run(ctx.clone()).await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                // A failing stage does not take the chain down.
                tracing::error!(stage = %entry.display_name, error = %e, "chain stage failed");
            }
        }
    }

    Ok(())
}

fn budget_exceeded(started: Instant, budget: Duration) -> bool {
    started.elapsed() >= budget
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::queue::ProcessorKind;
    use crate::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_registry(counter: Arc<AtomicUsize>) -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        for key in ["a", "b", "c"] {
            let counter = counter.clone();
            registry.register(key, key, ProcessorKind::Media, move |_ctx| {
                let counter = counter.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            });
        }
        registry
    }

    #[tokio::test]
    async fn test_chain_runs_sequence_in_order() {
        let counter = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(counting_registry(counter.clone()));
        run_chain(
            TaskContext::detached(),
            registry,
            vec!["a".into(), "b".into(), "c".into()],
            0,
        )
        .await
        .expect("chain completes");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_chain_skips_unknown_stage() {
        let counter = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(counting_registry(counter.clone()));
        run_chain(
            TaskContext::detached(),
            registry,
            vec!["a".into(), "nope".into(), "c".into()],
            0,
        )
        .await
        .expect("chain completes");
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_chain_stage_error_does_not_abort_chain() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = counting_registry(counter.clone());
        registry.register("fail", "fail", ProcessorKind::Media, |_ctx| {
            Box::pin(async { Err(Error::Internal("stage broke".into())) })
        });
        run_chain(
            TaskContext::detached(),
            Arc::new(registry),
            vec!["fail".into(), "a".into()],
            0,
        )
        .await
        .expect("chain completes");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_chain_cancellation_propagates() {
        let counter = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(counting_registry(counter.clone()));
        let ctx = TaskContext::detached();
        ctx.stop.signal_stop();
        let err = run_chain(ctx, registry, vec!["a".into()], 0)
            .await
            .expect_err("cancelled before first stage");
        assert!(err.is_cancelled());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_budget_boundary() {
        let started = Instant::now();
        assert!(!budget_exceeded(started, Duration::from_secs(3600)));
        assert!(budget_exceeded(
            started - Duration::from_secs(61),
            Duration::from_secs(60)
        ));
    }
}

//! Plan execution: stages in order, gate checks between them, failure
//! attribution to the failing stage's state.

use super::metrics::{PipelineMetrics, StageMetrics, TaskMetrics};
use super::stage::{ExecutionMode, Stage};
use super::task::BoxedTask;
use futures::future::join_all;
use std::fmt::Debug;
use std::time::Instant;
use vmfleet_shared::{FleetError, FleetResult};

pub struct ExecutionPlan<Ctx, S> {
    stages: Vec<Stage<BoxedTask<Ctx>, S>>,
}

impl<Ctx, S> ExecutionPlan<Ctx, S> {
    pub fn new(stages: Vec<Stage<BoxedTask<Ctx>, S>>) -> Self {
        Self { stages }
    }

    pub fn stages(self) -> Vec<Stage<BoxedTask<Ctx>, S>> {
        self.stages
    }
}

/// Consulted before every stage; a `true` answer stops the pipeline
/// before the stage issues any work.
pub trait StageGate: Send + Sync {
    fn should_stop(&self) -> bool;
}

/// Gate that never stops a pipeline.
pub struct NoGate;

impl StageGate for NoGate {
    fn should_stop(&self) -> bool {
        false
    }
}

/// A pipeline that stopped at a checkpoint.
#[derive(Debug)]
pub struct PipelineFailure<S> {
    /// State of the stage that failed (or would have run next, when gated).
    pub state: S,
    /// Name of the failing task; `None` when the gate stopped the pipeline.
    pub task: Option<String>,
    pub error: FleetError,
    /// Metrics of the stages that completed before the failure.
    pub metrics: PipelineMetrics<S>,
}

/// Drives an [`ExecutionPlan`] to completion or to its first failure.
pub struct PipelineExecutor;

impl PipelineExecutor {
    /// Run `plan` against `ctx`.
    ///
    /// Parallel stages always wait for every task so no in-flight work is
    /// dropped; the first failing task in plan order is the one reported.
    /// `Ctx` is cloned into each task, so writes need interior mutability.
    pub async fn execute<Ctx, S>(
        plan: ExecutionPlan<Ctx, S>,
        ctx: Ctx,
        gate: &dyn StageGate,
    ) -> Result<PipelineMetrics<S>, PipelineFailure<S>>
    where
        Ctx: Clone,
        S: Copy + Debug,
    {
        let total_start = Instant::now();
        let mut metrics = PipelineMetrics::default();

        for (index, stage) in plan.stages().into_iter().enumerate() {
            let Stage {
                state,
                tasks,
                execution,
            } = stage;

            if gate.should_stop() {
                metrics.total_duration_ms = total_start.elapsed().as_millis();
                return Err(PipelineFailure {
                    state,
                    task: None,
                    error: FleetError::Aborted(format!(
                        "batch abort signalled before {:?}",
                        state
                    )),
                    metrics,
                });
            }

            let stage_start = Instant::now();

            let results: Vec<(String, FleetResult<TaskMetrics>)> = match execution {
                ExecutionMode::Parallel => {
                    let futures = tasks.into_iter().map(|task| {
                        let ctx = ctx.clone();
                        async move {
                            let name = task.name().to_string();
                            let task_start = Instant::now();
                            let result = task.run(ctx).await.map(|_| TaskMetrics {
                                name: name.clone(),
                                duration_ms: task_start.elapsed().as_millis(),
                            });
                            (name, result)
                        }
                    });
                    join_all(futures).await
                }
                ExecutionMode::Sequential => {
                    let mut results = Vec::new();
                    for task in tasks {
                        let name = task.name().to_string();
                        let task_start = Instant::now();
                        let result = task.run(ctx.clone()).await.map(|_| TaskMetrics {
                            name: name.clone(),
                            duration_ms: task_start.elapsed().as_millis(),
                        });
                        let failed = result.is_err();
                        results.push((name, result));
                        if failed {
                            break;
                        }
                    }
                    results
                }
            };

            let mut task_metrics = Vec::with_capacity(results.len());
            let mut failure = None;
            for (name, result) in results {
                match result {
                    Ok(m) => task_metrics.push(m),
                    Err(e) if failure.is_none() => failure = Some((name, e)),
                    Err(e) => {
                        tracing::debug!(task = %name, error = %e, "Additional task failure in stage");
                    }
                }
            }

            let stage_metrics = StageMetrics {
                index,
                state,
                execution,
                duration_ms: stage_start.elapsed().as_millis(),
                tasks: task_metrics,
            };

            if let Some((name, error)) = failure {
                metrics.stages.push(stage_metrics);
                metrics.total_duration_ms = total_start.elapsed().as_millis();
                return Err(PipelineFailure {
                    state,
                    task: Some(name),
                    error,
                    metrics,
                });
            }

            metrics.stages.push(stage_metrics);
        }

        metrics.total_duration_ms = total_start.elapsed().as_millis();
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{BoxedTask, PipelineTask};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    type Log = Arc<parking_lot::Mutex<Vec<String>>>;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Phase {
        First,
        Second,
    }

    struct Record(&'static str);

    #[async_trait]
    impl PipelineTask<Log> for Record {
        async fn run(self: Box<Self>, ctx: Log) -> FleetResult<()> {
            ctx.lock().push(self.0.to_string());
            Ok(())
        }

        fn name(&self) -> &str {
            self.0
        }
    }

    struct Fail(&'static str);

    #[async_trait]
    impl PipelineTask<Log> for Fail {
        async fn run(self: Box<Self>, _ctx: Log) -> FleetResult<()> {
            Err(FleetError::NotFound(self.0.to_string()))
        }

        fn name(&self) -> &str {
            self.0
        }
    }

    struct Flag(AtomicBool);

    impl StageGate for Flag {
        fn should_stop(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_sequential_stages_run_in_order() {
        let log: Log = Arc::default();
        let stages: Vec<Stage<BoxedTask<Log>, Phase>> = vec![
            Stage::sequential(Phase::First, vec![Box::new(Record("a")), Box::new(Record("b"))]),
            Stage::parallel(Phase::Second, vec![Box::new(Record("c"))]),
        ];
        let plan = ExecutionPlan::new(stages);

        let metrics = PipelineExecutor::execute(plan, Arc::clone(&log), &NoGate)
            .await
            .unwrap();

        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
        assert_eq!(metrics.completed_tasks(), vec!["a", "b", "c"]);
        assert!(metrics.task_duration_ms("b").is_some());
        assert!(metrics.state_duration_ms(&Phase::Second).is_some());
    }

    #[tokio::test]
    async fn test_failure_stops_following_stages() {
        let log: Log = Arc::default();
        let stages: Vec<Stage<BoxedTask<Log>, Phase>> = vec![
            Stage::sequential(Phase::First, vec![Box::new(Fail("lookup")), Box::new(Record("skipped"))]),
            Stage::sequential(Phase::Second, vec![Box::new(Record("never"))]),
        ];
        let plan = ExecutionPlan::new(stages);

        let failure = PipelineExecutor::execute(plan, Arc::clone(&log), &NoGate)
            .await
            .unwrap_err();

        assert_eq!(failure.state, Phase::First);
        assert_eq!(failure.task.as_deref(), Some("lookup"));
        assert!(matches!(failure.error, FleetError::NotFound(_)));
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_parallel_stage_runs_every_task_before_failing() {
        let log: Log = Arc::default();
        let stages: Vec<Stage<BoxedTask<Log>, Phase>> = vec![Stage::parallel(
            Phase::First,
            vec![Box::new(Fail("broken")), Box::new(Record("sibling"))],
        )];
        let plan = ExecutionPlan::new(stages);

        let failure = PipelineExecutor::execute(plan, Arc::clone(&log), &NoGate)
            .await
            .unwrap_err();

        assert_eq!(failure.task.as_deref(), Some("broken"));
        assert_eq!(*log.lock(), vec!["sibling"]);
        assert_eq!(failure.metrics.completed_tasks(), vec!["sibling"]);
    }

    #[tokio::test]
    async fn test_gate_stops_before_next_stage() {
        let log: Log = Arc::default();
        let gate = Flag(AtomicBool::new(true));
        let stages: Vec<Stage<BoxedTask<Log>, Phase>> = vec![Stage::sequential(
            Phase::Second,
            vec![Box::new(Record("never"))],
        )];
        let plan = ExecutionPlan::new(stages);

        let failure = PipelineExecutor::execute(plan, Arc::clone(&log), &gate)
            .await
            .unwrap_err();

        assert_eq!(failure.state, Phase::Second);
        assert!(failure.task.is_none());
        assert!(matches!(failure.error, FleetError::Aborted(_)));
        assert!(log.lock().is_empty());
    }
}

use crate::pipeline::ExecutionMode;

#[derive(Debug, Clone)]
pub struct TaskMetrics {
    pub name: String,
    pub duration_ms: u128,
}

#[derive(Debug, Clone)]
pub struct StageMetrics<S> {
    pub index: usize,
    pub state: S,
    pub execution: ExecutionMode,
    pub duration_ms: u128,
    pub tasks: Vec<TaskMetrics>,
}

#[derive(Debug, Clone)]
pub struct PipelineMetrics<S> {
    pub total_duration_ms: u128,
    pub stages: Vec<StageMetrics<S>>,
}

impl<S> Default for PipelineMetrics<S> {
    fn default() -> Self {
        Self {
            total_duration_ms: 0,
            stages: Vec::new(),
        }
    }
}

impl<S: PartialEq> PipelineMetrics<S> {
    pub fn task_duration_ms(&self, name: &str) -> Option<u128> {
        self.stages
            .iter()
            .flat_map(|stage| stage.tasks.iter())
            .find(|task| task.name == name)
            .map(|task| task.duration_ms)
    }

    /// Total time spent in every stage labelled with `state`.
    pub fn state_duration_ms(&self, state: &S) -> Option<u128> {
        let mut matched = self.stages.iter().filter(|stage| &stage.state == state);
        let first = matched.next()?.duration_ms;
        Some(matched.fold(first, |acc, stage| acc + stage.duration_ms))
    }

    /// Names of every task that completed, in execution order.
    pub fn completed_tasks(&self) -> Vec<&str> {
        self.stages
            .iter()
            .flat_map(|stage| stage.tasks.iter())
            .map(|task| task.name.as_str())
            .collect()
    }
}

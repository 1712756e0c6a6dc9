/// How the tasks of one stage are driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// All tasks at once; the stage ends when the last one does.
    Parallel,
    /// In order, stopping at the first failure.
    Sequential,
}

/// One row of an execution plan.
///
/// `state` is what a failure inside the stage is reported as. Consecutive
/// stages may share a state when its work has internal ordering, e.g. the
/// datacenter must be known before anything scoped to it is looked up.
#[derive(Debug, Clone)]
pub struct Stage<T, S> {
    pub state: S,
    pub tasks: Vec<T>,
    pub execution: ExecutionMode,
}

impl<T, S> Stage<T, S> {
    pub fn parallel(state: S, tasks: Vec<T>) -> Self {
        Self {
            state,
            tasks,
            execution: ExecutionMode::Parallel,
        }
    }

    pub fn sequential(state: S, tasks: Vec<T>) -> Self {
        Self {
            state,
            tasks,
            execution: ExecutionMode::Sequential,
        }
    }
}

//! Task graph executor.
//!
//! Named tasks with declared dependencies. Every task whose dependencies have
//! finished runs concurrently with the others; results are returned in the
//! order tasks were added, regardless of completion order.
//!
//! # How It Works
//!
//! 1. Validate: every dependency names a task, and there are no cycles
//! 2. Spawn every task without dependencies onto a `JoinSet`
//! 3. As each task completes, start dependents whose dependencies are done
//! 4. A failed task never stops its siblings, but its dependents (and
//!    theirs) are reported as blocked without running
//!
//! # Example
//!
//! ```ignore
//! let mut graph = TaskGraph::new();
//! graph.add_task("clean", &[], move || clean(paths))?;
//! graph.add_task("markup", &["clean"], move || run_stage(Markup, ctx))?;
//! let reports = graph.execute().await?;
//! ```

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::task::JoinSet;

/// Outcome type a task graph can produce for tasks it did not run normally.
pub trait TaskOutcome: Send + 'static {
    fn is_failure(&self) -> bool;
    /// A task not started because `cause` failed.
    fn blocked(task: &str, cause: &str) -> Self;
    /// A task that panicked or was lost.
    fn crashed(task: &str, message: String) -> Self;
}

/// Error while assembling a task graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum GraphError {
    #[error("Task '{0}' is defined twice")]
    DuplicateTask(String),
    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },
    /// Circular dependency detected
    #[error("Circular dependency detected involving task '{0}'")]
    CyclicDependency(String),
}

type TaskFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type TaskFn<T> = Box<dyn FnOnce() -> TaskFuture<T> + Send>;

struct TaskNode<T> {
    name: String,
    dependencies: Vec<String>,
    run: Option<TaskFn<T>>,
}

/// A DAG of async tasks.
pub struct TaskGraph<T> {
    nodes: Vec<TaskNode<T>>,
}

impl<T> Default for TaskGraph<T> {
    fn default() -> Self {
        Self { nodes: Vec::new() }
    }
}

impl<T: TaskOutcome> TaskGraph<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task that runs after every task in `dependencies`.
    pub fn add_task<F, Fut>(
        &mut self,
        name: impl Into<String>,
        dependencies: &[&str],
        task: F,
    ) -> Result<(), GraphError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let name = name.into();
        if self.nodes.iter().any(|n| n.name == name) {
            return Err(GraphError::DuplicateTask(name));
        }
        self.nodes.push(TaskNode {
            name,
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
            run: Some(Box::new(move || Box::pin(task()) as TaskFuture<T>)),
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Task names in insertion order.
    pub fn task_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name.as_str()).collect()
    }

    /// Dependencies declared for a task.
    pub fn dependencies_of(&self, name: &str) -> Option<&[String]> {
        self.nodes.iter().find(|n| n.name == name).map(|n| n.dependencies.as_slice())
    }

    fn index(&self) -> HashMap<&str, usize> {
        self.nodes.iter().enumerate().map(|(i, n)| (n.name.as_str(), i)).collect()
    }

    /// Check that every dependency exists and there are no cycles.
    pub fn validate(&self) -> Result<(), GraphError> {
        let index = self.index();
        for node in &self.nodes {
            for dep in &node.dependencies {
                if !index.contains_key(dep.as_str()) {
                    return Err(GraphError::UnknownDependency {
                        task: node.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let mut visited = HashSet::new();
        let mut visiting = HashSet::new();
        for i in 0..self.nodes.len() {
            self.visit(i, &index, &mut visited, &mut visiting)?;
        }
        Ok(())
    }

    fn visit(
        &self,
        i: usize,
        index: &HashMap<&str, usize>,
        visited: &mut HashSet<usize>,
        visiting: &mut HashSet<usize>,
    ) -> Result<(), GraphError> {
        if visited.contains(&i) {
            return Ok(());
        }
        if !visiting.insert(i) {
            return Err(GraphError::CyclicDependency(self.nodes[i].name.clone()));
        }

        for dep in &self.nodes[i].dependencies {
            if let Some(&d) = index.get(dep.as_str()) {
                self.visit(d, index, visited, visiting)?;
            }
        }

        visiting.remove(&i);
        visited.insert(i);
        Ok(())
    }

    /// Group tasks into levels: every task's dependencies are in earlier
    /// levels. Tasks within a level keep insertion order.
    pub fn levels(&self) -> Result<Vec<Vec<&str>>, GraphError> {
        self.validate()?;

        let mut level_of: HashMap<&str, usize> = HashMap::new();
        let mut levels: Vec<Vec<&str>> = Vec::new();

        while level_of.len() < self.nodes.len() {
            let this_level: Vec<&str> = self
                .nodes
                .iter()
                .filter(|n| !level_of.contains_key(n.name.as_str()))
                .filter(|n| n.dependencies.iter().all(|d| level_of.contains_key(d.as_str())))
                .map(|n| n.name.as_str())
                .collect();

            if this_level.is_empty() {
                // validate() rules this out; guard against looping forever
                break;
            }
            for name in &this_level {
                level_of.insert(name, levels.len());
            }
            levels.push(this_level);
        }

        Ok(levels)
    }

    /// Run every task, respecting dependencies.
    pub async fn execute(mut self) -> Result<Vec<T>, GraphError> {
        self.validate()?;

        let count = self.nodes.len();
        let index: HashMap<String, usize> =
            self.nodes.iter().enumerate().map(|(i, n)| (n.name.clone(), i)).collect();

        let mut waiting_on: Vec<usize> = self.nodes.iter().map(|n| n.dependencies.len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
        for (i, node) in self.nodes.iter().enumerate() {
            for dep in &node.dependencies {
                if let Some(&d) = index.get(dep) {
                    dependents[d].push(i);
                }
            }
        }

        let mut results: Vec<Option<T>> = (0..count).map(|_| None).collect();
        let mut running: JoinSet<(usize, T)> = JoinSet::new();

        for i in 0..count {
            if waiting_on[i] == 0 {
                self.spawn(i, &mut running);
            }
        }

        while let Some(joined) = running.join_next().await {
            let (i, outcome) = match joined {
                Ok(done) => done,
                Err(e) => {
                    tracing::error!("task supervisor failed: {}", e);
                    continue;
                }
            };

            let failed = outcome.is_failure();
            tracing::debug!(
                "task '{}' finished{}",
                self.nodes[i].name,
                if failed { " with failure" } else { "" }
            );
            results[i] = Some(outcome);

            for &d in &dependents[i] {
                if results[d].is_some() {
                    continue;
                }
                if failed {
                    self.block(d, i, &dependents, &mut results);
                } else {
                    waiting_on[d] -= 1;
                    if waiting_on[d] == 0 {
                        self.spawn(d, &mut running);
                    }
                }
            }
        }

        Ok(results
            .into_iter()
            .enumerate()
            .map(|(i, r)| {
                r.unwrap_or_else(|| {
                    T::crashed(&self.nodes[i].name, "task did not complete".to_string())
                })
            })
            .collect())
    }

    fn spawn(&mut self, i: usize, running: &mut JoinSet<(usize, T)>) {
        let Some(run) = self.nodes[i].run.take() else {
            return;
        };
        let name = self.nodes[i].name.clone();
        tracing::debug!("starting task '{}'", name);

        // Run the task in its own tokio task so a panic becomes a result
        // instead of losing the node index.
        running.spawn(async move {
            let outcome = match tokio::spawn(run()).await {
                Ok(outcome) => outcome,
                Err(e) => T::crashed(&name, e.to_string()),
            };
            (i, outcome)
        });
    }

    fn block(
        &self,
        i: usize,
        cause: usize,
        dependents: &[Vec<usize>],
        results: &mut [Option<T>],
    ) {
        if results[i].is_some() {
            return;
        }
        tracing::debug!("task '{}' blocked by '{}'", self.nodes[i].name, self.nodes[cause].name);
        results[i] = Some(T::blocked(&self.nodes[i].name, &self.nodes[cause].name));
        for &d in &dependents[i] {
            self.block(d, i, dependents, results);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::Barrier;

    #[derive(Debug, Clone, PartialEq)]
    enum Outcome {
        Done(String),
        Failed(String),
        Blocked(String, String),
        Crashed(String),
    }

    impl TaskOutcome for Outcome {
        fn is_failure(&self) -> bool {
            !matches!(self, Outcome::Done(_))
        }
        fn blocked(task: &str, cause: &str) -> Self {
            Outcome::Blocked(task.to_string(), cause.to_string())
        }
        fn crashed(task: &str, _message: String) -> Self {
            Outcome::Crashed(task.to_string())
        }
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &str) -> impl Future<Output = Outcome> {
        let log = log.clone();
        let name = name.to_string();
        async move {
            log.lock().unwrap().push(name.clone());
            Outcome::Done(name)
        }
    }

    #[test]
    fn test_duplicate_task() {
        let mut graph: TaskGraph<Outcome> = TaskGraph::new();
        graph.add_task("a", &[], || async { Outcome::Done("a".into()) }).unwrap();
        let err = graph.add_task("a", &[], || async { Outcome::Done("a".into()) }).unwrap_err();
        assert_eq!(err, GraphError::DuplicateTask("a".into()));
    }

    #[test]
    fn test_unknown_dependency() {
        let mut graph: TaskGraph<Outcome> = TaskGraph::new();
        graph.add_task("a", &["missing"], || async { Outcome::Done("a".into()) }).unwrap();
        assert!(matches!(graph.validate(), Err(GraphError::UnknownDependency { .. })));
    }

    #[test]
    fn test_cycle_detected() {
        let mut graph: TaskGraph<Outcome> = TaskGraph::new();
        graph.add_task("a", &["c"], || async { Outcome::Done("a".into()) }).unwrap();
        graph.add_task("b", &["a"], || async { Outcome::Done("b".into()) }).unwrap();
        graph.add_task("c", &["b"], || async { Outcome::Done("c".into()) }).unwrap();
        assert!(matches!(graph.validate(), Err(GraphError::CyclicDependency(_))));
    }

    #[test]
    fn test_levels() {
        let mut graph: TaskGraph<Outcome> = TaskGraph::new();
        graph.add_task("clean", &[], || async { Outcome::Done("clean".into()) }).unwrap();
        graph.add_task("markup", &["clean"], || async { Outcome::Done("m".into()) }).unwrap();
        graph.add_task("font", &["clean"], || async { Outcome::Done("f".into()) }).unwrap();
        graph.add_task("report", &["markup", "font"], || async { Outcome::Done("r".into()) }).unwrap();

        let levels = graph.levels().unwrap();
        assert_eq!(levels, vec![vec!["clean"], vec!["markup", "font"], vec!["report"]]);
    }

    #[tokio::test]
    async fn test_dependencies_run_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut graph = TaskGraph::new();
        let (l1, l2, l3) = (log.clone(), log.clone(), log.clone());
        graph.add_task("push", &["commit"], move || recorder(&l1, "push")).unwrap();
        graph.add_task("commit", &["add"], move || recorder(&l2, "commit")).unwrap();
        graph.add_task("add", &[], move || recorder(&l3, "add")).unwrap();

        let results = graph.execute().await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["add", "commit", "push"]);
        // results keep insertion order
        assert_eq!(results[0], Outcome::Done("push".into()));
        assert_eq!(results[2], Outcome::Done("add".into()));
    }

    #[tokio::test]
    async fn test_independent_tasks_overlap() {
        let barrier = Arc::new(Barrier::new(2));
        let mut graph = TaskGraph::new();
        for name in ["a", "b"] {
            let barrier = barrier.clone();
            graph
                .add_task(name, &[], move || async move {
                    barrier.wait().await;
                    Outcome::Done(name.to_string())
                })
                .unwrap();
        }

        // Sequential execution would never get past the barrier.
        let results = tokio::time::timeout(Duration::from_secs(5), graph.execute())
            .await
            .expect("independent tasks should run concurrently")
            .unwrap();
        assert!(results.iter().all(|r| !r.is_failure()));
    }

    #[tokio::test]
    async fn test_failure_blocks_dependents_only() {
        let mut graph = TaskGraph::new();
        graph.add_task("init", &[], || async { Outcome::Failed("init".into()) }).unwrap();
        graph.add_task("add", &["init"], || async { Outcome::Done("add".into()) }).unwrap();
        graph.add_task("commit", &["add"], || async { Outcome::Done("commit".into()) }).unwrap();
        graph.add_task("font", &[], || async { Outcome::Done("font".into()) }).unwrap();

        let results = graph.execute().await.unwrap();
        assert_eq!(results[0], Outcome::Failed("init".into()));
        assert_eq!(results[1], Outcome::Blocked("add".into(), "init".into()));
        assert_eq!(results[2], Outcome::Blocked("commit".into(), "add".into()));
        assert_eq!(results[3], Outcome::Done("font".into()));
    }

    #[tokio::test]
    async fn test_panic_is_reported_as_crash() {
        let mut graph = TaskGraph::new();
        graph
            .add_task("boom", &[], || async {
                if true {
                    panic!("stage exploded");
                }
                Outcome::Done("boom".into())
            })
            .unwrap();
        graph.add_task("after", &["boom"], || async { Outcome::Done("after".into()) }).unwrap();

        let results = graph.execute().await.unwrap();
        assert_eq!(results[0], Outcome::Crashed("boom".into()));
        assert_eq!(results[1], Outcome::Blocked("after".into(), "boom".into()));
    }

    #[tokio::test]
    async fn test_execute_rejects_cycle() {
        let mut graph: TaskGraph<Outcome> = TaskGraph::new();
        graph.add_task("a", &["a"], || async { Outcome::Done("a".into()) }).unwrap();
        assert!(matches!(graph.execute().await, Err(GraphError::CyclicDependency(_))));
    }
}

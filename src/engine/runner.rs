mod diagnostics;

use std::collections::{HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::channel;
use std::time::{Duration, Instant};

use petgraph::Direction;
use petgraph::graph::NodeIndex;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::blueprint::Pipeline;
use crate::core::{Dynamic, Environment, TaskContext};
use crate::error::BuildError;

pub use diagnostics::Diagnostics;

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
}

/// Settled state of a node.
enum Slot {
    Done(Dynamic),
    Skipped,
}

enum Outcome {
    Done(Dynamic),
    Skipped,
    Failed(anyhow::Error),
}

struct Report {
    index: NodeIndex,
    outcome: Outcome,
    start: Instant,
    duration: Duration,
}

#[derive(Default)]
struct RunState {
    slots: HashMap<NodeIndex, Slot>,
    fired: HashSet<usize>,
    diagnostics: Diagnostics,
    failure: Option<BuildError>,
    stop_failure: Option<BuildError>,
}

impl RunState {
    fn settle(&mut self, pipeline: &Pipeline, report: Report) {
        let Report {
            index,
            outcome,
            start,
            duration,
        } = report;

        let slot = match outcome {
            Outcome::Done(output) => {
                self.diagnostics
                    .execution_times
                    .insert(index, TaskExecution { start, duration });
                Slot::Done(output)
            }
            Outcome::Skipped => {
                self.diagnostics.skipped.insert(index);
                Slot::Skipped
            }
            Outcome::Failed(err) => {
                self.diagnostics
                    .execution_times
                    .insert(index, TaskExecution { start, duration });
                self.diagnostics.failed.insert(index);

                let name = pipeline.graph[index].name();
                tracing::error!("task {name} failed: {err:#}");

                if self.failure.is_none() {
                    self.failure = Some(BuildError::Task(name, err));
                }
                Slot::Skipped
            }
        };

        self.slots.insert(index, slot);
    }

    /// Fires the stop-after relations targeting `target`, or every relation
    /// which has not fired yet when `target` is `None`.
    fn fire_stops(&mut self, pipeline: &Pipeline, target: Option<NodeIndex>) {
        for (i, relation) in pipeline.stops.iter().enumerate() {
            if target.is_some_and(|target| target != relation.target) || self.fired.contains(&i) {
                continue;
            }

            let Some(Slot::Done(output)) = self.slots.get(&relation.subject) else {
                continue;
            };

            self.fired.insert(i);

            let subject = pipeline.graph[relation.subject].name();
            let after = pipeline.graph[relation.target].name();
            tracing::info!("stopping {subject} after {after}");

            match (relation.stop)(output) {
                Ok(()) => self.diagnostics.stopped.push(relation.subject),
                Err(err) => {
                    tracing::error!("failed to stop {subject}: {err:#}");
                    if self.stop_failure.is_none() {
                        self.stop_failure = Some(BuildError::Stop(subject, err));
                    }
                }
            }
        }
    }
}

/// Workers for task bodies. Tasks block on processes and sockets, so there
/// are always at least two of them.
fn worker_pool() -> Result<rayon::ThreadPool, BuildError> {
    let threads = std::thread::available_parallelism()
        .map(usize::from)
        .unwrap_or(1)
        .max(2);

    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("forkdoc-task-{i}"))
        .build()
        .map_err(BuildError::Pool)
}

/// This function executes the task graph using a thread pool, where tasks are
/// executed as soon as their dependencies are met.
///
/// The algorithm works as follows:
/// 1. The graph is checked for cycles.
/// 2. The tasks without dependencies are spawned on the Rayon pool.
/// 3. The main thread waits for results from the workers. Each result is
///    settled, and every stop-after relation naming the finished task fires,
///    whether the task succeeded, failed or was skipped.
/// 4. The dependency counts of all dependents are decremented, and tasks which
///    reach zero are spawned.
/// 5. After the first failure nothing new is spawned, the tasks already in
///    flight are drained.
/// 6. Finally every stop-after relation which did not get to fire is fired,
///    so that no live resource outlives the run.
pub(crate) fn run(pipeline: &Pipeline, env: &Environment) -> Result<Diagnostics, BuildError> {
    let graph = &pipeline.graph;

    if let Err(cycle) = petgraph::algo::toposort(graph, None) {
        return Err(BuildError::Cycle(graph[cycle.node_id()].name()));
    }

    // Build a map from a dependency to the nodes that depend on it.
    let mut dependents: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
    for edge in graph.raw_edges() {
        dependents
            .entry(edge.source())
            .or_default()
            .push(edge.target());
    }

    let mut dependency_counts: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|i| (i, graph.neighbors_directed(i, Direction::Incoming).count()))
        .collect();

    let total_tasks = graph.node_count() as u64;
    if total_tasks == 0 {
        return Ok(Diagnostics::default());
    }

    let root_span = tracing::span!(Level::INFO, "running_tasks");
    root_span.pb_set_length(total_tasks);
    root_span.pb_set_style(&crate::utils::STYLE_BAR);
    root_span.pb_set_message("Running tasks...");
    let _enter = root_span.enter();

    let pool = worker_pool()?;
    let mut state = RunState::default();

    // The scheduling loop blocks on the channel, so it stays on the calling
    // thread and only the tasks go to the workers.
    pool.in_place_scope(|s| {
        let (result_sender, result_receiver) = channel::<Report>();
        let mut in_flight = 0usize;

        // Every call results in exactly one report.
        let spawn_task = |slots: &HashMap<NodeIndex, Slot>, index: NodeIndex| {
            let node = &graph[index];

            let mut dependencies = Vec::new();
            for dependency in node.task.dependencies() {
                match slots.get(&dependency) {
                    Some(Slot::Done(output)) => dependencies.push(output.clone()),
                    _ => {
                        tracing::info!("skipping {}, an input was not produced", node.name());
                        let _ = result_sender.send(Report {
                            index,
                            outcome: Outcome::Skipped,
                            start: Instant::now(),
                            duration: Duration::ZERO,
                        });
                        return;
                    }
                }
            }

            let node = node.clone();
            let sender = result_sender.clone();
            let parent = root_span.clone();

            s.spawn(move |_| {
                let name = node.name();

                let span = tracing::span!(parent: &parent, Level::INFO, "task", name = %name);
                span.pb_set_style(&crate::utils::STYLE_TASK);
                span.pb_set_message(&format!("Running {name}"));
                let _enter = span.enter();

                let context = TaskContext {
                    env,
                    name: &name,
                    span: span.clone(),
                };

                let start = Instant::now();

                let outcome = if node.gates.iter().all(|gate| gate(&context)) {
                    // A panicking task is reported like a failing one, the
                    // shared state it sees is immutable.
                    match catch_unwind(AssertUnwindSafe(|| {
                        node.task.execute(&context, &dependencies)
                    })) {
                        Ok(Ok(output)) => Outcome::Done(output),
                        Ok(Err(err)) => Outcome::Failed(err),
                        Err(panic) => {
                            let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                                format!("Task panicked: {s}")
                            } else if let Some(s) = panic.downcast_ref::<String>() {
                                format!("Task panicked: {s}")
                            } else {
                                String::from("Task panicked with unknown payload")
                            };

                            Outcome::Failed(anyhow::anyhow!(msg))
                        }
                    }
                } else {
                    tracing::info!("skipping {name}, condition not met");
                    Outcome::Skipped
                };

                let _ = sender.send(Report {
                    index,
                    outcome,
                    start,
                    duration: start.elapsed(),
                });
            });
        };

        for index in graph.node_indices() {
            if dependency_counts[&index] == 0 {
                spawn_task(&state.slots, index);
                in_flight += 1;
            }
        }

        while in_flight > 0 {
            let Ok(report) = result_receiver.recv() else {
                break;
            };

            in_flight -= 1;
            root_span.pb_inc(1);

            let index = report.index;
            state.settle(pipeline, report);
            state.fire_stops(pipeline, Some(index));

            if state.failure.is_some() {
                continue;
            }

            if let Some(dependents_of_completed) = dependents.get(&index) {
                for &dependent in dependents_of_completed {
                    if let Some(count) = dependency_counts.get_mut(&dependent) {
                        *count -= 1;
                        if *count == 0 {
                            spawn_task(&state.slots, dependent);
                            in_flight += 1;
                        }
                    }
                }
            }
        }
    });

    state.fire_stops(pipeline, None);

    if let Some(err) = state.failure {
        return Err(err);
    }

    if let Some(err) = state.stop_failure {
        return Err(err);
    }

    tracing::info!("Build complete!");
    Ok(state.diagnostics)
}

use std::any::type_name;
use std::borrow::Cow;
use std::marker::PhantomData;
use std::sync::Arc;

use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::core::{Dynamic, Environment, TaskContext};
use crate::engine::{
    Dependencies, Diagnostics, Edge, Handle, Node, StopAfter, Stoppable, TaskId, TypedTask,
};
use crate::error::BuildError;

/// The blueprint of a build.
///
/// `Blueprint` is used to define the task graph. You add tasks to it, wire
/// them together using their [`Handle`]s, and declare the lifecycle relations
/// between them. Once configured, you convert this into a [`Pipeline`] to
/// execute it.
///
/// # Example
///
/// ```rust,no_run
/// use forkdoc::{Blueprint, Environment};
///
/// let mut blueprint = Blueprint::new();
/// let a = blueprint.task().name("a").run(|_| Ok(21));
/// let b = blueprint
///     .task()
///     .name("b")
///     .depends_on(a)
///     .run(|_, a| Ok(a * 2));
///
/// blueprint.finish().run(&Environment::new(".")).unwrap();
/// ```
pub struct Blueprint {
    pub(crate) graph: Graph<Node, Edge>,
    pub(crate) stops: Vec<StopAfter>,
}

impl Blueprint {
    /// Creates a new, empty blueprint.
    pub fn new() -> Self {
        Self {
            graph: Graph::new(),
            stops: Vec::new(),
        }
    }

    pub fn finish(self) -> Pipeline {
        Pipeline {
            graph: self.graph,
            stops: self.stops,
        }
    }

    /// The entry point for registering a task.
    pub fn task(&mut self) -> TaskDef<'_> {
        TaskDef {
            blueprint: self,
            name: None,
        }
    }

    pub(crate) fn add_task<O, T>(&mut self, task: T) -> Handle<O>
    where
        O: 'static,
        T: TypedTask<Output = O> + 'static,
    {
        let dependencies = task.dependencies();
        let index = self.graph.add_node(Node::new(Arc::new(task)));

        for dependency in dependencies {
            self.graph.add_edge(dependency, index, Edge::Data);
        }

        Handle::new(index)
    }

    /// Declares that `task` may only run after `dependency` has finished,
    /// without consuming its output. Declaring an existing dependency again
    /// has no effect.
    pub fn depends_on(&mut self, task: impl Into<TaskId>, dependency: impl Into<TaskId>) {
        let task = task.into().index();
        let dependency = dependency.into().index();

        if self.graph.find_edge(dependency, task).is_none() {
            self.graph.add_edge(dependency, task, Edge::Order);
        }
    }

    /// Adds a precondition to `task`. Right before the task would execute all
    /// its predicates are evaluated, and if any of them returns `false` the
    /// task is skipped. Tasks consuming the output of a skipped task are
    /// skipped as well.
    pub fn only_if<F>(&mut self, task: impl Into<TaskId>, predicate: F)
    where
        F: Fn(&TaskContext) -> bool + Send + Sync + 'static,
    {
        let index = task.into().index();
        self.graph[index].gates.push(Arc::new(predicate));
    }

    /// Stops the output of `subject` as soon as `target` finishes, whether it
    /// succeeds, fails or is skipped. The relation names the live `target`
    /// node. Setting it again for the same subject replaces the target.
    pub fn stop_after<T>(&mut self, subject: Handle<T>, target: impl Into<TaskId>)
    where
        T: Stoppable,
    {
        let target = target.into().index();

        let stop = Arc::new(|output: &Dynamic| -> anyhow::Result<()> {
            output
                .downcast_ref::<T>()
                .ok_or_else(|| {
                    anyhow::anyhow!("Expected {} but got something else", type_name::<T>())
                })?
                .stop()
        });

        self.stops.retain(|relation| relation.subject != subject.index);
        self.stops.push(StopAfter {
            subject: subject.index,
            target,
            stop,
        });
    }

    /// The name a task was registered with.
    pub fn name_of(&self, task: impl Into<TaskId>) -> String {
        self.graph[task.into().index()].name()
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Every task `task` directly depends on, data and order edges alike.
    pub fn dependencies_of(&self, task: impl Into<TaskId>) -> Vec<TaskId> {
        let mut deps: Vec<TaskId> = self
            .graph
            .neighbors_directed(task.into().index(), petgraph::Direction::Incoming)
            .map(TaskId)
            .collect();
        deps.sort();
        deps.dedup();
        deps
    }

    /// The task after which the output of `subject` gets stopped.
    pub fn stop_target_of<T>(&self, subject: Handle<T>) -> Option<TaskId> {
        self.stops
            .iter()
            .find(|relation| relation.subject == subject.index)
            .map(|relation| TaskId(relation.target))
    }

    /// Looks a task up by name. Wiring should pass handles around, this is
    /// meant for inspection.
    pub fn find(&self, name: &str) -> Option<TaskId> {
        self.graph
            .node_indices()
            .find(|&index| self.graph[index].name() == name)
            .map(TaskId)
    }
}

impl Default for Blueprint {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Blueprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            let name = self.graph[index].name().replace('"', "\\\"");
            writeln!(f, "    {}[\"{}\"]", index.index(), name)?;
        }

        for edge in self.graph.raw_edges() {
            let (source, target) = (edge.source(), edge.target());
            match edge.weight {
                Edge::Data => {
                    let type_name = self.graph[source]
                        .task
                        .get_output_type_name()
                        .replace('<', "&lt;")
                        .replace('>', "&gt;");
                    writeln!(
                        f,
                        "    {} -- \"{}\" --> {}",
                        source.index(),
                        type_name,
                        target.index()
                    )?;
                }
                Edge::Order => writeln!(f, "    {} -.-> {}", source.index(), target.index())?,
            }
        }

        for relation in &self.stops {
            writeln!(
                f,
                "    {} -. \"stops\" .-> {}",
                relation.target.index(),
                relation.subject.index()
            )?;
        }

        Ok(())
    }
}

pub struct TaskDef<'a> {
    blueprint: &'a mut Blueprint,
    name: Option<Cow<'static, str>>,
}

impl<'a> TaskDef<'a> {
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn depends_on<D>(self, dependencies: D) -> TaskBinder<'a, D>
    where
        D: Dependencies,
    {
        TaskBinder {
            blueprint: self.blueprint,
            name: self.name,
            dependencies,
        }
    }

    pub fn run<F, R>(self, callback: F) -> Handle<R>
    where
        F: Fn(&TaskContext<'_>) -> anyhow::Result<R> + Send + Sync + 'static,
        R: Send + Sync + 'static,
    {
        self.blueprint.add_task(TaskNode {
            name: self.name.unwrap_or(type_name::<F>().into()),
            dependencies: (),
            callback: ignore_dependencies(callback),
            _phantom: PhantomData,
        })
    }
}

pub struct TaskBinder<'a, D> {
    blueprint: &'a mut Blueprint,
    name: Option<Cow<'static, str>>,
    dependencies: D,
}

impl<'a, D> TaskBinder<'a, D>
where
    D: Dependencies + Send + Sync + 'static,
{
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn run<F, R>(self, callback: F) -> Handle<R>
    where
        F: for<'b> Fn(&TaskContext<'b>, D::Output<'b>) -> anyhow::Result<R>
            + Send
            + Sync
            + 'static,
        R: Send + Sync + 'static,
    {
        self.blueprint.add_task(TaskNode {
            name: self.name.unwrap_or(type_name::<F>().into()),
            dependencies: self.dependencies,
            callback,
            _phantom: PhantomData,
        })
    }
}

/// An executable build graph, created from a [`Blueprint`].
pub struct Pipeline {
    pub(crate) graph: Graph<Node, Edge>,
    pub(crate) stops: Vec<StopAfter>,
}

impl Pipeline {
    /// Runs every task once, in dependency order.
    ///
    /// Independent tasks run in parallel. The first failing task aborts the
    /// run; tasks already running are allowed to finish, and every live
    /// output with a stop-after relation is stopped before this returns.
    pub fn run(&self, env: &Environment) -> Result<Diagnostics, BuildError> {
        #[cfg(feature = "logging")]
        crate::utils::init_logging();

        crate::engine::runner::run(self, env)
    }
}

fn ignore_dependencies<F, R>(
    callback: F,
) -> impl for<'a> Fn(&TaskContext<'a>, ()) -> anyhow::Result<R> + Send + Sync + 'static
where
    F: Fn(&TaskContext<'_>) -> anyhow::Result<R> + Send + Sync + 'static,
{
    move |ctx, _| callback(ctx)
}

pub(crate) struct TaskNode<R, D, F>
where
    R: Send + Sync + 'static,
    D: Dependencies,
    F: for<'a> Fn(&TaskContext<'a>, D::Output<'a>) -> anyhow::Result<R> + Send + Sync,
{
    pub name: Cow<'static, str>,
    pub dependencies: D,
    pub callback: F,
    pub _phantom: PhantomData<fn() -> R>,
}

impl<R, D, F> TypedTask for TaskNode<R, D, F>
where
    R: Send + Sync + 'static,
    D: Dependencies + Send + Sync,
    F: for<'a> Fn(&TaskContext<'a>, D::Output<'a>) -> anyhow::Result<R> + Send + Sync + 'static,
{
    type Output = R;

    fn get_name(&self) -> String {
        self.name.to_string()
    }

    fn dependencies(&self) -> Vec<NodeIndex> {
        self.dependencies.dependencies()
    }

    fn execute(&self, context: &TaskContext, dependencies: &[Dynamic]) -> anyhow::Result<R> {
        let dependencies = self.dependencies.resolve(dependencies);
        (self.callback)(context, dependencies)
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Counter(Arc<AtomicUsize>);

    impl Stoppable for Counter {
        fn stop(&self) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn env() -> Environment {
        Environment::new(std::env::temp_dir().to_string_lossy().to_string())
    }

    #[test]
    fn outputs_flow_along_data_edges() {
        let mut blueprint = Blueprint::new();
        let a = blueprint.task().name("a").run(|_| Ok(20));
        let b = blueprint.task().name("b").run(|_| Ok(1));
        let sum = blueprint
            .task()
            .name("sum")
            .depends_on((a, b))
            .run(|_, (a, b)| Ok(a + b));

        assert_eq!(blueprint.dependencies_of(sum), vec![a.id(), b.id()]);

        let diagnostics = blueprint.finish().run(&env()).unwrap();
        assert!(diagnostics.execution(sum).is_some());
    }

    #[test]
    fn runs_from_a_single_threaded_pool() {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(1)
            .build()
            .unwrap();

        let result = pool.install(|| {
            let mut blueprint = Blueprint::new();
            let a = blueprint.task().name("a").run(|_| Ok(20));
            let b = blueprint
                .task()
                .name("b")
                .depends_on(a)
                .run(|_, a| Ok(a + 1));
            let pipeline = blueprint.finish();
            pipeline.run(&env()).map(|diagnostics| diagnostics.execution(b).is_some())
        });

        assert!(result.unwrap());
    }

    #[test]
    fn order_edges_are_not_duplicated() {
        let mut blueprint = Blueprint::new();
        let a = blueprint.task().name("a").run(|_| Ok(()));
        let b = blueprint.task().name("b").run(|_| Ok(()));

        blueprint.depends_on(b, a);
        blueprint.depends_on(b, a);

        assert_eq!(blueprint.graph.edge_count(), 1);
        assert_eq!(blueprint.dependencies_of(b), vec![a.id()]);
    }

    #[test]
    fn cycles_are_reported() {
        let mut blueprint = Blueprint::new();
        let a = blueprint.task().name("a").run(|_| Ok(()));
        let b = blueprint.task().name("b").depends_on(a).run(|_, _| Ok(()));
        blueprint.depends_on(a, b);

        let err = blueprint.finish().run(&env()).unwrap_err();
        assert!(matches!(err, BuildError::Cycle(_)));
    }

    #[test]
    fn skipped_tasks_cascade_over_data_edges_only() {
        let mut blueprint = Blueprint::new();
        let gated = blueprint.task().name("gated").run(|_| Ok(1));
        let consumer = blueprint
            .task()
            .name("consumer")
            .depends_on(gated)
            .run(|_, n| Ok(*n));
        let follower = blueprint.task().name("follower").run(|_| Ok(()));

        blueprint.depends_on(follower, gated);
        blueprint.only_if(gated, |_| false);

        let diagnostics = blueprint.finish().run(&env()).unwrap();
        assert!(diagnostics.was_skipped(gated));
        assert!(diagnostics.was_skipped(consumer));
        assert!(!diagnostics.was_skipped(follower));
        assert!(diagnostics.execution(follower).is_some());
    }

    #[test]
    fn stop_after_fires_when_target_fails() {
        let stops = Arc::new(AtomicUsize::new(0));

        let mut blueprint = Blueprint::new();
        let counter = {
            let stops = stops.clone();
            blueprint
                .task()
                .name("resource")
                .run(move |_| Ok(Counter(stops.clone())))
        };
        let user = blueprint
            .task()
            .name("user")
            .depends_on(counter)
            .run(|_, _| -> anyhow::Result<()> { anyhow::bail!("boom") });
        blueprint.stop_after(counter, user);

        let err = blueprint.finish().run(&env()).unwrap_err();
        match err {
            BuildError::Task(name, _) => assert_eq!(name, "user"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_after_replaces_previous_target() {
        let mut blueprint = Blueprint::new();
        let counter = blueprint
            .task()
            .name("resource")
            .run(|_| Ok(Counter(Arc::new(AtomicUsize::new(0)))));
        let first = blueprint.task().name("first").run(|_| Ok(()));
        let second = blueprint.task().name("second").run(|_| Ok(()));

        blueprint.stop_after(counter, first);
        blueprint.stop_after(counter, second);

        assert_eq!(blueprint.stop_target_of(counter), Some(second.id()));
        assert_eq!(blueprint.stops.len(), 1);
    }

    #[test]
    fn unfired_relations_are_stopped_on_abort() {
        let stops = Arc::new(AtomicUsize::new(0));

        let mut blueprint = Blueprint::new();
        let failing = blueprint
            .task()
            .name("failing")
            .run(|_| -> anyhow::Result<()> { anyhow::bail!("nope") });
        let counter = {
            let stops = stops.clone();
            blueprint
                .task()
                .name("resource")
                .run(move |_| Ok(Counter(stops.clone())))
        };
        let user = blueprint
            .task()
            .name("user")
            .depends_on((counter, failing))
            .run(|_, _| Ok(()));
        blueprint.stop_after(counter, user);

        let result = blueprint.finish().run(&env());
        assert!(result.is_err());

        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn display_renders_stop_relations() {
        let mut blueprint = Blueprint::new();
        let counter = blueprint
            .task()
            .name("resource")
            .run(|_| Ok(Counter(Arc::new(AtomicUsize::new(0)))));
        let user = blueprint
            .task()
            .name("user")
            .depends_on(counter)
            .run(|_, _| Ok(()));
        blueprint.stop_after(counter, user);

        let text = blueprint.to_string();
        assert!(text.starts_with("graph LR"));
        assert!(text.contains("0[\"resource\"]"));
        assert!(text.contains("1 -. \"stops\" .-> 0"));
    }
}

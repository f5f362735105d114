//! All the generic task graph related abstractions.
//!
//! A task is a unit of work that produces a result. Tasks are organized into a
//! Directed Acyclic Graph (DAG), where dependencies are explicitly declared.
//!
//! ## Core abstractions
//!
//! * [`Handle<T>`]: A lightweight token representing the *future* result of a
//!   task. It is used to wire dependencies between tasks in the blueprint.
//! * [`Dependencies`]: A trait implemented for handles and tuples of handles.
//!   It resolves these tokens into their concrete values `(&A, &B)` before
//!   executing the task.
//! * [`Stoppable`]: Outputs which hold on to a live resource, such as a
//!   forked process, and can be told to release it once another task has
//!   finished.
//!
//! Under the hood, the graph is entirely type-erased. It stores all outputs as
//! `Arc<dyn Any + Send + Sync>`, the handles carry the type at compile time.

mod handle;
pub(crate) mod runner;

use std::sync::Arc;

use petgraph::graph::NodeIndex;

use crate::core::{Dynamic, TaskContext};

pub use crate::engine::handle::{Handle, TaskId};
pub use crate::engine::runner::{Diagnostics, TaskExecution};

pub(crate) trait TypedTask: Send + Sync {
    /// The concrete output type of this task.
    type Output: Send + Sync + 'static;

    fn get_name(&self) -> String;
    fn dependencies(&self) -> Vec<NodeIndex>;
    fn execute(
        &self,
        context: &TaskContext,
        dependencies: &[Dynamic],
    ) -> anyhow::Result<Self::Output>;
}

pub(crate) trait Task: Send + Sync {
    fn get_name(&self) -> String;
    fn get_output_type_name(&self) -> &'static str;
    fn dependencies(&self) -> Vec<NodeIndex>;
    fn execute(&self, context: &TaskContext, dependencies: &[Dynamic]) -> anyhow::Result<Dynamic>;
}

// A blanket implementation to automatically bridge the two. This is where the
// type erasure actually happens.
impl<T> Task for T
where
    T: TypedTask + 'static,
{
    fn get_name(&self) -> String {
        T::get_name(self)
    }

    fn get_output_type_name(&self) -> &'static str {
        std::any::type_name::<T::Output>()
    }

    fn dependencies(&self) -> Vec<NodeIndex> {
        T::dependencies(self)
    }

    fn execute(&self, context: &TaskContext, dependencies: &[Dynamic]) -> anyhow::Result<Dynamic> {
        Ok(Arc::new(T::execute(self, context, dependencies)?))
    }
}

/// Predicate deciding right before execution whether a task runs at all.
pub(crate) type Gate = Arc<dyn Fn(&TaskContext) -> bool + Send + Sync>;

/// A single node of the build graph.
#[derive(Clone)]
pub(crate) struct Node {
    pub task: Arc<dyn Task>,
    pub gates: Vec<Gate>,
}

impl Node {
    pub(crate) fn new(task: Arc<dyn Task>) -> Self {
        Self {
            task,
            gates: Vec::new(),
        }
    }

    pub(crate) fn name(&self) -> String {
        self.task.get_name()
    }
}

/// Kind of a dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Edge {
    /// The dependent receives the output of the dependency.
    Data,
    /// The dependent only has to run after the dependency.
    Order,
}

pub(crate) type StopFn = Arc<dyn Fn(&Dynamic) -> anyhow::Result<()> + Send + Sync>;

/// A stop-after relation: once `target` finishes, in any way, the output of
/// `subject` is stopped.
#[derive(Clone)]
pub(crate) struct StopAfter {
    pub subject: NodeIndex,
    pub target: NodeIndex,
    pub stop: StopFn,
}

/// Task outputs holding a resource that has to be released once some other
/// task is done with it.
pub trait Stoppable: Send + Sync + 'static {
    /// Release the resource. Calling this more than once must be harmless.
    fn stop(&self) -> anyhow::Result<()>;
}

/// A trait that enables a collection of [`Handle<T>`]s to be used as
/// dependencies for a task.
///
/// It is implemented for single handles, vectors of handles and tuples of
/// handles, allowing them to be passed to `TaskDef::depends_on`.
pub trait Dependencies {
    /// The resulting type when all dependencies are resolved.
    /// For a tuple of [`Handle<T>`]s, this will be a tuple of `&'a T`s.
    type Output<'a>;

    /// Returns the [`NodeIndex`] for each dependency in the collection.
    fn dependencies(&self) -> Vec<NodeIndex>;

    /// Takes a slice of type-erased dependency outputs and resolves them into a
    /// concrete `Output` type.
    ///
    /// # Panics
    /// This method will panic if the type-erased outputs cannot be downcast to
    /// their expected concrete types, indicating a severe logic error in the
    /// build system.
    fn resolve<'a>(&self, outputs: &'a [Dynamic]) -> Self::Output<'a>;
}

fn downcast<T: 'static>(output: &Dynamic) -> &T {
    output.downcast_ref::<T>().unwrap_or_else(|| {
        panic!(
            "Expected {} but got something else",
            std::any::type_name::<T>()
        )
    })
}

impl Dependencies for () {
    type Output<'a> = ();

    fn dependencies(&self) -> Vec<NodeIndex> {
        vec![]
    }

    fn resolve<'a>(&self, _: &'a [Dynamic]) -> Self::Output<'a> {}
}

impl<T> Dependencies for Handle<T>
where
    T: Send + Sync + 'static,
{
    type Output<'a> = &'a T;

    fn dependencies(&self) -> Vec<NodeIndex> {
        vec![self.index]
    }

    fn resolve<'a>(&self, outputs: &'a [Dynamic]) -> Self::Output<'a> {
        downcast(&outputs[0])
    }
}

impl<T> Dependencies for Vec<Handle<T>>
where
    T: Send + Sync + 'static,
{
    type Output<'a> = Vec<&'a T>;

    fn dependencies(&self) -> Vec<NodeIndex> {
        self.iter().map(Handle::index).collect()
    }

    fn resolve<'a>(&self, outputs: &'a [Dynamic]) -> Self::Output<'a> {
        outputs.iter().map(|output| downcast::<T>(output)).collect()
    }
}

macro_rules! impl_deps {
    ($($T:ident),*) => {
        #[allow(non_snake_case)]
        impl<$($T: Send + Sync + 'static),*> Dependencies for ($(Handle<$T>,)*) {
            type Output<'a> = ($(&'a $T,)*);

            fn dependencies(&self) -> Vec<NodeIndex> {
                let ($($T,)*) = self;
                vec![$($T.index),*]
            }

            fn resolve<'a>(&self, outputs: &'a [Dynamic]) -> Self::Output<'a> {
                let mut iter = outputs.iter();
                ($(downcast::<$T>(iter.next().expect("missing dependency output")),)*)
            }
        }
    };
}

impl_deps!(A);
impl_deps!(A, B);
impl_deps!(A, B, C);
impl_deps!(A, B, C, D);
impl_deps!(A, B, C, D, E);
impl_deps!(A, B, C, D, E, F);

use petgraph::graph::NodeIndex;

/// A type-safe reference to a task in the build graph.
///
/// A `Handle<T>` is a lightweight, copyable token that represents a future
/// result of type `T`. It is used to define dependencies between tasks. When
/// one task depends on another, it holds a handle to that dependency. The build
/// system ensures that the dependency is executed before the task that depends
/// on it, and hands its output over.
pub struct Handle<T> {
    pub(crate) index: NodeIndex,
    _phantom: std::marker::PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub(crate) fn new(index: NodeIndex) -> Self {
        Self {
            index,
            _phantom: std::marker::PhantomData,
        }
    }

    /// Returns the underlying `NodeIndex` of the task in the graph.
    pub fn index(&self) -> NodeIndex {
        self.index
    }

    /// Forgets the output type, leaving a plain task reference.
    pub fn id(&self) -> TaskId {
        TaskId(self.index)
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Handle<T> {}

impl<T> std::hash::Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Handle").field(&self.index.index()).finish()
    }
}

/// An untyped reference to a task, used where only ordering matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) NodeIndex);

impl TaskId {
    pub fn index(&self) -> NodeIndex {
        self.0
    }
}

impl<T> From<Handle<T>> for TaskId {
    fn from(handle: Handle<T>) -> Self {
        handle.id()
    }
}

impl<T> From<&Handle<T>> for TaskId {
    fn from(handle: &Handle<T>) -> Self {
        handle.id()
    }
}

impl<T> PartialEq<TaskId> for Handle<T> {
    fn eq(&self, other: &TaskId) -> bool {
        self.index == other.0
    }
}

impl<T> PartialEq<Handle<T>> for TaskId {
    fn eq(&self, other: &Handle<T>) -> bool {
        self.0 == other.index
    }
}

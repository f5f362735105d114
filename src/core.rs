use std::any::Any;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};

/// A type-erased, thread-safe container.
pub(crate) type Dynamic = Arc<dyn Any + Send + Sync>;

/// What the host platform can do for forked processes.
///
/// Probed once when an [`Environment`] is created and then handed to every
/// task, so that no task has to sniff version strings on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Whether a forked process can be stopped together with every process it
    /// spawned. On Unix this is done by signalling the whole process group.
    pub kill_descendants: bool,
}

impl Capabilities {
    /// Probe the current platform.
    pub fn probe() -> Self {
        Self {
            kill_descendants: cfg!(unix),
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::probe()
    }
}

/// Global configuration available to all tasks.
#[derive(Debug, Clone)]
pub struct Environment {
    /// Root of the project, the default working directory of forked processes.
    pub project_dir: Utf8PathBuf,
    /// Directory for generated files, the default location of documents.
    pub build_dir: Utf8PathBuf,
    /// Platform capabilities, probed once.
    pub capabilities: Capabilities,
}

impl Environment {
    /// Creates an environment rooted at `project_dir`, with `build` inside it
    /// as the build directory.
    pub fn new(project_dir: impl Into<Utf8PathBuf>) -> Self {
        let project_dir = project_dir.into();
        let build_dir = project_dir.join("build");

        Self {
            project_dir,
            build_dir,
            capabilities: Capabilities::probe(),
        }
    }

    pub fn with_build_dir(mut self, build_dir: impl Into<Utf8PathBuf>) -> Self {
        self.build_dir = build_dir.into();
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn project_dir(&self) -> &Utf8Path {
        &self.project_dir
    }

    pub fn build_dir(&self) -> &Utf8Path {
        &self.build_dir
    }
}

/// The context passed to every task execution.
///
/// It is immutable during task execution.
pub struct TaskContext<'a> {
    /// Access to global configuration.
    pub env: &'a Environment,
    /// Name of the running task.
    pub name: &'a str,
    /// Tracing span assigned to this task.
    pub(crate) span: tracing::Span,
}

impl TaskContext<'_> {
    /// Tracing span of the running task, useful for attaching progress
    /// messages to it.
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn build_dir_defaults_inside_project() {
        let env = Environment::new("/work/app");
        assert_eq!(env.build_dir(), "/work/app/build");

        let env = env.with_build_dir("/tmp/out");
        assert_eq!(env.build_dir(), "/tmp/out");
        assert_eq!(env.project_dir(), "/work/app");
    }

    #[test]
    fn capabilities_follow_platform() {
        assert_eq!(Capabilities::probe().kill_descendants, cfg!(unix));
    }
}

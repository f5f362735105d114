use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors of the fallback resolution which turns the run configuration and
/// the overrides into a fork configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error(
        "No main class to launch: neither the override configuration nor the run task provides one"
    )]
    MissingMainClass,
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Couldn't start '{0}':\n{1}")]
    Spawn(String, std::io::Error),

    #[error("Couldn't open process log file '{0}':\n{1}")]
    Log(Utf8PathBuf, std::io::Error),

    #[error("Couldn't stop process {0}:\n{1}")]
    Stop(u32, std::io::Error),

    #[cfg(unix)]
    #[error("Couldn't signal process group {0}:\n{1}")]
    Signal(u32, nix::errno::Errno),

    #[error("Process {pid} exited before it became ready (exit code {code:?})")]
    Exited { pid: u32, code: Option<i32> },

    #[error("Process {pid} did not start listening on port {port} within {secs}s")]
    NotReady { pid: u32, port: u16, secs: u64 },
}

#[derive(Debug, Error)]
pub enum DocsError {
    #[error("Couldn't build the HTTP client:\n{0}")]
    Client(reqwest::Error),

    #[error("Invalid request header '{0}'")]
    Header(String),

    #[error("The forked application stopped before '{0}' could be downloaded")]
    ProcessExited(String),

    #[error("'{url}' did not answer successfully within {secs}s (last status: {last})")]
    Timeout { url: String, secs: u64, last: String },

    #[error("Couldn't read the response of '{0}':\n{1}")]
    Body(String, reqwest::Error),

    #[error("Couldn't write '{0}':\n{1}")]
    Write(Utf8PathBuf, std::io::Error),

    #[error("Output file name '{0}' must be a plain file name")]
    FileName(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read configuration file '{0}':\n{1}")]
    Read(Utf8PathBuf, std::io::Error),

    #[error("Couldn't parse configuration:\n{0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Cycle detected in task graph at task '{0}'")]
    Cycle(String),

    #[error("Task '{0}':\n{1:#}")]
    Task(String, anyhow::Error),

    #[error("Couldn't stop '{0}':\n{1:#}")]
    Stop(String, anyhow::Error),

    #[error("Couldn't start the task workers:\n{0}")]
    Pool(rayon::ThreadPoolBuildError),
}

impl BuildError {
    /// The error a failing task returned, if that is what this is.
    pub fn task_error(&self) -> Option<&anyhow::Error> {
        match self {
            BuildError::Task(_, err) => Some(err),
            _ => None,
        }
    }
}

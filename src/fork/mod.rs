//! The fork task: starts the target application in the background and keeps
//! it alive until it is told to stop.

mod process;

use std::net::{SocketAddr, TcpStream};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::core::TaskContext;
use crate::engine::Stoppable;
use crate::error::LaunchError;
use crate::overrides::OverrideConfiguration;
use crate::resolve::{ForkConfiguration, ForkDefaults, resolve};
use crate::run::RunConfiguration;

pub use process::{JavaLauncher, OsProcess};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Starts processes from a resolved configuration.
pub trait Launcher: Send + Sync {
    fn launch(&self, config: &ForkConfiguration) -> Result<Box<dyn Forked>, LaunchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    /// The process is gone, with its exit code when it has one.
    Exited(Option<i32>),
}

/// A process started by a [`Launcher`].
pub trait Forked: Send {
    fn id(&self) -> u32;
    fn state(&mut self) -> ProcessState;
    /// Stops the process. Stopping a process which already exited is not an
    /// error.
    fn stop(&mut self) -> Result<(), LaunchError>;
}

/// Options of the fork task which are not part of the launch configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForkOptions {
    /// The fork task only completes once something listens on this port.
    pub wait_for_port: Option<u16>,
    pub port_timeout_in_seconds: u64,
    /// Files receiving the output of the forked process, discarded if unset.
    pub stdout: Option<Utf8PathBuf>,
    pub stderr: Option<Utf8PathBuf>,
    /// Stop the processes spawned by the forked one together with it, where
    /// the platform allows.
    pub kill_descendants: bool,
    /// The `java` executable, `JAVA_HOME` or `PATH` is used if unset.
    pub java: Option<Utf8PathBuf>,
}

impl Default for ForkOptions {
    fn default() -> Self {
        Self {
            wait_for_port: None,
            port_timeout_in_seconds: 60,
            stdout: None,
            stderr: None,
            kill_descendants: true,
            java: None,
        }
    }
}

impl ForkOptions {
    /// The launcher these options describe.
    pub fn launcher(&self) -> JavaLauncher {
        let launcher = match &self.java {
            Some(java) => JavaLauncher::new(java.clone()),
            None => JavaLauncher::from_env(),
        };

        launcher
            .stdout(self.stdout.clone())
            .stderr(self.stderr.clone())
    }
}

/// The output of the fork task, a live handle to the forked application.
///
/// The process is owned exclusively by this value. It is stopped through
/// [`ForkedApp::stop`], normally by a stop-after relation, and at the latest
/// when the value is dropped.
pub struct ForkedApp {
    name: String,
    pid: u32,
    config: ForkConfiguration,
    process: Mutex<Option<Box<dyn Forked>>>,
}

impl ForkedApp {
    pub fn new(name: impl Into<String>, config: ForkConfiguration, process: Box<dyn Forked>) -> Self {
        Self {
            name: name.into(),
            pid: process.id(),
            config,
            process: Mutex::new(Some(process)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The configuration the process was launched with.
    pub fn config(&self) -> &ForkConfiguration {
        &self.config
    }

    fn process(&self) -> MutexGuard<'_, Option<Box<dyn Forked>>> {
        self.process.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ProcessState {
        match self.process().as_mut() {
            Some(process) => process.state(),
            None => ProcessState::Exited(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == ProcessState::Running
    }

    /// Stops the process. Only the first call does anything.
    pub fn stop(&self) -> Result<(), LaunchError> {
        let process = self.process().take();

        if let Some(mut process) = process {
            tracing::info!(pid = self.pid, "stopping {}", self.name);
            process.stop()?;
        }

        Ok(())
    }

    /// Blocks until something accepts connections on `port` at localhost.
    pub fn wait_for_port(&self, port: u16, timeout: Duration) -> Result<(), LaunchError> {
        let address = SocketAddr::from(([127, 0, 0, 1], port));
        let deadline = Instant::now() + timeout;

        tracing::info!(pid = self.pid, "waiting for port {port}");

        loop {
            if let ProcessState::Exited(code) = self.state() {
                return Err(LaunchError::Exited {
                    pid: self.pid,
                    code,
                });
            }

            if TcpStream::connect_timeout(&address, POLL_INTERVAL).is_ok() {
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(LaunchError::NotReady {
                    pid: self.pid,
                    port,
                    secs: timeout.as_secs(),
                });
            }

            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Stoppable for ForkedApp {
    fn stop(&self) -> anyhow::Result<()> {
        Ok(ForkedApp::stop(self)?)
    }
}

impl Drop for ForkedApp {
    fn drop(&mut self) {
        if let Err(err) = ForkedApp::stop(self) {
            tracing::error!("failed to stop {}: {err}", self.name);
        }
    }
}

impl std::fmt::Debug for ForkedApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForkedApp")
            .field("name", &self.name)
            .field("pid", &self.pid)
            .field("main_class", &self.config.main_class)
            .finish()
    }
}

/// Body of the fork task.
///
/// Resolves the launch configuration at the last possible moment, launches
/// the process, and waits for its port if asked to. A process which never
/// became ready is stopped before the error is returned.
pub(crate) fn fork(
    ctx: &TaskContext,
    run: &RunConfiguration,
    custom: &OverrideConfiguration,
    options: &ForkOptions,
    launcher: &dyn Launcher,
) -> anyhow::Result<ForkedApp> {
    let defaults = ForkDefaults {
        working_dir: ctx.env.project_dir.clone(),
        kill_descendants: options.kill_descendants,
    };

    let config = resolve(run, custom, &defaults, ctx.env.capabilities)?;

    tracing::info!(
        main = %config.main_class,
        dir = %config.working_dir,
        "forking application"
    );

    let s = Instant::now();
    let process = launcher.launch(&config)?;
    let app = ForkedApp::new(ctx.name, config, process);

    if let Some(port) = options.wait_for_port {
        let timeout = Duration::from_secs(options.port_timeout_in_seconds);
        if let Err(err) = app.wait_for_port(port, timeout) {
            app.stop()?;
            return Err(err.into());
        }
    }

    tracing::info!(
        "{} is running as pid {} {}",
        ctx.name,
        app.pid(),
        crate::utils::as_overhead(s)
    );

    Ok(app)
}

#[cfg(test)]
mod test {
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    struct Fake {
        stopped: Arc<AtomicBool>,
        exited: bool,
    }

    impl Forked for Fake {
        fn id(&self) -> u32 {
            42
        }

        fn state(&mut self) -> ProcessState {
            if self.exited || self.stopped.load(Ordering::SeqCst) {
                ProcessState::Exited(Some(1))
            } else {
                ProcessState::Running
            }
        }

        fn stop(&mut self) -> Result<(), LaunchError> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config() -> ForkConfiguration {
        ForkConfiguration {
            system_properties: Default::default(),
            working_dir: "/".into(),
            args: vec![],
            classpath: vec![],
            main_class: "com.example.App".into(),
            jvm_args: vec![],
            environment: Default::default(),
            kill_descendants: true,
        }
    }

    fn app(exited: bool) -> (ForkedApp, Arc<AtomicBool>) {
        let stopped = Arc::new(AtomicBool::new(false));
        let fake = Fake {
            stopped: stopped.clone(),
            exited,
        };
        (ForkedApp::new("fork", config(), Box::new(fake)), stopped)
    }

    #[test]
    fn stop_is_idempotent() {
        let (app, stopped) = app(false);
        assert!(app.is_running());

        app.stop().unwrap();
        app.stop().unwrap();

        assert!(stopped.load(Ordering::SeqCst));
        assert!(!app.is_running());
    }

    #[test]
    fn dropping_stops_the_process() {
        let (app, stopped) = app(false);
        drop(app);
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn port_wait_succeeds_once_listening() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let (app, _) = app(false);
        app.wait_for_port(port, Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn port_wait_fails_when_process_exits() {
        let (app, _) = app(true);
        let err = app.wait_for_port(1, Duration::from_secs(5)).unwrap_err();
        assert!(matches!(
            err,
            LaunchError::Exited {
                pid: 42,
                code: Some(1)
            }
        ));
    }

    #[test]
    fn port_wait_times_out() {
        // Bind and drop to find a port nobody listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let (app, _) = app(false);
        let err = app.wait_for_port(port, Duration::ZERO).unwrap_err();
        assert!(matches!(err, LaunchError::NotReady { .. }));
    }

    #[test]
    fn options_default_to_descendant_kill() {
        let options: ForkOptions = serde_json::from_str(r#"{"wait_for_port": 8080}"#).unwrap();
        assert!(options.kill_descendants);
        assert_eq!(options.port_timeout_in_seconds, 60);
        assert_eq!(options.wait_for_port, Some(8080));
    }
}

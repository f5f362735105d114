use std::fs::{self, File};
use std::io;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;

use super::{Forked, Launcher, ProcessState};
use crate::error::LaunchError;
use crate::resolve::ForkConfiguration;

/// How long a process gets to exit after SIGTERM before it is killed.
const STOP_GRACE: Duration = Duration::from_secs(10);

/// Launches the configured main class on a JVM.
#[derive(Debug, Clone)]
pub struct JavaLauncher {
    java: Utf8PathBuf,
    stdout: Option<Utf8PathBuf>,
    stderr: Option<Utf8PathBuf>,
}

impl JavaLauncher {
    pub fn new(java: impl Into<Utf8PathBuf>) -> Self {
        Self {
            java: java.into(),
            stdout: None,
            stderr: None,
        }
    }

    /// `$JAVA_HOME/bin/java`, or `java` from the `PATH`.
    pub fn from_env() -> Self {
        let java = match std::env::var("JAVA_HOME") {
            Ok(home) if !home.is_empty() => {
                let name = if cfg!(windows) { "java.exe" } else { "java" };
                Utf8PathBuf::from(home).join("bin").join(name)
            }
            _ => Utf8PathBuf::from("java"),
        };

        Self::new(java)
    }

    pub fn stdout(mut self, path: Option<Utf8PathBuf>) -> Self {
        self.stdout = path;
        self
    }

    pub fn stderr(mut self, path: Option<Utf8PathBuf>) -> Self {
        self.stderr = path;
        self
    }

    pub fn executable(&self) -> &Utf8PathBuf {
        &self.java
    }

    /// Arguments passed to the executable, in JVM order.
    pub fn command_line(&self, config: &ForkConfiguration) -> Vec<String> {
        let mut argv = config.jvm_args.clone();

        argv.extend(
            config
                .system_properties
                .iter()
                .map(|(key, value)| format!("-D{key}={value}")),
        );

        if !config.classpath.is_empty() {
            let separator = if cfg!(windows) { ";" } else { ":" };
            let classpath = config
                .classpath
                .iter()
                .map(|entry| entry.as_str())
                .collect::<Vec<_>>()
                .join(separator);

            argv.push("-cp".into());
            argv.push(classpath);
        }

        argv.push(config.main_class.clone());
        argv.extend(config.args.iter().cloned());
        argv
    }
}

fn log_file(path: Option<&Utf8PathBuf>) -> Result<Stdio, LaunchError> {
    let Some(path) = path else {
        return Ok(Stdio::null());
    };

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| LaunchError::Log(path.clone(), e))?;
    }

    let file = File::create(path).map_err(|e| LaunchError::Log(path.clone(), e))?;
    Ok(Stdio::from(file))
}

impl Launcher for JavaLauncher {
    fn launch(&self, config: &ForkConfiguration) -> Result<Box<dyn Forked>, LaunchError> {
        let mut command = Command::new(self.java.as_std_path());

        command
            .args(self.command_line(config))
            .current_dir(&config.working_dir)
            .env_clear()
            .envs(&config.environment)
            .stdin(Stdio::null())
            .stdout(log_file(self.stdout.as_ref())?)
            .stderr(log_file(self.stderr.as_ref())?);

        let process = OsProcess::spawn(command, config.kill_descendants)
            .map_err(|e| LaunchError::Spawn(self.java.to_string(), e))?;

        Ok(Box::new(process))
    }
}

/// An operating system process.
///
/// With `kill_descendants` the process leads its own process group and the
/// whole group is signalled when it is stopped.
#[derive(Debug)]
pub struct OsProcess {
    child: Child,
    group: bool,
    stopped: bool,
}

impl OsProcess {
    pub fn spawn(mut command: Command, kill_descendants: bool) -> io::Result<Self> {
        let group = kill_descendants && cfg!(unix);
        if group {
            own_group(&mut command);
        }

        let child = command.spawn()?;
        tracing::debug!(pid = child.id(), group, "spawned process");

        Ok(Self {
            child,
            group,
            stopped: false,
        })
    }

    fn kill(&mut self) -> Result<(), LaunchError> {
        let pid = self.child.id();

        match self.child.kill() {
            Ok(()) => {}
            // Exited in the meantime.
            Err(err) if err.kind() == io::ErrorKind::InvalidInput => {}
            Err(err) => return Err(LaunchError::Stop(pid, err)),
        }

        self.child.wait().map_err(|e| LaunchError::Stop(pid, e))?;
        Ok(())
    }

    /// Signals the whole group even when the leader is gone, descendants may
    /// still be in it. The leader is reaped along the way.
    #[cfg(unix)]
    fn stop_group(&mut self) -> Result<(), LaunchError> {
        use nix::sys::signal::Signal;

        let pid = self.child.id();
        signal_group(pid, Signal::SIGTERM)?;

        let deadline = Instant::now() + STOP_GRACE;
        loop {
            self.child.try_wait().map_err(|e| LaunchError::Stop(pid, e))?;

            if !group_alive(pid) {
                break;
            }
            if Instant::now() >= deadline {
                tracing::warn!(pid, "process group ignored SIGTERM, killing it");
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }

        signal_group(pid, Signal::SIGKILL)?;
        self.child.wait().map_err(|e| LaunchError::Stop(pid, e))?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn stop_group(&mut self) -> Result<(), LaunchError> {
        self.kill()
    }
}

impl Forked for OsProcess {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn state(&mut self) -> ProcessState {
        match self.child.try_wait() {
            Ok(None) => ProcessState::Running,
            Ok(Some(status)) => ProcessState::Exited(status.code()),
            Err(_) => ProcessState::Exited(None),
        }
    }

    fn stop(&mut self) -> Result<(), LaunchError> {
        if self.stopped {
            return Ok(());
        }

        let result = if self.group {
            self.stop_group()
        } else if let ProcessState::Exited(code) = self.state() {
            tracing::debug!(pid = self.child.id(), ?code, "process already exited");
            Ok(())
        } else {
            self.kill()
        };

        self.stopped = result.is_ok();
        result
    }
}

#[cfg(unix)]
fn own_group(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
fn own_group(_: &mut Command) {}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) -> Result<(), LaunchError> {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return Err(LaunchError::Signal(pid, Errno::EINVAL));
    };

    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(LaunchError::Signal(pid, errno)),
    }
}

/// Whether any process, zombies included, is left in the group.
#[cfg(unix)]
fn group_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };

    !matches!(killpg(Pid::from_raw(raw), None), Err(Errno::ESRCH))
}

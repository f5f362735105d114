use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// Launch configuration of the target application, as assembled by the run
/// task.
///
/// The fork task only ever reads it. The main class may still be unresolved
/// when the value is produced by a task that runs too early.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfiguration {
    pub system_properties: BTreeMap<String, String>,
    pub working_dir: Option<Utf8PathBuf>,
    pub args: Vec<String>,
    pub classpath: Vec<Utf8PathBuf>,
    pub main_class: Option<String>,
    pub jvm_args: Vec<String>,
    pub environment: BTreeMap<String, String>,
}

impl RunConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from the environment of the current process, the way a
    /// foreground run would see it.
    pub fn inherit_environment(mut self) -> Self {
        self.environment.extend(std::env::vars());
        self
    }

    pub fn main_class(mut self, main_class: impl Into<String>) -> Self {
        self.main_class = Some(main_class.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn classpath_entry(mut self, entry: impl Into<Utf8PathBuf>) -> Self {
        self.classpath.push(entry.into());
        self
    }

    pub fn jvm_arg(mut self, arg: impl Into<String>) -> Self {
        self.jvm_args.push(arg.into());
        self
    }

    pub fn system_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.system_properties.insert(key.into(), value.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }
}

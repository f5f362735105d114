//! Fallback resolution of the configuration a forked process is launched
//! with.
//!
//! Every field follows the same rule: a value the caller set and which is not
//! empty wins, otherwise the run task's value is used. The exceptions are the
//! working directory, which falls back to the fork task's own default, and the
//! class path system property, which is never inherited.

use std::collections::BTreeMap;

use camino::Utf8PathBuf;

use crate::core::Capabilities;
use crate::error::ResolveError;
use crate::overrides::OverrideConfiguration;
use crate::run::RunConfiguration;

/// Prefix of the system properties which describe the class path. The
/// forked process derives them from its own `-cp`.
pub const CLASS_PATH_PROPERTY: &str = "java.class.path";

/// Defaults owned by the fork task itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkDefaults {
    pub working_dir: Utf8PathBuf,
    pub kill_descendants: bool,
}

impl ForkDefaults {
    pub fn new(working_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            kill_descendants: true,
        }
    }
}

/// The configuration a forked process is actually launched with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkConfiguration {
    pub system_properties: BTreeMap<String, String>,
    pub working_dir: Utf8PathBuf,
    pub args: Vec<String>,
    pub classpath: Vec<Utf8PathBuf>,
    pub main_class: String,
    pub jvm_args: Vec<String>,
    pub environment: BTreeMap<String, String>,
    /// Stop every process the forked one spawned together with it.
    pub kill_descendants: bool,
}

fn pick<'a, T>(custom: &'a Option<T>, base: &'a T, is_empty: impl Fn(&T) -> bool) -> &'a T {
    match custom {
        Some(value) if !is_empty(value) => value,
        _ => base,
    }
}

/// Computes the fork configuration from the run task's configuration and
/// the caller's overrides.
///
/// This has to run right before the fork task launches, the run
/// configuration is not final any earlier.
pub fn resolve(
    run: &RunConfiguration,
    custom: &OverrideConfiguration,
    defaults: &ForkDefaults,
    capabilities: Capabilities,
) -> Result<ForkConfiguration, ResolveError> {
    let system_properties = pick(&custom.system_properties, &run.system_properties, |v| {
        v.is_empty()
    })
    .iter()
    .filter(|(key, _)| !key.starts_with(CLASS_PATH_PROPERTY))
    .map(|(key, value)| (key.clone(), value.clone()))
    .collect();

    let working_dir = match &custom.working_dir {
        Some(dir) if !dir.as_str().is_empty() => dir.clone(),
        _ => defaults.working_dir.clone(),
    };

    let main_class = custom
        .main_class
        .as_deref()
        .filter(|main| !main.trim().is_empty())
        .or(run.main_class.as_deref())
        .filter(|main| !main.trim().is_empty())
        .ok_or(ResolveError::MissingMainClass)?
        .to_string();

    let kill_descendants = defaults.kill_descendants && capabilities.kill_descendants;
    if defaults.kill_descendants && !kill_descendants {
        tracing::debug!("descendant processes can't be stopped on this platform");
    }

    Ok(ForkConfiguration {
        system_properties,
        working_dir,
        args: pick(&custom.args, &run.args, Vec::is_empty).clone(),
        classpath: pick(&custom.classpath, &run.classpath, Vec::is_empty).clone(),
        main_class,
        jvm_args: pick(&custom.jvm_args, &run.jvm_args, Vec::is_empty).clone(),
        environment: pick(&custom.environment, &run.environment, BTreeMap::is_empty).clone(),
        kill_descendants,
    })
}

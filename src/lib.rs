#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod blueprint;
mod core;
pub mod docs;
mod engine;
mod error;
pub mod fork;
mod overrides;
pub mod plugin;
pub mod resolve;
mod run;
mod utils;

pub use crate::blueprint::{Blueprint, Pipeline, TaskBinder, TaskDef};
pub use crate::core::{Capabilities, Environment, TaskContext};
pub use crate::docs::{DocsSettings, GeneratedDoc, GeneratedDocs};
pub use crate::engine::{Dependencies, Diagnostics, Handle, Stoppable, TaskExecution, TaskId};
pub use crate::error::*;
pub use crate::fork::{ForkOptions, ForkedApp, JavaLauncher, Launcher};
pub use crate::overrides::OverrideConfiguration;
pub use crate::plugin::{OpenApi, OpenApiTasks};
pub use crate::resolve::{ForkConfiguration, ForkDefaults, resolve};
pub use crate::run::RunConfiguration;
pub use crate::utils::as_overhead;

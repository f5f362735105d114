//! The `openApi` extension and the tasks it installs into a blueprint.

use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::blueprint::Blueprint;
use crate::core::Environment;
use crate::docs::{self, DocsSettings, GeneratedDocs};
use crate::engine::Handle;
use crate::error::ConfigError;
use crate::fork::{self, ForkOptions, ForkedApp, Launcher};
use crate::overrides::OverrideConfiguration;
use crate::run::RunConfiguration;

pub const FORK_TASK_NAME: &str = "forkedRun";
pub const DOCS_TASK_NAME: &str = "generateOpenApiDocs";
/// Stands in for the task resolving the main class when the caller has none.
pub const MARKER_TASK_NAME: &str = "runMainClassName";

/// Configuration of the generated API documents and of the application run
/// that serves them. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OpenApi {
    pub api_docs_url: String,
    /// Defaults to the build directory.
    pub output_dir: Option<Utf8PathBuf>,
    pub output_file_name: String,
    pub wait_time_in_seconds: u64,
    /// URL to file name. When not empty it replaces the single URL and file.
    pub grouped_api_mappings: BTreeMap<String, String>,
    pub request_headers: BTreeMap<String, String>,
    /// Replacements for the run task's configuration.
    pub custom_run: OverrideConfiguration,
    pub fork: ForkOptions,
}

impl Default for OpenApi {
    fn default() -> Self {
        Self {
            api_docs_url: "http://localhost:8080/v3/api-docs".into(),
            output_dir: None,
            output_file_name: "openapi.json".into(),
            wait_time_in_seconds: 30,
            grouped_api_mappings: BTreeMap::new(),
            request_headers: BTreeMap::new(),
            custom_run: OverrideConfiguration::default(),
            fork: ForkOptions::default(),
        }
    }
}

/// Handles of the tasks installed by [`OpenApi::install`].
#[derive(Debug, Clone, Copy)]
pub struct OpenApiTasks {
    pub fork: Handle<ForkedApp>,
    pub docs: Handle<GeneratedDocs>,
    /// The marker task, if one had to be created.
    pub marker: Option<Handle<RunConfiguration>>,
    /// The task the fork task takes its run configuration from.
    pub ready: Handle<RunConfiguration>,
}

impl OpenApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_owned(), e))?;
        Self::from_json(&text)
    }

    pub fn api_docs_url(mut self, url: impl Into<String>) -> Self {
        self.api_docs_url = url.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn output_file_name(mut self, name: impl Into<String>) -> Self {
        self.output_file_name = name.into();
        self
    }

    pub fn wait_time_in_seconds(mut self, secs: u64) -> Self {
        self.wait_time_in_seconds = secs;
        self
    }

    pub fn grouped_api_mapping(mut self, url: impl Into<String>, file: impl Into<String>) -> Self {
        self.grouped_api_mappings.insert(url.into(), file.into());
        self
    }

    pub fn request_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request_headers.insert(name.into(), value.into());
        self
    }

    pub fn custom_run(mut self, custom: OverrideConfiguration) -> Self {
        self.custom_run = custom;
        self
    }

    pub fn fork_options(mut self, options: ForkOptions) -> Self {
        self.fork = options;
        self
    }

    /// The download plan of the document task in `env`.
    pub fn docs_settings(&self, env: &Environment) -> DocsSettings {
        let mappings = if self.grouped_api_mappings.is_empty() {
            vec![(self.api_docs_url.clone(), self.output_file_name.clone())]
        } else {
            self.grouped_api_mappings
                .iter()
                .map(|(url, file)| (url.clone(), file.clone()))
                .collect()
        };

        DocsSettings {
            mappings,
            output_dir: self
                .output_dir
                .clone()
                .unwrap_or_else(|| env.build_dir.clone()),
            wait_time: Duration::from_secs(self.wait_time_in_seconds),
            headers: self.request_headers.clone(),
        }
    }

    /// Installs the fork and document tasks, launching the application on a
    /// JVM.
    ///
    /// `ready` is the task which, once finished, makes the run configuration
    /// resolvable. Without one, a marker task depending on `run` is added in
    /// its place.
    pub fn install(
        self,
        blueprint: &mut Blueprint,
        run: Handle<RunConfiguration>,
        ready: Option<Handle<RunConfiguration>>,
    ) -> OpenApiTasks {
        let launcher = Arc::new(self.fork.launcher());
        self.install_with(blueprint, run, ready, launcher)
    }

    /// Same as [`OpenApi::install`], with a custom way to launch processes.
    pub fn install_with(
        self,
        blueprint: &mut Blueprint,
        run: Handle<RunConfiguration>,
        ready: Option<Handle<RunConfiguration>>,
        launcher: Arc<dyn Launcher>,
    ) -> OpenApiTasks {
        let (ready, marker) = match ready {
            Some(ready) => (ready, None),
            None => {
                let marker = blueprint
                    .task()
                    .name(MARKER_TASK_NAME)
                    .depends_on(run)
                    .run(|_, run| Ok(run.clone()));
                (marker, Some(marker))
            }
        };

        let extension = Arc::new(self);

        let fork = {
            let extension = extension.clone();
            blueprint
                .task()
                .name(FORK_TASK_NAME)
                .depends_on(ready)
                .run(move |ctx, run| {
                    fork::fork(
                        ctx,
                        run,
                        &extension.custom_run,
                        &extension.fork,
                        launcher.as_ref(),
                    )
                })
        };

        let docs = blueprint
            .task()
            .name(DOCS_TASK_NAME)
            .depends_on(fork)
            .run(move |ctx, app| {
                let settings = extension.docs_settings(ctx.env);
                Ok(docs::generate(ctx, app, &settings)?)
            });

        // The application has to outlive the download, and not a moment more.
        blueprint.stop_after(fork, docs);

        OpenApiTasks {
            fork,
            docs,
            marker,
            ready,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_match_the_usual_server() {
        let openapi = OpenApi::from_json("{}").unwrap();
        assert_eq!(openapi, OpenApi::default());

        let settings = openapi.docs_settings(&Environment::new("/work"));
        assert_eq!(
            settings.mappings,
            vec![(
                "http://localhost:8080/v3/api-docs".to_string(),
                "openapi.json".to_string()
            )]
        );
        assert_eq!(settings.output_dir, "/work/build");
        assert_eq!(settings.wait_time, Duration::from_secs(30));
    }

    #[test]
    fn grouped_mappings_replace_single_url() {
        let openapi = OpenApi::new()
            .api_docs_url("http://localhost:9000/ignored")
            .grouped_api_mapping("http://localhost:8080/v3/api-docs/a", "a.json")
            .grouped_api_mapping("http://localhost:8080/v3/api-docs/b", "b.json")
            .output_dir("/docs");

        let settings = openapi.docs_settings(&Environment::new("/work"));
        assert_eq!(settings.mappings.len(), 2);
        assert_eq!(settings.mappings[0].1, "a.json");
        assert_eq!(settings.output_dir, "/docs");
    }

    #[test]
    fn parses_nested_configuration() {
        let openapi = OpenApi::from_json(
            r#"{
                "output_file_name": "swagger.json",
                "request_headers": {"x-token": "secret"},
                "custom_run": {"main_class": "com.example.Docs", "args": ["--port=9001"]},
                "fork": {"wait_for_port": 9001}
            }"#,
        )
        .unwrap();

        assert_eq!(openapi.output_file_name, "swagger.json");
        assert_eq!(openapi.custom_run.main_class.as_deref(), Some("com.example.Docs"));
        assert_eq!(openapi.fork.wait_for_port, Some(9001));
        assert!(openapi.fork.kill_descendants);
    }

    #[test]
    fn unknown_keys_are_errors() {
        let err = OpenApi::from_json(r#"{"apiDocsUrl": "x"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = OpenApi::load("/nonexistent/openapi.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read(..)));
    }

    #[test]
    fn marker_is_added_without_ready_task() {
        let mut blueprint = Blueprint::new();
        let run = blueprint
            .task()
            .name("run")
            .run(|_| Ok(RunConfiguration::new()));

        let tasks = OpenApi::new().install(&mut blueprint, run, None);
        let marker = tasks.marker.unwrap();

        assert_eq!(tasks.ready, marker);
        assert_eq!(blueprint.name_of(marker), MARKER_TASK_NAME);
        assert_eq!(blueprint.dependencies_of(marker), vec![run.id()]);
        assert_eq!(blueprint.dependencies_of(tasks.fork), vec![marker.id()]);
        assert_eq!(blueprint.dependencies_of(tasks.docs), vec![tasks.fork.id()]);
        assert_eq!(blueprint.stop_target_of(tasks.fork), Some(tasks.docs.id()));
    }

    #[test]
    fn ready_task_is_used_as_is() {
        let mut blueprint = Blueprint::new();
        let run = blueprint
            .task()
            .name("run")
            .run(|_| Ok(RunConfiguration::new()));
        let ready = blueprint
            .task()
            .name("resolveMainClass")
            .depends_on(run)
            .run(|_, run| Ok(run.clone().main_class("com.example.App")));

        let tasks = OpenApi::new().install(&mut blueprint, run, Some(ready));

        assert!(tasks.marker.is_none());
        assert!(blueprint.find(MARKER_TASK_NAME).is_none());
        assert_eq!(blueprint.len(), 4);
        assert_eq!(blueprint.dependencies_of(tasks.fork), vec![ready.id()]);
        assert_eq!(blueprint.name_of(tasks.fork), FORK_TASK_NAME);
        assert_eq!(blueprint.name_of(tasks.docs), DOCS_TASK_NAME);
    }
}

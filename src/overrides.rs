use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// Caller supplied replacements for the run configuration.
///
/// Every field is optional. `None` means "take the value of the run task",
/// and so does an empty collection: only a value that is set and non-empty
/// replaces what the run task provides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OverrideConfiguration {
    pub system_properties: Option<BTreeMap<String, String>>,
    pub working_dir: Option<Utf8PathBuf>,
    pub args: Option<Vec<String>>,
    pub classpath: Option<Vec<Utf8PathBuf>>,
    pub main_class: Option<String>,
    pub jvm_args: Option<Vec<String>>,
    pub environment: Option<BTreeMap<String, String>>,
}

impl OverrideConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn system_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.system_properties
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    pub fn classpath<I, P>(mut self, classpath: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Utf8PathBuf>,
    {
        self.classpath = Some(classpath.into_iter().map(Into::into).collect());
        self
    }

    pub fn main_class(mut self, main_class: impl Into<String>) -> Self {
        self.main_class = Some(main_class.into());
        self
    }

    pub fn jvm_args<I, S>(mut self, jvm_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.jvm_args = Some(jvm_args.into_iter().map(Into::into).collect());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unset_differs_from_empty() {
        let unset: OverrideConfiguration = serde_json::from_str("{}").unwrap();
        assert_eq!(unset.args, None);

        let empty: OverrideConfiguration = serde_json::from_str(r#"{"args": []}"#).unwrap();
        assert_eq!(empty.args, Some(vec![]));
    }

    #[test]
    fn builder_accumulates_maps() {
        let overrides = OverrideConfiguration::new()
            .env("A", "1")
            .env("B", "2")
            .system_property("app.mode", "docs");

        assert_eq!(overrides.environment.as_ref().map(BTreeMap::len), Some(2));
        assert_eq!(
            overrides.system_properties.unwrap().get("app.mode").unwrap(),
            "docs"
        );
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result = serde_json::from_str::<OverrideConfiguration>(r#"{"mainClas": "x"}"#);
        assert!(result.is_err());
    }
}

//! Scenario replay: drives a store from a scripted provider.
//!
//! A scenario file names a provider, its settings and a list of steps.
//! Steps either play the provider side (`changed`, `removed`, `clear`,
//! `destroy`) or the reader side (`subscribe`, `subscribe_all`, `write`).
//! Every listener call is captured in a transcript.
//!
//! ```yaml
//! provider: robot
//! settings:
//!   echo_writes: true
//! steps:
//!   - op: subscribe
//!     path: /drive
//!   - op: changed
//!     values:
//!       /Drive/Speed: 1.5
//!   - op: write
//!     path: /drive
//!     key: speed
//!     value: 2.0
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;
use std::path::Path;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::binding::SourceValue;
use crate::error::StoreError;
use crate::provider::{
    ProviderContext, ProviderRegistry, ProviderSettings, ProviderType, SourceProvider,
};
use crate::store::SourceStore;
use crate::view::SourceView;

/// Provider type name registered by [`Scenario::run`].
pub const SCENARIO_PROVIDER_TYPE: &str = "scenario";


/// A scripted session against one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Provider instance name. Defaults to "scenario".
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Provider settings, merged over the scenario provider's defaults.
    #[serde(default)]
    pub settings: ProviderSettings,

    #[serde(default)]
    pub steps: Vec<Step>,
}


/// One scenario step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// Provider reports new or changed values, applied in file order.
    Changed { values: IndexMap<String, Value> },
    /// Provider withdraws values.
    Removed { keys: Vec<String> },
    /// Reader writes `value` to child `key` of the composite at `path`.
    Write { path: String, key: String, value: Value },
    /// Provider resets its tree.
    Clear,
    /// Provider is removed from the registry.
    Destroy,
    /// Reader listens at `path`.
    Subscribe {
        path: String,
        #[serde(default)]
        immediate: bool,
    },
    /// Reader listens to every path.
    SubscribeAll {
        #[serde(default)]
        immediate: bool,
    },
}


fn default_provider() -> String {
    "scenario".into()
}


/// One listener call captured during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptEntry {
    /// Index of the step that caused the call.
    pub step: usize,
    /// Subscribed path, or `*` for a wildcard listener.
    pub listener: String,
    /// Changed path.
    pub path: String,
    /// Value passed to the listener as JSON, `None` for removals.
    pub value: Option<Value>,
}

impl fmt::Display for TranscriptEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} <- {}: ", self.step, self.listener, self.path)?;
        match &self.value {
            Some(value) => write!(f, "{}", value),
            None => write!(f, "(removed)"),
        }
    }
}


/// A user write received by the scenario provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedWrite {
    pub step: usize,
    pub key: String,
    pub value: Value,
}


/// Result of [`Scenario::run`].
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioRun {
    pub transcript: Vec<TranscriptEntry>,
    pub writes: Vec<RecordedWrite>,
    /// Display model of the provider's tree after the last step.
    pub view: Vec<SourceView>,
}


// ---------------------------------------------------------------------------
// Scenario provider
// ---------------------------------------------------------------------------

/// Provider that records user writes and optionally echoes them back.
///
/// With `echo_writes`, every write is re-reported as a changed value, the
/// way a live device would confirm a setpoint.
pub struct ScenarioProvider {
    name: String,
    store: SourceStore,
    echo_writes: bool,
    step: Rc<Cell<usize>>,
    writes: Rc<RefCell<Vec<RecordedWrite>>>,
}

impl ScenarioProvider {
    /// Provider type whose instances share `writes` and read `step`.
    pub fn provider_type(
        step: Rc<Cell<usize>>,
        writes: Rc<RefCell<Vec<RecordedWrite>>>,
    ) -> ProviderType {
        ProviderType::new(SCENARIO_PROVIDER_TYPE, move |ctx: ProviderContext| {
            let echo_writes = ctx.settings.get_or("echo_writes", false)?;
            let provider: Rc<dyn SourceProvider> = Rc::new(ScenarioProvider {
                name: ctx.name,
                store: ctx.store,
                echo_writes,
                step: step.clone(),
                writes: writes.clone(),
            });
            Ok(provider)
        })
        .with_defaults(ProviderSettings::new().with("echo_writes", Value::Bool(false)))
    }
}

impl SourceProvider for ScenarioProvider {
    fn write_from_user(&self, key: &str, value: Value) {
        self.writes.borrow_mut().push(RecordedWrite {
            step: self.step.get(),
            key: key.to_string(),
            value: value.clone(),
        });
        if self.echo_writes {
            self.store.sources_changed(&self.name, [(key, value)]);
        }
    }

    fn disconnect(&self) {
        debug!(provider = %self.name, "scenario provider disconnected");
    }
}


// ---------------------------------------------------------------------------
// Loading and running
// ---------------------------------------------------------------------------

impl Scenario {
    /// Parse a scenario from YAML (JSON is accepted too).
    pub fn from_yaml(content: &str) -> Result<Scenario, StoreError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load a scenario file.
    pub fn load(path: &Path) -> Result<Scenario, StoreError> {
        if !path.exists() {
            return Err(StoreError::ScenarioNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Scenario::from_yaml(&content)
    }

    /// Replay every step against a fresh store and registry.
    pub fn run(&self) -> Result<ScenarioRun, StoreError> {
        let store = SourceStore::new();
        let registry = ProviderRegistry::new(store.clone());
        let step = Rc::new(Cell::new(0));
        let writes = Rc::new(RefCell::new(Vec::new()));
        let transcript = Rc::new(RefCell::new(Vec::new()));

        registry.add_provider_type(ScenarioProvider::provider_type(step.clone(), writes.clone()));
        registry.add_provider(
            SCENARIO_PROVIDER_TYPE,
            Some(&self.provider),
            self.settings.clone(),
        )?;
        registry.set_default_provider(&self.provider);
        info!(provider = %self.provider, steps = self.steps.len(), "running scenario");

        for (index, current) in self.steps.iter().enumerate() {
            step.set(index);
            self.apply(current, &store, &registry, &step, &transcript)?;
        }

        let view = store.view(&self.provider).unwrap_or_default();
        let transcript = transcript.borrow().clone();
        let writes = writes.borrow().clone();
        Ok(ScenarioRun {
            transcript,
            writes,
            view,
        })
    }

    fn apply(
        &self,
        step: &Step,
        store: &SourceStore,
        registry: &ProviderRegistry,
        index: &Rc<Cell<usize>>,
        transcript: &Rc<RefCell<Vec<TranscriptEntry>>>,
    ) -> Result<(), StoreError> {
        let provider = self.provider.as_str();
        match step {
            Step::Changed { values } => {
                store.sources_changed(provider, values.iter().map(|(k, v)| (k, v.clone())));
            }
            Step::Removed { keys } => store.sources_removed(provider, keys),
            Step::Write { path, key, value } => {
                let accepted = store
                    .get_source(provider, path)
                    .and_then(|source| source.as_binding().cloned())
                    .map(|binding| binding.set(key, value.clone()))
                    .unwrap_or(false);
                if !accepted {
                    debug!(path = %path, key = %key, "write ignored");
                }
            }
            Step::Clear => store.clear_sources(provider),
            Step::Destroy => registry.remove_provider(provider)?,
            Step::Subscribe { path, immediate } => {
                let log = transcript.clone();
                let index = index.clone();
                store.subscribe(
                    provider,
                    path,
                    move |value, subscribed, changed| {
                        log.borrow_mut().push(entry(index.get(), subscribed, changed, value));
                    },
                    *immediate,
                );
            }
            Step::SubscribeAll { immediate } => {
                let log = transcript.clone();
                let index = index.clone();
                store.subscribe_all(
                    provider,
                    move |value, changed| {
                        log.borrow_mut().push(entry(index.get(), "*", changed, value));
                    },
                    *immediate,
                );
            }
        }
        Ok(())
    }
}

fn entry(step: usize, listener: &str, path: &str, value: Option<SourceValue>) -> TranscriptEntry {
    TranscriptEntry {
        step,
        listener: listener.to_string(),
        path: path.to_string(),
        value: value.map(|v| v.to_json()),
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(yaml: &str) -> ScenarioRun {
        Scenario::from_yaml(yaml).unwrap().run().unwrap()
    }

    fn lines(run: &ScenarioRun) -> Vec<String> {
        run.transcript.iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn parse_steps() {
        let scenario = Scenario::from_yaml(
            r#"
steps:
  - op: changed
    values:
      "/b": 1
      "/a": 2
  - op: removed
    keys: ["/a"]
  - op: subscribe
    path: /a
  - op: subscribe_all
    immediate: true
  - op: write
    path: /
    key: a
    value: 3
  - op: clear
  - op: destroy
"#,
        )
        .unwrap();

        assert_eq!(scenario.provider, "scenario");
        assert_eq!(scenario.steps.len(), 7);
        match &scenario.steps[0] {
            Step::Changed { values } => {
                let keys: Vec<&String> = values.keys().collect();
                assert_eq!(keys, vec!["/b", "/a"]);
            }
            other => panic!("unexpected step: {:?}", other),
        }
        assert_eq!(
            scenario.steps[2],
            Step::Subscribe { path: "/a".into(), immediate: false }
        );
        assert_eq!(scenario.steps[3], Step::SubscribeAll { immediate: true });
        assert_eq!(scenario.steps[5], Step::Clear);
        assert_eq!(scenario.steps[6], Step::Destroy);
    }

    #[test]
    fn parse_errors() {
        assert!(matches!(
            Scenario::from_yaml("steps:\n  - op: explode\n"),
            Err(StoreError::ScenarioParse(_))
        ));
        assert!(matches!(
            Scenario::load(Path::new("/nonexistent/scenario.yaml")),
            Err(StoreError::ScenarioNotFound(_))
        ));
    }

    #[test]
    fn transcript_of_change_and_removal() {
        let result = run(
            r#"
provider: robot
steps:
  - op: subscribe
    path: /x
  - op: subscribe_all
  - op: changed
    values:
      /x: 1
      /x/y: true
  - op: removed
    keys: [/x/y]
"#,
        );

        assert_eq!(
            lines(&result),
            vec![
                "#2 /x <- /x: 1",
                "#2 * <- /x: 1",
                "#2 /x <- /x/y: {\"y\":true}",
                "#2 * <- /x/y: true",
                "#3 /x <- /x: (removed)",
                "#3 * <- /x/y: (removed)",
            ]
        );
        // `/x` is still supplied and reverts to its leaf value.
        assert_eq!(result.view.len(), 1);
        let x = result.view[0].find("/x").unwrap();
        assert!(!x.has_children());
        assert_eq!(x.value.as_ref().map(|v| v.to_string()).as_deref(), Some("1"));
    }

    #[test]
    fn writes_are_recorded_not_applied() {
        let result = run(
            r#"
steps:
  - op: changed
    values:
      "/Drive/ Speed": 1.5
  - op: subscribe
    path: /drive/speed
  - op: write
    path: /drive
    key: speed
    value: 2.5
"#,
        );
        assert_eq!(
            result.writes,
            vec![RecordedWrite { step: 2, key: "/Drive/ Speed".into(), value: json!(2.5) }]
        );
        assert!(result.transcript.is_empty());
    }

    #[test]
    fn echoed_writes_become_current() {
        let result = run(
            r#"
settings:
  echo_writes: true
steps:
  - op: changed
    values:
      /drive/speed: 1.5
  - op: subscribe
    path: /drive/speed
    immediate: true
  - op: write
    path: /drive
    key: speed
    value: 2.5
"#,
        );
        assert_eq!(
            lines(&result),
            vec!["#1 /drive/speed <- /drive/speed: 1.5", "#2 /drive/speed <- /drive/speed: 2.5"]
        );
        assert_eq!(result.writes.len(), 1);
    }

    #[test]
    fn write_to_missing_path_is_ignored() {
        let result = run(
            r#"
steps:
  - op: write
    path: /nowhere
    key: x
    value: 1
"#,
        );
        assert!(result.writes.is_empty());
    }

    #[test]
    fn destroy_notifies_and_empties_view() {
        let result = run(
            r#"
steps:
  - op: changed
    values:
      a/b: 1
      c: 2
  - op: subscribe
    path: a
  - op: subscribe_all
  - op: destroy
"#,
        );
        assert_eq!(
            lines(&result),
            vec!["#3 a <- a: (removed)", "#3 * <- a/b: (removed)", "#3 * <- c: (removed)"]
        );
        assert!(result.view.is_empty());
    }

    #[test]
    fn invalid_setting_fails_run() {
        let scenario = Scenario::from_yaml("settings:\n  echo_writes: sometimes\n").unwrap();
        assert!(matches!(
            scenario.run(),
            Err(StoreError::InvalidSetting { .. })
        ));
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{env, fs, path::Path, path::PathBuf};

/// How the orchestrator selects the next batch starting at a plan's cursor.
///
/// `PositionCoupled` is the literal position-coupled tie-break and is kept
/// for callers that depend on it. `ContiguousRun` is the hardened default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchSelection {
    /// Include the maximal run of items sharing the batch index of the
    /// item at the cursor.
    #[default]
    ContiguousRun,
    /// Include items, in order, whose batch index equals the cursor's
    /// position at the moment each item is inspected. When nothing matches,
    /// the item at the cursor is dispatched alone. Plans this rule would
    /// mis-batch are rejected at submission.
    PositionCoupled,
}

/// Whether earliest-start and deadline timestamps gate execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingPolicy {
    /// Timestamps are carried as data only.
    #[default]
    Informational,
    /// Executors wait for `earliest_start` and fail items that run past `deadline`.
    Enforce,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub batch_selection: BatchSelection,
    #[serde(default)]
    pub timing: TimingPolicy,
    /// Capacity of the plan event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            batch_selection: BatchSelection::default(),
            timing: TimingPolicy::default(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl OrchestratorConfig {
    /// Load the configuration, falling back to defaults when no file is found.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        match resolve_config_path(explicit)? {
            Some(path) => {
                tracing::info!("Loading orchestrator config from {}", path.display());
                Self::from_file(&path)
            }
            None => {
                tracing::debug!("No orchestrator config found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&raw)?;
        let cfg: OrchestratorConfig = serde_json::from_value(expand_value(value))?;

        if cfg.event_capacity == 0 {
            return Err(anyhow::anyhow!(
                "`event_capacity` in {} must be greater than zero",
                path.display()
            ));
        }

        Ok(cfg)
    }
}

/// Find the config file: an explicit path, then `ORCHESTRATOR_CONFIG`, then
/// `$XDG_CONFIG_HOME/batch-orchestrator/config.json`, then `./orchestrator.json`.
pub fn resolve_config_path(explicit: Option<&Path>) -> anyhow::Result<Option<PathBuf>> {
    if let Some(p) = explicit {
        if !p.exists() {
            return Err(anyhow::anyhow!("Config file {} does not exist", p.display()));
        }
        return Ok(Some(p.to_path_buf()));
    }

    if let Ok(p) = env::var("ORCHESTRATOR_CONFIG") {
        return Ok(Some(PathBuf::from(p)));
    }

    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let candidate = PathBuf::from(xdg)
            .join("batch-orchestrator")
            .join("config.json");
        if candidate.exists() {
            return Ok(Some(candidate));
        }
    }

    let candidate = PathBuf::from("orchestrator.json");
    if candidate.exists() {
        return Ok(Some(candidate));
    }

    Ok(None)
}

/// Replace `${NAME}` with the value of the environment variable `NAME`.
/// Unknown variables are left untouched.
pub fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next(); // consume '{'
            let mut name = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                name.push(c);
            }
            match env::var(&name) {
                Ok(val) if closed => out.push_str(&val),
                _ => {
                    out.push_str("${");
                    out.push_str(&name);
                    if closed {
                        out.push('}');
                    }
                }
            }
        } else {
            out.push(ch);
        }
    }

    out
}

/// Apply [`expand_env_vars`] to every string inside a JSON value.
pub fn expand_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(expand_env_vars(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(expand_value).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, expand_value(v)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = OrchestratorConfig::default();
        assert_eq!(cfg.batch_selection, BatchSelection::ContiguousRun);
        assert_eq!(cfg.timing, TimingPolicy::Informational);
        assert_eq!(cfg.event_capacity, 1024);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let cfg: OrchestratorConfig =
            serde_json::from_value(json!({ "batch_selection": "position_coupled" })).unwrap();
        assert_eq!(cfg.batch_selection, BatchSelection::PositionCoupled);
        assert_eq!(cfg.timing, TimingPolicy::Informational);
        assert_eq!(cfg.event_capacity, 1024);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "timing": "enforce", "event_capacity": 16 }}"#
        )
        .unwrap();

        let cfg = OrchestratorConfig::from_file(file.path()).unwrap();
        assert_eq!(cfg.timing, TimingPolicy::Enforce);
        assert_eq!(cfg.event_capacity, 16);
    }

    #[test]
    fn test_zero_event_capacity_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "event_capacity": 0 }}"#).unwrap();
        assert!(OrchestratorConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_explicit_missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(resolve_config_path(Some(&missing)).is_err());
    }

    #[test]
    fn test_expand_unknown_var_left_untouched() {
        assert_eq!(
            expand_env_vars("a ${BATCH_ORCHESTRATOR_SURELY_UNSET} b"),
            "a ${BATCH_ORCHESTRATOR_SURELY_UNSET} b"
        );
        assert_eq!(expand_env_vars("tail ${OPEN"), "tail ${OPEN");
    }

    #[test]
    fn test_expand_known_var() {
        let Ok(path) = env::var("PATH") else {
            return;
        };
        assert_eq!(expand_env_vars("${PATH}"), path);
        assert_eq!(
            expand_value(json!({ "nested": ["${PATH}", 1] })),
            json!({ "nested": [path, 1] })
        );
    }
}

pub mod classpath;
pub mod opt;

use std::{fmt, fs, path::PathBuf, str::FromStr, time::Duration};

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    config_error,
    core::{RunnerError, RunnerResult},
};

pub use opt::Opt;

/// Location of the context descriptor.
///
/// Only `file:` and `classpath:` are understood; anything else is rejected
/// while parsing, before any lifecycle activity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContextUri {
    File(PathBuf),
    Classpath(String),
}

impl ContextUri {
    pub const FILE_SCHEME: &'static str = "file:";
    pub const CLASSPATH_SCHEME: &'static str = "classpath:";
}

impl FromStr for ContextUri {
    type Err = RunnerError;

    fn from_str(uri: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = uri.strip_prefix(Self::FILE_SCHEME) {
            // file:///etc/x and file:/etc/x both name /etc/x
            let path = match rest.strip_prefix("//") {
                Some(abs) => abs,
                None => rest,
            };
            if path.is_empty() {
                return Err(config_error!("Empty file path in '{}'", uri));
            }
            Ok(ContextUri::File(PathBuf::from(path)))
        } else if let Some(rest) = uri.strip_prefix(Self::CLASSPATH_SCHEME) {
            let name = rest.trim_start_matches('/');
            if name.is_empty() {
                return Err(config_error!("Empty resource name in '{}'", uri));
            }
            Ok(ContextUri::Classpath(name.to_string()))
        } else {
            Err(RunnerError::ConfigSchemeUnsupported(uri.to_string()))
        }
    }
}

impl fmt::Display for ContextUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextUri::File(path) => write!(f, "{}{}", Self::FILE_SCHEME, path.display()),
            ContextUri::Classpath(name) => write!(f, "{}{name}", Self::CLASSPATH_SCHEME),
        }
    }
}

/// Context descriptor: how to build the routing engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default = "EngineConfig::default_name")]
    #[validate(length(min = 1))]
    pub name: String,

    /// Log every step an exchange goes through
    #[serde(default)]
    pub trace: bool,

    /// Bound on `direct:` forwarding depth
    #[serde(default = "EngineConfig::default_max_hops")]
    #[validate(range(min = 1))]
    pub max_hops: u32,

    #[serde(default)]
    #[validate(nested)]
    pub drain: Drain,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: Self::default_name(),
            trace: false,
            max_hops: Self::default_max_hops(),
            drain: Drain::default(),
        }
    }
}

impl EngineConfig {
    fn default_name() -> String {
        env!("CARGO_PKG_NAME").to_string()
    }

    fn default_max_hops() -> u32 {
        32
    }

    /// Resolve a context descriptor from its URI.
    pub fn resolve(uri: &ContextUri) -> RunnerResult<Self> {
        match uri {
            ContextUri::File(path) => {
                let conf_str = fs::read_to_string(path).map_err(|e| {
                    config_error!("Unable to read context file '{}': {}", path.display(), e)
                })?;
                debug!("Context read from {uri}");
                Self::from_yaml(&conf_str)
            }
            ContextUri::Classpath(name) => {
                let conf_str = classpath::resource(name)
                    .ok_or_else(|| config_error!("Classpath resource '{}' not found", name))?;
                debug!("Context read from {uri}");
                Self::from_yaml(conf_str)
            }
        }
    }

    pub fn from_yaml(conf_str: &str) -> RunnerResult<Self> {
        trace!("Read context descriptor: {conf_str}");
        // An empty document means "all defaults"
        if conf_str.trim().is_empty() {
            return Ok(Self::default());
        }

        let conf: EngineConfig = serde_yaml::from_str(conf_str)
            .map_err(|e| config_error!("Unable to parse context descriptor: {}", e))?;

        trace!("Loaded context: {conf:?}");

        conf.validate()
            .map_err(|e| config_error!("Context descriptor validation failed: {}", e))?;

        Ok(conf)
    }
}

/// Drain-wait tuning for `stop()`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct Drain {
    #[serde(default = "Drain::default_poll_interval_ms")]
    #[validate(range(min = 1))]
    pub poll_interval_ms: u64,

    /// Unbounded when absent
    #[serde(default)]
    #[validate(range(min = 1))]
    pub timeout_ms: Option<u64>,
}

impl Default for Drain {
    fn default() -> Self {
        Self {
            poll_interval_ms: Self::default_poll_interval_ms(),
            timeout_ms: None,
        }
    }
}

impl Drain {
    fn default_poll_interval_ms() -> u64 {
        100
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// File logging target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Log {
    pub path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_log() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn test_parse_context_uri() {
        let cases = [
            ("classpath:engine-context.yaml", "engine-context.yaml"),
            ("classpath:/engine-context.yaml", "engine-context.yaml"),
        ];
        for (uri, name) in cases {
            let parsed: ContextUri = uri.parse().unwrap();
            assert_eq!(parsed, ContextUri::Classpath(name.to_string()));
        }

        let cases = [
            ("file:conf/context.yaml", "conf/context.yaml"),
            ("file:///etc/runner/context.yaml", "/etc/runner/context.yaml"),
        ];
        for (uri, path) in cases {
            let parsed: ContextUri = uri.parse().unwrap();
            assert_eq!(parsed, ContextUri::File(PathBuf::from(path)));
        }
    }

    #[test]
    fn test_unsupported_scheme() {
        for uri in ["http://example.com/context.yaml", "context.yaml", "jar:x"] {
            let err = uri.parse::<ContextUri>().unwrap_err();
            assert!(
                matches!(err, RunnerError::ConfigSchemeUnsupported(ref u) if u == uri),
                "{err}"
            );
        }
    }

    #[test]
    fn test_empty_location_rejected() {
        assert!(matches!(
            "file:".parse::<ContextUri>(),
            Err(RunnerError::Configuration(_))
        ));
        assert!(matches!(
            "classpath:".parse::<ContextUri>(),
            Err(RunnerError::Configuration(_))
        ));
    }

    #[test]
    fn test_context_uri_display() {
        let uri: ContextUri = "classpath:engine-context.yaml".parse().unwrap();
        assert_eq!(uri.to_string(), "classpath:engine-context.yaml");
    }

    #[test]
    fn test_load_context() {
        init_log();
        let conf_str = r#"
---
name: orders
trace: true
max_hops: 8
drain:
  poll_interval_ms: 20
  timeout_ms: 5000
        "#;
        let conf = EngineConfig::from_yaml(conf_str).unwrap();
        assert_eq!(conf.name, "orders");
        assert!(conf.trace);
        assert_eq!(conf.max_hops, 8);
        assert_eq!(conf.drain.poll_interval(), Duration::from_millis(20));
        assert_eq!(conf.drain.timeout(), Some(Duration::from_millis(5000)));
    }

    #[test]
    fn test_load_context_defaults() {
        init_log();
        let conf = EngineConfig::from_yaml("name: minimal").unwrap();
        assert_eq!(conf.max_hops, 32);
        assert_eq!(conf.drain, Drain::default());
        assert_eq!(conf.drain.timeout(), None);

        let conf = EngineConfig::from_yaml("").unwrap();
        assert_eq!(conf, EngineConfig::default());
    }

    #[test]
    fn test_valid_poll_interval() {
        init_log();
        let conf = EngineConfig::from_yaml(
            r#"
drain:
  poll_interval_ms: 0
            "#,
        );
        match conf {
            Ok(_) => panic!("Expected error, but got a valid config"),
            Err(e) => assert!(matches!(e, RunnerError::Configuration(_))),
        }
    }

    #[test]
    fn test_valid_max_hops() {
        init_log();
        assert!(EngineConfig::from_yaml("max_hops: 0").is_err());
    }

    #[test]
    fn test_unknown_key_rejected() {
        init_log();
        assert!(EngineConfig::from_yaml("threads: 4").is_err());
    }

    #[test]
    fn test_resolve_file() {
        init_log();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("context.yaml");
        fs::write(&path, "name: from-file").unwrap();

        let conf = EngineConfig::resolve(&ContextUri::File(path)).unwrap();
        assert_eq!(conf.name, "from-file");
    }

    #[test]
    fn test_resolve_missing_file() {
        init_log();
        let dir = tempfile::tempdir().unwrap();
        let uri = ContextUri::File(dir.path().join("missing.yaml"));
        assert!(matches!(
            EngineConfig::resolve(&uri),
            Err(RunnerError::Configuration(_))
        ));
    }

    #[test]
    fn test_resolve_bundled() {
        init_log();
        let uri = ContextUri::Classpath(classpath::DEFAULT_CONTEXT.into());
        let conf = EngineConfig::resolve(&uri).unwrap();
        assert!(!conf.name.is_empty());
    }

    #[test]
    fn test_resolve_missing_bundled() {
        init_log();
        let uri = ContextUri::Classpath("missing-context.yaml".to_string());
        assert!(matches!(
            EngineConfig::resolve(&uri),
            Err(RunnerError::Configuration(_))
        ));
    }
}

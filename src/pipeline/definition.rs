use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
    str::FromStr,
};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// `scheme:name`, e.g. `direct:orders` or `log:audit`.
pub(crate) static ENDPOINT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<scheme>[a-z][a-z0-9+.-]*):(?P<name>[A-Za-z0-9_./-]+)$")
        .expect("endpoint pattern is valid")
});

/// One pipeline script on disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScriptResource {
    path: PathBuf,
}

impl ScriptResource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> io::Result<String> {
        fs::read_to_string(&self.path)
    }
}

impl fmt::Display for ScriptResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Executable route produced from exactly one script.
///
/// `id` is what the script declares; the identifier the route is known by
/// afterwards is the one returned by the engine on registration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RouteDefinition {
    #[validate(length(min = 1))]
    pub id: Option<String>,
    pub description: Option<String>,
    #[validate(regex(path = *ENDPOINT_RE, code = "invalid_endpoint"))]
    pub from: String,
    /// Each step is a single-key map, e.g. `- to: log:out`
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    #[validate(custom(function = "RouteDefinition::validate_steps"))]
    pub steps: Vec<Step>,

    #[serde(skip)]
    pub source: PathBuf,
}

impl RouteDefinition {
    pub fn new(from: impl Into<String>) -> Self {
        Self {
            id: None,
            description: None,
            from: from.into(),
            steps: Vec::new(),
            source: PathBuf::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = source.into();
        self
    }

    /// Parsed form of `from`.
    pub fn endpoint(&self) -> Option<Endpoint> {
        self.from.parse().ok()
    }

    fn validate_steps(steps: &Vec<Step>) -> Result<(), ValidationError> {
        for step in steps {
            match step {
                Step::To(uri) if !ENDPOINT_RE.is_match(uri) => {
                    let mut err = ValidationError::new("invalid_endpoint");
                    err.add_param("uri".into(), uri);
                    return Err(err);
                }
                Step::SetHeader { name, .. } | Step::RemoveHeader(name) if name.is_empty() => {
                    return Err(ValidationError::new("header_name_required"));
                }
                Step::Filter { header, .. } if header.is_empty() => {
                    return Err(ValidationError::new("header_name_required"));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Processing steps a route applies to each exchange, in order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    /// Log a rendered template
    Log(String),
    SetHeader {
        name: String,
        value: String,
    },
    RemoveHeader(String),
    SetBody(String),
    /// Stop processing unless the header is present (and equal, if given)
    Filter {
        header: String,
        equals: Option<String>,
    },
    /// Pause for the given number of milliseconds
    Delay(u64),
    /// Forward to another endpoint
    To(String),
}

/// Parsed endpoint URI.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub scheme: String,
    pub name: String,
}

impl FromStr for Endpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = ENDPOINT_RE
            .captures(s)
            .ok_or_else(|| format!("invalid endpoint uri '{s}'"))?;
        Ok(Self {
            scheme: caps["scheme"].to_string(),
            name: caps["name"].to_string(),
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme, self.name)
    }
}

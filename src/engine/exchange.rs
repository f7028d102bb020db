use std::{collections::BTreeMap, fmt};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use uuid::Uuid;

static TEMPLATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{(?:(?P<body>body)|(?P<id>id)|header\.(?P<header>[A-Za-z0-9_.-]+))\}")
        .expect("template pattern is valid")
});

/// One message travelling through a route.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Exchange {
    pub id: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl Exchange {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Expand `${body}`, `${id}` and `${header.NAME}`. Missing headers
    /// render as empty strings.
    pub fn render(&self, template: &str) -> String {
        TEMPLATE_RE
            .replace_all(template, |caps: &Captures| {
                if caps.name("body").is_some() {
                    self.body.clone()
                } else if caps.name("id").is_some() {
                    self.id.clone()
                } else {
                    caps.name("header")
                        .and_then(|name| self.header(name.as_str()))
                        .unwrap_or_default()
                        .to_string()
                }
            })
            .into_owned()
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Exchange[id: {}, headers: {:?}, body: {}]",
            self.id, self.headers, self.body
        )
    }
}

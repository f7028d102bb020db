//! Resources bundled into the binary, addressed with `classpath:` URIs.

use std::collections::HashMap;

use once_cell::sync::Lazy;

/// Context descriptor used when none is given on the command line.
pub const DEFAULT_CONTEXT: &str = "engine-context.yaml";

static BUNDLED_RESOURCES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let arr: Vec<(&str, &str)> = vec![(
        DEFAULT_CONTEXT,
        include_str!("../../resources/engine-context.yaml"),
    )];
    arr.into_iter().collect()
});

/// Look up a bundled resource by name.
pub fn resource(name: &str) -> Option<&'static str> {
    BUNDLED_RESOURCES.get(name).copied()
}

//! Ordered path-prefix lists backing the pin list and the cache whitelist.

/// An ordered list of path prefixes. A path is "in" the list when any
/// prefix is a string prefix of it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PrefixList {
    prefixes: Vec<String>,
}

impl PrefixList {
    /// Builds a list from already-split prefixes. Blank entries are dropped.
    pub fn new(prefixes: Vec<String>) -> Self {
        let prefixes = prefixes
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        Self { prefixes }
    }

    /// Parses a comma-or-semicolon separated configuration string.
    pub fn from_spec(spec: &str) -> Self {
        Self::new(
            spec.split([',', ';'])
                .map(|p| p.to_string())
                .collect::<Vec<_>>(),
        )
    }

    /// Returns true if `path` starts with any prefix in the list.
    pub fn in_list(&self, path: &str) -> bool {
        self.prefixes.iter().any(|p| path.starts_with(p.as_str()))
    }

    /// Returns the prefixes in their configured order.
    pub fn list(&self) -> Vec<String> {
        self.prefixes.clone()
    }

    /// Returns true if the list holds no prefixes.
    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }
}

use std::collections::BTreeMap;

/// Path table of one exported service
#[derive(Debug, Default)]
pub struct DbusSharedState {
    pub(crate) paths: BTreeMap<String, serde_json::Value>,
}

impl DbusSharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&serde_json::Value> {
        self.paths.get(path)
    }

    /// `(relative path, value)` pairs below `prefix`
    pub(crate) fn subtree(&self, prefix: &str) -> Vec<(String, serde_json::Value)> {
        let mut px = prefix.to_string();
        if !px.ends_with('/') {
            px.push('/');
        }
        self.paths
            .iter()
            .filter_map(|(path, val)| {
                path.strip_prefix(px.as_str())
                    .map(|suffix| (suffix.to_string(), val.clone()))
            })
            .collect()
    }
}

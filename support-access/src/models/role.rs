use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub slug: String,
    pub display_name: String,
    pub capabilities: BTreeSet<String>,
}

impl Role {
    pub fn new<I, S>(slug: &str, display_name: &str, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            slug: slug.to_string(),
            display_name: display_name.to_string(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
        }
    }

    pub fn has_cap(&self, cap: &str) -> bool {
        self.capabilities.contains(cap)
    }
}

//! Registry: the merged, unique-by-name catalog of every backend's tools.
//!
//! A `Registry` is immutable once built. Updates build a new one from fresh
//! backend listings and swap it in through [`RegistryStore`]; nothing edits a
//! registry in place.

pub mod definition;
pub mod store;

pub use definition::{AdvertisedTool, ParamDef, ParamType, ToolDefinition};
pub use store::{persist, load, LoadSource, LoadedRegistry, PersistedCheck, RegistryStore};

use crate::types::{BackendId, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Registry file schema version written by this gateway.
pub const SCHEMA_VERSION: u32 = 1;

/// On-disk shape of a registry.
#[derive(Debug, Serialize, Deserialize)]
struct RegistryFile {
    schema_version: u32,
    generated_at: DateTime<Utc>,
    total_tools: usize,
    tools: Vec<ToolDefinition>,
}

/// Merged tool catalog. Listing order is merge order.
#[derive(Debug, Clone, PartialEq)]
pub struct Registry {
    tools: Vec<ToolDefinition>,
    index: HashMap<String, usize>,
    generated_at: DateTime<Utc>,
    schema_version: u32,
}

impl Default for Registry {
    fn default() -> Self {
        Self::empty()
    }
}

impl Registry {
    pub fn empty() -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
            generated_at: DateTime::<Utc>::default(),
            schema_version: SCHEMA_VERSION,
        }
    }

    /// Build a registry from tool definitions in merge order.
    ///
    /// A name exposed by two different owners is a `RegistryCollision`; a
    /// backend listing the same name twice is a protocol error.
    pub fn build(tools: Vec<ToolDefinition>, generated_at: DateTime<Utc>) -> Result<Self> {
        let mut merged: Vec<ToolDefinition> = Vec::with_capacity(tools.len());
        let mut index = HashMap::with_capacity(tools.len());

        for tool in tools {
            tool.check()
                .map_err(|e| Error::protocol(format!("backend {}: {}", tool.owner_id, e)))?;

            if let Some(&existing) = index.get(&tool.name) {
                let first: &ToolDefinition = &merged[existing];
                if first.owner_id == tool.owner_id {
                    return Err(Error::protocol(format!(
                        "backend {} listed tool '{}' twice",
                        tool.owner_id, tool.name
                    )));
                }
                return Err(Error::RegistryCollision {
                    tool: tool.name,
                    first: first.owner_id.to_string(),
                    second: tool.owner_id.to_string(),
                });
            }

            index.insert(tool.name.clone(), merged.len());
            merged.push(tool);
        }

        Ok(Self {
            tools: merged,
            index,
            generated_at,
            schema_version: SCHEMA_VERSION,
        })
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All tools in listing order.
    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn total_tools(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// Tools owned by one backend.
    pub fn tools_for<'a>(&'a self, owner: &'a BackendId) -> impl Iterator<Item = &'a ToolDefinition> {
        self.tools.iter().filter(move |t| &t.owner_id == owner)
    }

    /// Category → sorted tool names.
    pub fn categories(&self) -> BTreeMap<String, Vec<String>> {
        let mut categories: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for tool in &self.tools {
            categories
                .entry(tool.category.clone())
                .or_default()
                .push(tool.name.clone());
        }
        for names in categories.values_mut() {
            names.sort();
        }
        categories
    }

    /// Owner invariant: every tool belongs to a backend the gateway knows.
    pub fn check_owners(&self, known: &HashSet<BackendId>) -> Result<()> {
        for tool in &self.tools {
            if !known.contains(&tool.owner_id) {
                return Err(Error::registry_corrupt(format!(
                    "tool '{}' owned by unknown backend '{}'",
                    tool.name, tool.owner_id
                )));
            }
        }
        Ok(())
    }

    /// Serialize to the registry file format (pretty JSON, trailing newline).
    pub fn to_json(&self) -> Result<String> {
        let file = RegistryFile {
            schema_version: self.schema_version,
            generated_at: self.generated_at,
            total_tools: self.tools.len(),
            tools: self.tools.clone(),
        };
        let mut out = serde_json::to_string_pretty(&file)?;
        out.push('\n');
        Ok(out)
    }

    /// Parse and validate a registry file. Every failure is `RegistryCorrupt`.
    pub fn from_json(raw: &str, known: &HashSet<BackendId>) -> Result<Self> {
        let file: RegistryFile = serde_json::from_str(raw)
            .map_err(|e| Error::registry_corrupt(format!("unparseable registry: {}", e)))?;

        if file.schema_version == 0 || file.schema_version > SCHEMA_VERSION {
            return Err(Error::registry_corrupt(format!(
                "unsupported schema_version {}",
                file.schema_version
            )));
        }
        if file.total_tools != file.tools.len() {
            return Err(Error::registry_corrupt(format!(
                "total_tools is {} but {} tools are listed",
                file.total_tools,
                file.tools.len()
            )));
        }

        let mut registry = Registry::build(file.tools, file.generated_at)
            .map_err(|e| Error::registry_corrupt(e.to_string()))?;
        registry.schema_version = file.schema_version;
        registry.check_owners(known)?;
        Ok(registry)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    pub(crate) fn backend(id: &str) -> BackendId {
        BackendId::from_string(id.to_string()).unwrap()
    }

    pub(crate) fn tool(name: &str, owner: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            owner_id: backend(owner),
            description: format!("{} tool", name),
            parameter_schema: Vec::new(),
            category: "general".to_string(),
        }
    }

    pub(crate) fn known(ids: &[&str]) -> HashSet<BackendId> {
        ids.iter().map(|id| backend(id)).collect()
    }

    #[test]
    fn test_build_preserves_merge_order() {
        let registry = Registry::build(
            vec![tool("x", "a"), tool("y", "a"), tool("z", "b")],
            Utc::now(),
        )
        .unwrap();
        let names: Vec<&str> = registry.tools().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["x", "y", "z"]);
        assert_eq!(registry.get("z").unwrap().owner_id, backend("b"));
        assert_eq!(registry.total_tools(), 3);
    }

    #[test]
    fn test_build_collision_between_owners() {
        let err = Registry::build(
            vec![tool("x", "a"), tool("y", "a"), tool("y", "b")],
            Utc::now(),
        )
        .unwrap_err();
        match err {
            Error::RegistryCollision { tool, first, second } => {
                assert_eq!(tool, "y");
                assert_eq!(first, "a");
                assert_eq!(second, "b");
            }
            other => panic!("expected collision, got {other:?}"),
        }
    }

    #[test]
    fn test_build_same_owner_duplicate_is_protocol_error() {
        let err = Registry::build(vec![tool("x", "a"), tool("x", "a")], Utc::now()).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_json_round_trip() {
        let registry = Registry::build(vec![tool("x", "a"), tool("y", "b")], Utc::now()).unwrap();
        let raw = registry.to_json().unwrap();
        let loaded = Registry::from_json(&raw, &known(&["a", "b"])).unwrap();
        assert_eq!(loaded, registry);
    }

    #[test]
    fn test_from_json_unknown_owner_is_corrupt() {
        let registry = Registry::build(vec![tool("x", "ghost")], Utc::now()).unwrap();
        let raw = registry.to_json().unwrap();
        let err = Registry::from_json(&raw, &known(&["a"])).unwrap_err();
        assert!(matches!(err, Error::RegistryCorrupt(_)));
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_from_json_total_mismatch_is_corrupt() {
        let raw = r#"{"schema_version": 1, "generated_at": "2025-08-03T00:00:00Z", "total_tools": 5, "tools": []}"#;
        let err = Registry::from_json(raw, &known(&[])).unwrap_err();
        assert!(err.to_string().contains("total_tools is 5"));
    }

    #[test]
    fn test_from_json_future_schema_is_corrupt() {
        let raw = r#"{"schema_version": 99, "generated_at": "2025-08-03T00:00:00Z", "total_tools": 0, "tools": []}"#;
        assert!(Registry::from_json(raw, &known(&[])).is_err());
    }

    #[test]
    fn test_categories_grouping() {
        let mut a = tool("query_flow", "flows");
        a.category = "workflow".into();
        let mut b = tool("list_flows", "flows");
        b.category = "workflow".into();
        let c = tool("ping_db", "pg");
        let registry = Registry::build(vec![a, b, c], Utc::now()).unwrap();

        let categories = registry.categories();
        assert_eq!(categories["workflow"], vec!["list_flows", "query_flow"]);
        assert_eq!(categories["general"], vec!["ping_db"]);
    }
}

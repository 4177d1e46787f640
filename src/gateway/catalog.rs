//! Read-only views over a registry snapshot: filtering and search.

use crate::registry::ToolDefinition;
use crate::types::BackendId;
use serde::{Deserialize, Serialize};

/// Optional narrowing for tool listings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolFilter {
    /// Case-insensitive substring of name or description.
    #[serde(default)]
    pub query: Option<String>,
    /// Owning backend id.
    #[serde(default)]
    pub backend: Option<String>,
}

impl ToolFilter {
    pub fn matches(&self, tool: &ToolDefinition) -> bool {
        if let Some(backend) = &self.backend {
            if tool.owner_id.as_str() != backend {
                return false;
            }
        }
        match self.query.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(query) => {
                let query = query.to_lowercase();
                tool.name.to_lowercase().contains(&query)
                    || tool.description.to_lowercase().contains(&query)
            }
        }
    }
}

/// Tools passing `filter` whose owner is live, in registry order.
pub fn filter_tools<F>(tools: &[ToolDefinition], filter: &ToolFilter, is_live: F) -> Vec<ToolDefinition>
where
    F: Fn(&BackendId) -> bool,
{
    tools
        .iter()
        .filter(|t| is_live(&t.owner_id) && filter.matches(t))
        .cloned()
        .collect()
}

/// One ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub name: String,
    pub description: String,
    pub owner_id: BackendId,
    pub category: String,
    pub relevance: u32,
}

/// Relevance: name match +10, description match +5, owner id match +2.
pub fn relevance(tool: &ToolDefinition, query_lower: &str) -> u32 {
    let mut score = 0;
    if tool.name.to_lowercase().contains(query_lower) {
        score += 10;
    }
    if tool.description.to_lowercase().contains(query_lower) {
        score += 5;
    }
    if tool.owner_id.as_str().to_lowercase().contains(query_lower) {
        score += 2;
    }
    score
}

/// Ranked search, most relevant first, ties by name. Zero-score tools are omitted.
pub fn search<'a, I>(tools: I, query: &str) -> Vec<SearchHit>
where
    I: IntoIterator<Item = &'a ToolDefinition>,
{
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return Vec::new();
    }
    let mut hits: Vec<SearchHit> = tools
        .into_iter()
        .filter_map(|tool| {
            let score = relevance(tool, &query);
            (score > 0).then(|| SearchHit {
                name: tool.name.clone(),
                description: tool.description.clone(),
                owner_id: tool.owner_id.clone(),
                category: tool.category.clone(),
                relevance: score,
            })
        })
        .collect();
    hits.sort_by(|a, b| b.relevance.cmp(&a.relevance).then_with(|| a.name.cmp(&b.name)));
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::tool;

    fn tools() -> Vec<ToolDefinition> {
        let mut analyze = tool("analyze_text", "docs");
        analyze.description = "Run text analysis over a document".into();
        let mut flows = tool("list_flows", "flowise");
        flows.description = "List workflow definitions".into();
        let mut query = tool("query_db", "textstore");
        query.description = "Query the store".into();
        vec![analyze, flows, query]
    }

    #[test]
    fn test_search_scores_and_order() {
        let all = tools();
        let hits = search(&all, "TEXT");
        let ranked: Vec<(&str, u32)> = hits.iter().map(|h| (h.name.as_str(), h.relevance)).collect();
        // analyze_text: name + description; query_db: owner only
        assert_eq!(ranked, vec![("analyze_text", 15), ("query_db", 2)]);
    }

    #[test]
    fn test_search_ties_break_by_name() {
        let all = vec![tool("b_tool", "x"), tool("a_tool", "x")];
        let hits = search(&all, "tool");
        assert_eq!(hits[0].name, "a_tool");
        assert_eq!(hits[0].relevance, hits[1].relevance);
    }

    #[test]
    fn test_search_empty_query() {
        assert!(search(&tools(), "  ").is_empty());
    }

    #[test]
    fn test_filter_by_query_and_backend() {
        let all = tools();
        let by_query = ToolFilter {
            query: Some("workflow".into()),
            backend: None,
        };
        let names: Vec<String> = filter_tools(&all, &by_query, |_| true)
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["list_flows"]);

        let by_backend = ToolFilter {
            query: None,
            backend: Some("docs".into()),
        };
        assert_eq!(filter_tools(&all, &by_backend, |_| true).len(), 1);
    }

    #[test]
    fn test_filter_hides_non_live_owners() {
        let all = tools();
        let visible = filter_tools(&all, &ToolFilter::default(), |owner| owner.as_str() != "docs");
        assert_eq!(visible.len(), 2);
        assert!(visible.iter().all(|t| t.owner_id.as_str() != "docs"));
    }
}

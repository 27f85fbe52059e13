//! Research phase taxonomy
//!
//! A fixed two-level table (act -> category) that every tool name is mapped
//! onto, plus an adjacency graph of categories describing the usual order of
//! research work. The table is parsed once into flat vectors addressed by
//! [`CategoryId`] and never mutated afterwards.

use crate::config::TaxonomyConfig;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;

/// Act and category assigned to tools missing from the table.
pub const UNCATEGORIZED: &str = "uncategorized";

const BUILTIN_TAXONOMY: &str = include_str!("default.toml");

/// Index of a category inside a [`Taxonomy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CategoryId(pub usize);

/// A research act (top level of the taxonomy).
#[derive(Debug, Clone)]
pub struct Act {
    pub name: String,
    pub categories: Vec<CategoryId>,
}

/// A research category (second level of the taxonomy).
#[derive(Debug, Clone)]
pub struct Category {
    pub id: CategoryId,
    /// Name of the owning act
    pub act: String,
    pub name: String,
    /// Successful events at which the activity component saturates
    pub expected_events: u32,
    /// Tools mapped to this category, in table order
    pub tools: Vec<String>,
}

/// Result of looking up a tool name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolClassification {
    pub act: String,
    pub category: String,
    pub category_id: Option<CategoryId>,
    /// False when the tool is not in the table
    pub matched: bool,
}

impl ToolClassification {
    fn uncategorized() -> Self {
        Self {
            act: UNCATEGORIZED.to_string(),
            category: UNCATEGORIZED.to_string(),
            category_id: None,
            matched: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawTaxonomy {
    acts: Vec<RawAct>,
}

#[derive(Debug, Deserialize)]
struct RawAct {
    name: String,
    categories: Vec<RawCategory>,
}

#[derive(Debug, Deserialize)]
struct RawCategory {
    name: String,
    expected_events: u32,
    #[serde(default)]
    tools: Vec<String>,
    #[serde(default)]
    next: Vec<String>,
}

/// Immutable tool -> (act, category) lookup table with adjacency graph.
#[derive(Debug, Clone)]
pub struct Taxonomy {
    acts: Vec<Act>,
    categories: Vec<Category>,
    edges: Vec<Vec<CategoryId>>,
    by_tool: HashMap<String, CategoryId>,
    by_name: HashMap<(String, String), CategoryId>,
}

impl Taxonomy {
    /// The table shipped with scrivener.
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_TAXONOMY)
    }

    /// Load the configured table, falling back to the built-in one.
    pub fn load(config: &TaxonomyConfig) -> Result<Self> {
        match &config.path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    Error::Taxonomy(format!("failed to read {}: {}", path.display(), e))
                })?;
                let taxonomy = Self::from_toml_str(&content)?;
                tracing::info!(
                    path = %path.display(),
                    categories = taxonomy.categories.len(),
                    "Loaded taxonomy override"
                );
                Ok(taxonomy)
            }
            None => Self::builtin(),
        }
    }

    /// Parse and validate a taxonomy document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let raw: RawTaxonomy = toml::from_str(content)
            .map_err(|e| Error::Taxonomy(format!("failed to parse taxonomy: {}", e)))?;

        let mut acts = Vec::with_capacity(raw.acts.len());
        let mut categories = Vec::new();
        let mut by_tool = HashMap::new();
        let mut by_name = HashMap::new();
        let mut by_category_name: HashMap<String, CategoryId> = HashMap::new();
        let mut pending_edges = Vec::new();

        for raw_act in raw.acts {
            if raw_act.name == UNCATEGORIZED {
                return Err(Error::Taxonomy(format!(
                    "act name '{UNCATEGORIZED}' is reserved"
                )));
            }
            let mut act = Act {
                name: raw_act.name.clone(),
                categories: Vec::new(),
            };

            for raw_category in raw_act.categories {
                let id = CategoryId(categories.len());
                if raw_category.expected_events == 0 {
                    return Err(Error::Taxonomy(format!(
                        "category '{}' must expect at least one event",
                        raw_category.name
                    )));
                }
                if by_category_name
                    .insert(raw_category.name.clone(), id)
                    .is_some()
                {
                    return Err(Error::Taxonomy(format!(
                        "duplicate category '{}'",
                        raw_category.name
                    )));
                }
                for tool in &raw_category.tools {
                    if by_tool.insert(tool.clone(), id).is_some() {
                        return Err(Error::Taxonomy(format!(
                            "tool '{}' is mapped to more than one category",
                            tool
                        )));
                    }
                }
                by_name.insert((act.name.clone(), raw_category.name.clone()), id);
                pending_edges.push((id, raw_category.next));
                act.categories.push(id);
                categories.push(Category {
                    id,
                    act: act.name.clone(),
                    name: raw_category.name,
                    expected_events: raw_category.expected_events,
                    tools: raw_category.tools,
                });
            }

            acts.push(act);
        }

        let mut edges = vec![Vec::new(); categories.len()];
        for (from, next) in pending_edges {
            for target in next {
                let to = by_category_name.get(&target).copied().ok_or_else(|| {
                    Error::Taxonomy(format!(
                        "category '{}' points at unknown category '{}'",
                        categories[from.0].name, target
                    ))
                })?;
                edges[from.0].push(to);
            }
        }

        Ok(Self {
            acts,
            categories,
            edges,
            by_tool,
            by_name,
        })
    }

    /// Look up the (act, category) for a tool; unknown tools are uncategorized.
    pub fn classify(&self, tool_name: &str) -> ToolClassification {
        match self.by_tool.get(tool_name) {
            Some(id) => {
                let category = &self.categories[id.0];
                ToolClassification {
                    act: category.act.clone(),
                    category: category.name.clone(),
                    category_id: Some(*id),
                    matched: true,
                }
            }
            None => {
                tracing::debug!(tool = tool_name, "Tool not in taxonomy, using uncategorized");
                ToolClassification::uncategorized()
            }
        }
    }

    pub fn acts(&self) -> &[Act] {
        &self.acts
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn category(&self, id: CategoryId) -> &Category {
        &self.categories[id.0]
    }

    /// Find a category by its (act, category) names.
    pub fn find_category(&self, act: &str, category: &str) -> Option<CategoryId> {
        self.by_name
            .get(&(act.to_string(), category.to_string()))
            .copied()
    }

    /// Categories belonging to an act; empty for unknown acts.
    pub fn act_categories(&self, act: &str) -> &[CategoryId] {
        self.acts
            .iter()
            .find(|a| a.name == act)
            .map(|a| a.categories.as_slice())
            .unwrap_or(&[])
    }

    /// Categories that typically follow `id`.
    pub fn successors(&self, id: CategoryId) -> &[CategoryId] {
        &self.edges[id.0]
    }

    /// Whether `to` is a direct successor of `from`.
    pub fn is_edge(&self, from: CategoryId, to: CategoryId) -> bool {
        self.edges[from.0].contains(&to)
    }

    /// Number of tools mapped to a category.
    pub fn tool_count(&self, id: CategoryId) -> usize {
        self.categories[id.0].tools.len()
    }
}

//! MCP tool parameter definitions.
//!
//! Field names mirror the payload shapes the agents in `codegraph-agents`
//! already deserialize (`snake_case`), so a tool call's parameters pass
//! through to `Task::payload` unchanged.

use rmcp::schemars::{self, JsonSchema};
use serde::{Deserialize, Serialize};

fn default_limit() -> usize {
    20
}

fn default_semantic_limit() -> usize {
    10
}

fn default_depth() -> usize {
    1
}

// ---- Core ----------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IndexParams {
    #[schemars(description = "Absolute path to the workspace root to index")]
    pub workspace_path: String,
    #[serde(default)]
    #[schemars(description = "Additional glob-style patterns to exclude, on top of the built-in defaults")]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    #[schemars(description = "Ignore the stored merkle baseline and reparse every file")]
    pub full_reindex: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ApprovalGatedParams {
    #[schemars(description = "Approval token obtained out of band; required for this destructive operation")]
    pub approval_token: Option<String>,
}

// ---- Query -----------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ListFileEntitiesParams {
    #[schemars(description = "Workspace-relative file path")]
    pub file_path: String,
    #[serde(default)]
    #[schemars(description = "Pagination offset")]
    pub offset: usize,
    #[serde(default = "default_limit")]
    #[schemars(description = "Maximum entities to return (default 20)")]
    pub limit: usize,
    #[schemars(description = "Opaque cursor from a previous page; overrides offset when present")]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ListEntityRelationshipsParams {
    #[schemars(description = "Entity id to center the traversal on")]
    pub entity_id: String,
    #[serde(default = "default_depth")]
    #[schemars(description = "Traversal depth, clamped to 1-10 (default 1)")]
    pub depth: usize,
    #[serde(default)]
    #[schemars(description = "Restrict to these relationship types; empty means all types")]
    pub relationship_types: Vec<String>,
    #[schemars(description = "\"incoming\", \"outgoing\", or \"both\" (default outgoing)")]
    pub direction: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResolveEntityParams {
    #[schemars(description = "Entity name to resolve, exact or fuzzy")]
    pub name: String,
    #[schemars(description = "A file path to bias candidates toward (same file beats same directory)")]
    pub file_path_hint: Option<String>,
    #[serde(default = "default_limit")]
    #[schemars(description = "Maximum candidates to return (default 20)")]
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GetEntitySourceParams {
    #[schemars(description = "Entity id")]
    pub entity_id: String,
    #[serde(default)]
    #[schemars(description = "Extra lines of surrounding source to include on each side")]
    pub context_lines: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct QueryFiltersParams {
    #[serde(default)]
    pub entity_type: Vec<String>,
    #[serde(default)]
    pub file_path: Vec<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QueryParams {
    #[schemars(description = "Free-text query, matched structurally by name and semantically by embedding")]
    pub query: String,
    #[serde(default)]
    pub filters: QueryFiltersParams,
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_limit")]
    #[schemars(description = "Maximum items per side (structural and semantic) to return (default 20)")]
    pub limit: usize,
    #[schemars(description = "Opaque cursor from a previous page; overrides offset when present")]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GetGraphParams {
    #[schemars(description = "Root entity id for a bounded neighborhood; omit for the full graph dump")]
    pub root_id: Option<String>,
    #[serde(default = "default_depth")]
    #[schemars(description = "Neighborhood depth when root_id is set, clamped to 1-10 (default 1)")]
    pub depth: usize,
}

// ---- Info (trivial) ---------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct EmptyParams {}

// ---- Semantic ----------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct SemanticFiltersParams {
    pub language: Option<String>,
    pub entity_type: Option<String>,
    pub path_prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SemanticSearchParams {
    #[schemars(description = "Natural-language or code query to embed and search against the vector store")]
    pub query: String,
    #[serde(default)]
    pub filters: SemanticFiltersParams,
    #[serde(default = "default_semantic_limit")]
    #[schemars(description = "Maximum hits to return (default 10)")]
    pub limit: usize,
    #[schemars(description = "Opaque cursor from a previous page; overrides offset when present")]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FindSimilarCodeParams {
    #[schemars(description = "Entity id to use as the reference vector; mutually exclusive with `code`")]
    pub entity_id: Option<String>,
    #[schemars(description = "Raw code snippet to embed as the reference vector; mutually exclusive with `entity_id`")]
    pub code: Option<String>,
    #[serde(default = "default_semantic_limit")]
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AnalyzeCodeImpactParams {
    #[schemars(description = "Entity id to analyze the blast radius of")]
    pub entity_id: String,
    #[serde(default = "default_impact_depth")]
    #[schemars(description = "Maximum traversal depth, clamped to 1-10 (default 3)")]
    pub max_depth: usize,
}

fn default_impact_depth() -> usize {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct DetectCodeClonesParams {
    #[schemars(description = "Cosine-similarity threshold above which two entities are clustered as clones (default 0.65)")]
    pub threshold: Option<f32>,
    #[schemars(description = "Restrict the scan to entities whose file path starts with this prefix")]
    pub path_prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SuggestRefactoringParams {
    #[schemars(description = "Entity id to evaluate for size and coupling red flags")]
    pub entity_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CrossLanguageSearchParams {
    #[schemars(description = "Query to embed and search for across every indexed language")]
    pub query: String,
    #[serde(default = "default_semantic_limit")]
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AnalyzeHotspotsParams {
    #[serde(default = "default_semantic_limit")]
    #[schemars(description = "Maximum hotspot entities to return, ranked by fan-in + fan-out (default 10)")]
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FindRelatedConceptsParams {
    #[schemars(description = "Entity id to find conceptually related entities for; mutually exclusive with `query`")]
    pub entity_id: Option<String>,
    #[schemars(description = "Free-text concept to search for; mutually exclusive with `entity_id`")]
    pub query: Option<String>,
    #[serde(default = "default_semantic_limit")]
    pub limit: usize,
}

// ---- Ops -----------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ClearBusTopicParams {
    #[schemars(description = "Bus topic to clear the ring buffer for")]
    pub topic: String,
}

/// Folds a parameter struct's cursor (if any) back into an effective offset
/// by decoding it; falls back to the struct's own `offset`/default when no
/// cursor was supplied.
pub fn effective_offset(cursor: Option<&str>, fallback: usize) -> std::result::Result<usize, String> {
    match cursor {
        Some(c) => crate::envelope::decode_cursor(c).map(|p| p.o),
        None => Ok(fallback),
    }
}

//! MCP `hybrid_search` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `hybrid_search` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct HybridSearchParams {
    #[schemars(description = "Natural language or keyword query")]
    pub query: String,

    #[schemars(description = "Maximum number of results (1-50). Defaults to 10.")]
    pub limit: Option<usize>,

    /// Share of the score taken by vector similarity.
    #[schemars(
        description = "Weight of semantic similarity versus keyword relevance, 0.0 (keyword only) to 1.0 (semantic only). Defaults to 0.6."
    )]
    pub weight: Option<f64>,

    #[schemars(description = "Only return entities of these types, e.g. [\"note\", \"task\"]")]
    pub r#type: Option<Vec<String>>,

    #[schemars(
        description = "Optional text describing what the user is working on; results close to it are boosted"
    )]
    pub context: Option<String>,
}

//! MCP `search` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `search` MCP tool (pure semantic search).
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SearchParams {
    #[schemars(description = "Natural language query")]
    pub query: String,

    #[schemars(description = "Maximum number of results (1-50). Defaults to 10.")]
    pub limit: Option<usize>,

    #[schemars(description = "Minimum cosine similarity (0.0-1.0). Defaults to 0.3.")]
    pub min_similarity: Option<f64>,

    #[schemars(description = "Only return entities of these types, e.g. [\"note\", \"task\"]")]
    pub r#type: Option<Vec<String>>,
}

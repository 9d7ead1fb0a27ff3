//! MCP `context_search` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `context_search` MCP tool.
///
/// Supply the text being edited, or explicit concepts, or a title. Concepts take
/// precedence over the title.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ContextSearchParams {
    #[schemars(description = "Text currently being written or read")]
    pub text: Option<String>,

    #[schemars(description = "Key concepts of the current context")]
    pub concepts: Option<Vec<String>>,

    #[schemars(description = "Title of the current document")]
    pub title: Option<String>,

    #[schemars(description = "Entity being edited, as 'type:id'; it is never returned")]
    pub exclude: Option<String>,

    #[schemars(description = "Maximum number of results (1-50). Defaults to 10.")]
    pub limit: Option<usize>,
}

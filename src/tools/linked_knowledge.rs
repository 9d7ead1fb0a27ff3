//! MCP `linked_knowledge` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `linked_knowledge` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct LinkedKnowledgeParams {
    #[schemars(description = "Entity whose linked knowledge to return, as 'type:id'")]
    pub entity: String,
}

//! MCP `index_entity` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct IndexEntityParams {
    #[schemars(description = "Entity to index, as 'type:id'")]
    pub entity: String,

    #[schemars(
        description = "Text to index. Defaults to the stored entity's title and body."
    )]
    pub text: Option<String>,

    #[schemars(description = "Name of the field the text came from")]
    pub field: Option<String>,
}

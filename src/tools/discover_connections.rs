//! MCP `discover_connections` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct DiscoverConnectionsParams {
    #[schemars(description = "Entity to explore, as 'type:id' (e.g. 'note:42')")]
    pub entity: String,

    #[schemars(
        description = "Exploration depth. 1 = direct relationships only; 2 also follows links through connection entities. Defaults to 1."
    )]
    pub depth: Option<u32>,
}

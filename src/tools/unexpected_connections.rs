//! MCP `unexpected_connections` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct UnexpectedConnectionsParams {
    #[schemars(description = "Maximum number of pairs to return (1-50). Defaults to 10.")]
    pub limit: Option<usize>,
}

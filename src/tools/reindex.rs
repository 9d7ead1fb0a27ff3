//! MCP `reindex` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ReindexParams {
    #[schemars(
        description = "'start' begins a full reindex in the background (default), 'status' reports progress, 'cancel' stops a running reindex"
    )]
    pub action: Option<String>,
}

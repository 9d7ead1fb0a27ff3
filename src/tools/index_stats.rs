use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct IndexStatsParams {
    #[schemars(description = "Also run a database integrity check")]
    pub check_integrity: Option<bool>,
}

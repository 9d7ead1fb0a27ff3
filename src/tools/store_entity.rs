use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct StoreEntityParams {
    #[schemars(
        description = "Entity type: 'note', 'task', 'content', 'research', 'connection' (links other entities), or 'project'"
    )]
    pub r#type: String,

    #[schemars(description = "Entity id, unique within its type")]
    pub id: i64,

    #[schemars(description = "Entity title")]
    pub title: String,

    #[schemars(
        description = "Main text: note content, task/connection/project description, content body, or research summary"
    )]
    pub text: String,

    #[schemars(description = "Optional id of the project this entity belongs to")]
    pub project_id: Option<i64>,

    #[schemars(
        description = "For connections only: referenced entities as 'type:id' strings, e.g. ['note:3', 'task:8']"
    )]
    pub references: Option<Vec<String>>,

    #[schemars(description = "Source URL for content and research entities")]
    pub url: Option<String>,

    #[schemars(description = "For tasks: whether the task is done")]
    pub completed: Option<bool>,

    #[schemars(description = "Mark the entity deleted instead of storing it")]
    pub deleted: Option<bool>,
}

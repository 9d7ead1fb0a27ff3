//! Core knowledge type definitions.
//!
//! Defines [`EntityType`] (the closed set of entity kinds), [`EntityRef`] (the
//! `(type, id)` pair every index row points at), [`Entity`] with its per-kind
//! [`EntityBody`], and the result types handed back to callers:
//! [`SearchResult`] and [`DiscoveredConnection`].

use serde::{Deserialize, Serialize};

/// The kinds of entity a knowledge base holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Free-form notes and ideas.
    Note,
    /// Actionable tasks.
    Task,
    /// Captured content: articles, clips, transcripts.
    Content,
    /// Research items with a source and a summary.
    Research,
    /// Mental-model connections that explicitly reference other entities.
    Connection,
    /// Projects that group other entities.
    Project,
}

impl EntityType {
    /// Every entity type in reindex priority order.
    pub const ALL: [EntityType; 6] = [
        Self::Note,
        Self::Task,
        Self::Research,
        Self::Content,
        Self::Connection,
        Self::Project,
    ];

    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Task => "task",
            Self::Content => "content",
            Self::Research => "research",
            Self::Connection => "connection",
            Self::Project => "project",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "note" | "idea" => Ok(Self::Note),
            "task" => Ok(Self::Task),
            "content" => Ok(Self::Content),
            "research" => Ok(Self::Research),
            "connection" => Ok(Self::Connection),
            "project" => Ok(Self::Project),
            _ => Err(format!("unknown entity type: {s}")),
        }
    }
}

/// A pointer to an entity: its type tag plus an id unique within that type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub entity_id: i64,
}

impl EntityRef {
    pub fn new(entity_type: EntityType, entity_id: i64) -> Self {
        Self {
            entity_type,
            entity_id,
        }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_id)
    }
}

impl std::str::FromStr for EntityRef {
    type Err = String;

    /// Parses the `type:id` form produced by `Display`, e.g. `note:42`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| format!("expected <type>:<id>, got: {s}"))?;
        let entity_type = kind.trim().parse::<EntityType>()?;
        let entity_id = id
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("invalid entity id: {id}"))?;
        Ok(Self::new(entity_type, entity_id))
    }
}

/// One entry in a connection entity's reference list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub target: EntityRef,
    /// Title captured when the reference was made; the live entity title wins when present.
    pub title: String,
}

/// Kind-specific fields of an entity.
///
/// Rows are turned into this enum once, at the storage boundary; nothing downstream
/// re-derives the kind from loose columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityBody {
    Note {
        content: String,
    },
    Task {
        description: String,
        #[serde(default)]
        completed: bool,
    },
    Content {
        body: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_url: Option<String>,
    },
    Research {
        summary: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    Connection {
        description: String,
        /// Stored separately in `connection_references`; never part of the payload column.
        #[serde(skip)]
        references: Vec<Reference>,
    },
    Project {
        description: String,
    },
}

impl EntityBody {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::Note { .. } => EntityType::Note,
            Self::Task { .. } => EntityType::Task,
            Self::Content { .. } => EntityType::Content,
            Self::Research { .. } => EntityType::Research,
            Self::Connection { .. } => EntityType::Connection,
            Self::Project { .. } => EntityType::Project,
        }
    }

    /// The free text this body contributes to search.
    pub fn text(&self) -> &str {
        match self {
            Self::Note { content } => content,
            Self::Task { description, .. } => description,
            Self::Content { body, .. } => body,
            Self::Research { summary, .. } => summary,
            Self::Connection { description, .. } => description,
            Self::Project { description } => description,
        }
    }

    /// Name of the field [`Self::text`] reads, recorded on indexed chunks.
    pub fn text_field(&self) -> &'static str {
        match self {
            Self::Note { .. } => "content",
            Self::Content { .. } => "body",
            Self::Research { .. } => "summary",
            Self::Task { .. } | Self::Connection { .. } | Self::Project { .. } => "description",
        }
    }

    /// An empty body of the given kind.
    pub fn empty(entity_type: EntityType) -> Self {
        match entity_type {
            EntityType::Note => Self::Note {
                content: String::new(),
            },
            EntityType::Task => Self::Task {
                description: String::new(),
                completed: false,
            },
            EntityType::Content => Self::Content {
                body: String::new(),
                source_url: None,
            },
            EntityType::Research => Self::Research {
                summary: String::new(),
                url: None,
            },
            EntityType::Connection => Self::Connection {
                description: String::new(),
                references: Vec::new(),
            },
            EntityType::Project => Self::Project {
                description: String::new(),
            },
        }
    }
}

/// An entity as held by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub reference: EntityRef,
    pub title: String,
    /// Owning project id, if the entity is attached to one.
    pub project_id: Option<i64>,
    pub is_deleted: bool,
    pub created_at: String,
    pub updated_at: String,
    pub body: EntityBody,
}

impl Entity {
    /// Build a fresh, live entity. The body decides the entity type.
    pub fn new(entity_id: i64, title: impl Into<String>, body: EntityBody) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            reference: EntityRef::new(body.entity_type(), entity_id),
            title: title.into(),
            project_id: None,
            is_deleted: false,
            created_at: now.clone(),
            updated_at: now,
            body,
        }
    }

    pub fn with_project(mut self, project_id: i64) -> Self {
        self.project_id = Some(project_id);
        self
    }

    /// Title plus body text, the unit that gets embedded and keyword-indexed.
    pub fn searchable_text(&self) -> String {
        let body = self.body.text().trim();
        let title = self.title.trim();
        match (title.is_empty(), body.is_empty()) {
            (true, _) => body.to_string(),
            (false, true) => title.to_string(),
            (false, false) => format!("{title}\n{body}"),
        }
    }

    /// The explicit references of a connection entity; empty for every other kind.
    pub fn references(&self) -> &[Reference] {
        match &self.body {
            EntityBody::Connection { references, .. } => references,
            _ => &[],
        }
    }
}

/// Minimal view of an entity used to label results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityInfo {
    pub reference: EntityRef,
    pub title: String,
    pub project_id: Option<i64>,
}

/// Why a search result matched. Informational only; never affects ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    Keyword,
    Semantic,
    Hybrid,
    ContextRelevant,
}

impl MatchReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::Semantic => "semantic",
            Self::Hybrid => "hybrid",
            Self::ContextRelevant => "context_relevant",
        }
    }
}

impl std::fmt::Display for MatchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single ranked search hit.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub reference: EntityRef,
    pub title: String,
    pub preview: String,
    /// Keyword relevance normalized into `[0, 1]`.
    pub keyword_score: f64,
    /// Best cosine similarity across the entity's chunks.
    pub similarity: f64,
    pub combined_score: f64,
    pub match_reason: MatchReason,
}

/// How a discovered connection was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    DirectReference,
    SharedProject,
    SemanticSimilarity,
    SharedConcepts,
    Transitive,
    SpatialProximity,
}

impl ConnectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DirectReference => "direct_reference",
            Self::SharedProject => "shared_project",
            Self::SemanticSimilarity => "semantic_similarity",
            Self::SharedConcepts => "shared_concepts",
            Self::Transitive => "transitive",
            Self::SpatialProximity => "spatial_proximity",
        }
    }

    /// Tie-break rank when two paths reach the same target with equal strength.
    /// Explicit links outrank anything inferred.
    pub fn priority(&self) -> u8 {
        match self {
            Self::DirectReference => 5,
            Self::SemanticSimilarity => 4,
            Self::SharedProject => 3,
            Self::SharedConcepts => 2,
            Self::Transitive => 1,
            Self::SpatialProximity => 0,
        }
    }
}

impl std::fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A relationship surfaced between two entities.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredConnection {
    pub source: EntityRef,
    pub target: EntityRef,
    pub target_title: String,
    /// Strength in `[0, 1]`; direct references are always `1.0`.
    pub strength: f64,
    pub kind: ConnectionKind,
    pub explanation: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_ref_display_round_trips() {
        let r = EntityRef::new(EntityType::Research, 12);
        assert_eq!(r.to_string(), "research:12");
        assert_eq!("research:12".parse::<EntityRef>().unwrap(), r);
        assert_eq!("idea:3".parse::<EntityRef>().unwrap().entity_type, EntityType::Note);
    }

    #[test]
    fn entity_ref_rejects_garbage() {
        assert!("note".parse::<EntityRef>().is_err());
        assert!("note:abc".parse::<EntityRef>().is_err());
        assert!("widget:1".parse::<EntityRef>().is_err());
    }

    #[test]
    fn searchable_text_joins_title_and_body() {
        let e = Entity::new(
            1,
            "Ownership",
            EntityBody::Note {
                content: "Borrowing rules".into(),
            },
        );
        assert_eq!(e.searchable_text(), "Ownership\nBorrowing rules");

        let untitled = Entity::new(2, "  ", EntityBody::Project { description: "Garden".into() });
        assert_eq!(untitled.searchable_text(), "Garden");
    }

    #[test]
    fn body_payload_omits_connection_references() {
        let body = EntityBody::Connection {
            description: "Feedback loops".into(),
            references: vec![Reference {
                target: EntityRef::new(EntityType::Note, 1),
                title: "Systems".into(),
            }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["kind"], "connection");
        assert!(json.get("references").is_none());
    }

    #[test]
    fn direct_reference_has_top_priority() {
        let kinds = [
            ConnectionKind::SharedProject,
            ConnectionKind::SemanticSimilarity,
            ConnectionKind::SharedConcepts,
            ConnectionKind::Transitive,
            ConnectionKind::SpatialProximity,
        ];
        for k in kinds {
            assert!(ConnectionKind::DirectReference.priority() > k.priority());
        }
    }
}

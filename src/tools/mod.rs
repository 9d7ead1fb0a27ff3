pub mod context_search;
pub mod discover_connections;
pub mod hybrid_search;
pub mod index_entity;
pub mod index_stats;
pub mod linked_knowledge;
pub mod reindex;
pub mod search;
pub mod store_entity;
pub mod unexpected_connections;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use context_search::ContextSearchParams;
use discover_connections::DiscoverConnectionsParams;
use hybrid_search::HybridSearchParams;
use index_entity::IndexEntityParams;
use index_stats::IndexStatsParams;
use linked_knowledge::LinkedKnowledgeParams;
use reindex::ReindexParams;
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{tool, tool_handler, tool_router, ServerHandler};
use rusqlite::Connection;
use search::SearchParams;
use store_entity::StoreEntityParams;
use unexpected_connections::UnexpectedConnectionsParams;

use crate::config::TesseraConfig;
use crate::db::Store;
use crate::embedding::Embedder;
use crate::error::KnowledgeError;
use crate::knowledge::chunks::{self, IndexOutcome};
use crate::knowledge::connections::discover_connections;
use crate::knowledge::entities::{entity_info, get_entity, set_deleted, upsert_entity};
use crate::knowledge::hybrid::{context_search, context_search_text, hybrid_search, ContextQuery, HybridOptions};
use crate::knowledge::refresh::RefreshQueue;
use crate::knowledge::reindex::{spawn_reindex, ReindexHandle};
use crate::knowledge::stats::index_stats;
use crate::knowledge::types::{DiscoveredConnection, Entity, EntityBody, EntityRef, EntityType, Reference};
use crate::knowledge::unexpected::surface_unexpected_connections;

const MAX_LIMIT: usize = 50;

/// Depth used when refreshing linked knowledge in the background.
const LINKED_DEPTH: u32 = 2;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Discovered connections per entity, tagged with the write generation they
/// were computed in.
#[derive(Default)]
struct LinkedCache {
    generation: u64,
    entries: HashMap<EntityRef, Vec<DiscoveredConnection>>,
}

impl LinkedCache {
    /// Drop every entry. A write to one entity can change the connections of
    /// others: project siblings, canvas neighbours, anything that linked to it.
    fn invalidate(&mut self) {
        self.generation += 1;
        self.entries.clear();
    }

    /// Store `connections` unless a write has happened since `generation`.
    fn insert_if_current(&mut self, generation: u64, r: EntityRef, connections: Vec<DiscoveredConnection>) {
        if generation == self.generation {
            self.entries.insert(r, connections);
        } else {
            tracing::debug!(entity = %r, "discarding linked knowledge computed before a newer write");
        }
    }
}

/// Process-wide work that outlives a single MCP session: the debounced
/// linked-knowledge refresh, its cached results, and the running reindex.
pub struct Background {
    store: Arc<Store>,
    config: Arc<TesseraConfig>,
    refresh: RefreshQueue,
    linked: Arc<Mutex<LinkedCache>>,
    reindex: Mutex<Option<ReindexHandle>>,
}

impl Background {
    /// Start the refresh queue. Must be called inside a tokio runtime.
    pub fn start(store: Arc<Store>, embedder: Arc<Embedder>, config: Arc<TesseraConfig>) -> Self {
        let linked: Arc<Mutex<LinkedCache>> = Arc::default();
        let delay = Duration::from_millis(config.discovery.refresh_debounce_ms);

        let refresh = {
            let store = store.clone();
            let config = config.clone();
            let cache = linked.clone();
            RefreshQueue::new(delay, move |batch: Vec<EntityRef>| {
                let store = store.clone();
                let embedder = embedder.clone();
                let config = config.clone();
                let cache = cache.clone();
                async move {
                    let outcome = tokio::task::spawn_blocking(move || {
                        for r in batch {
                            refresh_one(&store, &embedder, &config, &cache, r)?;
                        }
                        Ok::<_, KnowledgeError>(())
                    })
                    .await;
                    match outcome {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => tracing::warn!(error = %e, "linked knowledge refresh failed"),
                        Err(e) => tracing::warn!(error = %e, "linked knowledge task failed"),
                    }
                }
            })
        };

        Self {
            store,
            config,
            refresh,
            linked,
            reindex: Mutex::new(None),
        }
    }

    /// Record a write to `changed`: invalidate cached linked knowledge and queue
    /// a refresh of `changed` and of everything in `also`.
    pub fn entity_changed(&self, changed: EntityRef, also: &[EntityRef]) {
        lock(&self.linked).invalidate();
        self.refresh.schedule(changed);
        for r in also {
            self.refresh.schedule(*r);
        }
    }

    /// Cached connections of `r`, if any are current.
    pub fn cached_linked(&self, r: EntityRef) -> Option<Vec<DiscoveredConnection>> {
        lock(&self.linked).entries.get(&r).cloned()
    }

    fn reindex_running(&self) -> bool {
        lock(&self.reindex)
            .as_ref()
            .is_some_and(|h| !h.join.is_finished())
    }

    /// Connections of `r`, from the cache when current, otherwise discovered on
    /// a read connection and cached unless a reindex is rewriting vectors.
    /// The flag is `true` for a cache hit. Blocking.
    pub fn linked_knowledge(&self, r: EntityRef) -> crate::error::Result<(Vec<DiscoveredConnection>, bool)> {
        if let Some(hit) = self.cached_linked(r) {
            return Ok((hit, true));
        }
        let generation = lock(&self.linked).generation;
        let found = discover_connections(&self.store.read(), r, LINKED_DEPTH, &self.config.discovery)?;
        if !self.reindex_running() {
            lock(&self.linked).insert_if_current(generation, r, found.clone());
        }
        Ok((found, false))
    }
}

/// Re-index one entity and recompute its connections into the cache.
fn refresh_one(
    store: &Store,
    embedder: &Embedder,
    config: &TesseraConfig,
    cache: &Mutex<LinkedCache>,
    r: EntityRef,
) -> crate::error::Result<()> {
    let generation = lock(cache).generation;
    {
        let mut conn = store.write();
        let Some(entity) = get_entity(&conn, r)?.filter(|e| !e.is_deleted) else {
            lock(cache).entries.remove(&r);
            return Ok(());
        };
        chunks::index_entity(&mut conn, embedder, r, Some(entity.body.text_field()), &entity.searchable_text())?;
    }
    let connections = discover_connections(&store.read(), r, LINKED_DEPTH, &config.discovery)?;
    tracing::debug!(entity = %r, connections = connections.len(), "linked knowledge refreshed");
    lock(cache).insert_if_current(generation, r, connections);
    Ok(())
}

fn parse_ref(raw: &str) -> Result<EntityRef, String> {
    raw.parse::<EntityRef>()
}

fn parse_type_filter(raw: Option<Vec<String>>) -> Result<Option<Vec<EntityType>>, String> {
    raw.map(|types| {
        let mut parsed = types
            .iter()
            .map(|t| t.trim().parse::<EntityType>())
            .collect::<Result<Vec<_>, _>>()?;
        parsed.sort();
        parsed.dedup();
        Ok(parsed)
    })
    .transpose()
}

fn clamp_limit(limit: Option<usize>, default: usize) -> usize {
    limit.unwrap_or(default).clamp(1, MAX_LIMIT)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string(value).map_err(|e| format!("serialization failed: {e}"))
}

/// Build the entity a `store_entity` call describes.
fn build_body(params: &StoreEntityParams, entity_type: EntityType) -> Result<EntityBody, String> {
    let text = params.text.clone();
    Ok(match entity_type {
        EntityType::Note => EntityBody::Note { content: text },
        EntityType::Task => EntityBody::Task {
            description: text,
            completed: params.completed.unwrap_or(false),
        },
        EntityType::Content => EntityBody::Content {
            body: text,
            source_url: params.url.clone(),
        },
        EntityType::Research => EntityBody::Research {
            summary: text,
            url: params.url.clone(),
        },
        EntityType::Connection => {
            let references = params
                .references
                .iter()
                .flatten()
                .map(|raw| {
                    parse_ref(raw).map(|target| Reference {
                        target,
                        title: raw.clone(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            EntityBody::Connection {
                description: text,
                references,
            }
        }
        EntityType::Project => EntityBody::Project { description: text },
    })
}

/// The Tessera MCP tool handler. Holds shared state (db connection, embedder,
/// config, background work) and exposes all MCP tools via `#[tool_router]`.
#[derive(Clone)]
pub struct TesseraTools {
    tool_router: ToolRouter<Self>,
    store: Arc<Store>,
    embedder: Arc<Embedder>,
    config: Arc<TesseraConfig>,
    background: Arc<Background>,
}

impl TesseraTools {
    /// Run a synchronous read on the blocking pool with a read connection.
    async fn read_db<T, F>(&self, op: &'static str, f: F) -> Result<T, String>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &Embedder, &TesseraConfig) -> crate::error::Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let embedder = Arc::clone(&self.embedder);
        let config = Arc::clone(&self.config);
        tokio::task::spawn_blocking(move || {
            let conn = store.read();
            f(&conn, &embedder, &config).map_err(|e| format!("{op} failed: {e}"))
        })
        .await
        .map_err(|e| format!("{op} task failed: {e}"))?
    }

    /// Run a synchronous write on the blocking pool holding the writer.
    async fn write_db<T, F>(&self, op: &'static str, f: F) -> Result<T, String>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &Embedder) -> crate::error::Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let embedder = Arc::clone(&self.embedder);
        tokio::task::spawn_blocking(move || {
            let mut conn = store.write();
            f(&mut conn, &embedder).map_err(|e| format!("{op} failed: {e}"))
        })
        .await
        .map_err(|e| format!("{op} task failed: {e}"))?
    }
}

#[tool_router]
impl TesseraTools {
    pub fn new(
        store: Arc<Store>,
        embedder: Arc<Embedder>,
        config: Arc<TesseraConfig>,
        background: Arc<Background>,
    ) -> Self {
        Self {
            tool_router: Self::tool_router(),
            store,
            embedder,
            config,
            background,
        }
    }

    /// Store (or update) an entity and index its text.
    #[tool(description = "Store or update a knowledge entity (note, task, content, research, connection, project) and index it for search. Connections link other entities via 'references'.")]
    async fn store_entity(
        &self,
        Parameters(params): Parameters<StoreEntityParams>,
    ) -> Result<String, String> {
        let entity_type: EntityType = params.r#type.parse().map_err(|e: String| e)?;
        let reference = EntityRef::new(entity_type, params.id);
        tracing::info!(entity = %reference, text_len = params.text.len(), "store_entity called");

        if params.deleted.unwrap_or(false) {
            let found = self
                .write_db("delete", move |conn, _| set_deleted(conn, reference, true))
                .await?;
            if !found {
                return Err(KnowledgeError::InvalidReference(reference).to_string());
            }
            self.background.entity_changed(reference, &[]);
            return to_json(&serde_json::json!({ "entity": reference.to_string(), "deleted": true }));
        }

        if params.title.trim().is_empty() && params.text.trim().is_empty() {
            return Err("title and text must not both be empty".into());
        }
        let body = build_body(&params, entity_type)?;
        let mut entity = Entity::new(params.id, params.title, body);
        entity.project_id = params.project_id;
        let targets: Vec<EntityRef> = entity.references().iter().map(|r| r.target).collect();

        let outcome: IndexOutcome = self
            .write_db("store", move |conn, embedder| {
                if let Some(existing) = get_entity(conn, entity.reference)? {
                    entity.created_at = existing.created_at;
                }
                if let EntityBody::Connection { references, .. } = &mut entity.body {
                    for reference in references.iter_mut() {
                        if let Some(info) = entity_info(conn, reference.target)? {
                            reference.title = info.title;
                        }
                    }
                }
                upsert_entity(conn, &entity)?;
                chunks::index_entity(
                    conn,
                    embedder,
                    entity.reference,
                    Some(entity.body.text_field()),
                    &entity.searchable_text(),
                )
            })
            .await?;

        self.background.entity_changed(reference, &targets);

        tracing::info!(entity = %reference, outcome = ?outcome, "entity stored");
        to_json(&serde_json::json!({ "entity": reference.to_string(), "index": outcome }))
    }

    /// Pure semantic search.
    #[tool(description = "Semantic search: find entities whose meaning is close to the query, regardless of wording.")]
    async fn search(&self, Parameters(params): Parameters<SearchParams>) -> Result<String, String> {
        let type_filter = parse_type_filter(params.r#type)?;
        let limit = clamp_limit(params.limit, self.config.retrieval.default_limit);
        let min_similarity = params
            .min_similarity
            .unwrap_or(self.config.retrieval.min_similarity);
        tracing::info!(query = %params.query, limit, "search called");

        let query = params.query;
        let results = self
            .read_db("search", move |conn, embedder, _| {
                chunks::search(conn, embedder, &query, limit, min_similarity, type_filter.as_deref())
            })
            .await?;
        to_json(&serde_json::json!({ "results": results, "total": results.len() }))
    }

    /// Hybrid keyword + semantic search.
    #[tool(description = "Hybrid search: keyword matches re-ranked by semantic similarity. 'weight' trades keyword (0.0) against semantic (1.0) relevance; optional 'context' boosts results related to the current work.")]
    async fn hybrid_search(
        &self,
        Parameters(params): Parameters<HybridSearchParams>,
    ) -> Result<String, String> {
        let type_filter = parse_type_filter(params.r#type)?;
        let weight = params.weight.unwrap_or(self.config.retrieval.hybrid_weight);
        if !(0.0..=1.0).contains(&weight) {
            return Err("weight must be between 0.0 and 1.0".into());
        }
        let limit = clamp_limit(params.limit, self.config.retrieval.default_limit);
        tracing::info!(query = %params.query, limit, weight, "hybrid_search called");

        let query = params.query;
        let context = params.context.filter(|c| !c.trim().is_empty());
        let results = self
            .read_db("hybrid search", move |conn, embedder, config| {
                let opts = HybridOptions {
                    limit,
                    weight,
                    type_filter,
                    context_vector: context.map(|c| embedder.embed(&c)),
                    exclude: None,
                };
                hybrid_search(conn, embedder, &query, &opts, &config.retrieval)
            })
            .await?;
        to_json(&serde_json::json!({ "results": results, "total": results.len() }))
    }

    /// Knowledge related to what the user is working on.
    #[tool(description = "Find knowledge related to the current context (text being written, key concepts, or a title). The entity being edited can be excluded.")]
    async fn context_search(
        &self,
        Parameters(params): Parameters<ContextSearchParams>,
    ) -> Result<String, String> {
        let exclude = params.exclude.as_deref().map(parse_ref).transpose()?;
        let limit = clamp_limit(params.limit, self.config.retrieval.default_limit);
        tracing::info!(limit, exclude = ?exclude, "context_search called");

        let results = self
            .read_db("context search", move |conn, embedder, config| {
                match params.text.as_deref().filter(|t| !t.trim().is_empty()) {
                    Some(text) if params.concepts.is_none() => context_search_text(
                        conn,
                        embedder,
                        text,
                        params.title.as_deref(),
                        exclude,
                        limit,
                        &config.retrieval,
                    ),
                    text => {
                        let query = ContextQuery {
                            concepts: params.concepts.clone().unwrap_or_default(),
                            title: params.title.clone(),
                            context_vector: text.map(|t| embedder.embed(t)),
                            exclude,
                        };
                        context_search(conn, embedder, &query, limit, &config.retrieval)
                    }
                }
            })
            .await?;
        to_json(&serde_json::json!({ "results": results, "total": results.len() }))
    }

    /// Relationships of one entity.
    #[tool(description = "Discover how an entity relates to the rest of the knowledge base: explicit references, semantic neighbours, shared projects, canvas proximity, and (depth 2) links through connection entities.")]
    async fn discover_connections(
        &self,
        Parameters(params): Parameters<DiscoverConnectionsParams>,
    ) -> Result<String, String> {
        let reference = parse_ref(&params.entity)?;
        let depth = params.depth.unwrap_or(1).clamp(1, 2);
        tracing::info!(entity = %reference, depth, "discover_connections called");

        let connections = self
            .read_db("discovery", move |conn, _, config| {
                discover_connections(conn, reference, depth, &config.discovery)
            })
            .await?;
        to_json(&serde_json::json!({ "entity": reference.to_string(), "connections": connections }))
    }

    /// Corpus-wide similar-but-unlinked pairs.
    #[tool(description = "Surface unexpected connections: pairs of recent entities that are semantically similar but not explicitly linked.")]
    async fn unexpected_connections(
        &self,
        Parameters(params): Parameters<UnexpectedConnectionsParams>,
    ) -> Result<String, String> {
        let limit = clamp_limit(params.limit, self.config.retrieval.default_limit);
        tracing::info!(limit, "unexpected_connections called");

        let connections = self
            .read_db("unexpected connections", move |conn, _, config| {
                surface_unexpected_connections(conn, limit, &config.discovery)
            })
            .await?;
        to_json(&serde_json::json!({ "connections": connections, "total": connections.len() }))
    }

    /// Index one entity's text.
    #[tool(description = "Index (or refresh the index of) one entity. Unchanged text is not re-embedded.")]
    async fn index_entity(
        &self,
        Parameters(params): Parameters<IndexEntityParams>,
    ) -> Result<String, String> {
        let reference = parse_ref(&params.entity)?;
        tracing::info!(entity = %reference, "index_entity called");

        let outcome = self
            .write_db("index", move |conn, embedder| {
                let (field, text) = match params.text {
                    Some(text) => (params.field, text),
                    None => {
                        let entity = get_entity(conn, reference)?
                            .filter(|e| !e.is_deleted)
                            .ok_or(KnowledgeError::InvalidReference(reference))?;
                        let field = params.field.or_else(|| Some(entity.body.text_field().to_string()));
                        (field, entity.searchable_text())
                    }
                };
                chunks::index_entity(conn, embedder, reference, field.as_deref(), &text)
            })
            .await?;
        if matches!(outcome, IndexOutcome::Inserted | IndexOutcome::Updated) {
            self.background.entity_changed(reference, &[]);
        }
        to_json(&serde_json::json!({ "entity": reference.to_string(), "index": outcome }))
    }

    /// Start, inspect or cancel a full reindex.
    #[tool(description = "Full reindex of every entity. action: 'start' (default, runs in the background), 'status', or 'cancel'.")]
    async fn reindex(&self, Parameters(params): Parameters<ReindexParams>) -> Result<String, String> {
        let action = params.action.as_deref().unwrap_or("start");
        tracing::info!(action, "reindex called");

        let mut slot = lock(&self.background.reindex);
        let running = slot.as_ref().is_some_and(|h| !h.join.is_finished());
        match action {
            "start" if !running => {
                let handle = spawn_reindex(Arc::clone(&self.store), Arc::clone(&self.embedder));
                *slot = Some(handle);
                lock(&self.background.linked).invalidate();
                to_json(&serde_json::json!({ "status": "started" }))
            }
            "start" | "status" => match slot.as_ref() {
                Some(handle) => {
                    let progress = handle.progress.borrow().clone();
                    to_json(&serde_json::json!({
                        "status": if running { "running" } else { "finished" },
                        "progress": progress,
                    }))
                }
                None => to_json(&serde_json::json!({ "status": "idle" })),
            },
            "cancel" => match slot.as_ref() {
                Some(handle) if running => {
                    handle.cancel.cancel();
                    to_json(&serde_json::json!({ "status": "cancelling" }))
                }
                _ => to_json(&serde_json::json!({ "status": "idle" })),
            },
            other => Err(format!("unknown action: {other}. Use start, status, or cancel")),
        }
    }

    /// Cached connections of a recently edited entity.
    #[tool(description = "Linked knowledge for an entity: its discovered connections, refreshed in the background shortly after each edit.")]
    async fn linked_knowledge(
        &self,
        Parameters(params): Parameters<LinkedKnowledgeParams>,
    ) -> Result<String, String> {
        let reference = parse_ref(&params.entity)?;
        tracing::info!(entity = %reference, "linked_knowledge called");

        let background = Arc::clone(&self.background);
        let (connections, cached) = tokio::task::spawn_blocking(move || background.linked_knowledge(reference))
            .await
            .map_err(|e| format!("linked knowledge task failed: {e}"))?
            .map_err(|e| format!("linked knowledge failed: {e}"))?;
        to_json(&serde_json::json!({
            "entity": reference.to_string(),
            "cached": cached,
            "connections": connections,
        }))
    }

    /// Index statistics.
    #[tool(description = "Index statistics: entity counts by type, chunk counts by vector width, embedding service status and cache counters.")]
    async fn index_stats(
        &self,
        Parameters(params): Parameters<IndexStatsParams>,
    ) -> Result<String, String> {
        tracing::info!("index_stats called");
        let check = params.check_integrity.unwrap_or(false);

        let (stats, health) = self
            .read_db("stats", move |conn, _, _| {
                let stats = index_stats(conn)?;
                let health = if check {
                    Some(crate::db::check_database_health(conn)?)
                } else {
                    None
                };
                Ok((stats, health))
            })
            .await?;

        to_json(&serde_json::json!({
            "index": stats,
            "embedder": self.embedder.stats(),
            "embedding_dimensions": self.embedder.current_dimensions(),
            "health": health,
        }))
    }
}

#[tool_handler]
impl ServerHandler for TesseraTools {
    fn get_info(&self) -> rmcp::model::ServerInfo {
        rmcp::model::ServerInfo {
            instructions: Some(
                "Tessera is a local-first knowledge base. Use store_entity to save knowledge, \
                 hybrid_search or search to find it, context_search for material related to the \
                 current work, and discover_connections / linked_knowledge to explore relationships."
                    .into(),
            ),
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            ..Default::default()
        }
    }
}

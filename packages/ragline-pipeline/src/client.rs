use std::{collections::HashMap, sync::Arc};

use ragline_config::Config;
use ragline_storage::{graph::Neo4jStore, qdrant::QdrantStore};

use crate::{
	EmbeddingProvider, Error, GraphStore, LlmProvider, Result, VectorSearch,
	adapters::{HttpEmbeddingProvider, HttpLlmProvider},
	builder::PipelineBuilder,
	context::EntityContext,
	settings::Settings,
	structured::{ResponseCache, StructuredExecutor},
	vector::{QdrantVectorSearch, VectorIndexConfig, VectorIndexRegistry},
};

/// Entry point holding the injected backends. Cheap to clone and share; each query gets its own
/// [`PipelineBuilder`].
#[derive(Clone)]
pub struct RagClient {
	pub(crate) store: Arc<dyn GraphStore>,
	pub(crate) vector: Option<Arc<dyn VectorSearch>>,
	pub(crate) llm: Option<Arc<dyn LlmProvider>>,
	pub(crate) embedding: Option<Arc<dyn EmbeddingProvider>>,
	pub(crate) indexes: VectorIndexRegistry,
	pub(crate) contexts: HashMap<String, Arc<EntityContext>>,
	pub(crate) cache: Option<Arc<ResponseCache>>,
	pub(crate) settings: Settings,
}
impl RagClient {
	pub fn new(store: Arc<dyn GraphStore>, settings: Settings) -> Self {
		let cache = settings.cache_responses.then(|| Arc::new(ResponseCache::default()));

		Self {
			store,
			vector: None,
			llm: None,
			embedding: None,
			indexes: VectorIndexRegistry::new(),
			contexts: HashMap::new(),
			cache,
			settings,
		}
	}

	/// Wires the Neo4j store, the HTTP providers and, when configured, Qdrant.
	pub fn from_config(cfg: &Config) -> Result<Self> {
		let store = Neo4jStore::new(&cfg.storage.graph)?;
		let settings = Settings::from_config(&cfg.pipeline)?;
		let mut client = Self::new(Arc::new(store), settings)
			.with_llm(Arc::new(HttpLlmProvider::new(cfg.providers.llm.clone())));

		client.indexes = VectorIndexRegistry::from_config(&cfg.vector_indexes);

		if let Some(embedding_cfg) = cfg.providers.embedding.as_ref() {
			let embedding: Arc<dyn EmbeddingProvider> =
				Arc::new(HttpEmbeddingProvider::new(embedding_cfg.clone()));

			if let Some(qdrant_cfg) = cfg.storage.qdrant.as_ref() {
				let qdrant = QdrantStore::new(qdrant_cfg)?;

				client = client
					.with_vector_search(Arc::new(QdrantVectorSearch::new(qdrant, embedding.clone())));
			}

			client = client.with_embedding(embedding);
		}

		Ok(client)
	}

	pub fn with_vector_search(mut self, vector: Arc<dyn VectorSearch>) -> Self {
		self.vector = Some(vector);

		self
	}

	pub fn with_llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
		self.llm = Some(llm);

		self
	}

	pub fn with_embedding(mut self, embedding: Arc<dyn EmbeddingProvider>) -> Self {
		self.embedding = Some(embedding);

		self
	}

	pub fn with_index(mut self, index: VectorIndexConfig) -> Self {
		self.indexes.register(index);

		self
	}

	/// Registers the default prompt context for `context.entity_type`.
	pub fn with_entity_context(mut self, context: impl Into<Arc<EntityContext>>) -> Self {
		let context = context.into();

		self.contexts.insert(context.entity_type.clone(), context);

		self
	}

	pub fn with_response_cache(mut self, cache: Arc<ResponseCache>) -> Self {
		self.cache = Some(cache);

		self
	}

	pub fn settings(&self) -> &Settings {
		&self.settings
	}

	pub fn entity_context(&self, entity_type: &str) -> Option<Arc<EntityContext>> {
		self.contexts.get(entity_type).cloned()
	}

	pub fn query(&self, entity_type: impl Into<String>) -> PipelineBuilder {
		PipelineBuilder::new(self.clone(), entity_type.into())
	}

	/// Structured execution outside a pipeline, using the client's LLM provider and defaults.
	pub fn structured(&self) -> Result<StructuredExecutor> {
		let llm = self
			.llm
			.clone()
			.ok_or_else(|| Error::configuration("Structured execution requires an LLM provider."))?;

		Ok(StructuredExecutor::new(llm)
			.with_cache(self.cache.clone())
			.with_defaults(self.settings.structured_batching))
	}
}

use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	#[serde(default)]
	pub pipeline: Pipeline,
	/// Named vector indexes the `semantic` operation can target.
	#[serde(default)]
	pub vector_indexes: Vec<VectorIndex>,
}

#[derive(Debug, Deserialize)]
pub struct Service {
	#[serde(default = "default_log_level")]
	pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
	pub graph: GraphStore,
	pub qdrant: Option<Qdrant>,
}

/// Neo4j HTTP transactional endpoint.
#[derive(Clone, Debug, Deserialize)]
pub struct GraphStore {
	pub url: String,
	#[serde(default = "default_database")]
	pub database: String,
	#[serde(default = "default_timeout_ms")]
	pub timeout_ms: u64,
	/// Sent verbatim with every request, e.g. a static `Authorization` header.
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Qdrant {
	pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct Providers {
	pub llm: LlmProviderConfig,
	pub embedding: Option<EmbeddingProviderConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LlmProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	#[serde(default)]
	pub temperature: f32,
	#[serde(default = "default_timeout_ms")]
	pub timeout_ms: u64,
	#[serde(default = "default_max_attempts")]
	pub max_attempts: u32,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	#[serde(default = "default_timeout_ms")]
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Pipeline {
	pub identity_field: String,
	pub stale_field: String,
	/// Upper bound for one terminal call, covering every network round trip it makes.
	pub deadline_ms: Option<u64>,
	pub semantic: SemanticBlend,
	pub rerank: Rerank,
	pub structured: Structured,
}
impl Default for Pipeline {
	fn default() -> Self {
		Self {
			identity_field: "uuid".to_string(),
			stale_field: "embedding_stale".to_string(),
			deadline_ms: None,
			semantic: SemanticBlend::default(),
			rerank: Rerank::default(),
			structured: Structured::default(),
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SemanticBlend {
	pub existing_weight: f64,
	pub similarity_weight: f64,
	pub top_k: usize,
	pub min_score: Option<f64>,
}
impl Default for SemanticBlend {
	fn default() -> Self {
		Self { existing_weight: 0.3, similarity_weight: 0.7, top_k: 20, min_score: None }
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Rerank {
	/// One of `weighted`, `multiply`, `replace`.
	pub strategy: String,
	pub existing_weight: f64,
	pub llm_weight: f64,
	pub batch_size: usize,
	pub concurrency: Option<usize>,
}
impl Default for Rerank {
	fn default() -> Self {
		Self {
			strategy: "weighted".to_string(),
			existing_weight: 0.3,
			llm_weight: 0.7,
			batch_size: 10,
			concurrency: None,
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Structured {
	pub batch_size: usize,
	pub token_budget: Option<usize>,
	pub chars_per_token: usize,
	pub concurrency: Option<usize>,
	pub cache_responses: bool,
}
impl Default for Structured {
	fn default() -> Self {
		Self {
			batch_size: 20,
			token_budget: Some(24_000),
			chars_per_token: 1,
			concurrency: None,
			cache_responses: false,
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
pub struct VectorIndex {
	pub name: String,
	pub collection: String,
	pub entity_label: Option<String>,
	/// Named vector inside the collection; the unnamed default vector when absent.
	pub vector_name: Option<String>,
}

fn default_log_level() -> String {
	"info".to_string()
}

fn default_database() -> String {
	"neo4j".to_string()
}

fn default_timeout_ms() -> u64 {
	30_000
}

fn default_max_attempts() -> u32 {
	3
}

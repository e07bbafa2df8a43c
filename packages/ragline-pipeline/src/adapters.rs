//! Backend trait implementations for the bundled HTTP and storage clients.

use ragline_config::{EmbeddingProviderConfig, LlmProviderConfig};
use ragline_providers::{embedding, llm};
use ragline_storage::graph::Neo4jStore;

use crate::{
	BoxFuture, EmbeddingProvider, GraphStore, LlmProvider, Record, Result, cypher::CompiledQuery,
};

impl GraphStore for Neo4jStore {
	fn run<'a>(&'a self, query: &'a CompiledQuery) -> BoxFuture<'a, Result<Vec<Record>>> {
		Box::pin(async move {
			tracing::debug!(statement = %query.text, "Running graph query.");

			Ok(self.execute_read(&query.text, &query.params).await?)
		})
	}
}

/// OpenAI-compatible chat completions endpoint.
pub struct HttpLlmProvider {
	cfg: LlmProviderConfig,
}
impl HttpLlmProvider {
	pub fn new(cfg: LlmProviderConfig) -> Self {
		Self { cfg }
	}
}
impl LlmProvider for HttpLlmProvider {
	fn generate<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<String>> {
		Box::pin(async move { Ok(llm::generate(&self.cfg, prompt).await?) })
	}

	fn cache_namespace(&self) -> Option<String> {
		Some(format!(
			"{}:{}{}:{}:{}",
			self.cfg.provider_id, self.cfg.api_base, self.cfg.path, self.cfg.model, self.cfg.temperature
		))
	}
}

/// OpenAI-compatible embeddings endpoint.
pub struct HttpEmbeddingProvider {
	cfg: EmbeddingProviderConfig,
}
impl HttpEmbeddingProvider {
	pub fn new(cfg: EmbeddingProviderConfig) -> Self {
		Self { cfg }
	}
}
impl EmbeddingProvider for HttpEmbeddingProvider {
	fn embed<'a>(&'a self, texts: &'a [String]) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
		Box::pin(async move { Ok(embedding::embed(&self.cfg, texts).await?) })
	}
}

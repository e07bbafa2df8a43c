use std::time::Duration;

use crate::{
	Error, Result,
	scoring::{BlendWeights, MergeStrategy},
	structured::BatchingOptions,
};

/// Client-wide defaults that individual operations may override.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
	pub identity_field: String,
	/// Boolean marker of entities whose embeddings lag behind their content. Read only.
	pub stale_field: String,
	pub deadline: Option<Duration>,
	pub semantic_weights: BlendWeights,
	pub semantic_top_k: usize,
	pub semantic_min_score: Option<f64>,
	pub rerank_strategy: MergeStrategy,
	pub rerank_batching: BatchingOptions,
	pub structured_batching: BatchingOptions,
	pub cache_responses: bool,
}
impl Settings {
	pub fn from_config(cfg: &ragline_config::Pipeline) -> Result<Self> {
		let rerank_strategy = MergeStrategy::parse(
			&cfg.rerank.strategy,
			cfg.rerank.existing_weight,
			cfg.rerank.llm_weight,
		)
		.ok_or_else(|| {
			Error::configuration(format!("Unknown rerank strategy {:?}.", cfg.rerank.strategy))
		})?;
		let structured_batching = BatchingOptions {
			batch_size: cfg.structured.batch_size,
			concurrency: cfg.structured.concurrency,
			token_budget: cfg.structured.token_budget,
			chars_per_token: cfg.structured.chars_per_token,
		};

		Ok(Self {
			identity_field: cfg.identity_field.clone(),
			stale_field: cfg.stale_field.clone(),
			deadline: cfg.deadline_ms.map(Duration::from_millis),
			semantic_weights: BlendWeights {
				existing: cfg.semantic.existing_weight,
				incoming: cfg.semantic.similarity_weight,
			},
			semantic_top_k: cfg.semantic.top_k,
			semantic_min_score: cfg.semantic.min_score,
			rerank_strategy,
			rerank_batching: BatchingOptions {
				batch_size: cfg.rerank.batch_size,
				concurrency: cfg.rerank.concurrency,
				..structured_batching
			},
			structured_batching,
			cache_responses: cfg.structured.cache_responses,
		})
	}
}
impl Default for Settings {
	fn default() -> Self {
		let structured_batching = BatchingOptions::default();

		Self {
			identity_field: "uuid".to_string(),
			stale_field: "embedding_stale".to_string(),
			deadline: None,
			semantic_weights: BlendWeights::default(),
			semantic_top_k: 20,
			semantic_min_score: None,
			rerank_strategy: MergeStrategy::default(),
			rerank_batching: BatchingOptions { batch_size: 10, ..structured_batching },
			structured_batching,
			cache_responses: false,
		}
	}
}

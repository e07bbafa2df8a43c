mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Config, EmbeddingProviderConfig, GraphStore, LlmProviderConfig, Pipeline, Providers, Qdrant,
	Rerank, SemanticBlend, Service, Storage, Structured, VectorIndex,
};

use std::{
	collections::HashSet,
	fs,
	path::{Path, PathBuf},
};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;
	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

/// Parses and validates an in-memory document, for embedders that do not keep config on disk.
pub fn from_toml_str(raw: &str) -> Result<Config> {
	let mut cfg: Config = toml::from_str(raw)
		.map_err(|err| Error::ParseConfig { path: PathBuf::from("<inline>"), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.storage.graph.url.trim().is_empty() {
		return Err(Error::validation("storage.graph.url", "must be non-empty."));
	}
	if cfg.storage.graph.database.trim().is_empty() {
		return Err(Error::validation("storage.graph.database", "must be non-empty."));
	}
	if cfg.storage.graph.timeout_ms == 0 {
		return Err(Error::validation("storage.graph.timeout_ms", "must be greater than zero."));
	}
	if cfg.providers.llm.api_key.trim().is_empty() {
		return Err(Error::validation("providers.llm.api_key", "must be non-empty."));
	}
	if cfg.providers.llm.max_attempts == 0 {
		return Err(Error::validation("providers.llm.max_attempts", "must be greater than zero."));
	}
	if !cfg.providers.llm.temperature.is_finite() {
		return Err(Error::validation("providers.llm.temperature", "must be a finite number."));
	}

	if let Some(embedding) = cfg.providers.embedding.as_ref() {
		if embedding.api_key.trim().is_empty() {
			return Err(Error::validation("providers.embedding.api_key", "must be non-empty."));
		}
		if embedding.dimensions == 0 {
			return Err(Error::validation(
				"providers.embedding.dimensions",
				"must be greater than zero.",
			));
		}
	}

	validate_pipeline(&cfg.pipeline)?;

	let mut seen = HashSet::new();

	for index in &cfg.vector_indexes {
		if index.name.trim().is_empty() {
			return Err(Error::validation("vector_indexes.name", "must be non-empty."));
		}
		if index.collection.trim().is_empty() {
			return Err(Error::validation(
				format!("vector_indexes.{}.collection", index.name),
				"must be non-empty.",
			));
		}
		if !seen.insert(index.name.as_str()) {
			return Err(Error::validation(
				format!("vector_indexes.{}", index.name),
				"is declared more than once.",
			));
		}
	}

	if !cfg.vector_indexes.is_empty() {
		if cfg.storage.qdrant.is_none() {
			return Err(Error::validation(
				"storage.qdrant",
				"is required when vector_indexes are declared.",
			));
		}
		if cfg.providers.embedding.is_none() {
			return Err(Error::validation(
				"providers.embedding",
				"is required when vector_indexes are declared.",
			));
		}
	}

	Ok(())
}

fn validate_pipeline(pipeline: &Pipeline) -> Result<()> {
	if pipeline.identity_field.trim().is_empty() {
		return Err(Error::validation("pipeline.identity_field", "must be non-empty."));
	}

	for (field, weight) in [
		("pipeline.semantic.existing_weight", pipeline.semantic.existing_weight),
		("pipeline.semantic.similarity_weight", pipeline.semantic.similarity_weight),
		("pipeline.rerank.existing_weight", pipeline.rerank.existing_weight),
		("pipeline.rerank.llm_weight", pipeline.rerank.llm_weight),
	] {
		if !weight.is_finite() {
			return Err(Error::validation(field, "must be a finite number."));
		}
		if !(0.0..=1.0).contains(&weight) {
			return Err(Error::validation(field, "must be in the range 0.0-1.0."));
		}
	}

	if pipeline.semantic.top_k == 0 {
		return Err(Error::validation("pipeline.semantic.top_k", "must be greater than zero."));
	}

	if let Some(min) = pipeline.semantic.min_score
		&& !(min.is_finite() && (0.0..=1.0).contains(&min))
	{
		return Err(Error::validation(
			"pipeline.semantic.min_score",
			"must be a finite number in the range 0.0-1.0.",
		));
	}

	if !matches!(pipeline.rerank.strategy.as_str(), "weighted" | "multiply" | "replace") {
		return Err(Error::validation(
			"pipeline.rerank.strategy",
			"must be one of weighted, multiply, or replace.",
		));
	}
	if pipeline.rerank.batch_size == 0 {
		return Err(Error::validation("pipeline.rerank.batch_size", "must be greater than zero."));
	}
	if pipeline.structured.batch_size == 0 {
		return Err(Error::validation(
			"pipeline.structured.batch_size",
			"must be greater than zero.",
		));
	}
	if pipeline.structured.chars_per_token == 0 {
		return Err(Error::validation(
			"pipeline.structured.chars_per_token",
			"must be greater than zero.",
		));
	}
	if pipeline.structured.token_budget == Some(0) {
		return Err(Error::validation(
			"pipeline.structured.token_budget",
			"must be greater than zero when set.",
		));
	}

	for (field, concurrency) in [
		("pipeline.rerank.concurrency", pipeline.rerank.concurrency),
		("pipeline.structured.concurrency", pipeline.structured.concurrency),
	] {
		if concurrency == Some(0) {
			return Err(Error::validation(field, "must be greater than zero when set."));
		}
	}

	if pipeline.deadline_ms == Some(0) {
		return Err(Error::validation("pipeline.deadline_ms", "must be greater than zero when set."));
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	cfg.pipeline.identity_field = cfg.pipeline.identity_field.trim().to_string();
	cfg.pipeline.rerank.strategy = cfg.pipeline.rerank.strategy.trim().to_ascii_lowercase();

	if cfg.storage.qdrant.as_ref().map(|qdrant| qdrant.url.trim().is_empty()).unwrap_or(false) {
		cfg.storage.qdrant = None;
	}

	for index in &mut cfg.vector_indexes {
		if index.vector_name.as_deref().map(|name| name.trim().is_empty()).unwrap_or(false) {
			index.vector_name = None;
		}
		if index.entity_label.as_deref().map(|label| label.trim().is_empty()).unwrap_or(false) {
			index.entity_label = None;
		}
	}
}

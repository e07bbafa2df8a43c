//! LLM relevance reranking on top of the structured engine.

use std::{
	collections::{HashMap, HashSet},
	fmt,
	sync::Arc,
};

use serde_json::Value;

use crate::{
	LlmProvider, Result,
	entity::{Entity, IdentityFn, SearchResult},
	scoring::{self, LLM_SCORE_SCALE, MergeStrategy, finite_or_zero, normalize_llm_score},
	structured::{
		BatchingOptions, FieldExposure, FieldType, OutputFormat, OutputSchema, SchemaField,
		StructuredExecutor, StructuredItem, StructuredRequest,
	},
};

const SCORE_FIELD: &str = "score";
const REASONING_FIELD: &str = "reasoning";

#[derive(Clone, Debug, PartialEq)]
pub struct ItemEvaluation {
	pub id: String,
	/// Relevance on the 0-10 scale.
	pub score: f64,
	pub reasoning: String,
}

#[derive(Clone, Default)]
pub struct RerankOptions {
	/// Falls back to the client's LLM provider.
	pub provider: Option<Arc<dyn LlmProvider>>,
	pub strategy: Option<MergeStrategy>,
	pub top_k: Option<usize>,
	/// Evaluations below this 0-10 score are dropped.
	pub min_score: Option<f64>,
	pub batching: Option<BatchingOptions>,
	pub with_reasoning: bool,
	pub identity: Option<IdentityFn>,
	pub format: OutputFormat,
}
impl RerankOptions {
	pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
		self.provider = Some(provider);

		self
	}

	pub fn strategy(mut self, strategy: MergeStrategy) -> Self {
		self.strategy = Some(strategy);

		self
	}

	pub fn top_k(mut self, top_k: usize) -> Self {
		self.top_k = Some(top_k);

		self
	}

	pub fn min_score(mut self, min_score: f64) -> Self {
		self.min_score = Some(min_score);

		self
	}

	pub fn batching(mut self, batching: BatchingOptions) -> Self {
		self.batching = Some(batching);

		self
	}

	pub fn with_reasoning(mut self) -> Self {
		self.with_reasoning = true;

		self
	}

	pub fn identity<F>(mut self, identity: F) -> Self
	where
		F: Fn(&Entity) -> Option<String> + Send + Sync + 'static,
	{
		self.identity = Some(Arc::new(identity));

		self
	}

	pub fn format(mut self, format: OutputFormat) -> Self {
		self.format = format;

		self
	}
}
impl fmt::Debug for RerankOptions {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RerankOptions")
			.field("provider", &self.provider.is_some())
			.field("strategy", &self.strategy)
			.field("top_k", &self.top_k)
			.field("min_score", &self.min_score)
			.field("batching", &self.batching)
			.field("with_reasoning", &self.with_reasoning)
			.field("identity", &self.identity.is_some())
			.field("format", &self.format)
			.finish()
	}
}

pub fn evaluation_schema() -> OutputSchema {
	OutputSchema::new(vec![
		SchemaField::new(SCORE_FIELD, FieldType::Number)
			.describe("Relevance from 0 (unrelated) to 10 (exactly what the question asks for).")
			.required(),
		SchemaField::new(REASONING_FIELD, FieldType::String)
			.describe("One or two sentences explaining the score."),
	])
}

/// Resolved rerank parameters after option and client defaults are applied.
#[derive(Clone)]
pub struct MergeParams {
	pub strategy: MergeStrategy,
	pub identity: IdentityFn,
	pub top_k: Option<usize>,
	pub min_score: Option<f64>,
	pub with_reasoning: bool,
}

#[derive(Clone, Debug)]
pub struct RerankOutput {
	pub results: Vec<SearchResult>,
	/// LLM batches dispatched.
	pub batches: usize,
}

pub struct Reranker {
	executor: StructuredExecutor,
	params: MergeParams,
	batching: BatchingOptions,
	format: OutputFormat,
}
impl Reranker {
	/// `executor` must carry the entity context used to render items.
	pub fn new(
		executor: StructuredExecutor,
		params: MergeParams,
		batching: BatchingOptions,
		format: OutputFormat,
	) -> Self {
		Self { executor: executor.with_stage("llm_rerank"), params, batching, format }
	}

	pub async fn rerank(&self, question: &str, results: Vec<SearchResult>) -> Result<RerankOutput> {
		let mut seen = HashSet::new();
		let mut items = Vec::new();
		let mut anonymous = 0_usize;

		for result in &results {
			match (self.params.identity)(&result.entity) {
				Some(id) if seen.insert(id.clone()) => items.push(StructuredItem::from_result(id, result)),
				Some(_) => {},
				None => anonymous += 1,
			}
		}

		if anonymous > 0 {
			tracing::debug!(count = anonymous, "Passing results without identity through rerank unchanged.");
		}

		let mut batches = 0;
		let evaluations = if items.is_empty() {
			HashMap::new()
		} else {
			let request = StructuredRequest::new(
				rerank_instructions(question),
				FieldExposure::Context,
				evaluation_schema(),
			)
			.with_format(self.format, self.format)
			.with_batching(self.batching)
			.allow_missing_items();
			let output = self.executor.run(&items, &request).await?;

			batches = output.batches;

			output
				.items
				.into_iter()
				.filter_map(|item| {
					let decoded = item.decoded?;
					let score = decoded.get(SCORE_FIELD).and_then(Value::as_f64)?;
					let reasoning = decoded
						.get(REASONING_FIELD)
						.and_then(Value::as_str)
						.unwrap_or_default()
						.to_string();

					Some((item.id.clone(), ItemEvaluation { id: item.id, score, reasoning }))
				})
				.collect()
		};

		Ok(RerankOutput { results: merge_evaluations(results, &evaluations, &self.params), batches })
	}
}

/// Applies evaluations to results by identity. Results without an evaluation keep their score.
pub fn merge_evaluations(
	results: Vec<SearchResult>,
	evaluations: &HashMap<String, ItemEvaluation>,
	params: &MergeParams,
) -> Vec<SearchResult> {
	let mut merged = Vec::with_capacity(results.len());
	let mut omitted = 0_usize;

	for mut result in results {
		let evaluation =
			(params.identity)(&result.entity).and_then(|id| evaluations.get(&id));
		let Some(evaluation) = evaluation else {
			omitted += 1;
			merged.push(result);

			continue;
		};
		let raw = finite_or_zero(evaluation.score).clamp(0.0, LLM_SCORE_SCALE);

		if params.min_score.is_some_and(|min| raw < min) {
			continue;
		}

		let previous = result.score;

		result.set_score(params.strategy.merge(previous, raw));
		result.record("llm", normalize_llm_score(raw));
		result.record("previous", previous);

		if params.with_reasoning && !evaluation.reasoning.is_empty() {
			result.context_mut().llm_reasoning = Some(evaluation.reasoning.clone());
		}

		merged.push(result);
	}

	if omitted > 0 {
		tracing::warn!(omitted, "Rerank left results unevaluated. Keeping their previous scores.");
	}

	let mut sorted = scoring::sort_results(merged, &params.identity, None);

	if let Some(top_k) = params.top_k {
		sorted.truncate(top_k);
	}

	sorted
}

fn rerank_instructions(question: &str) -> String {
	format!(
		"You judge how relevant each item is to a question.\n\
		 Score every item from 0 (unrelated) to 10 (exactly what the question asks for). \
		 Judge only from the item's own content.\n\n\
		 Question: {}",
		question.trim()
	)
}

//! Structured LLM execution: token-budgeted batching, bounded-concurrency dispatch and
//! schema-driven decoding of per-item results plus optional batch-level metadata.

pub mod batch;
pub mod cache;
pub mod decode;
pub mod prompt;
pub mod schema;

pub use batch::{estimate_tokens, pack_batches};
pub use cache::ResponseCache;
pub use decode::{DecodedItem, OutputFormat, PayloadDecoder, SectionedDecoder};
pub use prompt::FieldExposure;
pub use schema::{FieldType, OutputSchema, SchemaField};

use std::{
	collections::{HashMap, HashSet},
	sync::Arc,
};

use futures::{StreamExt, TryStreamExt, stream};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
	Error, LlmProvider, Result,
	context::EntityContext,
	entity::{Entity, RelatedEntity, SearchResult},
	execution::ExecutionContext,
};

const DEFAULT_STAGE: &str = "llm_structured";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchingOptions {
	pub batch_size: usize,
	/// Parallel in-flight batches; sequential when unset.
	pub concurrency: Option<usize>,
	pub token_budget: Option<usize>,
	pub chars_per_token: usize,
}
impl BatchingOptions {
	pub fn validate(&self) -> Result<()> {
		if self.batch_size == 0 {
			return Err(Error::invalid_request("batch_size must be greater than zero."));
		}
		if self.concurrency == Some(0) {
			return Err(Error::invalid_request("concurrency must be greater than zero when set."));
		}
		if self.token_budget == Some(0) {
			return Err(Error::invalid_request("token_budget must be greater than zero when set."));
		}
		if self.chars_per_token == 0 {
			return Err(Error::invalid_request("chars_per_token must be greater than zero."));
		}

		Ok(())
	}
}
impl Default for BatchingOptions {
	fn default() -> Self {
		Self { batch_size: 20, concurrency: None, token_budget: Some(24_000), chars_per_token: 1 }
	}
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatOptions {
	#[serde(default)]
	pub items: OutputFormat,
	#[serde(default)]
	pub global: OutputFormat,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StructuredRequest {
	pub instructions: String,
	pub exposure: FieldExposure,
	pub schema: OutputSchema,
	pub global_schema: Option<OutputSchema>,
	pub format: FormatOptions,
	/// Executor defaults apply when unset.
	pub batching: Option<BatchingOptions>,
	/// Treat an item missing from the response as a decode error when the schema has required
	/// fields.
	pub require_all_items: bool,
}
impl StructuredRequest {
	pub fn new(instructions: impl Into<String>, exposure: FieldExposure, schema: OutputSchema) -> Self {
		Self {
			instructions: instructions.into(),
			exposure,
			schema,
			global_schema: None,
			format: FormatOptions::default(),
			batching: None,
			require_all_items: true,
		}
	}

	pub fn with_global_schema(mut self, schema: OutputSchema) -> Self {
		self.global_schema = Some(schema);

		self
	}

	pub fn with_format(mut self, items: OutputFormat, global: OutputFormat) -> Self {
		self.format = FormatOptions { items, global };

		self
	}

	pub fn with_batching(mut self, batching: BatchingOptions) -> Self {
		self.batching = Some(batching);

		self
	}

	pub fn allow_missing_items(mut self) -> Self {
		self.require_all_items = false;

		self
	}

	pub fn validate(&self) -> Result<()> {
		self.schema.validate()?;

		if let Some(global) = self.global_schema.as_ref() {
			global.validate()?;
		}
		if let Some(batching) = self.batching.as_ref() {
			batching.validate()?;
		}

		Ok(())
	}
}

#[derive(Clone, Debug, PartialEq)]
pub struct StructuredItem {
	pub id: String,
	pub entity: Entity,
	pub related: Vec<RelatedEntity>,
}
impl StructuredItem {
	pub fn new(id: impl Into<String>, entity: Entity) -> Self {
		Self { id: id.into(), entity, related: Vec::new() }
	}

	pub fn from_result(id: impl Into<String>, result: &SearchResult) -> Self {
		Self { id: id.into(), entity: result.entity.clone(), related: result.related().to_vec() }
	}
}

#[derive(Clone, Debug, PartialEq)]
pub struct ItemOutput {
	pub id: String,
	/// Schema-coerced fields, `None` when the response omitted the item.
	pub decoded: Option<Map<String, Value>>,
	/// Original entity properties overlaid with the decoded fields.
	pub fields: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StructuredOutput {
	pub items: Vec<ItemOutput>,
	pub global_metadata: Option<Value>,
	pub batches: usize,
}

#[derive(Clone)]
pub struct StructuredExecutor {
	provider: Arc<dyn LlmProvider>,
	context: Option<Arc<EntityContext>>,
	cache: Option<Arc<ResponseCache>>,
	execution: ExecutionContext,
	defaults: BatchingOptions,
	stage: &'static str,
}
impl StructuredExecutor {
	pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
		Self {
			provider,
			context: None,
			cache: None,
			execution: ExecutionContext::default(),
			defaults: BatchingOptions::default(),
			stage: DEFAULT_STAGE,
		}
	}

	pub fn with_entity_context(mut self, context: Option<Arc<EntityContext>>) -> Self {
		self.context = context;

		self
	}

	pub fn with_cache(mut self, cache: Option<Arc<ResponseCache>>) -> Self {
		self.cache = cache;

		self
	}

	pub fn with_execution_context(mut self, execution: ExecutionContext) -> Self {
		self.execution = execution;

		self
	}

	pub fn with_defaults(mut self, defaults: BatchingOptions) -> Self {
		self.defaults = defaults;

		self
	}

	pub(crate) fn with_stage(mut self, stage: &'static str) -> Self {
		self.stage = stage;

		self
	}

	pub async fn run(
		&self,
		items: &[StructuredItem],
		request: &StructuredRequest,
	) -> Result<StructuredOutput> {
		request.validate()?;

		let batching = request.batching.unwrap_or(self.defaults);

		batching.validate()?;

		let mut seen = HashSet::new();

		if let Some(dup) = items.iter().find(|item| !seen.insert(item.id.as_str())) {
			return Err(Error::invalid_request(format!("Item id {} is not unique.", dup.id)));
		}
		if items.is_empty() {
			return Ok(StructuredOutput::default());
		}

		let rendered = items
			.iter()
			.map(|item| {
				prompt::render_item(
					&item.id,
					&item.entity,
					&item.related,
					&request.exposure,
					self.context.as_deref(),
				)
			})
			.collect::<Result<Vec<_>>>()?;
		let costs: Vec<usize> =
			rendered.iter().map(|text| estimate_tokens(text, batching.chars_per_token)).collect();
		let batches = pack_batches(&costs, batching.batch_size, batching.token_budget);
		let global = request.global_schema.as_ref().map(|schema| (schema, request.format.global));
		let prompts: Vec<String> = batches
			.iter()
			.map(|range| {
				let batch: Vec<&str> = rendered[range.clone()].iter().map(String::as_str).collect();

				prompt::render_prompt(
					&request.instructions,
					&batch,
					&request.schema,
					global,
					request.format.items,
				)
			})
			.collect();

		tracing::debug!(
			stage = self.stage,
			items = items.len(),
			batches = batches.len(),
			concurrency = batching.concurrency.unwrap_or(1),
			"Dispatching structured batches."
		);

		let responses = self.dispatch(&prompts, batching.concurrency).await?;
		let decoder =
			SectionedDecoder::new(request.format.items, global.map(|(_, format)| format));
		let mut decoded_by_id: HashMap<String, Map<String, Value>> = HashMap::new();
		let mut globals = Vec::new();

		for (range, raw) in batches.iter().zip(&responses) {
			let response = decoder.decode(raw)?;
			let batch_ids: HashSet<&str> =
				items[range.clone()].iter().map(|item| item.id.as_str()).collect();

			for item in response.items {
				if !batch_ids.contains(item.id.as_str()) {
					tracing::warn!(stage = self.stage, item_id = %item.id, "Response named an item outside its batch.");

					continue;
				}

				let fields = request.schema.coerce(&item.fields)?;

				decoded_by_id.entry(item.id).or_insert(fields);
			}

			if let (Some(schema), Some(object)) = (request.global_schema.as_ref(), response.global) {
				globals.push(schema.coerce(&object)?);
			}
		}

		let mut outputs = Vec::with_capacity(items.len());

		for item in items {
			let decoded = decoded_by_id.remove(&item.id);

			if decoded.is_none() {
				if request.require_all_items && request.schema.has_required() {
					return Err(Error::decode(format!("Response omitted item {}.", item.id)));
				}

				tracing::warn!(stage = self.stage, item_id = %item.id, "Response omitted an item.");
			}

			let mut fields = item.entity.properties.clone();

			if let Some(decoded) = decoded.as_ref() {
				fields.extend(decoded.iter().map(|(key, value)| (key.clone(), value.clone())));
			}

			outputs.push(ItemOutput { id: item.id.clone(), decoded, fields });
		}

		Ok(StructuredOutput {
			items: outputs,
			global_metadata: merge_globals(globals),
			batches: batches.len(),
		})
	}

	async fn dispatch(&self, prompts: &[String], concurrency: Option<usize>) -> Result<Vec<String>> {
		let namespace = self.cache_namespace();

		if prompts.len() > 1 && self.provider.supports_batch() {
			return self.dispatch_batch(prompts, &namespace).await;
		}

		let mut indexed: Vec<(usize, String)> = stream::iter(prompts.iter().enumerate())
			.map(|(idx, prompt)| {
				let namespace = namespace.as_str();

				async move { self.generate(namespace, prompt).await.map(|raw| (idx, raw)) }
			})
			.buffer_unordered(concurrency.unwrap_or(1))
			.try_collect()
			.await?;

		indexed.sort_by_key(|(idx, _)| *idx);

		Ok(indexed.into_iter().map(|(_, raw)| raw).collect())
	}

	/// Only cache misses are sent to the provider's batch endpoint.
	async fn dispatch_batch(&self, prompts: &[String], namespace: &str) -> Result<Vec<String>> {
		let mut responses: Vec<Option<String>> = prompts
			.iter()
			.map(|prompt| self.cache.as_ref().and_then(|cache| cache.get(namespace, prompt)))
			.collect();
		let missing: Vec<usize> =
			responses.iter().enumerate().filter(|(_, hit)| hit.is_none()).map(|(idx, _)| idx).collect();

		if !missing.is_empty() {
			let pending: Vec<String> = missing.iter().map(|idx| prompts[*idx].clone()).collect();
			let generated =
				self.execution.run(self.stage, self.provider.generate_batch(&pending)).await?;

			if generated.len() != pending.len() {
				return Err(Error::provider(format!(
					"Batch generation returned {} responses for {} prompts.",
					generated.len(),
					pending.len()
				)));
			}

			for (idx, raw) in missing.into_iter().zip(generated) {
				if let Some(cache) = self.cache.as_ref() {
					cache.insert(namespace, &prompts[idx], raw.clone());
				}

				responses[idx] = Some(raw);
			}
		}

		Ok(responses.into_iter().flatten().collect())
	}

	async fn generate(&self, namespace: &str, prompt: &str) -> Result<String> {
		if let Some(hit) = self.cache.as_ref().and_then(|cache| cache.get(namespace, prompt)) {
			return Ok(hit);
		}

		let raw = self.execution.run(self.stage, self.provider.generate(prompt)).await?;

		if let Some(cache) = self.cache.as_ref() {
			cache.insert(namespace, prompt, raw.clone());
		}

		Ok(raw)
	}

	/// Falls back to the provider's address when it declares no identity of its own.
	fn cache_namespace(&self) -> String {
		self.provider
			.cache_namespace()
			.unwrap_or_else(|| format!("instance:{:p}", Arc::as_ptr(&self.provider).cast::<()>()))
	}
}

/// Arrays concatenate across batches; for other values the first non-null wins.
fn merge_globals(globals: Vec<Map<String, Value>>) -> Option<Value> {
	let mut iter = globals.into_iter();
	let mut merged = iter.next()?;

	for next in iter {
		for (key, value) in next {
			match merged.get_mut(&key) {
				Some(Value::Array(existing)) =>
					if let Value::Array(more) = value {
						existing.extend(more);
					},
				Some(existing) if existing.is_null() => *existing = value,
				Some(_) => {},
				None => {
					merged.insert(key, value);
				},
			}
		}
	}

	Some(Value::Object(merged))
}

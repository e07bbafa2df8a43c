//! Step-by-step evaluation of a planned pipeline.

use std::{
	collections::{HashMap, HashSet},
	sync::Arc,
	time::{Duration, Instant},
};

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::{
	Error, Record, Result,
	client::RagClient,
	condition::{ConditionSet, validate_field_name},
	context::{EntityContext, render_value},
	cypher::{
		self, COL_DEPTH, COL_ENTITY, COL_ID, COL_LABELS, COL_RELATED, COL_RELATED_LABELS,
		COL_TOTAL, GraphQuery,
	},
	entity::{Entity, IdentityFn, RelatedEntity, SearchResult, value_key},
	execution::ExecutionContext,
	metadata::{ExecutionMetadata, ExplainPlan, ExplainStep, OperationMetadata},
	operation::{
		EmbeddingsOp, ExpandOp, FetchMode, FetchOp, FilterOp, Operation, RerankOp, SemanticOp,
		StructuredOp,
	},
	plan::PlannedStep,
	rerank::{MergeParams, Reranker},
	scoring::{self, OrderBy},
	structured::{FieldExposure, StructuredExecutor, StructuredItem},
	vector::VectorSearchRequest,
};

/// Everything a terminal call needs, resolved from the builder and the client.
pub(crate) struct PipelineRun {
	pub(crate) client: RagClient,
	pub(crate) entity_type: String,
	pub(crate) operations: Vec<Operation>,
	pub(crate) steps: Vec<PlannedStep>,
	pub(crate) limit: Option<usize>,
	pub(crate) offset: Option<usize>,
	pub(crate) order_by: Option<OrderBy>,
	pub(crate) context: Option<Arc<EntityContext>>,
	pub(crate) identity: IdentityFn,
	pub(crate) fusion: bool,
	pub(crate) token: CancellationToken,
	pub(crate) timeout: Option<Duration>,
}
impl PipelineRun {
	fn identity_field(&self) -> &str {
		&self.client.settings.identity_field
	}

	fn execution_context(&self) -> ExecutionContext {
		ExecutionContext::with_timeout(self.token.clone(), self.timeout)
	}
}

struct StepOutcome {
	results: Vec<SearchResult>,
	round_trips: u32,
	degraded: Option<String>,
	global_metadata: Option<Value>,
}
impl StepOutcome {
	fn new(results: Vec<SearchResult>, round_trips: u32) -> Self {
		Self { results, round_trips, degraded: None, global_metadata: None }
	}

	fn degraded(results: Vec<SearchResult>, err: &Error) -> Self {
		Self { degraded: Some(err.to_string()), ..Self::new(results, 0) }
	}
}

/// Rejects misconfigured pipelines before any backend is contacted.
pub(crate) fn validate(run: &PipelineRun) -> Result<()> {
	for step in &run.steps {
		if matches!(step.operation, Operation::Fetch(_)) && step.index != 0 {
			return Err(Error::configuration("Fetch must be the first operation of a pipeline."));
		}

		ConditionSet::compile(&step.merged.conditions)?;

		match &step.operation {
			Operation::Fetch(fetch) => match &fetch.mode {
				FetchMode::Where(conditions) => {
					ConditionSet::compile(conditions)?;
				},
				FetchMode::Related { relationship, .. } => validate_field_name(relationship)?,
				FetchMode::All | FetchMode::Ids(_) => {},
			},
			Operation::Filter(filter) => {
				ConditionSet::compile(&filter.conditions)?;

				for relationship in &filter.relationships {
					relationship.validate()?;
				}
			},
			Operation::ClientFilter(_) => {},
			Operation::Expand(expand) => {
				if expand.depth == 0 {
					return Err(Error::configuration("Expand depth must be at least 1."));
				}

				validate_field_name(&expand.relationship)?;
			},
			Operation::Semantic(semantic) => validate_semantic(run, semantic)?,
			Operation::LlmRerank(rerank) => validate_rerank(run, rerank)?,
			Operation::LlmStructured(structured) => {
				if structured.provider.is_none() && run.client.llm.is_none() {
					return Err(Error::configuration("LLM structured extraction requires an LLM provider."));
				}

				structured.request.validate()?;

				if structured.request.exposure == FieldExposure::Context && run.context.is_none() {
					return Err(Error::configuration(format!(
						"Context field exposure requires an EntityContext for {}.",
						run.entity_type
					)));
				}
			},
			Operation::GenerateEmbeddings(embeddings) => {
				if embeddings.provider.is_none() && run.client.embedding.is_none() {
					return Err(Error::configuration("Embedding generation requires an embedding provider."));
				}
				if embeddings.source_fields.is_empty() {
					return Err(Error::invalid_request("Embedding generation needs at least one source field."));
				}

				embeddings.source_fields.iter().try_for_each(|field| validate_field_name(field))?;
				validate_field_name(&embeddings.target_field)?;
			},
		}
	}

	Ok(())
}

fn validate_semantic(run: &PipelineRun, semantic: &SemanticOp) -> Result<()> {
	if run.client.vector.is_none() {
		return Err(Error::configuration("Semantic search requires a vector search backend."));
	}

	run.client.indexes.resolve(&semantic.index, semantic.index_override.as_deref())?;

	if semantic.top_k == Some(0) {
		return Err(Error::invalid_request("Semantic top_k must be greater than zero."));
	}
	if semantic.min_score.is_some_and(|score| !(0.0..=1.0).contains(&score)) {
		return Err(Error::invalid_request("Semantic min_score must be within [0, 1]."));
	}

	Ok(())
}

fn validate_rerank(run: &PipelineRun, rerank: &RerankOp) -> Result<()> {
	if run.context.is_none() {
		return Err(Error::configuration(format!(
			"LLM rerank requires an EntityContext for {}.",
			run.entity_type
		)));
	}
	if rerank.options.provider.is_none() && run.client.llm.is_none() {
		return Err(Error::configuration("LLM rerank requires an LLM provider."));
	}
	if rerank.options.top_k == Some(0) {
		return Err(Error::invalid_request("Rerank top_k must be greater than zero."));
	}
	if rerank.options.min_score.is_some_and(|score| !(0.0..=10.0).contains(&score)) {
		return Err(Error::invalid_request("Rerank min_score must be within [0, 10]."));
	}
	if let Some(batching) = rerank.options.batching.as_ref() {
		batching.validate()?;
	}

	Ok(())
}

pub(crate) fn explain(run: &PipelineRun) -> Result<ExplainPlan> {
	let steps = run
		.steps
		.iter()
		.map(|step| ExplainStep {
			index: step.index,
			kind: step.operation.kind(),
			description: step.operation.describe(),
			merged_operations: merged_descriptions(run, step),
			merged_indices: step.merged_indices.clone(),
			implicit: is_implicit(&step.operation),
			query: match &step.operation {
				Operation::Fetch(fetch) =>
					fetch_query(run, fetch, &step.merged).map(|plan| cypher::compile(plan).text),
				_ => None,
			},
		})
		.collect();

	Ok(ExplainPlan {
		entity_type: run.entity_type.clone(),
		fusion: run.fusion,
		steps,
		limit: run.limit,
		offset: run.offset,
	})
}

pub(crate) async fn execute(
	run: &PipelineRun,
	track: bool,
) -> Result<(Vec<SearchResult>, Option<ExecutionMetadata>)> {
	let started = Instant::now();
	let execution = run.execution_context();
	let mut metadata = track.then(ExecutionMetadata::new);
	let results = run_steps(run, &execution, metadata.as_mut()).await?;
	let sorted = scoring::sort_results(results, &run.identity, run.order_by.as_ref());

	let page: Vec<SearchResult> = sorted
		.into_iter()
		.skip(run.offset.unwrap_or(0))
		.take(run.limit.unwrap_or(usize::MAX))
		.collect();

	flag_stale(run, &page, metadata.as_mut());

	if let Some(metadata) = metadata.as_mut() {
		metadata.final_count = page.len();
		metadata.total_duration_ms = elapsed_ms(started);
	}

	tracing::debug!(
		entity_type = %run.entity_type,
		steps = run.steps.len(),
		results = page.len(),
		duration_ms = elapsed_ms(started),
		"Pipeline finished."
	);

	Ok((page, metadata))
}

pub(crate) async fn count(run: &PipelineRun) -> Result<usize> {
	let execution = run.execution_context();

	if let [step] = run.steps.as_slice()
		&& let Operation::Fetch(fetch) = &step.operation
	{
		let Some(plan) = fetch_query(run, fetch, &step.merged) else {
			return Ok(0);
		};
		let records = query(run, &execution, "count", GraphQuery::Count(Box::new(plan))).await?;
		let total = records
			.first()
			.and_then(|record| record.get_i64(COL_TOTAL))
			.ok_or_else(|| Error::storage("Count query returned no total."))?;

		return Ok(usize::try_from(total).unwrap_or_default());
	}

	Ok(run_steps(run, &execution, None).await?.len())
}

async fn run_steps(
	run: &PipelineRun,
	execution: &ExecutionContext,
	mut metadata: Option<&mut ExecutionMetadata>,
) -> Result<Vec<SearchResult>> {
	let mut held: Option<Vec<SearchResult>> = None;

	for step in &run.steps {
		let kind = step.operation.kind();

		execution.check(kind.as_str())?;

		let started = Instant::now();
		let input_count = held.as_ref().map_or(0, Vec::len);
		let outcome = run_step(run, execution, step, held.take()).await?;
		let duration_ms = elapsed_ms(started);

		tracing::debug!(
			op = kind.as_str(),
			index = step.index,
			input = input_count,
			output = outcome.results.len(),
			round_trips = outcome.round_trips,
			fused = step.merged_indices.len(),
			duration_ms,
			"Pipeline operation finished."
		);

		if let Some(metadata) = metadata.as_deref_mut() {
			metadata.degraded |= outcome.degraded.is_some();
			metadata.operations.push(OperationMetadata {
				index: step.index,
				kind,
				description: step.operation.describe(),
				input_count,
				output_count: outcome.results.len(),
				duration_ms,
				merged_operations: merged_descriptions(run, step),
				merged_indices: step.merged_indices.clone(),
				optimized: step.is_fused(),
				round_trips: outcome.round_trips,
				degraded: outcome.degraded.is_some(),
				error: outcome.degraded.clone(),
				global_metadata: outcome.global_metadata.clone(),
				implicit: is_implicit(&step.operation),
			});
		}

		held = Some(outcome.results);
	}

	Ok(held.unwrap_or_default())
}

async fn run_step(
	run: &PipelineRun,
	execution: &ExecutionContext,
	step: &PlannedStep,
	held: Option<Vec<SearchResult>>,
) -> Result<StepOutcome> {
	match &step.operation {
		Operation::Fetch(fetch) => fetch_step(run, execution, fetch, &step.merged).await,
		Operation::Filter(filter) => filter_step(run, execution, filter, held.unwrap_or_default()).await,
		Operation::ClientFilter(filter) => {
			let mut results = held.unwrap_or_default();

			results.retain(|result| (filter.predicate)(result));

			Ok(StepOutcome::new(results, 0))
		},
		Operation::Expand(expand) =>
			expand_step(run, execution, expand, &step.merged, held.unwrap_or_default()).await,
		Operation::Semantic(semantic) =>
			semantic_step(run, execution, semantic, &step.merged, held).await,
		Operation::LlmRerank(rerank) =>
			rerank_step(run, execution, rerank, held.unwrap_or_default()).await,
		Operation::LlmStructured(structured) =>
			structured_step(run, execution, structured, held.unwrap_or_default()).await,
		Operation::GenerateEmbeddings(embeddings) =>
			embeddings_step(run, execution, embeddings, held.unwrap_or_default()).await,
	}
}

async fn fetch_step(
	run: &PipelineRun,
	execution: &ExecutionContext,
	fetch: &FetchOp,
	merged: &FilterOp,
) -> Result<StepOutcome> {
	let Some(plan) = fetch_query(run, fetch, merged) else {
		return Ok(StepOutcome::new(Vec::new(), 0));
	};
	let records = query(run, execution, "fetch", plan).await?;
	let results = records
		.iter()
		.map(|record| {
			read_entity(record, COL_ENTITY, COL_LABELS)
				.map(|entity| SearchResult::new(entity, 1.0).with_component("filter", 1.0))
		})
		.collect::<Result<Vec<_>>>()?;

	Ok(StepOutcome::new(results, 1))
}

fn fetch_query(run: &PipelineRun, fetch: &FetchOp, merged: &FilterOp) -> Option<GraphQuery> {
	let label = run.entity_type.clone();
	let identity_field = run.identity_field().to_string();
	let mut conditions = match &fetch.mode {
		FetchMode::Where(conditions) => conditions.clone(),
		_ => Vec::new(),
	};

	conditions.extend(merged.conditions.iter().cloned());

	Some(match &fetch.mode {
		FetchMode::All | FetchMode::Where(_) => GraphQuery::Scan { label, conditions },
		FetchMode::Ids(ids) if ids.is_empty() => return None,
		FetchMode::Ids(ids) => GraphQuery::Lookup { label, identity_field, ids: ids.clone(), conditions },
		FetchMode::Related { anchor_id, relationship, direction } => GraphQuery::Related {
			label,
			identity_field,
			anchor_id: anchor_id.clone(),
			relationship: relationship.clone(),
			direction: *direction,
			conditions,
		},
	})
}

async fn filter_step(
	run: &PipelineRun,
	execution: &ExecutionContext,
	filter: &FilterOp,
	mut results: Vec<SearchResult>,
) -> Result<StepOutcome> {
	let field = run.identity_field();
	let conditions = ConditionSet::compile(&filter.conditions)?;
	let mut round_trips = 0;

	results.retain(|result| conditions.matches(&result.entity));

	for relationship in &filter.relationships {
		let ids = held_ids(field, &results);

		if ids.is_empty() {
			results.clear();

			break;
		}

		let plan = GraphQuery::RelationshipMatch {
			label: run.entity_type.clone(),
			identity_field: field.to_string(),
			ids,
			relationship: relationship.clone(),
		};
		let records = query(run, execution, "filter", plan).await?;
		let matched: HashSet<String> =
			records.iter().filter_map(|record| record.get(COL_ID).and_then(value_key)).collect();

		round_trips += 1;

		results.retain(|result| result.entity.identity(field).is_some_and(|id| matched.contains(&id)));
	}

	Ok(StepOutcome::new(results, round_trips))
}

async fn expand_step(
	run: &PipelineRun,
	execution: &ExecutionContext,
	expand: &ExpandOp,
	merged: &FilterOp,
	mut results: Vec<SearchResult>,
) -> Result<StepOutcome> {
	let field = run.identity_field();
	let conditions = ConditionSet::compile(&merged.conditions)?;

	results.retain(|result| conditions.matches(&result.entity));

	let ids = held_ids(field, &results);

	if ids.is_empty() {
		return Ok(StepOutcome::new(results, 0));
	}

	let plan = GraphQuery::Expand {
		label: run.entity_type.clone(),
		identity_field: field.to_string(),
		ids,
		relationship: expand.relationship.clone(),
		direction: expand.direction,
		depth: expand.depth,
		conditions: merged.conditions.clone(),
	};
	let records = query(run, execution, "expand", plan).await?;
	let mut neighbours: HashMap<String, Vec<RelatedEntity>> = HashMap::new();

	for record in &records {
		let Some(origin) = record.get(COL_ID).and_then(value_key) else {
			continue;
		};

		if record.get_map(COL_RELATED).is_none() {
			continue;
		}

		let entity = read_entity(record, COL_RELATED, COL_RELATED_LABELS)?;
		let depth = record.get_i64(COL_DEPTH).and_then(|depth| u32::try_from(depth).ok()).unwrap_or(1);

		neighbours.entry(origin).or_default().push(RelatedEntity {
			entity,
			relationship_type: expand.relationship.clone(),
			depth,
		});
	}

	let grouped: HashMap<String, Vec<RelatedEntity>> = neighbours
		.into_iter()
		.map(|(origin, related)| (origin, group_neighbours(related, field)))
		.collect();

	for result in &mut results {
		if let Some(related) = result.entity.identity(field).and_then(|id| grouped.get(&id)) {
			result.context_mut().related.extend(related.iter().cloned());
		}
	}

	Ok(StepOutcome::new(results, 1))
}

/// One entry per neighbour at its minimum hop count, ordered by depth then identity.
fn group_neighbours(related: Vec<RelatedEntity>, field: &str) -> Vec<RelatedEntity> {
	let mut best: HashMap<String, RelatedEntity> = HashMap::new();
	let mut anonymous = Vec::new();

	for neighbour in related {
		let Some(id) = neighbour.entity.identity(field) else {
			anonymous.push(neighbour);

			continue;
		};
		let keep_existing = best.get(&id).is_some_and(|existing| existing.depth <= neighbour.depth);

		if !keep_existing {
			best.insert(id, neighbour);
		}
	}

	let mut grouped: Vec<(String, RelatedEntity)> = best.into_iter().collect();

	grouped.sort_by(|(id_a, a), (id_b, b)| a.depth.cmp(&b.depth).then_with(|| id_a.cmp(id_b)));

	grouped.into_iter().map(|(_, neighbour)| neighbour).chain(anonymous).collect()
}

async fn semantic_step(
	run: &PipelineRun,
	execution: &ExecutionContext,
	semantic: &SemanticOp,
	merged: &FilterOp,
	held: Option<Vec<SearchResult>>,
) -> Result<StepOutcome> {
	let conditions = ConditionSet::compile(&merged.conditions)?;

	match semantic_search(run, execution, semantic, merged, held.as_deref()).await {
		Ok(mut outcome) => {
			outcome.results.retain(|result| conditions.matches(&result.entity));

			Ok(outcome)
		},
		Err(err) if err.is_interruption() => Err(err),
		Err(err) => {
			tracing::warn!(
				error = %err,
				query = %semantic.query,
				index = %semantic.index,
				"Semantic search failed. Keeping the current results."
			);

			let mut results = held.unwrap_or_default();

			results.retain(|result| conditions.matches(&result.entity));

			Ok(StepOutcome::degraded(results, &err))
		},
	}
}

async fn semantic_search(
	run: &PipelineRun,
	execution: &ExecutionContext,
	semantic: &SemanticOp,
	merged: &FilterOp,
	held: Option<&[SearchResult]>,
) -> Result<StepOutcome> {
	let vector = run
		.client
		.vector
		.as_ref()
		.ok_or_else(|| Error::configuration("Semantic search requires a vector search backend."))?;
	let index = run.client.indexes.resolve(&semantic.index, semantic.index_override.as_deref())?;
	let settings = run.client.settings();
	let field = run.identity_field();
	let mut request = VectorSearchRequest {
		index,
		top_k: semantic.top_k.unwrap_or(settings.semantic_top_k),
		min_score: semantic.min_score.or(settings.semantic_min_score),
		filter_ids: None,
		identity_field: field.to_string(),
		conditions: merged.conditions.clone(),
	};
	let Some(held) = held.filter(|held| !held.is_empty()) else {
		let hits = execution.run("semantic", vector.search(&semantic.query, &request)).await?;
		let label = request.index.entity_label.clone().unwrap_or_else(|| run.entity_type.clone());
		let results = hits
			.into_iter()
			.map(|hit| {
				let similarity = clamp_similarity(hit.score);

				SearchResult::new(Entity::new(vec![label.clone()], hit.properties), similarity)
					.with_component("semantic", similarity)
			})
			.collect();

		return Ok(StepOutcome::new(results, 1));
	};
	let ids = held_ids(field, held);

	if ids.is_empty() {
		return Ok(StepOutcome::new(Vec::new(), 0));
	}

	request.top_k = semantic.top_k.unwrap_or(ids.len());
	request.filter_ids = Some(ids);

	let hits = execution.run("semantic", vector.search(&semantic.query, &request)).await?;
	let mut similarities: HashMap<String, f64> = HashMap::new();

	for hit in hits {
		if let Some(id) = hit.properties.get(field).and_then(value_key) {
			similarities.entry(id).or_insert_with(|| clamp_similarity(hit.score));
		}
	}

	let weights = settings.semantic_weights;
	let results = held
		.iter()
		.filter_map(|result| {
			let similarity = *similarities.get(&result.entity.identity(field)?)?;
			let mut blended = result.clone();
			let previous = blended.score;

			blended.set_score(weights.blend(previous, similarity));
			blended.record("semantic", similarity);
			blended.record("previous", previous);

			Some(blended)
		})
		.collect();

	Ok(StepOutcome::new(results, 1))
}

async fn rerank_step(
	run: &PipelineRun,
	execution: &ExecutionContext,
	rerank: &RerankOp,
	held: Vec<SearchResult>,
) -> Result<StepOutcome> {
	let options = &rerank.options;
	let provider = options
		.provider
		.clone()
		.or_else(|| run.client.llm.clone())
		.ok_or_else(|| Error::configuration("LLM rerank requires an LLM provider."))?;
	let context = run.context.clone().ok_or_else(|| {
		Error::configuration(format!("LLM rerank requires an EntityContext for {}.", run.entity_type))
	})?;
	let settings = run.client.settings();
	let executor = StructuredExecutor::new(provider)
		.with_entity_context(Some(context))
		.with_cache(run.client.cache.clone())
		.with_execution_context(execution.clone());
	let params = MergeParams {
		strategy: options.strategy.unwrap_or(settings.rerank_strategy),
		identity: options.identity.clone().unwrap_or_else(|| run.identity.clone()),
		top_k: options.top_k,
		min_score: options.min_score,
		with_reasoning: options.with_reasoning,
	};
	let reranker = Reranker::new(
		executor,
		params,
		options.batching.unwrap_or(settings.rerank_batching),
		options.format,
	);

	match reranker.rerank(&rerank.question, held.clone()).await {
		Ok(output) => Ok(StepOutcome::new(output.results, round_trip_count(output.batches))),
		Err(err) if err.is_interruption() => Err(err),
		Err(err) => {
			tracing::warn!(
				error = %err,
				question = %rerank.question,
				"LLM rerank failed. Keeping the current ranking."
			);

			Ok(StepOutcome::degraded(held, &err))
		},
	}
}

async fn structured_step(
	run: &PipelineRun,
	execution: &ExecutionContext,
	structured: &StructuredOp,
	mut held: Vec<SearchResult>,
) -> Result<StepOutcome> {
	let provider = structured
		.provider
		.clone()
		.or_else(|| run.client.llm.clone())
		.ok_or_else(|| Error::configuration("LLM structured extraction requires an LLM provider."))?;
	let executor = StructuredExecutor::new(provider)
		.with_entity_context(run.context.clone())
		.with_cache(run.client.cache.clone())
		.with_execution_context(execution.clone())
		.with_defaults(run.client.settings().structured_batching);
	let mut seen = HashSet::new();
	let mut items = Vec::new();

	for result in &held {
		let id = (run.identity)(&result.entity).ok_or_else(|| {
			Error::invalid_request("LLM structured extraction requires an identity on every result.")
		})?;

		if seen.insert(id.clone()) {
			items.push(StructuredItem::from_result(id, result));
		}
	}

	let output = executor.run(&items, &structured.request).await?;
	let decoded: HashMap<String, Map<String, Value>> = output
		.items
		.into_iter()
		.filter(|item| item.decoded.is_some())
		.map(|item| (item.id, item.fields))
		.collect();

	for result in &mut held {
		if let Some(fields) = (run.identity)(&result.entity).and_then(|id| decoded.get(&id)) {
			result.entity.properties = fields.clone();
		}
	}

	Ok(StepOutcome {
		global_metadata: output.global_metadata,
		..StepOutcome::new(held, round_trip_count(output.batches))
	})
}

async fn embeddings_step(
	run: &PipelineRun,
	execution: &ExecutionContext,
	embeddings: &EmbeddingsOp,
	mut held: Vec<SearchResult>,
) -> Result<StepOutcome> {
	let provider = embeddings
		.provider
		.clone()
		.or_else(|| run.client.embedding.clone())
		.ok_or_else(|| Error::configuration("Embedding generation requires an embedding provider."))?;
	let mut targets = Vec::new();
	let mut texts = Vec::new();

	for (idx, result) in held.iter().enumerate() {
		let text = embeddings
			.source_fields
			.iter()
			.filter_map(|field| result.entity.get(field).map(render_value))
			.filter(|text| !text.trim().is_empty())
			.collect::<Vec<_>>()
			.join("\n");

		if !text.is_empty() {
			targets.push(idx);
			texts.push(text);
		}
	}

	if texts.is_empty() {
		return Ok(StepOutcome::new(held, 0));
	}

	let vectors = execution.run("generate_embeddings", provider.embed(&texts)).await?;

	if vectors.len() != texts.len() {
		return Err(Error::provider(format!(
			"Embedding provider returned {} vectors for {} texts.",
			vectors.len(),
			texts.len()
		)));
	}

	for (idx, vector) in targets.into_iter().zip(vectors) {
		let values = vector.into_iter().map(|component| Value::from(f64::from(component))).collect();

		held[idx].entity.set(embeddings.target_field.clone(), Value::Array(values));
	}

	Ok(StepOutcome::new(held, 1))
}

async fn query(
	run: &PipelineRun,
	execution: &ExecutionContext,
	stage: &str,
	plan: GraphQuery,
) -> Result<Vec<Record>> {
	let compiled = cypher::compile(plan);

	execution.run(stage, run.client.store.run(&compiled)).await
}

fn read_entity(record: &Record, entity_column: &str, labels_column: &str) -> Result<Entity> {
	let properties = record
		.get_map(entity_column)
		.cloned()
		.ok_or_else(|| Error::storage(format!("Row is missing the {entity_column} column.")))?;

	Ok(Entity::new(record.get_strings(labels_column), properties))
}

/// Distinct identities in result order.
fn held_ids(field: &str, results: &[SearchResult]) -> Vec<String> {
	let mut seen = HashSet::new();

	results
		.iter()
		.filter_map(|result| result.entity.identity(field))
		.filter(|id| seen.insert(id.clone()))
		.collect()
}

fn flag_stale(run: &PipelineRun, results: &[SearchResult], metadata: Option<&mut ExecutionMetadata>) {
	let field = &run.client.settings.stale_field;
	let stale = results.iter().filter(|result| result.entity.is_flagged(field)).count();

	if stale == 0 {
		return;
	}

	tracing::warn!(stale, field = %field, "Results include entities with stale embeddings.");

	if let Some(metadata) = metadata {
		metadata
			.warnings
			.push(format!("{stale} result(s) have {field} set. Their semantic scores may be outdated."));
	}
}

fn merged_descriptions(run: &PipelineRun, step: &PlannedStep) -> Vec<String> {
	step.merged_indices
		.iter()
		.filter_map(|idx| run.operations.get(*idx))
		.map(Operation::describe)
		.collect()
}

fn is_implicit(operation: &Operation) -> bool {
	matches!(operation, Operation::Fetch(FetchOp { implicit: true, .. }))
}

fn clamp_similarity(score: f64) -> f64 {
	scoring::finite_or_zero(score).clamp(0.0, 1.0)
}

fn round_trip_count(batches: usize) -> u32 {
	u32::try_from(batches).unwrap_or(u32::MAX)
}

fn elapsed_ms(started: Instant) -> u64 {
	u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

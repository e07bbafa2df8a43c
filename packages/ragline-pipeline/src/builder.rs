use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::{
	EmbeddingProvider, LlmProvider, Result,
	client::RagClient,
	condition::{Direction, FieldCondition, RelationshipCondition},
	context::EntityContext,
	entity::{Entity, IdentityFn, SearchResult, field_identity},
	executor::{self, PipelineRun},
	metadata::{ExplainPlan, PipelineOutput},
	operation::{
		ClientFilterOp, EmbeddingsOp, ExpandOp, FetchMode, FetchOp, FilterOp, Operation, RerankOp,
		SemanticOp, StructuredOp,
	},
	plan,
	rerank::RerankOptions,
	scoring::{OrderBy, SortDirection},
	structured::StructuredRequest,
};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SemanticOptions {
	pub index: String,
	/// Client default for seeded searches; the held entity count when constraining.
	pub top_k: Option<usize>,
	pub min_score: Option<f64>,
	pub index_override: Option<String>,
}
impl SemanticOptions {
	pub fn new(index: impl Into<String>) -> Self {
		Self { index: index.into(), ..Self::default() }
	}

	pub fn top_k(mut self, top_k: usize) -> Self {
		self.top_k = Some(top_k);

		self
	}

	pub fn min_score(mut self, min_score: f64) -> Self {
		self.min_score = Some(min_score);

		self
	}

	pub fn index_override(mut self, collection: impl Into<String>) -> Self {
		self.index_override = Some(collection.into());

		self
	}
}

/// Lazily accumulated pipeline over one entity type. Nothing touches a backend until a terminal
/// call (`execute*`, `count`) runs; `explain` never does.
pub struct PipelineBuilder {
	client: RagClient,
	entity_type: String,
	operations: Vec<Operation>,
	limit: Option<usize>,
	offset: Option<usize>,
	order_by: Option<OrderBy>,
	context: Option<Arc<EntityContext>>,
	identity: Option<IdentityFn>,
	fusion: bool,
	token: CancellationToken,
	timeout: Option<Duration>,
}
impl PipelineBuilder {
	pub(crate) fn new(client: RagClient, entity_type: String) -> Self {
		Self {
			client,
			entity_type,
			operations: Vec::new(),
			limit: None,
			offset: None,
			order_by: None,
			context: None,
			identity: None,
			fusion: true,
			token: CancellationToken::new(),
			timeout: None,
		}
	}

	pub fn fetch_all(self) -> Self {
		self.fetch(FetchMode::All)
	}

	pub fn fetch_ids<I, S>(self, ids: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.fetch(FetchMode::Ids(ids.into_iter().map(Into::into).collect()))
	}

	pub fn fetch_related(
		self,
		anchor_id: impl Into<String>,
		relationship: impl Into<String>,
		direction: Direction,
	) -> Self {
		self.fetch(FetchMode::Related {
			anchor_id: anchor_id.into(),
			relationship: relationship.into(),
			direction,
		})
	}

	pub fn fetch_where(self, conditions: Vec<FieldCondition>) -> Self {
		self.fetch(FetchMode::Where(conditions))
	}

	pub fn filter(self, condition: FieldCondition) -> Self {
		self.push_filter(FilterOp { conditions: vec![condition], relationships: Vec::new() })
	}

	pub fn filter_all(self, conditions: Vec<FieldCondition>) -> Self {
		self.push_filter(FilterOp { conditions, relationships: Vec::new() })
	}

	pub fn where_related(self, relationship: RelationshipCondition) -> Self {
		self.push_filter(FilterOp { conditions: Vec::new(), relationships: vec![relationship] })
	}

	pub fn client_filter<F>(mut self, label: impl Into<String>, predicate: F) -> Self
	where
		F: Fn(&SearchResult) -> bool + Send + Sync + 'static,
	{
		self.operations.push(Operation::ClientFilter(ClientFilterOp {
			label: label.into(),
			predicate: Arc::new(predicate),
		}));

		self
	}

	pub fn expand(mut self, relationship: impl Into<String>, depth: u32, direction: Direction) -> Self {
		self.operations.push(Operation::Expand(ExpandOp {
			relationship: relationship.into(),
			depth,
			direction,
		}));

		self
	}

	pub fn semantic(mut self, query: impl Into<String>, options: SemanticOptions) -> Self {
		self.operations.push(Operation::Semantic(SemanticOp {
			query: query.into(),
			index: options.index,
			top_k: options.top_k,
			min_score: options.min_score,
			index_override: options.index_override,
		}));

		self
	}

	pub fn llm_rerank(mut self, question: impl Into<String>, options: RerankOptions) -> Self {
		self.operations.push(Operation::LlmRerank(RerankOp { question: question.into(), options }));

		self
	}

	/// Overlays decoded fields onto each result's properties.
	pub fn llm_structured(
		mut self,
		request: StructuredRequest,
		provider: Option<Arc<dyn LlmProvider>>,
	) -> Self {
		self.operations.push(Operation::LlmStructured(StructuredOp { request, provider }));

		self
	}

	/// Stores an embedding of the joined `source_fields` in `target_field`.
	pub fn generate_embeddings<I, S>(
		mut self,
		source_fields: I,
		target_field: impl Into<String>,
		provider: Option<Arc<dyn EmbeddingProvider>>,
	) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.operations.push(Operation::GenerateEmbeddings(EmbeddingsOp {
			source_fields: source_fields.into_iter().map(Into::into).collect(),
			target_field: target_field.into(),
			provider,
		}));

		self
	}

	pub fn limit(mut self, limit: usize) -> Self {
		self.limit = Some(limit);

		self
	}

	pub fn offset(mut self, offset: usize) -> Self {
		self.offset = Some(offset);

		self
	}

	pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
		self.order_by = Some(OrderBy { field: field.into(), direction });

		self
	}

	/// Overrides the client's registered context for this entity type.
	pub fn with_entity_context(mut self, context: impl Into<Arc<EntityContext>>) -> Self {
		self.context = Some(context.into());

		self
	}

	pub fn with_identity<F>(mut self, identity: F) -> Self
	where
		F: Fn(&Entity) -> Option<String> + Send + Sync + 'static,
	{
		self.identity = Some(Arc::new(identity));

		self
	}

	/// One backend round trip per operation. Results are unchanged.
	pub fn disable_fusion(mut self) -> Self {
		self.fusion = false;

		self
	}

	pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
		self.token = token;

		self
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);

		self
	}

	pub fn entity_type(&self) -> &str {
		&self.entity_type
	}

	pub fn operations(&self) -> &[Operation] {
		&self.operations
	}

	pub fn explain(&self) -> Result<ExplainPlan> {
		executor::explain(&self.prepare()?)
	}

	pub async fn execute(self) -> Result<Vec<SearchResult>> {
		Ok(executor::execute(&self.prepare()?, false).await?.0)
	}

	pub async fn execute_with_metadata(self) -> Result<PipelineOutput> {
		let (results, metadata) = executor::execute(&self.prepare()?, true).await?;

		Ok(PipelineOutput { results, metadata: metadata.unwrap_or_default() })
	}

	pub async fn execute_flat(self) -> Result<Vec<Entity>> {
		Ok(self.execute().await?.into_iter().map(|result| result.entity).collect())
	}

	/// Number of results before `offset` and `limit` apply.
	pub async fn count(self) -> Result<usize> {
		executor::count(&self.prepare()?).await
	}

	fn fetch(mut self, mode: FetchMode) -> Self {
		self.operations.push(Operation::Fetch(FetchOp { mode, implicit: false }));

		self
	}

	fn push_filter(mut self, filter: FilterOp) -> Self {
		match self.operations.last_mut() {
			// Relationship filters stay on their own so field conditions can still fuse upstream.
			Some(Operation::Filter(previous)) if previous.is_field_only() && filter.is_field_only() =>
				previous.merge(filter),
			_ => self.operations.push(Operation::Filter(filter)),
		}

		self
	}

	fn prepare(&self) -> Result<PipelineRun> {
		let mut operations = Vec::with_capacity(self.operations.len() + 1);

		if !matches!(self.operations.first(), Some(Operation::Fetch(_) | Operation::Semantic(_))) {
			operations.push(Operation::Fetch(FetchOp { mode: FetchMode::All, implicit: true }));
		}

		operations.extend(self.operations.iter().cloned());

		let settings = self.client.settings();
		let identity = self
			.identity
			.clone()
			.unwrap_or_else(|| field_identity(settings.identity_field.clone()));
		let context =
			self.context.clone().or_else(|| self.client.entity_context(&self.entity_type));
		let run = PipelineRun {
			steps: plan::plan(&operations, self.fusion),
			operations,
			client: self.client.clone(),
			entity_type: self.entity_type.clone(),
			limit: self.limit,
			offset: self.offset,
			order_by: self.order_by.clone(),
			context,
			identity,
			fusion: self.fusion,
			token: self.token.clone(),
			timeout: self.timeout.or(settings.deadline),
		};

		executor::validate(&run)?;

		Ok(run)
	}
}

pub mod adapters;
pub mod builder;
pub mod client;
pub mod condition;
pub mod context;
pub mod cypher;
pub mod entity;
pub mod execution;
pub mod metadata;
pub mod operation;
pub mod plan;
pub mod query_plan;
pub mod rerank;
pub mod scoring;
pub mod settings;
pub mod structured;
pub mod vector;

mod error;
mod executor;

use std::{future::Future, pin::Pin};

pub use builder::{PipelineBuilder, SemanticOptions};
pub use client::RagClient;
pub use condition::{ConditionOp, Direction, FieldCondition, RelationshipCondition};
pub use context::{ContextField, Enrichment, EntityContext};
pub use cypher::{CompiledQuery, GraphQuery};
pub use entity::{Entity, IdentityFn, RelatedEntity, ResultContext, SearchResult};
pub use error::{Error, Result};
pub use execution::ExecutionContext;
pub use metadata::{ExecutionMetadata, ExplainPlan, OperationMetadata, PipelineOutput};
pub use operation::{Operation, OperationKind};
pub use query_plan::QueryPlan;
pub use ragline_storage::models::Record;
pub use rerank::{ItemEvaluation, RerankOptions};
pub use scoring::{MergeStrategy, OrderBy, SortDirection};
pub use settings::Settings;
pub use structured::{
	BatchingOptions, FieldExposure, FieldType, OutputFormat, OutputSchema, SchemaField,
	StructuredOutput, StructuredRequest,
};
pub use vector::{VectorHit, VectorIndexConfig, VectorIndexRegistry, VectorSearchRequest};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Read-only access to a property-graph store.
///
/// Drivers that speak Cypher run `query.text` with `query.params`; in-process stores may
/// evaluate `query.plan` instead. Either way the returned rows use the column names of the plan.
pub trait GraphStore
where
	Self: Send + Sync,
{
	fn run<'a>(&'a self, query: &'a CompiledQuery) -> BoxFuture<'a, Result<Vec<Record>>>;
}

pub trait VectorSearch
where
	Self: Send + Sync,
{
	/// Hits ordered by similarity, best first.
	fn search<'a>(
		&'a self,
		query: &'a str,
		request: &'a VectorSearchRequest,
	) -> BoxFuture<'a, Result<Vec<VectorHit>>>;
}

pub trait LlmProvider
where
	Self: Send + Sync,
{
	fn generate<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<String>>;

	/// Stable identity used to namespace cached responses.
	///
	/// Providers without one only ever share cache entries with the same instance.
	fn cache_namespace(&self) -> Option<String> {
		None
	}

	/// Whether `generate_batch` is cheaper than one `generate` per prompt.
	fn supports_batch(&self) -> bool {
		false
	}

	fn generate_batch<'a>(&'a self, prompts: &'a [String]) -> BoxFuture<'a, Result<Vec<String>>> {
		Box::pin(async move {
			let mut responses = Vec::with_capacity(prompts.len());

			for prompt in prompts {
				responses.push(self.generate(prompt).await?);
			}

			Ok(responses)
		})
	}
}

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(&'a self, texts: &'a [String]) -> BoxFuture<'a, Result<Vec<Vec<f32>>>>;
}

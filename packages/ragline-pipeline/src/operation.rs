use std::{fmt, sync::Arc};

use crate::{
	EmbeddingProvider, LlmProvider,
	condition::{Direction, FieldCondition, RelationshipCondition},
	entity::SearchResult,
	rerank::RerankOptions,
	structured::StructuredRequest,
};

pub type ResultPredicate = Arc<dyn Fn(&SearchResult) -> bool + Send + Sync>;

#[derive(Clone, Debug, PartialEq)]
pub enum FetchMode {
	All,
	Ids(Vec<String>),
	Related { anchor_id: String, relationship: String, direction: Direction },
	Where(Vec<FieldCondition>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct FetchOp {
	pub mode: FetchMode,
	/// Prepended by the builder rather than requested by the caller.
	pub implicit: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterOp {
	pub conditions: Vec<FieldCondition>,
	pub relationships: Vec<RelationshipCondition>,
}
impl FilterOp {
	pub fn is_field_only(&self) -> bool {
		self.relationships.is_empty()
	}

	pub fn merge(&mut self, other: FilterOp) {
		self.conditions.extend(other.conditions);
		self.relationships.extend(other.relationships);
	}
}

#[derive(Clone)]
pub struct ClientFilterOp {
	pub label: String,
	pub predicate: ResultPredicate,
}
impl fmt::Debug for ClientFilterOp {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ClientFilterOp").field("label", &self.label).finish_non_exhaustive()
	}
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExpandOp {
	pub relationship: String,
	pub depth: u32,
	pub direction: Direction,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SemanticOp {
	pub query: String,
	pub index: String,
	pub top_k: Option<usize>,
	pub min_score: Option<f64>,
	/// Collection name used instead of the registered index's collection.
	pub index_override: Option<String>,
}

#[derive(Clone, Debug)]
pub struct RerankOp {
	pub question: String,
	pub options: RerankOptions,
}

#[derive(Clone)]
pub struct StructuredOp {
	pub request: StructuredRequest,
	pub provider: Option<Arc<dyn LlmProvider>>,
}
impl fmt::Debug for StructuredOp {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("StructuredOp")
			.field("request", &self.request)
			.field("provider", &self.provider.is_some())
			.finish()
	}
}

#[derive(Clone)]
pub struct EmbeddingsOp {
	pub source_fields: Vec<String>,
	pub target_field: String,
	pub provider: Option<Arc<dyn EmbeddingProvider>>,
}
impl fmt::Debug for EmbeddingsOp {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("EmbeddingsOp")
			.field("source_fields", &self.source_fields)
			.field("target_field", &self.target_field)
			.field("provider", &self.provider.is_some())
			.finish()
	}
}

#[derive(Clone, Debug)]
pub enum Operation {
	Fetch(FetchOp),
	Filter(FilterOp),
	ClientFilter(ClientFilterOp),
	Expand(ExpandOp),
	Semantic(SemanticOp),
	LlmRerank(RerankOp),
	LlmStructured(StructuredOp),
	GenerateEmbeddings(EmbeddingsOp),
}
impl Operation {
	pub fn kind(&self) -> OperationKind {
		match self {
			Self::Fetch(_) => OperationKind::Fetch,
			Self::Filter(_) => OperationKind::Filter,
			Self::ClientFilter(_) => OperationKind::ClientFilter,
			Self::Expand(_) => OperationKind::Expand,
			Self::Semantic(_) => OperationKind::Semantic,
			Self::LlmRerank(_) => OperationKind::LlmRerank,
			Self::LlmStructured(_) => OperationKind::LlmStructured,
			Self::GenerateEmbeddings(_) => OperationKind::GenerateEmbeddings,
		}
	}

	/// Whether a following field-only filter may be folded into this operation's query.
	pub fn accepts_fusion(&self) -> bool {
		matches!(self, Self::Fetch(_) | Self::Expand(_) | Self::Semantic(_))
	}

	pub fn as_field_filter(&self) -> Option<&FilterOp> {
		match self {
			Self::Filter(filter) if filter.is_field_only() => Some(filter),
			_ => None,
		}
	}

	/// Short human-readable summary used in metadata and plans.
	pub fn describe(&self) -> String {
		match self {
			Self::Fetch(fetch) => match &fetch.mode {
				FetchMode::All => "fetch all".to_string(),
				FetchMode::Ids(ids) => format!("fetch {} ids", ids.len()),
				FetchMode::Related { anchor_id, relationship, direction } =>
					format!("fetch {direction:?} {relationship} of {anchor_id}"),
				FetchMode::Where(conditions) => format!("fetch where {}", describe_conditions(conditions)),
			},
			Self::Filter(filter) => {
				let mut parts = Vec::new();

				if !filter.conditions.is_empty() {
					parts.push(describe_conditions(&filter.conditions));
				}

				parts.extend(filter.relationships.iter().map(|rel| {
					format!("has {:?} {}", rel.direction, rel.relationship)
				}));

				format!("filter {}", parts.join(" and "))
			},
			Self::ClientFilter(filter) => format!("client filter {}", filter.label),
			Self::Expand(expand) =>
				format!("expand {:?} {} to depth {}", expand.direction, expand.relationship, expand.depth),
			Self::Semantic(semantic) => format!("semantic {:?} on {}", semantic.query, semantic.index),
			Self::LlmRerank(rerank) => format!("llm rerank {:?}", rerank.question),
			Self::LlmStructured(structured) =>
				format!("llm structured ({} fields)", structured.request.schema.fields.len()),
			Self::GenerateEmbeddings(embeddings) =>
				format!("embed {} into {}", embeddings.source_fields.join("+"), embeddings.target_field),
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
	Fetch,
	Filter,
	ClientFilter,
	Expand,
	Semantic,
	LlmRerank,
	LlmStructured,
	GenerateEmbeddings,
}
impl OperationKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Fetch => "fetch",
			Self::Filter => "filter",
			Self::ClientFilter => "client_filter",
			Self::Expand => "expand",
			Self::Semantic => "semantic",
			Self::LlmRerank => "llm_rerank",
			Self::LlmStructured => "llm_structured",
			Self::GenerateEmbeddings => "generate_embeddings",
		}
	}
}

fn describe_conditions(conditions: &[FieldCondition]) -> String {
	conditions
		.iter()
		.map(|c| format!("{} {} {}", c.field, c.op.as_str(), c.value))
		.collect::<Vec<_>>()
		.join(" and ")
}

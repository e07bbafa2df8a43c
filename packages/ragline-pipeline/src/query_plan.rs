//! Serialisable pipelines, for callers that describe queries as JSON instead of builder calls.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
	builder::{PipelineBuilder, SemanticOptions},
	client::RagClient,
	condition::{Direction, FieldCondition, RelationshipCondition},
	rerank::RerankOptions,
	scoring::{MergeStrategy, OrderBy},
	structured::{
		BatchingOptions, FieldExposure, FormatOptions, OutputFormat, OutputSchema, StructuredRequest,
	},
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
	pub entity_type: String,
	#[serde(default)]
	pub steps: Vec<PlanStep>,
	#[serde(default)]
	pub limit: Option<usize>,
	#[serde(default)]
	pub offset: Option<usize>,
	#[serde(default)]
	pub order_by: Option<OrderBy>,
	#[serde(default = "default_fusion")]
	pub fusion: bool,
	#[serde(default)]
	pub timeout_ms: Option<u64>,
}
impl QueryPlan {
	pub fn into_builder(self, client: &RagClient) -> PipelineBuilder {
		let mut builder = client.query(self.entity_type);

		for step in self.steps {
			builder = step.apply(builder);
		}

		if let Some(limit) = self.limit {
			builder = builder.limit(limit);
		}
		if let Some(offset) = self.offset {
			builder = builder.offset(offset);
		}
		if let Some(order) = self.order_by {
			builder = builder.order_by(order.field, order.direction);
		}
		if !self.fusion {
			builder = builder.disable_fusion();
		}
		if let Some(timeout_ms) = self.timeout_ms {
			builder = builder.with_timeout(Duration::from_millis(timeout_ms));
		}

		builder
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PlanStep {
	FetchAll,
	FetchIds {
		ids: Vec<String>,
	},
	FetchRelated {
		anchor_id: String,
		relationship: String,
		#[serde(default)]
		direction: Direction,
	},
	FetchWhere {
		conditions: Vec<FieldCondition>,
	},
	Filter {
		#[serde(default)]
		conditions: Vec<FieldCondition>,
		#[serde(default)]
		relationships: Vec<RelationshipCondition>,
	},
	Expand {
		relationship: String,
		#[serde(default = "default_depth")]
		depth: u32,
		#[serde(default)]
		direction: Direction,
	},
	Semantic {
		query: String,
		index: String,
		#[serde(default)]
		top_k: Option<usize>,
		#[serde(default)]
		min_score: Option<f64>,
		#[serde(default)]
		index_override: Option<String>,
	},
	LlmRerank {
		question: String,
		#[serde(default)]
		strategy: Option<MergeStrategy>,
		#[serde(default)]
		top_k: Option<usize>,
		#[serde(default)]
		min_score: Option<f64>,
		#[serde(default)]
		batching: Option<BatchingOptions>,
		#[serde(default)]
		with_reasoning: bool,
		#[serde(default)]
		format: OutputFormat,
	},
	LlmStructured {
		instructions: String,
		exposure: FieldExposure,
		schema: OutputSchema,
		#[serde(default)]
		global_schema: Option<OutputSchema>,
		#[serde(default)]
		format: FormatOptions,
		#[serde(default)]
		batching: Option<BatchingOptions>,
	},
	GenerateEmbeddings {
		source_fields: Vec<String>,
		target_field: String,
	},
}
impl PlanStep {
	fn apply(self, builder: PipelineBuilder) -> PipelineBuilder {
		match self {
			Self::FetchAll => builder.fetch_all(),
			Self::FetchIds { ids } => builder.fetch_ids(ids),
			Self::FetchRelated { anchor_id, relationship, direction } =>
				builder.fetch_related(anchor_id, relationship, direction),
			Self::FetchWhere { conditions } => builder.fetch_where(conditions),
			Self::Filter { conditions, relationships } => relationships
				.into_iter()
				.fold(builder.filter_all(conditions), PipelineBuilder::where_related),
			Self::Expand { relationship, depth, direction } =>
				builder.expand(relationship, depth, direction),
			Self::Semantic { query, index, top_k, min_score, index_override } => builder.semantic(
				query,
				SemanticOptions { index, top_k, min_score, index_override },
			),
			Self::LlmRerank { question, strategy, top_k, min_score, batching, with_reasoning, format } => {
				let options = RerankOptions {
					strategy,
					top_k,
					min_score,
					batching,
					with_reasoning,
					format,
					..RerankOptions::default()
				};

				builder.llm_rerank(question, options)
			},
			Self::LlmStructured { instructions, exposure, schema, global_schema, format, batching } => {
				let mut request = StructuredRequest::new(instructions, exposure, schema);

				request.global_schema = global_schema;
				request.format = format;
				request.batching = batching;

				builder.llm_structured(request, None)
			},
			Self::GenerateEmbeddings { source_fields, target_field } =>
				builder.generate_embeddings(source_fields, target_field, None),
		}
	}
}

fn default_fusion() -> bool {
	true
}

fn default_depth() -> u32 {
	1
}

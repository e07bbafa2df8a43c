use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::{entity::SearchResult, operation::OperationKind};

#[derive(Clone, Debug, Serialize)]
pub struct ExecutionMetadata {
	pub execution_id: Uuid,
	pub operations: Vec<OperationMetadata>,
	pub total_duration_ms: u64,
	pub final_count: usize,
	/// At least one soft-failing stage absorbed an error.
	pub degraded: bool,
	pub warnings: Vec<String>,
}
impl ExecutionMetadata {
	pub fn new() -> Self {
		Self {
			execution_id: Uuid::new_v4(),
			operations: Vec::new(),
			total_duration_ms: 0,
			final_count: 0,
			degraded: false,
			warnings: Vec::new(),
		}
	}

	pub fn round_trips(&self) -> u32 {
		self.operations.iter().map(|op| op.round_trips).sum()
	}
}
impl Default for ExecutionMetadata {
	fn default() -> Self {
		Self::new()
	}
}

#[derive(Clone, Debug, Serialize)]
pub struct OperationMetadata {
	pub index: usize,
	pub kind: OperationKind,
	pub description: String,
	pub input_count: usize,
	pub output_count: usize,
	pub duration_ms: u64,
	/// Descriptions of the filters folded into this operation.
	pub merged_operations: Vec<String>,
	pub merged_indices: Vec<usize>,
	pub optimized: bool,
	pub round_trips: u32,
	pub degraded: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub global_metadata: Option<Value>,
	pub implicit: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct ExplainStep {
	pub index: usize,
	pub kind: OperationKind,
	pub description: String,
	pub merged_operations: Vec<String>,
	pub merged_indices: Vec<usize>,
	pub implicit: bool,
	/// Cypher issued by store-backed steps whose query does not depend on earlier results.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub query: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ExplainPlan {
	pub entity_type: String,
	pub fusion: bool,
	pub steps: Vec<ExplainStep>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub limit: Option<usize>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub offset: Option<usize>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PipelineOutput {
	pub results: Vec<SearchResult>,
	pub metadata: ExecutionMetadata,
}

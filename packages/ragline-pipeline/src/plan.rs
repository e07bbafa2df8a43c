//! Fusion optimizer.
//!
//! Fetch, Expand and Semantic greedily absorb every immediately following field-only Filter
//! into their own query. A Filter that carries a relationship condition ends the look-ahead and
//! runs as its own step.

use crate::operation::{FilterOp, Operation};

#[derive(Clone, Debug)]
pub struct PlannedStep {
	/// Position of the operation in the builder's list.
	pub index: usize,
	pub operation: Operation,
	/// Field filters folded into this step's query.
	pub merged: FilterOp,
	pub merged_indices: Vec<usize>,
}
impl PlannedStep {
	pub fn is_fused(&self) -> bool {
		!self.merged_indices.is_empty()
	}
}

pub fn plan(operations: &[Operation], fusion: bool) -> Vec<PlannedStep> {
	let mut steps = Vec::with_capacity(operations.len());
	let mut idx = 0;

	while idx < operations.len() {
		let index = idx;
		let operation = operations[idx].clone();
		let mut merged = FilterOp::default();
		let mut merged_indices = Vec::new();

		if fusion && operation.accepts_fusion() {
			while let Some(filter) = operations.get(idx + 1).and_then(Operation::as_field_filter) {
				merged.merge(filter.clone());
				merged_indices.push(idx + 1);

				idx += 1;
			}
		}

		steps.push(PlannedStep { index, operation, merged, merged_indices });

		idx += 1;
	}

	steps
}

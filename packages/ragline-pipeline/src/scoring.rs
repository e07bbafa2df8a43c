use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::{IdentityFn, SearchResult};

pub const LLM_SCORE_SCALE: f64 = 10.0;

pub fn finite_or_zero(value: f64) -> f64 {
	if value.is_finite() { value } else { 0.0 }
}

/// Linear blend of an existing score with an incoming signal.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlendWeights {
	pub existing: f64,
	pub incoming: f64,
}
impl BlendWeights {
	pub fn blend(&self, existing: f64, incoming: f64) -> f64 {
		finite_or_zero(self.existing * finite_or_zero(existing) + self.incoming * finite_or_zero(incoming))
	}
}
impl Default for BlendWeights {
	fn default() -> Self {
		Self { existing: 0.3, incoming: 0.7 }
	}
}

/// How an LLM evaluation (0-10) combines with the score an item already carries.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MergeStrategy {
	Weighted { existing: f64, llm: f64 },
	Multiply,
	Replace,
}
impl MergeStrategy {
	pub fn parse(name: &str, existing: f64, llm: f64) -> Option<Self> {
		match name {
			"weighted" => Some(Self::Weighted { existing, llm }),
			"multiply" => Some(Self::Multiply),
			"replace" => Some(Self::Replace),
			_ => None,
		}
	}

	pub fn merge(&self, existing: f64, llm_raw: f64) -> f64 {
		let llm = normalize_llm_score(llm_raw);
		let existing = finite_or_zero(existing);

		match self {
			Self::Weighted { existing: w_existing, llm: w_llm } =>
				finite_or_zero(w_existing * existing + w_llm * llm),
			Self::Multiply => existing * llm,
			Self::Replace => llm,
		}
	}
}
impl Default for MergeStrategy {
	fn default() -> Self {
		Self::Weighted { existing: 0.3, llm: 0.7 }
	}
}

pub fn normalize_llm_score(raw: f64) -> f64 {
	(finite_or_zero(raw) / LLM_SCORE_SCALE).clamp(0.0, 1.0)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
	Asc,
	#[default]
	Desc,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
	pub field: String,
	#[serde(default)]
	pub direction: SortDirection,
}

pub fn cmp_f64_desc(a: f64, b: f64) -> Ordering {
	b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// Total order over JSON scalars: numbers numerically, strings lexicographically, booleans
/// false-first. Values of different kinds are incomparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
	match (a, b) {
		(Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
		(Value::String(x), Value::String(y)) => Some(x.cmp(y)),
		(Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
		_ => None,
	}
}

/// Sorts by score descending (or by `order_by`), breaking ties by identity ascending so repeated
/// runs return identical orderings. Entries without an identity sort after those with one.
pub fn sort_results(
	results: Vec<SearchResult>,
	identity: &IdentityFn,
	order_by: Option<&OrderBy>,
) -> Vec<SearchResult> {
	let mut keyed: Vec<(Option<String>, SearchResult)> =
		results.into_iter().map(|result| (identity(&result.entity), result)).collect();

	keyed.sort_by(|(id_a, a), (id_b, b)| {
		let primary = match order_by {
			Some(order) => cmp_field(a, b, order),
			None => cmp_f64_desc(a.score, b.score),
		};

		primary.then_with(|| cmp_identity(id_a.as_deref(), id_b.as_deref()))
	});

	keyed.into_iter().map(|(_, result)| result).collect()
}

fn cmp_field(a: &SearchResult, b: &SearchResult, order: &OrderBy) -> Ordering {
	match (a.entity.get(&order.field), b.entity.get(&order.field)) {
		(Some(x), Some(y)) => {
			let ordering = compare_values(x, y).unwrap_or(Ordering::Equal);

			match order.direction {
				SortDirection::Asc => ordering,
				SortDirection::Desc => ordering.reverse(),
			}
		},
		// Missing values trail in both directions.
		(Some(_), None) => Ordering::Less,
		(None, Some(_)) => Ordering::Greater,
		(None, None) => Ordering::Equal,
	}
}

fn cmp_identity(a: Option<&str>, b: Option<&str>) -> Ordering {
	match (a, b) {
		(Some(x), Some(y)) => x.cmp(y),
		(Some(_), None) => Ordering::Less,
		(None, Some(_)) => Ordering::Greater,
		(None, None) => Ordering::Equal,
	}
}

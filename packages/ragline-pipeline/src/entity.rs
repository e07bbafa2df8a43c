use std::{collections::BTreeMap, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::scoring::finite_or_zero;

/// Maps an entity to the stable identifier used for grouping, score merging and evaluation lookup.
pub type IdentityFn = Arc<dyn Fn(&Entity) -> Option<String> + Send + Sync>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Entity {
	#[serde(default)]
	pub labels: Vec<String>,
	#[serde(default)]
	pub properties: Map<String, Value>,
}
impl Entity {
	pub fn new(labels: Vec<String>, properties: Map<String, Value>) -> Self {
		Self { labels, properties }
	}

	pub fn get(&self, field: &str) -> Option<&Value> {
		self.properties.get(field).filter(|value| !value.is_null())
	}

	pub fn set(&mut self, field: impl Into<String>, value: Value) {
		self.properties.insert(field.into(), value);
	}

	pub fn identity(&self, field: &str) -> Option<String> {
		self.get(field).and_then(value_key)
	}

	pub fn has_label(&self, label: &str) -> bool {
		self.labels.iter().any(|l| l == label)
	}

	pub fn is_flagged(&self, field: &str) -> bool {
		matches!(self.get(field), Some(Value::Bool(true)))
	}
}

/// Identities are compared as strings regardless of how the store types them.
pub fn value_key(value: &Value) -> Option<String> {
	match value {
		Value::String(text) => Some(text.clone()),
		Value::Number(number) => Some(number.to_string()),
		Value::Bool(flag) => Some(flag.to_string()),
		_ => None,
	}
}

pub fn field_identity(field: impl Into<String>) -> IdentityFn {
	let field = field.into();

	Arc::new(move |entity: &Entity| entity.identity(&field))
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RelatedEntity {
	pub entity: Entity,
	pub relationship_type: String,
	pub depth: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ResultContext {
	pub related: Vec<RelatedEntity>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub llm_reasoning: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SearchResult {
	pub entity: Entity,
	pub score: f64,
	pub score_breakdown: BTreeMap<String, f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub context: Option<ResultContext>,
}
impl SearchResult {
	pub fn new(entity: Entity, score: f64) -> Self {
		Self { entity, score: finite_or_zero(score), score_breakdown: BTreeMap::new(), context: None }
	}

	pub fn with_component(mut self, name: &str, value: f64) -> Self {
		self.record(name, value);

		self
	}

	pub fn set_score(&mut self, score: f64) {
		self.score = finite_or_zero(score);
	}

	/// Records a partial score. The breakdown is informational and never feeds back into `score`.
	pub fn record(&mut self, name: &str, value: f64) {
		self.score_breakdown.insert(name.to_string(), finite_or_zero(value));
	}

	pub fn related(&self) -> &[RelatedEntity] {
		self.context.as_ref().map(|ctx| ctx.related.as_slice()).unwrap_or_default()
	}

	pub fn context_mut(&mut self) -> &mut ResultContext {
		self.context.get_or_insert_with(ResultContext::default)
	}
}

//! Named vector indexes and the Qdrant-backed [`VectorSearch`] adapter.

use std::{collections::HashMap, sync::Arc};

use serde_json::{Map, Value};

use ragline_storage::qdrant::{PayloadCondition, PointQuery, QdrantStore};

use crate::{
	BoxFuture, EmbeddingProvider, Error, Result, VectorSearch,
	condition::{ConditionOp, ConditionSet, FieldCondition},
	entity::Entity,
};

/// Post-filtered searches over-fetch by this factor before truncating to `top_k`.
const OVERFETCH: usize = 4;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VectorIndexConfig {
	pub name: String,
	pub collection: String,
	pub entity_label: Option<String>,
	pub vector_name: Option<String>,
}
impl VectorIndexConfig {
	pub fn new(name: impl Into<String>, collection: impl Into<String>) -> Self {
		Self { name: name.into(), collection: collection.into(), entity_label: None, vector_name: None }
	}

	pub fn entity_label(mut self, label: impl Into<String>) -> Self {
		self.entity_label = Some(label.into());

		self
	}

	pub fn vector_name(mut self, name: impl Into<String>) -> Self {
		self.vector_name = Some(name.into());

		self
	}
}
impl From<&ragline_config::VectorIndex> for VectorIndexConfig {
	fn from(cfg: &ragline_config::VectorIndex) -> Self {
		Self {
			name: cfg.name.clone(),
			collection: cfg.collection.clone(),
			entity_label: cfg.entity_label.clone(),
			vector_name: cfg.vector_name.clone(),
		}
	}
}

#[derive(Clone, Debug, Default)]
pub struct VectorIndexRegistry {
	indexes: HashMap<String, VectorIndexConfig>,
}
impl VectorIndexRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn from_config(indexes: &[ragline_config::VectorIndex]) -> Self {
		let mut registry = Self::new();

		for index in indexes {
			registry.register(index.into());
		}

		registry
	}

	pub fn register(&mut self, index: VectorIndexConfig) {
		self.indexes.insert(index.name.clone(), index);
	}

	pub fn get(&self, name: &str) -> Option<&VectorIndexConfig> {
		self.indexes.get(name)
	}

	pub fn is_empty(&self) -> bool {
		self.indexes.is_empty()
	}

	/// `index_override` names a collection directly and bypasses the registry.
	pub fn resolve(&self, name: &str, index_override: Option<&str>) -> Result<VectorIndexConfig> {
		if let Some(collection) = index_override {
			if collection.trim().is_empty() {
				return Err(Error::configuration("Vector index override must not be empty."));
			}

			return Ok(match self.get(name) {
				Some(index) => VectorIndexConfig { collection: collection.to_string(), ..index.clone() },
				None => VectorIndexConfig::new(name, collection),
			});
		}

		self.get(name)
			.cloned()
			.ok_or_else(|| Error::configuration(format!("Vector index {name} is not registered.")))
	}
}

#[derive(Clone, Debug, PartialEq)]
pub struct VectorSearchRequest {
	pub index: VectorIndexConfig,
	pub top_k: usize,
	/// Similarity floor in [0, 1].
	pub min_score: Option<f64>,
	/// Restricts hits to entities whose identity is listed.
	pub filter_ids: Option<Vec<String>>,
	pub identity_field: String,
	pub conditions: Vec<FieldCondition>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VectorHit {
	pub properties: Map<String, Value>,
	pub score: f64,
}

/// Embeds the query text and searches a Qdrant collection whose payload mirrors entity
/// properties.
pub struct QdrantVectorSearch {
	store: QdrantStore,
	embedding: Arc<dyn EmbeddingProvider>,
}
impl QdrantVectorSearch {
	pub fn new(store: QdrantStore, embedding: Arc<dyn EmbeddingProvider>) -> Self {
		Self { store, embedding }
	}

	async fn search_inner(&self, query: &str, request: &VectorSearchRequest) -> Result<Vec<VectorHit>> {
		if request.top_k == 0 || request.filter_ids.as_ref().is_some_and(Vec::is_empty) {
			return Ok(Vec::new());
		}

		let vector = self
			.embedding
			.embed(&[query.to_string()])
			.await?
			.into_iter()
			.next()
			.ok_or_else(|| Error::provider("Embedding provider returned no vector for the query."))?;
		let point_query = build_point_query(vector, request)?;
		let residual = ConditionSet::compile(&residual_conditions(&request.conditions))?;
		let hits = self.store.query(&point_query.query).await?;
		let mut out: Vec<VectorHit> = hits
			.into_iter()
			.map(|hit| VectorHit { properties: hit.payload, score: f64::from(hit.score) })
			.filter(|hit| residual.matches(&Entity::new(Vec::new(), hit.properties.clone())))
			.collect();

		out.truncate(request.top_k);

		Ok(out)
	}
}
impl VectorSearch for QdrantVectorSearch {
	fn search<'a>(
		&'a self,
		query: &'a str,
		request: &'a VectorSearchRequest,
	) -> BoxFuture<'a, Result<Vec<VectorHit>>> {
		Box::pin(self.search_inner(query, request))
	}
}

pub struct PlannedPointQuery {
	pub query: PointQuery,
	/// Conditions left for in-process evaluation.
	pub residual: usize,
}

pub fn build_point_query(vector: Vec<f32>, request: &VectorSearchRequest) -> Result<PlannedPointQuery> {
	let mut conditions = Vec::new();
	let mut residual = 0;

	for condition in &request.conditions {
		condition.validate()?;

		match pushdown(condition) {
			Some(payload) => conditions.push(payload),
			None => residual += 1,
		}
	}

	if let Some(ids) = request.filter_ids.as_ref() {
		conditions.push(PayloadCondition::AnyKeyword {
			key: request.identity_field.clone(),
			values: ids.clone(),
		});
	}

	let limit = if residual == 0 { request.top_k } else { request.top_k.saturating_mul(OVERFETCH) };

	Ok(PlannedPointQuery {
		query: PointQuery {
			collection: request.index.collection.clone(),
			vector,
			vector_name: request.index.vector_name.clone(),
			limit: limit as u64,
			score_threshold: request.min_score.map(|score| score as f32),
			conditions,
		},
		residual,
	})
}

fn residual_conditions(conditions: &[FieldCondition]) -> Vec<FieldCondition> {
	conditions.iter().filter(|condition| pushdown(condition).is_none()).cloned().collect()
}

fn pushdown(condition: &FieldCondition) -> Option<PayloadCondition> {
	let key = condition.field.clone();
	let value = &condition.value;

	match condition.op {
		ConditionOp::Eq => match value {
			Value::String(text) => Some(PayloadCondition::Keyword { key, value: text.clone() }),
			Value::Bool(flag) => Some(PayloadCondition::Flag { key, value: *flag }),
			Value::Number(number) =>
				number.as_i64().map(|value| PayloadCondition::Integer { key, value }),
			_ => None,
		},
		ConditionOp::In => value
			.as_array()?
			.iter()
			.map(|candidate| candidate.as_str().map(str::to_string))
			.collect::<Option<Vec<_>>>()
			.map(|values| PayloadCondition::AnyKeyword { key, values }),
		ConditionOp::Gt | ConditionOp::Gte | ConditionOp::Lt | ConditionOp::Lte => {
			let bound = value.as_f64()?;
			let (mut gt, mut gte, mut lt, mut lte) = (None, None, None, None);

			match condition.op {
				ConditionOp::Gt => gt = Some(bound),
				ConditionOp::Gte => gte = Some(bound),
				ConditionOp::Lt => lt = Some(bound),
				_ => lte = Some(bound),
			}

			Some(PayloadCondition::Range { key, gt, gte, lt, lte })
		},
		_ => None,
	}
}

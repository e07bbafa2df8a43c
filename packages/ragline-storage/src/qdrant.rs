use std::collections::HashMap;

use qdrant_client::qdrant::{
	Condition, Filter, PointId, Query, QueryPointsBuilder, Range, ScoredPoint, Value,
	point_id::PointIdOptions, value::Kind,
};
use serde_json::{Map, Number};

use crate::Result;

/// Payload predicate that Qdrant can evaluate server side.
#[derive(Clone, Debug, PartialEq)]
pub enum PayloadCondition {
	Keyword { key: String, value: String },
	Integer { key: String, value: i64 },
	Flag { key: String, value: bool },
	AnyKeyword { key: String, values: Vec<String> },
	Range { key: String, gt: Option<f64>, gte: Option<f64>, lt: Option<f64>, lte: Option<f64> },
}
impl PayloadCondition {
	fn to_condition(&self) -> Condition {
		match self {
			Self::Keyword { key, value } => Condition::matches(key.as_str(), value.clone()),
			Self::Integer { key, value } => Condition::matches(key.as_str(), *value),
			Self::Flag { key, value } => Condition::matches(key.as_str(), *value),
			Self::AnyKeyword { key, values } => Condition::matches(key.as_str(), values.clone()),
			Self::Range { key, gt, gte, lt, lte } =>
				Condition::range(key.as_str(), Range { gt: *gt, gte: *gte, lt: *lt, lte: *lte }),
		}
	}
}

#[derive(Clone, Debug)]
pub struct PointQuery {
	pub collection: String,
	pub vector: Vec<f32>,
	pub vector_name: Option<String>,
	pub limit: u64,
	pub score_threshold: Option<f32>,
	pub conditions: Vec<PayloadCondition>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PointHit {
	pub id: Option<String>,
	pub score: f32,
	pub payload: Map<String, serde_json::Value>,
}

pub struct QdrantStore {
	pub client: qdrant_client::Qdrant,
}
impl QdrantStore {
	pub fn new(cfg: &ragline_config::Qdrant) -> Result<Self> {
		let client = qdrant_client::Qdrant::from_url(&cfg.url).build()?;

		Ok(Self { client })
	}

	pub async fn query(&self, query: &PointQuery) -> Result<Vec<PointHit>> {
		let response = self.client.query(build_request(query)).await?;

		Ok(response.result.into_iter().map(point_hit).collect())
	}
}

pub fn build_request(query: &PointQuery) -> QueryPointsBuilder {
	let mut builder = QueryPointsBuilder::new(query.collection.clone())
		.query(Query::new_nearest(query.vector.clone()))
		.limit(query.limit)
		.with_payload(true);

	if let Some(name) = query.vector_name.as_ref() {
		builder = builder.using(name.clone());
	}
	if let Some(threshold) = query.score_threshold {
		builder = builder.score_threshold(threshold);
	}
	if !query.conditions.is_empty() {
		builder = builder
			.filter(Filter::must(query.conditions.iter().map(PayloadCondition::to_condition)));
	}

	builder
}

fn point_hit(point: ScoredPoint) -> PointHit {
	PointHit {
		id: point.id.as_ref().and_then(point_id_to_string),
		score: point.score,
		payload: payload_to_json(point.payload),
	}
}

fn point_id_to_string(point_id: &PointId) -> Option<String> {
	match &point_id.point_id_options {
		Some(PointIdOptions::Uuid(id)) => Some(id.clone()),
		Some(PointIdOptions::Num(num)) => Some(num.to_string()),
		None => None,
	}
}

pub fn payload_to_json(payload: HashMap<String, Value>) -> Map<String, serde_json::Value> {
	payload.into_iter().map(|(key, value)| (key, value_to_json(value))).collect()
}

fn value_to_json(value: Value) -> serde_json::Value {
	match value.kind {
		None | Some(Kind::NullValue(_)) => serde_json::Value::Null,
		Some(Kind::BoolValue(v)) => serde_json::Value::Bool(v),
		Some(Kind::IntegerValue(v)) => serde_json::Value::from(v),
		Some(Kind::DoubleValue(v)) =>
			Number::from_f64(v).map(serde_json::Value::Number).unwrap_or(serde_json::Value::Null),
		Some(Kind::StringValue(v)) => serde_json::Value::String(v),
		Some(Kind::ListValue(list)) =>
			serde_json::Value::Array(list.values.into_iter().map(value_to_json).collect()),
		Some(Kind::StructValue(st)) => serde_json::Value::Object(payload_to_json(st.fields)),
	}
}

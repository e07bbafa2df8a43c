use std::{
	collections::HashMap,
	sync::{
		Mutex,
		atomic::{AtomicUsize, Ordering},
	},
};

use serde_json::{Map, Value};

use ragline_pipeline::{
	BoxFuture, Entity, Result as PipelineResult, VectorHit, VectorSearch, VectorSearchRequest,
	condition::ConditionSet, scoring::cmp_f64_desc,
};

/// Vector index with scripted similarities: each query text maps entity identities to scores.
/// Documents without a score for the query never appear as hits.
pub struct ScriptedVectorSearch {
	documents: Vec<Map<String, Value>>,
	scores: HashMap<String, HashMap<String, f64>>,
	failure: Option<String>,
	calls: AtomicUsize,
	requests: Mutex<Vec<VectorSearchRequest>>,
}
impl ScriptedVectorSearch {
	pub fn new() -> Self {
		Self {
			documents: Vec::new(),
			scores: HashMap::new(),
			failure: None,
			calls: AtomicUsize::new(0),
			requests: Mutex::new(Vec::new()),
		}
	}

	pub fn document(mut self, properties: Value) -> Self {
		if let Value::Object(map) = properties {
			self.documents.push(map);
		}

		self
	}

	pub fn scores<I, S>(mut self, query: impl Into<String>, scores: I) -> Self
	where
		I: IntoIterator<Item = (S, f64)>,
		S: Into<String>,
	{
		self.scores
			.entry(query.into())
			.or_default()
			.extend(scores.into_iter().map(|(id, score)| (id.into(), score)));

		self
	}

	pub fn failing(mut self, message: impl Into<String>) -> Self {
		self.failure = Some(message.into());

		self
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}

	pub fn requests(&self) -> Vec<VectorSearchRequest> {
		self.requests.lock().map(|requests| requests.clone()).unwrap_or_default()
	}
}
impl Default for ScriptedVectorSearch {
	fn default() -> Self {
		Self::new()
	}
}
impl VectorSearch for ScriptedVectorSearch {
	fn search<'a>(
		&'a self,
		query: &'a str,
		request: &'a VectorSearchRequest,
	) -> BoxFuture<'a, PipelineResult<Vec<VectorHit>>> {
		Box::pin(async move {
			self.calls.fetch_add(1, Ordering::SeqCst);

			if let Ok(mut requests) = self.requests.lock() {
				requests.push(request.clone());
			}

			if let Some(message) = &self.failure {
				return Err(ragline_pipeline::Error::provider(message.clone()));
			}

			let set = ConditionSet::compile(&request.conditions)?;
			let Some(table) = self.scores.get(query) else {
				return Ok(Vec::new());
			};
			let mut hits = self
				.documents
				.iter()
				.filter_map(|properties| {
					let entity = Entity::new(Vec::new(), properties.clone());
					let id = entity.identity(&request.identity_field)?;
					let score = *table.get(&id)?;

					if let Some(filter_ids) = &request.filter_ids
						&& !filter_ids.contains(&id)
					{
						return None;
					}
					if request.min_score.is_some_and(|min| score < min) || !set.matches(&entity) {
						return None;
					}

					Some((id, VectorHit { properties: properties.clone(), score }))
				})
				.collect::<Vec<_>>();

			hits.sort_by(|(a_id, a), (b_id, b)| cmp_f64_desc(a.score, b.score).then(a_id.cmp(b_id)));
			hits.truncate(request.top_k);

			Ok(hits.into_iter().map(|(_, hit)| hit).collect())
		})
	}
}

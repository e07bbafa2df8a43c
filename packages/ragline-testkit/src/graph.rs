use std::{
	collections::{BTreeMap, HashSet, VecDeque},
	sync::Mutex,
};

use serde_json::{Map, Value};

use ragline_pipeline::{
	BoxFuture, CompiledQuery, Direction, Entity, GraphQuery, GraphStore, Record,
	RelationshipCondition, Result as PipelineResult,
	condition::ConditionSet,
	cypher::{COL_DEPTH, COL_ENTITY, COL_ID, COL_LABELS, COL_RELATED, COL_RELATED_LABELS, COL_TOTAL},
	entity::value_key,
};

use crate::{Error, Result};

#[derive(Clone, Debug)]
struct Edge {
	from: usize,
	to: usize,
	relationship: String,
}

/// In-process property graph that evaluates [`GraphQuery`] plans directly and logs every query
/// it receives.
pub struct MemoryGraph {
	identity_field: String,
	nodes: Vec<Entity>,
	edges: Vec<Edge>,
	log: Mutex<Vec<CompiledQuery>>,
	failure: Option<String>,
}
impl MemoryGraph {
	pub fn new(identity_field: impl Into<String>) -> Self {
		Self {
			identity_field: identity_field.into(),
			nodes: Vec::new(),
			edges: Vec::new(),
			log: Mutex::new(Vec::new()),
			failure: None,
		}
	}

	/// Loads `{"nodes": [{"labels": [..], "properties": {..}}], "edges": [{"from", "to", "type"}]}`.
	pub fn from_fixture(identity_field: impl Into<String>, fixture: &Value) -> Result<Self> {
		let mut graph = Self::new(identity_field);
		let nodes = fixture
			.get("nodes")
			.and_then(Value::as_array)
			.ok_or_else(|| Error::Message("Fixture is missing its nodes array.".to_string()))?;

		for node in nodes {
			let entity: Entity = serde_json::from_value(node.clone())?;

			graph.nodes.push(entity);
		}

		for edge in fixture.get("edges").and_then(Value::as_array).into_iter().flatten() {
			let field = |name: &str| {
				edge.get(name).and_then(value_key).ok_or_else(|| {
					Error::Message(format!("Fixture edge is missing its {name} field."))
				})
			};
			let (from, relationship, to) = (field("from")?, field("type")?, field("to")?);

			graph = graph.try_edge(&from, &relationship, &to)?;
		}

		Ok(graph)
	}

	pub fn node(mut self, labels: &[&str], properties: Value) -> Self {
		let properties = match properties {
			Value::Object(map) => map,
			_ => Map::new(),
		};

		self.nodes.push(Entity::new(labels.iter().map(|l| l.to_string()).collect(), properties));

		self
	}

	/// Panics when either endpoint is unknown; use [`MemoryGraph::from_fixture`] for fallible loads.
	pub fn edge(self, from: &str, relationship: &str, to: &str) -> Self {
		match self.try_edge(from, relationship, to) {
			Ok(graph) => graph,
			Err(err) => panic!("{err}"),
		}
	}

	/// Every later query fails with a storage error.
	pub fn failing(mut self, message: impl Into<String>) -> Self {
		self.failure = Some(message.into());

		self
	}

	pub fn queries(&self) -> Vec<CompiledQuery> {
		self.log.lock().map(|log| log.clone()).unwrap_or_default()
	}

	pub fn round_trips(&self) -> usize {
		self.log.lock().map(|log| log.len()).unwrap_or_default()
	}

	pub fn reset_log(&self) {
		if let Ok(mut log) = self.log.lock() {
			log.clear();
		}
	}

	fn try_edge(mut self, from: &str, relationship: &str, to: &str) -> Result<Self> {
		let from = self.position(from)?;
		let to = self.position(to)?;

		self.edges.push(Edge { from, to, relationship: relationship.to_string() });

		Ok(self)
	}

	fn position(&self, id: &str) -> Result<usize> {
		self.nodes
			.iter()
			.position(|node| node.identity(&self.identity_field).as_deref() == Some(id))
			.ok_or_else(|| Error::Message(format!("Unknown node {id:?}.")))
	}

	fn identity_of(&self, index: usize, field: &str) -> String {
		self.nodes[index].identity(field).unwrap_or_default()
	}

	fn evaluate(&self, plan: &GraphQuery) -> PipelineResult<Vec<Record>> {
		match plan {
			GraphQuery::Scan { label, conditions } => {
				let set = ConditionSet::compile(conditions)?;
				let matched = (0..self.nodes.len())
					.filter(|&i| self.nodes[i].has_label(label) && set.matches(&self.nodes[i]))
					.collect::<Vec<_>>();

				Ok(self.entity_rows(&matched))
			},
			GraphQuery::Lookup { label, identity_field, ids, conditions } => {
				let set = ConditionSet::compile(conditions)?;
				let wanted = ids.iter().map(String::as_str).collect::<HashSet<_>>();
				let mut matched = (0..self.nodes.len())
					.filter(|&i| {
						let node = &self.nodes[i];

						node.has_label(label)
							&& node.identity(identity_field).is_some_and(|id| wanted.contains(id.as_str()))
							&& set.matches(node)
					})
					.collect::<Vec<_>>();

				matched.sort_by_key(|&i| self.identity_of(i, identity_field));

				Ok(self.entity_rows(&matched))
			},
			GraphQuery::Related { label, identity_field, anchor_id, relationship, direction, conditions } => {
				let set = ConditionSet::compile(conditions)?;
				let anchors = (0..self.nodes.len())
					.filter(|&i| self.nodes[i].identity(identity_field).as_deref() == Some(anchor_id))
					.collect::<Vec<_>>();
				let mut matched = anchors
					.iter()
					.flat_map(|&anchor| self.neighbours(anchor, relationship, *direction))
					.filter(|&i| self.nodes[i].has_label(label) && set.matches(&self.nodes[i]))
					.collect::<Vec<_>>();

				matched.sort_by_key(|&i| self.identity_of(i, identity_field));
				matched.dedup();

				Ok(self.entity_rows(&matched))
			},
			GraphQuery::Expand { label, identity_field, ids, relationship, direction, depth, conditions } => {
				let set = ConditionSet::compile(conditions)?;
				let wanted = ids.iter().map(String::as_str).collect::<HashSet<_>>();
				let mut origins = (0..self.nodes.len())
					.filter(|&i| {
						let node = &self.nodes[i];

						node.has_label(label)
							&& node.identity(identity_field).is_some_and(|id| wanted.contains(id.as_str()))
							&& set.matches(node)
					})
					.collect::<Vec<_>>();

				origins.sort_by_key(|&i| self.identity_of(i, identity_field));

				Ok(self.expand_rows(&origins, identity_field, relationship, *direction, *depth))
			},
			GraphQuery::RelationshipMatch { label, identity_field, ids, relationship } =>
				self.relationship_rows(label, identity_field, ids, relationship),
			GraphQuery::Count(inner) => {
				let total = self.evaluate(inner)?.len();

				Ok(vec![Record::new(vec![COL_TOTAL.to_string()], vec![Value::from(total)])])
			},
		}
	}

	fn entity_rows(&self, matched: &[usize]) -> Vec<Record> {
		matched
			.iter()
			.map(|&i| {
				let node = &self.nodes[i];

				Record::new(
					vec![COL_ENTITY.to_string(), COL_LABELS.to_string()],
					vec![Value::Object(node.properties.clone()), labels_value(node)],
				)
			})
			.collect()
	}

	fn expand_rows(
		&self,
		origins: &[usize],
		identity_field: &str,
		relationship: &str,
		direction: Direction,
		depth: u32,
	) -> Vec<Record> {
		let columns = vec![
			COL_ID.to_string(),
			COL_RELATED.to_string(),
			COL_RELATED_LABELS.to_string(),
			COL_DEPTH.to_string(),
		];
		let mut rows = Vec::new();

		for &origin in origins {
			let id = Value::String(self.identity_of(origin, identity_field));
			let mut reached = BTreeMap::new();
			let mut queue = VecDeque::from([(origin, 0_u32)]);
			let mut visited = HashSet::from([origin]);

			while let Some((current, hops)) = queue.pop_front() {
				if hops == depth {
					continue;
				}

				for next in self.neighbours(current, relationship, direction) {
					if visited.insert(next) {
						reached.insert(next, hops + 1);
						queue.push_back((next, hops + 1));
					}
				}
			}

			if reached.is_empty() {
				rows.push(Record::new(
					columns.clone(),
					vec![id, Value::Null, Value::Null, Value::Null],
				));

				continue;
			}

			let mut reached = reached.into_iter().collect::<Vec<_>>();

			reached.sort_by_key(|&(i, hops)| (hops, self.identity_of(i, identity_field)));

			for (i, hops) in reached {
				let node = &self.nodes[i];

				rows.push(Record::new(
					columns.clone(),
					vec![
						id.clone(),
						Value::Object(node.properties.clone()),
						labels_value(node),
						Value::from(hops),
					],
				));
			}
		}

		rows
	}

	fn relationship_rows(
		&self,
		label: &str,
		identity_field: &str,
		ids: &[String],
		relationship: &RelationshipCondition,
	) -> PipelineResult<Vec<Record>> {
		let target_set = ConditionSet::compile(&relationship.target_conditions)?;
		let wanted = ids.iter().map(String::as_str).collect::<HashSet<_>>();
		let mut matched = (0..self.nodes.len())
			.filter(|&i| {
				let node = &self.nodes[i];

				node.has_label(label)
					&& node.identity(identity_field).is_some_and(|id| wanted.contains(id.as_str()))
			})
			.filter(|&i| {
				self.neighbours(i, &relationship.relationship, relationship.direction).into_iter().any(
					|t| {
						let target = &self.nodes[t];

						relationship.target_label.as_deref().is_none_or(|l| target.has_label(l))
							&& target_set.matches(target)
					},
				)
			})
			.map(|i| self.identity_of(i, identity_field))
			.collect::<Vec<_>>();

		matched.sort();
		matched.dedup();

		Ok(matched
			.into_iter()
			.map(|id| Record::new(vec![COL_ID.to_string()], vec![Value::String(id)]))
			.collect())
	}

	fn neighbours(&self, node: usize, relationship: &str, direction: Direction) -> Vec<usize> {
		self.edges
			.iter()
			.filter(|edge| edge.relationship == relationship)
			.filter_map(|edge| match direction {
				Direction::Outgoing => (edge.from == node).then_some(edge.to),
				Direction::Incoming => (edge.to == node).then_some(edge.from),
				Direction::Both =>
					if edge.from == node {
						Some(edge.to)
					} else if edge.to == node {
						Some(edge.from)
					} else {
						None
					},
			})
			.filter(|&other| other != node)
			.collect()
	}
}
impl GraphStore for MemoryGraph {
	fn run<'a>(&'a self, query: &'a CompiledQuery) -> BoxFuture<'a, PipelineResult<Vec<Record>>> {
		Box::pin(async move {
			if let Ok(mut log) = self.log.lock() {
				log.push(query.clone());
			}

			if let Some(message) = &self.failure {
				return Err(ragline_pipeline::Error::storage(message.clone()));
			}

			self.evaluate(&query.plan)
		})
	}
}

fn labels_value(node: &Entity) -> Value {
	Value::Array(node.labels.iter().cloned().map(Value::String).collect())
}

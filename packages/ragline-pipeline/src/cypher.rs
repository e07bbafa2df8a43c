//! Compilation of graph plans into parameterised Cypher.
//!
//! Every [`GraphQuery`] compiles to one read-only statement. Stores that understand Cypher run
//! `text`/`params`; in-process stores evaluate `plan` directly. Result columns are fixed per plan
//! shape, see the `COL_*` constants.

use serde_json::{Map, Value};

use crate::condition::{ConditionOp, Direction, FieldCondition, RelationshipCondition};

pub const COL_ENTITY: &str = "entity";
pub const COL_LABELS: &str = "labels";
pub const COL_ID: &str = "id";
pub const COL_RELATED: &str = "related";
pub const COL_RELATED_LABELS: &str = "related_labels";
pub const COL_DEPTH: &str = "depth";
pub const COL_TOTAL: &str = "total";

#[derive(Clone, Debug, PartialEq)]
pub enum GraphQuery {
	/// Label scan. Columns: `entity`, `labels`.
	Scan { label: String, conditions: Vec<FieldCondition> },
	/// Identity-list lookup. Columns: `entity`, `labels`.
	Lookup { label: String, identity_field: String, ids: Vec<String>, conditions: Vec<FieldCondition> },
	/// One hop from an anchor entity. Columns: `entity`, `labels`.
	Related {
		label: String,
		identity_field: String,
		anchor_id: String,
		relationship: String,
		direction: Direction,
		conditions: Vec<FieldCondition>,
	},
	/// Variable-length traversal from held entities. Columns: `id`, `related`, `related_labels`,
	/// `depth`; one row per (origin, neighbour), or a single row with null neighbour columns.
	Expand {
		label: String,
		identity_field: String,
		ids: Vec<String>,
		relationship: String,
		direction: Direction,
		depth: u32,
		conditions: Vec<FieldCondition>,
	},
	/// Held entities with a neighbour satisfying `relationship`. Columns: `id`.
	RelationshipMatch {
		label: String,
		identity_field: String,
		ids: Vec<String>,
		relationship: RelationshipCondition,
	},
	/// Row count of a Scan, Lookup or Related plan. Columns: `total`.
	Count(Box<GraphQuery>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompiledQuery {
	pub text: String,
	pub params: Map<String, Value>,
	pub plan: GraphQuery,
}

pub fn compile(plan: GraphQuery) -> CompiledQuery {
	let mut params = Params::default();
	let text = render(&plan, &mut params);

	CompiledQuery { text, params: params.into_map(), plan }
}

fn render(plan: &GraphQuery, params: &mut Params) -> String {
	match plan {
		GraphQuery::Scan { .. } | GraphQuery::Lookup { .. } | GraphQuery::Related { .. } => {
			let head = entity_match(plan, params).unwrap_or_default();
			let distinct = if matches!(plan, GraphQuery::Related { .. }) { "DISTINCT " } else { "" };

			format!("{head} RETURN {distinct}n AS {COL_ENTITY}, labels(n) AS {COL_LABELS}")
				+ &order_by_entity(plan)
		},
		GraphQuery::Expand { label, identity_field, ids, relationship, direction, depth, conditions } => {
			let id = quote(identity_field);
			let ids_clause = format!("n.{id} IN {}", params.bind(ids_value(ids)));

			format!(
				"MATCH (n:{}){} OPTIONAL MATCH p = (n){}(m) WHERE m <> n \
				 WITH n, m, min(length(p)) AS {COL_DEPTH} \
				 RETURN n.{id} AS {COL_ID}, m AS {COL_RELATED}, labels(m) AS {COL_RELATED_LABELS}, {COL_DEPTH} \
				 ORDER BY {COL_ID}, {COL_DEPTH}, {COL_RELATED}.{id}",
				quote(label),
				where_clause(vec![ids_clause], "n", conditions, params),
				arrow(relationship, direction, &format!("*1..{depth}")),
			)
		},
		GraphQuery::RelationshipMatch { label, identity_field, ids, relationship } => {
			let id = quote(identity_field);
			let ids_clause = format!("n.{id} IN {}", params.bind(ids_value(ids)));
			let target = match relationship.target_label.as_deref() {
				Some(target_label) => format!("t:{}", quote(target_label)),
				None => "t".to_string(),
			};
			let mut clauses = vec![ids_clause];

			clauses.extend(
				relationship.target_conditions.iter().map(|c| predicate("t", c, params)),
			);

			format!(
				"MATCH (n:{}){}({target}){} RETURN DISTINCT n.{id} AS {COL_ID} ORDER BY {COL_ID}",
				quote(label),
				arrow(&relationship.relationship, &relationship.direction, ""),
				where_clause(clauses, "n", &[], params),
			)
		},
		GraphQuery::Count(inner) => match entity_match(inner, params) {
			Some(head) => {
				let distinct = matches!(**inner, GraphQuery::Related { .. });

				format!(
					"{head} RETURN count({}n) AS {COL_TOTAL}",
					if distinct { "DISTINCT " } else { "" }
				)
			},
			None => format!("CALL {{ {} }} RETURN count(*) AS {COL_TOTAL}", render(inner, params)),
		},
	}
}

/// `MATCH .. WHERE ..` head binding `n` for the entity-returning plans.
fn entity_match(plan: &GraphQuery, params: &mut Params) -> Option<String> {
	Some(match plan {
		GraphQuery::Scan { label, conditions } =>
			format!("MATCH (n:{}){}", quote(label), where_clause(vec![], "n", conditions, params)),
		GraphQuery::Lookup { label, identity_field, ids, conditions } => {
			let ids_clause = format!("n.{} IN {}", quote(identity_field), params.bind(ids_value(ids)));

			format!("MATCH (n:{}){}", quote(label), where_clause(vec![ids_clause], "n", conditions, params))
		},
		GraphQuery::Related { label, identity_field, anchor_id, relationship, direction, conditions } => {
			let anchor = params.bind(Value::String(anchor_id.clone()));

			format!(
				"MATCH (a {{{}: {anchor}}}){}(n:{}){}",
				quote(identity_field),
				arrow(relationship, direction, ""),
				quote(label),
				where_clause(vec![], "n", conditions, params),
			)
		},
		_ => return None,
	})
}

fn order_by_entity(plan: &GraphQuery) -> String {
	let identity_field = match plan {
		GraphQuery::Lookup { identity_field, .. } | GraphQuery::Related { identity_field, .. } =>
			identity_field.as_str(),
		_ => return String::new(),
	};

	format!(" ORDER BY {COL_ENTITY}.{}", quote(identity_field))
}

fn where_clause(
	mut clauses: Vec<String>,
	var: &str,
	conditions: &[FieldCondition],
	params: &mut Params,
) -> String {
	clauses.extend(conditions.iter().map(|c| predicate(var, c, params)));

	if clauses.is_empty() { String::new() } else { format!(" WHERE {}", clauses.join(" AND ")) }
}

fn predicate(var: &str, condition: &FieldCondition, params: &mut Params) -> String {
	let field = format!("{var}.{}", quote(&condition.field));
	let param = params.bind(condition.value.clone());
	let op = match condition.op {
		ConditionOp::Eq => "=",
		ConditionOp::Neq => "<>",
		ConditionOp::Contains => "CONTAINS",
		ConditionOp::StartsWith => "STARTS WITH",
		ConditionOp::EndsWith => "ENDS WITH",
		ConditionOp::Gt => ">",
		ConditionOp::Gte => ">=",
		ConditionOp::Lt => "<",
		ConditionOp::Lte => "<=",
		ConditionOp::In => "IN",
		ConditionOp::Regex => "=~",
	};

	format!("{field} {op} {param}")
}

fn arrow(relationship: &str, direction: &Direction, range: &str) -> String {
	let rel = format!("[:{}{range}]", quote(relationship));

	match direction {
		Direction::Outgoing => format!("-{rel}->"),
		Direction::Incoming => format!("<-{rel}-"),
		Direction::Both => format!("-{rel}-"),
	}
}

fn ids_value(ids: &[String]) -> Value {
	Value::Array(ids.iter().cloned().map(Value::String).collect())
}

pub fn quote(identifier: &str) -> String {
	format!("`{}`", identifier.replace('`', "``"))
}

#[derive(Default)]
struct Params {
	values: Map<String, Value>,
}
impl Params {
	fn bind(&mut self, value: Value) -> String {
		let name = format!("p{}", self.values.len());

		self.values.insert(name.clone(), value);

		format!("${name}")
	}

	fn into_map(self) -> Map<String, Value> {
		self.values
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn scan_binds_each_condition() {
		let compiled = compile(GraphQuery::Scan {
			label: "Function".to_string(),
			conditions: vec![
				FieldCondition::eq("type", "function"),
				FieldCondition::starts_with("name", "create"),
			],
		});

		assert_eq!(
			compiled.text,
			"MATCH (n:`Function`) WHERE n.`type` = $p0 AND n.`name` STARTS WITH $p1 \
			 RETURN n AS entity, labels(n) AS labels"
		);
		assert_eq!(compiled.params.get("p0"), Some(&Value::from("function")));
		assert_eq!(compiled.params.get("p1"), Some(&Value::from("create")));
	}

	#[test]
	fn expand_uses_variable_length_pattern() {
		let compiled = compile(GraphQuery::Expand {
			label: "Scope".to_string(),
			identity_field: "uuid".to_string(),
			ids: vec!["a".to_string()],
			relationship: "CALLS".to_string(),
			direction: Direction::Incoming,
			depth: 2,
			conditions: vec![],
		});

		assert!(compiled.text.contains("OPTIONAL MATCH p = (n)<-[:`CALLS`*1..2]-(m)"));
		assert!(compiled.text.contains("WHERE n.`uuid` IN $p0"));
	}

	#[test]
	fn count_reuses_match_and_where() {
		let compiled = compile(GraphQuery::Count(Box::new(GraphQuery::Lookup {
			label: "Scope".to_string(),
			identity_field: "uuid".to_string(),
			ids: vec!["a".to_string(), "b".to_string()],
			conditions: vec![FieldCondition::gt("lines", 3)],
		})));

		assert_eq!(
			compiled.text,
			"MATCH (n:`Scope`) WHERE n.`uuid` IN $p0 AND n.`lines` > $p1 RETURN count(n) AS total"
		);
	}

	#[test]
	fn count_keeps_field_names_that_look_like_clauses() {
		let compiled = compile(GraphQuery::Count(Box::new(GraphQuery::Scan {
			label: "Scope".to_string(),
			conditions: vec![FieldCondition::eq("a RETURN b", "x")],
		})));

		assert_eq!(
			compiled.text,
			"MATCH (n:`Scope`) WHERE n.`a RETURN b` = $p0 RETURN count(n) AS total"
		);
		assert_eq!(compiled.params.len(), 1);
	}

	#[test]
	fn identifiers_are_escaped() {
		assert_eq!(quote("we`ird"), "`we``ird`");
	}
}

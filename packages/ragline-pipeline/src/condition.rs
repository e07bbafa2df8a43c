use std::cmp::Ordering;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result, entity::Entity, scoring::compare_values};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOp {
	Eq,
	Neq,
	Contains,
	StartsWith,
	EndsWith,
	Gt,
	Gte,
	Lt,
	Lte,
	In,
	Regex,
}
impl ConditionOp {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Eq => "eq",
			Self::Neq => "neq",
			Self::Contains => "contains",
			Self::StartsWith => "starts_with",
			Self::EndsWith => "ends_with",
			Self::Gt => "gt",
			Self::Gte => "gte",
			Self::Lt => "lt",
			Self::Lte => "lte",
			Self::In => "in",
			Self::Regex => "regex",
		}
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldCondition {
	pub field: String,
	pub op: ConditionOp,
	pub value: Value,
}
impl FieldCondition {
	pub fn new(field: impl Into<String>, op: ConditionOp, value: impl Into<Value>) -> Self {
		Self { field: field.into(), op, value: value.into() }
	}

	pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
		Self::new(field, ConditionOp::Eq, value)
	}

	pub fn neq(field: impl Into<String>, value: impl Into<Value>) -> Self {
		Self::new(field, ConditionOp::Neq, value)
	}

	pub fn contains(field: impl Into<String>, value: impl Into<String>) -> Self {
		Self::new(field, ConditionOp::Contains, value.into())
	}

	pub fn starts_with(field: impl Into<String>, value: impl Into<String>) -> Self {
		Self::new(field, ConditionOp::StartsWith, value.into())
	}

	pub fn ends_with(field: impl Into<String>, value: impl Into<String>) -> Self {
		Self::new(field, ConditionOp::EndsWith, value.into())
	}

	pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
		Self::new(field, ConditionOp::Gt, value)
	}

	pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
		Self::new(field, ConditionOp::Gte, value)
	}

	pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
		Self::new(field, ConditionOp::Lt, value)
	}

	pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
		Self::new(field, ConditionOp::Lte, value)
	}

	pub fn one_of<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
		Self::new(field, ConditionOp::In, Value::Array(values.into_iter().map(Into::into).collect()))
	}

	/// Full-match regular expression, the same semantics as Cypher's `=~`.
	pub fn regex(field: impl Into<String>, pattern: impl Into<String>) -> Self {
		Self::new(field, ConditionOp::Regex, pattern.into())
	}

	pub fn validate(&self) -> Result<()> {
		validate_field_name(&self.field)?;

		let ok = match self.op {
			ConditionOp::Eq | ConditionOp::Neq => !self.value.is_null(),
			ConditionOp::Contains | ConditionOp::StartsWith | ConditionOp::EndsWith =>
				self.value.is_string(),
			ConditionOp::Gt | ConditionOp::Gte | ConditionOp::Lt | ConditionOp::Lte =>
				self.value.is_number() || self.value.is_string(),
			ConditionOp::In => self.value.is_array(),
			ConditionOp::Regex => match self.value.as_str() {
				Some(pattern) => {
					anchored(pattern)?;

					true
				},
				None => false,
			},
		};

		if !ok {
			return Err(Error::invalid_request(format!(
				"Condition {} on field {} has an unsupported value {}.",
				self.op.as_str(),
				self.field,
				self.value
			)));
		}

		Ok(())
	}
}

pub(crate) fn validate_field_name(field: &str) -> Result<()> {
	if field.trim().is_empty() {
		return Err(Error::invalid_request("Field names must be non-empty."));
	}
	if field.contains('`') {
		return Err(Error::invalid_request(format!("Field name {field} must not contain backticks.")));
	}

	Ok(())
}

fn anchored(pattern: &str) -> Result<Regex> {
	Regex::new(&format!("^(?:{pattern})$"))
		.map_err(|err| Error::invalid_request(format!("Invalid regex {pattern:?}: {err}")))
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
	#[default]
	Outgoing,
	Incoming,
	Both,
}

/// Keeps entities with at least one neighbour over `relationship` that satisfies the target
/// constraints. Always evaluated by its own traversal query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelationshipCondition {
	pub relationship: String,
	#[serde(default)]
	pub direction: Direction,
	#[serde(default)]
	pub target_label: Option<String>,
	#[serde(default)]
	pub target_conditions: Vec<FieldCondition>,
}
impl RelationshipCondition {
	pub fn new(relationship: impl Into<String>, direction: Direction) -> Self {
		Self {
			relationship: relationship.into(),
			direction,
			target_label: None,
			target_conditions: Vec::new(),
		}
	}

	pub fn target_label(mut self, label: impl Into<String>) -> Self {
		self.target_label = Some(label.into());

		self
	}

	pub fn target_where(mut self, condition: FieldCondition) -> Self {
		self.target_conditions.push(condition);

		self
	}

	pub fn validate(&self) -> Result<()> {
		validate_field_name(&self.relationship)?;

		if let Some(label) = self.target_label.as_deref() {
			validate_field_name(label)?;
		}

		self.target_conditions.iter().try_for_each(FieldCondition::validate)
	}
}

/// Field conditions compiled for in-memory evaluation. A missing or null property never
/// matches, whatever the operator.
#[derive(Clone, Debug, Default)]
pub struct ConditionSet {
	compiled: Vec<(FieldCondition, Option<Regex>)>,
}
impl ConditionSet {
	pub fn compile(conditions: &[FieldCondition]) -> Result<Self> {
		let mut compiled = Vec::with_capacity(conditions.len());

		for condition in conditions {
			condition.validate()?;

			let regex = match (condition.op, condition.value.as_str()) {
				(ConditionOp::Regex, Some(pattern)) => Some(anchored(pattern)?),
				_ => None,
			};

			compiled.push((condition.clone(), regex));
		}

		Ok(Self { compiled })
	}

	pub fn is_empty(&self) -> bool {
		self.compiled.is_empty()
	}

	pub fn matches(&self, entity: &Entity) -> bool {
		self.compiled.iter().all(|(condition, regex)| {
			entity
				.get(&condition.field)
				.map(|actual| matches_value(condition, regex.as_ref(), actual))
				.unwrap_or(false)
		})
	}
}

fn matches_value(condition: &FieldCondition, regex: Option<&Regex>, actual: &Value) -> bool {
	let expected = &condition.value;

	match condition.op {
		ConditionOp::Eq => values_equal(actual, expected),
		ConditionOp::Neq => !values_equal(actual, expected),
		ConditionOp::Contains => str_pair(actual, expected).is_some_and(|(a, e)| a.contains(e)),
		ConditionOp::StartsWith =>
			str_pair(actual, expected).is_some_and(|(a, e)| a.starts_with(e)),
		ConditionOp::EndsWith => str_pair(actual, expected).is_some_and(|(a, e)| a.ends_with(e)),
		ConditionOp::Gt => compare_values(actual, expected) == Some(Ordering::Greater),
		ConditionOp::Gte => matches!(
			compare_values(actual, expected),
			Some(Ordering::Greater | Ordering::Equal)
		),
		ConditionOp::Lt => compare_values(actual, expected) == Some(Ordering::Less),
		ConditionOp::Lte =>
			matches!(compare_values(actual, expected), Some(Ordering::Less | Ordering::Equal)),
		ConditionOp::In => expected
			.as_array()
			.is_some_and(|candidates| candidates.iter().any(|c| values_equal(actual, c))),
		ConditionOp::Regex =>
			regex.zip(actual.as_str()).is_some_and(|(regex, text)| regex.is_match(text)),
	}
}

fn str_pair<'a>(actual: &'a Value, expected: &'a Value) -> Option<(&'a str, &'a str)> {
	Some((actual.as_str()?, expected.as_str()?))
}

/// Numbers compare by value so `1` equals `1.0`, as they do in Cypher.
pub fn values_equal(a: &Value, b: &Value) -> bool {
	match (a, b) {
		(Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
		_ => a == b,
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn entity(props: Value) -> Entity {
		let Value::Object(properties) = props else { panic!("Fixture must be an object.") };

		Entity::new(vec!["Function".to_string()], properties)
	}

	fn matches(condition: FieldCondition, props: Value) -> bool {
		ConditionSet::compile(&[condition]).expect("Condition must compile.").matches(&entity(props))
	}

	#[test]
	fn missing_property_never_matches() {
		assert!(!matches(FieldCondition::neq("name", "x"), json!({})));
		assert!(!matches(FieldCondition::neq("name", "x"), json!({ "name": null })));
		assert!(matches(FieldCondition::neq("name", "x"), json!({ "name": "y" })));
	}

	#[test]
	fn string_predicates() {
		let props = json!({ "name": "createUser" });

		assert!(matches(FieldCondition::starts_with("name", "create"), props.clone()));
		assert!(matches(FieldCondition::ends_with("name", "User"), props.clone()));
		assert!(matches(FieldCondition::contains("name", "teU"), props.clone()));
		assert!(!matches(FieldCondition::starts_with("name", "User"), props));
	}

	#[test]
	fn numeric_and_lexicographic_comparison() {
		assert!(matches(FieldCondition::gte("lines", 10), json!({ "lines": 10.0 })));
		assert!(!matches(FieldCondition::gt("lines", 10), json!({ "lines": "11" })));
		assert!(matches(FieldCondition::lt("name", "m"), json!({ "name": "alpha" })));
		assert!(matches(FieldCondition::eq("lines", 3), json!({ "lines": 3.0 })));
	}

	#[test]
	fn membership_and_regex() {
		assert!(matches(FieldCondition::one_of("kind", ["a", "b"]), json!({ "kind": "b" })));
		assert!(!matches(FieldCondition::one_of("kind", ["a", "b"]), json!({ "kind": "c" })));
		assert!(matches(FieldCondition::regex("name", "get.*"), json!({ "name": "getUser" })));
		// Full match: a prefix hit is not enough.
		assert!(!matches(FieldCondition::regex("name", "get"), json!({ "name": "getUser" })));
	}

	#[test]
	fn invalid_values_are_rejected_up_front() {
		assert!(FieldCondition::regex("name", "(").validate().is_err());
		assert!(FieldCondition::new("name", ConditionOp::In, "a").validate().is_err());
		assert!(FieldCondition::eq("na`me", "a").validate().is_err());
		assert!(FieldCondition::new("name", ConditionOp::Contains, 3).validate().is_err());
	}
}

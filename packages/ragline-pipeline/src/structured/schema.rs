use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::{Error, Result};

/// Reserved for the item identifier in every response format.
pub const ITEM_ID_FIELD: &str = "id";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
	String,
	Number,
	Integer,
	Boolean,
	Array,
	Object,
}
impl FieldType {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::String => "string",
			Self::Number => "number",
			Self::Integer => "integer",
			Self::Boolean => "boolean",
			Self::Array => "array",
			Self::Object => "object",
		}
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
	pub name: String,
	#[serde(rename = "type")]
	pub kind: FieldType,
	#[serde(default)]
	pub description: String,
	#[serde(default)]
	pub required: bool,
	#[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
	pub enum_values: Option<Vec<String>>,
	/// Element type of an array field.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub items: Option<FieldType>,
}
impl SchemaField {
	pub fn new(name: impl Into<String>, kind: FieldType) -> Self {
		Self {
			name: name.into(),
			kind,
			description: String::new(),
			required: false,
			enum_values: None,
			items: None,
		}
	}

	pub fn describe(mut self, description: impl Into<String>) -> Self {
		self.description = description.into();

		self
	}

	pub fn required(mut self) -> Self {
		self.required = true;

		self
	}

	pub fn one_of<S: Into<String>>(mut self, values: impl IntoIterator<Item = S>) -> Self {
		self.enum_values = Some(values.into_iter().map(Into::into).collect());

		self
	}

	pub fn items(mut self, kind: FieldType) -> Self {
		self.items = Some(kind);

		self
	}
}

/// Ordered field list shared by prompt rendering and response decoding.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputSchema {
	pub fields: Vec<SchemaField>,
}
impl OutputSchema {
	pub fn new(fields: Vec<SchemaField>) -> Self {
		Self { fields }
	}

	pub fn field(&self, name: &str) -> Option<&SchemaField> {
		self.fields.iter().find(|field| field.name == name)
	}

	pub fn has_required(&self) -> bool {
		self.fields.iter().any(|field| field.required)
	}

	pub fn validate(&self) -> Result<()> {
		if self.fields.is_empty() {
			return Err(Error::invalid_request("Output schema must declare at least one field."));
		}

		let mut seen = HashSet::new();

		for field in &self.fields {
			if !is_identifier(&field.name) {
				return Err(Error::invalid_request(format!(
					"Schema field name {:?} must be an identifier.",
					field.name
				)));
			}
			if field.name == ITEM_ID_FIELD {
				return Err(Error::invalid_request(format!(
					"Schema field name {ITEM_ID_FIELD} is reserved for item identifiers."
				)));
			}
			if !seen.insert(field.name.as_str()) {
				return Err(Error::invalid_request(format!(
					"Schema field {} is declared more than once.",
					field.name
				)));
			}
			if field.enum_values.is_some() && field.kind != FieldType::String {
				return Err(Error::invalid_request(format!(
					"Schema field {} declares enum values but is not a string.",
					field.name
				)));
			}
			if field.items.is_some() && field.kind != FieldType::Array {
				return Err(Error::invalid_request(format!(
					"Schema field {} declares an item type but is not an array.",
					field.name
				)));
			}
		}

		Ok(())
	}

	/// Coerces a decoded object onto the schema. Unknown keys are dropped, absent optional fields
	/// are skipped, and an absent required field is a decode error.
	pub fn coerce(&self, raw: &Map<String, Value>) -> Result<Map<String, Value>> {
		let mut out = Map::new();

		for field in &self.fields {
			match raw.get(&field.name).filter(|value| !is_blank(value)) {
				Some(value) => {
					out.insert(field.name.clone(), coerce_field(field, value)?);
				},
				None if field.required => {
					return Err(Error::decode(format!(
						"Required field {} is missing from the response.",
						field.name
					)));
				},
				None => {},
			}
		}

		Ok(out)
	}

	/// One line per field, used verbatim in prompts.
	pub fn describe(&self) -> String {
		self.fields
			.iter()
			.map(|field| {
				let mut line = format!("- {} ({}", field.name, field.kind.as_str());

				if let Some(items) = field.items {
					line.push_str(&format!(" of {}", items.as_str()));
				}

				line.push_str(if field.required { ", required)" } else { ", optional)" });

				if !field.description.is_empty() {
					line.push_str(": ");
					line.push_str(&field.description);
				}
				if let Some(values) = field.enum_values.as_ref() {
					line.push_str(&format!(" One of: {}.", values.join(", ")));
				}

				line
			})
			.collect::<Vec<_>>()
			.join("\n")
	}
}

fn is_identifier(name: &str) -> bool {
	let mut chars = name.chars();

	matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
		&& chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_blank(value: &Value) -> bool {
	match value {
		Value::Null => true,
		Value::String(text) => text.trim().is_empty(),
		_ => false,
	}
}

fn coerce_field(field: &SchemaField, value: &Value) -> Result<Value> {
	let coerced = coerce_value(field.kind, field.items, value).ok_or_else(|| {
		Error::decode(format!(
			"Field {} expected {} but got {value}.",
			field.name,
			field.kind.as_str()
		))
	})?;

	match (field.enum_values.as_ref(), coerced.as_str()) {
		(Some(allowed), Some(text)) => allowed
			.iter()
			.find(|candidate| candidate.eq_ignore_ascii_case(text))
			.map(|candidate| Value::String(candidate.clone()))
			.ok_or_else(|| {
				Error::decode(format!(
					"Field {} value {text:?} is not one of {}.",
					field.name,
					allowed.join(", ")
				))
			}),
		_ => Ok(coerced),
	}
}

fn coerce_value(kind: FieldType, items: Option<FieldType>, value: &Value) -> Option<Value> {
	match kind {
		FieldType::String => match value {
			Value::String(text) => Some(Value::String(text.trim().to_string())),
			Value::Number(number) => Some(Value::String(number.to_string())),
			Value::Bool(flag) => Some(Value::String(flag.to_string())),
			_ => None,
		},
		FieldType::Number => {
			let number = match value {
				Value::Number(number) => number.as_f64(),
				Value::String(text) => text.trim().parse::<f64>().ok(),
				_ => None,
			}?;

			Number::from_f64(number).map(Value::Number)
		},
		FieldType::Integer => match value {
			Value::Number(number) => number
				.as_i64()
				.or_else(|| number.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
				.map(Value::from),
			Value::String(text) => {
				let text = text.trim();

				text.parse::<i64>()
					.ok()
					.or_else(|| text.parse::<f64>().ok().filter(|f| f.fract() == 0.0).map(|f| f as i64))
					.map(Value::from)
			},
			_ => None,
		},
		FieldType::Boolean => match value {
			Value::Bool(flag) => Some(Value::Bool(*flag)),
			Value::Number(number) => match number.as_i64() {
				Some(0) => Some(Value::Bool(false)),
				Some(1) => Some(Value::Bool(true)),
				_ => None,
			},
			Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
				"true" | "yes" | "1" => Some(Value::Bool(true)),
				"false" | "no" | "0" => Some(Value::Bool(false)),
				_ => None,
			},
			_ => None,
		},
		FieldType::Array => {
			let elements = match value {
				Value::Array(values) => values.clone(),
				// Markup wraps repeated children in one container element.
				Value::Object(map) if map.len() == 1 => match map.values().next() {
					Some(Value::Array(values)) => values.clone(),
					Some(single) => vec![single.clone()],
					None => Vec::new(),
				},
				Value::Object(_) => return None,
				scalar => vec![scalar.clone()],
			};

			match items {
				Some(item_kind) => elements
					.iter()
					.map(|element| coerce_value(item_kind, None, element))
					.collect::<Option<Vec<_>>>()
					.map(Value::Array),
				None => Some(Value::Array(elements)),
			}
		},
		FieldType::Object => value.as_object().map(|map| Value::Object(map.clone())),
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn schema() -> OutputSchema {
		OutputSchema::new(vec![
			SchemaField::new("score", FieldType::Number).required(),
			SchemaField::new("verdict", FieldType::String).one_of(["relevant", "irrelevant"]),
			SchemaField::new("tags", FieldType::Array).items(FieldType::String),
			SchemaField::new("count", FieldType::Integer),
			SchemaField::new("flag", FieldType::Boolean),
		])
	}

	#[test]
	fn coerces_markup_strings_to_declared_types() {
		let raw = json!({
			"score": "7.5",
			"verdict": "Relevant",
			"tags": { "tag": ["a", "b"] },
			"count": "3",
			"flag": "yes",
			"extra": "dropped"
		});
		let coerced = schema().coerce(raw.as_object().expect("object")).expect("coerce failed");

		assert_eq!(
			Value::Object(coerced),
			json!({ "score": 7.5, "verdict": "relevant", "tags": ["a", "b"], "count": 3, "flag": true })
		);
	}

	#[test]
	fn single_markup_child_becomes_one_element_array() {
		let raw = json!({ "score": 1, "tags": { "tag": "solo" } });
		let coerced = schema().coerce(raw.as_object().expect("object")).expect("coerce failed");

		assert_eq!(coerced.get("tags"), Some(&json!(["solo"])));
	}

	#[test]
	fn missing_required_field_fails() {
		let raw = json!({ "verdict": "relevant" });

		assert!(matches!(
			schema().coerce(raw.as_object().expect("object")),
			Err(Error::Decode { .. })
		));
	}

	#[test]
	fn enum_mismatch_fails() {
		let raw = json!({ "score": 2, "verdict": "maybe" });

		assert!(schema().coerce(raw.as_object().expect("object")).is_err());
	}

	#[test]
	fn reserved_and_invalid_names_are_rejected() {
		assert!(OutputSchema::new(vec![SchemaField::new("id", FieldType::String)]).validate().is_err());
		assert!(
			OutputSchema::new(vec![SchemaField::new("two words", FieldType::String)])
				.validate()
				.is_err()
		);
		assert!(schema().validate().is_ok());
	}
}

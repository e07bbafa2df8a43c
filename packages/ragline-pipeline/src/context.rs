//! Prompt-construction descriptors for entity types.
//!
//! An [`EntityContext`] decides which properties of an entity an LLM sees, how they are labelled
//! and how long they may be. Contexts are built once per entity type and shared behind an `Arc`.

use std::{fmt, sync::Arc};

use serde_json::Value;
use unicode_segmentation::UnicodeSegmentation;

use crate::entity::{Entity, RelatedEntity};

const ELLIPSIS: &str = "…";
const SUMMARY_SUFFIX: &str = "_summary";

pub type ComputeFn = Arc<dyn Fn(&Entity) -> Option<String> + Send + Sync>;

#[derive(Clone, Debug, PartialEq)]
pub struct ContextField {
	pub name: String,
	pub label: Option<String>,
	pub required: bool,
	/// Limit in grapheme clusters.
	pub max_length: Option<usize>,
	/// Read `{name}_summary` when it is present and non-empty.
	pub prefer_summary: bool,
}
impl ContextField {
	pub fn new(name: impl Into<String>) -> Self {
		Self { name: name.into(), label: None, required: false, max_length: None, prefer_summary: false }
	}

	pub fn label(mut self, label: impl Into<String>) -> Self {
		self.label = Some(label.into());

		self
	}

	pub fn required(mut self) -> Self {
		self.required = true;

		self
	}

	pub fn max_length(mut self, max_length: usize) -> Self {
		self.max_length = Some(max_length);

		self
	}

	pub fn prefer_summary(mut self) -> Self {
		self.prefer_summary = true;

		self
	}

	fn display_label(&self) -> &str {
		self.label.as_deref().unwrap_or(&self.name)
	}
}

/// Lists a property of related entities discovered by an earlier expansion.
#[derive(Clone, Debug, PartialEq)]
pub struct Enrichment {
	pub relationship: String,
	pub label: String,
	pub field: String,
	pub max_items: usize,
}
impl Enrichment {
	pub fn new(relationship: impl Into<String>, label: impl Into<String>, field: impl Into<String>) -> Self {
		Self { relationship: relationship.into(), label: label.into(), field: field.into(), max_items: 10 }
	}

	pub fn max_items(mut self, max_items: usize) -> Self {
		self.max_items = max_items;

		self
	}
}

#[derive(Clone)]
pub struct ComputedField {
	pub label: String,
	pub compute: ComputeFn,
}
impl fmt::Debug for ComputedField {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ComputedField").field("label", &self.label).finish_non_exhaustive()
	}
}

#[derive(Clone, Debug)]
pub struct EntityContext {
	pub entity_type: String,
	pub fields: Vec<ContextField>,
	pub enrichments: Vec<Enrichment>,
	pub computed_fields: Vec<ComputedField>,
}
impl EntityContext {
	pub fn new(entity_type: impl Into<String>) -> Self {
		Self {
			entity_type: entity_type.into(),
			fields: Vec::new(),
			enrichments: Vec::new(),
			computed_fields: Vec::new(),
		}
	}

	pub fn field(mut self, field: ContextField) -> Self {
		self.fields.push(field);

		self
	}

	pub fn enrich(mut self, enrichment: Enrichment) -> Self {
		self.enrichments.push(enrichment);

		self
	}

	pub fn computed<F>(mut self, label: impl Into<String>, compute: F) -> Self
	where
		F: Fn(&Entity) -> Option<String> + Send + Sync + 'static,
	{
		self.computed_fields.push(ComputedField { label: label.into(), compute: Arc::new(compute) });

		self
	}

	pub fn shared(self) -> Arc<Self> {
		Arc::new(self)
	}

	/// Names of required fields the entity does not carry.
	pub fn missing_required(&self, entity: &Entity) -> Vec<&str> {
		self.fields
			.iter()
			.filter(|field| field.required && self.field_text(field, entity).is_none())
			.map(|field| field.name.as_str())
			.collect()
	}

	/// `label: value` lines in declaration order: fields, then computed fields, then enrichments.
	pub fn render(&self, entity: &Entity, related: &[RelatedEntity]) -> String {
		let mut lines = Vec::new();

		for field in &self.fields {
			if let Some(text) = self.field_text(field, entity) {
				let text = match field.max_length {
					Some(max) => truncate_graphemes(&text, max),
					None => text,
				};

				lines.push(format!("{}: {text}", field.display_label()));
			}
		}
		for computed in &self.computed_fields {
			if let Some(text) = (computed.compute)(entity) {
				lines.push(format!("{}: {text}", computed.label));
			}
		}
		for enrichment in &self.enrichments {
			let values: Vec<String> = related
				.iter()
				.filter(|rel| rel.relationship_type == enrichment.relationship)
				.filter_map(|rel| rel.entity.get(&enrichment.field).map(render_value))
				.take(enrichment.max_items)
				.collect();

			if !values.is_empty() {
				lines.push(format!("{}: {}", enrichment.label, values.join(", ")));
			}
		}

		lines.join("\n")
	}

	fn field_text(&self, field: &ContextField, entity: &Entity) -> Option<String> {
		let summary = field
			.prefer_summary
			.then(|| entity.get(&format!("{}{SUMMARY_SUFFIX}", field.name)))
			.flatten()
			.map(render_value)
			.filter(|text| !text.trim().is_empty());

		summary.or_else(|| {
			entity.get(&field.name).map(render_value).filter(|text| !text.trim().is_empty())
		})
	}
}

pub fn render_value(value: &Value) -> String {
	match value {
		Value::String(text) => text.clone(),
		Value::Array(values) => values.iter().map(render_value).collect::<Vec<_>>().join(", "),
		other => other.to_string(),
	}
}

pub fn truncate_graphemes(text: &str, max: usize) -> String {
	let graphemes: Vec<&str> = text.graphemes(true).collect();

	if graphemes.len() <= max {
		return text.to_string();
	}
	if max == 0 {
		return String::new();
	}

	let mut out = graphemes[..max - 1].concat();

	out.push_str(ELLIPSIS);

	out
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn entity(props: Value) -> Entity {
		let Value::Object(properties) = props else { panic!("Fixture must be an object.") };

		Entity::new(vec!["Scope".to_string()], properties)
	}

	#[test]
	fn renders_labels_summaries_and_truncation() {
		let ctx = EntityContext::new("Scope")
			.field(ContextField::new("name").label("Name").required())
			.field(ContextField::new("source").prefer_summary())
			.field(ContextField::new("docstring").max_length(5));
		let rendered = ctx.render(
			&entity(json!({
				"name": "login",
				"source": "fn login() {}",
				"source_summary": "Authenticates a user.",
				"docstring": "Logs the user in"
			})),
			&[],
		);

		assert_eq!(rendered, "Name: login\nsource: Authenticates a user.\ndocstring: Logs…");
	}

	#[test]
	fn empty_summary_falls_back_to_field() {
		let ctx = EntityContext::new("Scope").field(ContextField::new("source").prefer_summary());
		let rendered = ctx.render(&entity(json!({ "source": "raw", "source_summary": " " })), &[]);

		assert_eq!(rendered, "source: raw");
	}

	#[test]
	fn enrichments_and_computed_fields() {
		let ctx = EntityContext::new("Scope")
			.computed("Size", |e| e.get("lines").map(|v| format!("{v} lines")))
			.enrich(Enrichment::new("CALLS", "Calls", "name").max_items(1));
		let related = vec![
			RelatedEntity {
				entity: entity(json!({ "name": "hash" })),
				relationship_type: "CALLS".to_string(),
				depth: 1,
			},
			RelatedEntity {
				entity: entity(json!({ "name": "verify" })),
				relationship_type: "CALLS".to_string(),
				depth: 1,
			},
		];

		assert_eq!(ctx.render(&entity(json!({ "lines": 12 })), &related), "Size: 12 lines\nCalls: hash");
	}

	#[test]
	fn reports_missing_required_fields() {
		let ctx = EntityContext::new("Scope").field(ContextField::new("name").required());

		assert_eq!(ctx.missing_required(&entity(json!({ "name": "" }))), vec!["name"]);
	}

	#[test]
	fn truncation_respects_grapheme_clusters() {
		assert_eq!(truncate_graphemes("e\u{301}e\u{301}e\u{301}", 2), "e\u{301}…");
		assert_eq!(truncate_graphemes("short", 10), "short");
	}
}

use serde::{Deserialize, Serialize};

use crate::{
	Error, Result,
	context::{EntityContext, render_value},
	entity::{Entity, RelatedEntity},
	structured::{
		decode::{GLOBAL_SECTION, ITEM_ELEMENT, ITEMS_SECTION, OutputFormat},
		schema::{ITEM_ID_FIELD, OutputSchema},
	},
};

/// Which entity properties an LLM sees for each item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "fields", rename_all = "snake_case")]
pub enum FieldExposure {
	Fields(Vec<String>),
	/// Rendered through the entity type's [`EntityContext`].
	Context,
}

pub(crate) fn render_item(
	id: &str,
	entity: &Entity,
	related: &[RelatedEntity],
	exposure: &FieldExposure,
	context: Option<&EntityContext>,
) -> Result<String> {
	let body = match exposure {
		FieldExposure::Fields(fields) => fields
			.iter()
			.filter_map(|name| entity.get(name).map(|value| format!("{name}: {}", render_value(value))))
			.collect::<Vec<_>>()
			.join("\n"),
		FieldExposure::Context => context
			.ok_or_else(|| {
				Error::configuration("Context field exposure requires an EntityContext.")
			})?
			.render(entity, related),
	};

	Ok(format!("<{ITEM_ELEMENT} {ITEM_ID_FIELD}=\"{}\">\n{body}\n</{ITEM_ELEMENT}>", escape_attr(id)))
}

pub(crate) fn render_prompt(
	instructions: &str,
	items: &[&str],
	schema: &OutputSchema,
	global: Option<(&OutputSchema, OutputFormat)>,
	items_format: OutputFormat,
) -> String {
	let mut prompt = String::new();

	prompt.push_str(instructions.trim());
	prompt.push_str("\n\n## Items\n\n");
	prompt.push_str(&items.join("\n\n"));
	prompt.push_str("\n\n## Output\n\nFor every item return these fields:\n");
	prompt.push_str(&schema.describe());
	prompt.push_str("\n\n");
	prompt.push_str(&items_instructions(items_format));

	if let Some((global_schema, global_format)) = global {
		prompt.push_str("\n\nAfter the item results, return one summary describing the whole batch with these fields:\n");
		prompt.push_str(&global_schema.describe());
		prompt.push_str("\n\n");
		prompt.push_str(&global_instructions(global_format));
	}

	prompt.push('\n');

	prompt
}

fn items_instructions(format: OutputFormat) -> String {
	let body = match format {
		OutputFormat::Xml => format!(
			"one <{ITEM_ELEMENT} {ITEM_ID_FIELD}=\"ID\"> element per item with one child element per field. \
			 Repeat a child element for each array entry, wrapped in the field's element."
		),
		OutputFormat::Json => format!(
			"a JSON object {{\"items\": [{{\"{ITEM_ID_FIELD}\": \"ID\", ...fields}}]}}."
		),
		OutputFormat::Yaml => format!(
			"a YAML document with an `items` list whose entries carry `{ITEM_ID_FIELD}: ID` and the fields."
		),
	};

	format!(
		"Wrap the item results in <{ITEMS_SECTION}></{ITEMS_SECTION}> containing {body} \
		 Use each item's id exactly as given."
	)
}

fn global_instructions(format: OutputFormat) -> String {
	let body = match format {
		OutputFormat::Xml => "one child element per field",
		OutputFormat::Json => "a single JSON object",
		OutputFormat::Yaml => "a single YAML mapping",
	};

	format!("Wrap the summary in <{GLOBAL_SECTION}></{GLOBAL_SECTION}> containing {body}.")
}

fn escape_attr(value: &str) -> String {
	value.replace('&', "&amp;").replace('"', "&quot;").replace('<', "&lt;")
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::structured::schema::{FieldType, SchemaField};

	#[test]
	fn renders_explicit_fields_only() {
		let Some(properties) = json!({ "name": "login", "secret": "x", "tags": ["a", "b"] })
			.as_object()
			.cloned()
		else {
			panic!("Fixture must be an object.");
		};
		let entity = Entity::new(vec![], properties);
		let rendered = render_item(
			"s1",
			&entity,
			&[],
			&FieldExposure::Fields(vec!["name".to_string(), "tags".to_string()]),
			None,
		)
		.expect("render failed");

		assert_eq!(rendered, "<item id=\"s1\">\nname: login\ntags: a, b\n</item>");
	}

	#[test]
	fn context_exposure_without_context_is_a_configuration_error() {
		let err = render_item("s1", &Entity::default(), &[], &FieldExposure::Context, None)
			.expect_err("Expected configuration error.");

		assert!(matches!(err, Error::Configuration { .. }));
	}

	#[test]
	fn prompt_requests_both_sections() {
		let schema = OutputSchema::new(vec![SchemaField::new("score", FieldType::Number).required()]);
		let prompt = render_prompt(
			"Rate the items.",
			&["<item id=\"a\">\nx\n</item>"],
			&schema,
			Some((&schema, OutputFormat::Yaml)),
			OutputFormat::Json,
		);

		assert!(prompt.starts_with("Rate the items.\n\n## Items"));
		assert!(prompt.contains("<item_results></item_results>"));
		assert!(prompt.contains("<batch_summary></batch_summary>"));
		assert!(prompt.contains("- score (number, required)"));
	}
}

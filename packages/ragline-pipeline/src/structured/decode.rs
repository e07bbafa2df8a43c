//! Response decoding.
//!
//! A response carries an item payload and, optionally, a batch-level payload. Each payload is
//! decoded by a [`PayloadDecoder`] for its own format; [`SectionedDecoder`] locates the two
//! payloads as tagged sections of one response so formats can be mixed freely.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
	Error, Result,
	entity::value_key,
	structured::schema::ITEM_ID_FIELD,
};

pub const ITEMS_SECTION: &str = "item_results";
pub const GLOBAL_SECTION: &str = "batch_summary";
pub const ITEM_ELEMENT: &str = "item";

static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r#"([A-Za-z_][\w:.-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("Attribute regex is valid.")
});

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
	#[default]
	Xml,
	Json,
	Yaml,
}
impl OutputFormat {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Xml => "xml",
			Self::Json => "json",
			Self::Yaml => "yaml",
		}
	}
}

#[derive(Clone, Debug, PartialEq)]
pub struct DecodedItem {
	pub id: String,
	pub fields: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecodedResponse {
	pub items: Vec<DecodedItem>,
	pub global: Option<Map<String, Value>>,
}

pub trait PayloadDecoder
where
	Self: Send + Sync,
{
	fn decode_items(&self, payload: &str) -> Result<Vec<DecodedItem>>;

	fn decode_object(&self, payload: &str) -> Result<Map<String, Value>>;
}

pub fn decoder_for(format: OutputFormat) -> &'static dyn PayloadDecoder {
	match format {
		OutputFormat::Xml => &XmlDecoder,
		OutputFormat::Json => &JsonDecoder,
		OutputFormat::Yaml => &YamlDecoder,
	}
}

pub struct JsonDecoder;
impl PayloadDecoder for JsonDecoder {
	fn decode_items(&self, payload: &str) -> Result<Vec<DecodedItem>> {
		items_from_value(parse_json(payload)?)
	}

	fn decode_object(&self, payload: &str) -> Result<Map<String, Value>> {
		object_from_value(parse_json(payload)?)
	}
}

pub struct YamlDecoder;
impl PayloadDecoder for YamlDecoder {
	fn decode_items(&self, payload: &str) -> Result<Vec<DecodedItem>> {
		items_from_value(parse_yaml(payload)?)
	}

	fn decode_object(&self, payload: &str) -> Result<Map<String, Value>> {
		object_from_value(parse_yaml(payload)?)
	}
}

pub struct XmlDecoder;
impl PayloadDecoder for XmlDecoder {
	fn decode_items(&self, payload: &str) -> Result<Vec<DecodedItem>> {
		let mut items = Vec::new();

		for element in scan_elements(payload)? {
			if element.name != ITEM_ELEMENT {
				continue;
			}

			let mut fields = match element_value(&element)? {
				Value::Object(map) => map,
				_ => Map::new(),
			};
			let id = element
				.attribute(ITEM_ID_FIELD)
				.map(str::to_string)
				.or_else(|| fields.get(ITEM_ID_FIELD).and_then(value_key))
				.ok_or_else(|| Error::decode("Item element is missing its id."))?;

			fields.remove(ITEM_ID_FIELD);
			items.push(DecodedItem { id: id.trim().to_string(), fields });
		}

		Ok(items)
	}

	fn decode_object(&self, payload: &str) -> Result<Map<String, Value>> {
		children_to_map(&scan_elements(payload)?)
	}
}

/// Splits a raw response into its item and global sections and decodes each with its own format.
#[derive(Clone, Copy, Debug)]
pub struct SectionedDecoder {
	items: OutputFormat,
	global: Option<OutputFormat>,
}
impl SectionedDecoder {
	pub fn new(items: OutputFormat, global: Option<OutputFormat>) -> Self {
		Self { items, global }
	}

	pub fn decode(&self, raw: &str) -> Result<DecodedResponse> {
		let raw = strip_fences(raw);
		let items_payload = match find_section(raw, ITEMS_SECTION) {
			Some(section) => section,
			// Without a global payload the whole response can only be the item payload.
			None if self.global.is_none() => raw,
			None =>
				return Err(Error::decode(format!(
					"Response is missing the <{ITEMS_SECTION}> section."
				))),
		};
		let items = decoder_for(self.items).decode_items(strip_fences(items_payload))?;
		let global = match self.global {
			Some(format) => {
				let section = find_section(raw, GLOBAL_SECTION).ok_or_else(|| {
					Error::decode(format!("Response is missing the <{GLOBAL_SECTION}> section."))
				})?;

				Some(decoder_for(format).decode_object(strip_fences(section))?)
			},
			None => None,
		};

		Ok(DecodedResponse { items, global })
	}
}

fn find_section<'a>(raw: &'a str, tag: &str) -> Option<&'a str> {
	let open = format!("<{tag}>");
	let close = format!("</{tag}>");
	let start = raw.find(&open)? + open.len();
	let end = raw[start..].rfind(&close)? + start;

	Some(&raw[start..end])
}

/// Drops a surrounding Markdown code fence, if any.
fn strip_fences(text: &str) -> &str {
	let trimmed = text.trim();
	let Some(rest) = trimmed.strip_prefix("```") else { return trimmed };
	let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");

	body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn parse_json(payload: &str) -> Result<Value> {
	let payload = payload.trim();

	if let Ok(value) = serde_json::from_str(payload) {
		return Ok(value);
	}

	// Tolerate prose around a single JSON document.
	let start = payload.find(['{', '[']).ok_or_else(|| Error::decode("No JSON document found."))?;
	let end = payload.rfind(['}', ']']).filter(|end| *end > start).ok_or_else(|| {
		Error::decode("JSON document is not terminated.")
	})?;

	serde_json::from_str(&payload[start..=end])
		.map_err(|err| Error::decode(format!("Invalid JSON payload: {err}")))
}

fn parse_yaml(payload: &str) -> Result<Value> {
	serde_yaml::from_str::<Value>(payload)
		.map_err(|err| Error::decode(format!("Invalid YAML payload: {err}")))
}

fn items_from_value(value: Value) -> Result<Vec<DecodedItem>> {
	let list = match value {
		Value::Array(list) => list,
		Value::Object(mut map) => match map.remove("items") {
			Some(Value::Array(list)) => list,
			_ => return Err(Error::decode("Item payload must be a list or carry an items list.")),
		},
		_ => return Err(Error::decode("Item payload must be a list or carry an items list.")),
	};

	list.into_iter()
		.map(|entry| {
			let Value::Object(mut fields) = entry else {
				return Err(Error::decode("Each item result must be an object."));
			};
			let id = fields
				.remove(ITEM_ID_FIELD)
				.as_ref()
				.and_then(value_key)
				.ok_or_else(|| Error::decode("Item result is missing its id."))?;

			Ok(DecodedItem { id, fields })
		})
		.collect()
}

fn object_from_value(value: Value) -> Result<Map<String, Value>> {
	match value {
		Value::Object(map) => Ok(map),
		_ => Err(Error::decode("Batch payload must be an object.")),
	}
}

#[derive(Debug)]
struct XmlElement {
	name: String,
	attributes: Vec<(String, String)>,
	inner: String,
}
impl XmlElement {
	fn attribute(&self, name: &str) -> Option<&str> {
		self.attributes.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
	}
}

/// Returns the top-level elements of `text`, skipping prose, comments and declarations between
/// them.
fn scan_elements(text: &str) -> Result<Vec<XmlElement>> {
	let mut elements = Vec::new();
	let mut cursor = 0;

	while let Some(offset) = text[cursor..].find('<') {
		let start = cursor + offset;
		let rest = &text[start..];

		if rest.starts_with("<!--") {
			cursor = start + rest.find("-->").map(|end| end + 3).unwrap_or(rest.len());

			continue;
		}
		if rest.starts_with("<?") || rest.starts_with("<!") || rest.starts_with("</") {
			cursor = start + rest.find('>').map(|end| end + 1).unwrap_or(rest.len());

			continue;
		}

		let tag_end = rest
			.find('>')
			.ok_or_else(|| Error::decode("Unterminated markup tag in response."))?;
		let tag = &rest[1..tag_end];
		let self_closing = tag.ends_with('/');
		let tag = tag.trim_end_matches('/');
		let name_end = tag.find(|c: char| c.is_whitespace()).unwrap_or(tag.len());
		let name = tag[..name_end].to_string();

		if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || "_-:.".contains(c)) {
			// A literal `<` in prose.
			cursor = start + 1;

			continue;
		}

		let attributes = ATTRIBUTE
			.captures_iter(&tag[name_end..])
			.map(|caps| {
				let value = caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str()).unwrap_or("");

				(caps[1].to_string(), unescape(value))
			})
			.collect();
		let body_start = start + tag_end + 1;

		if self_closing {
			elements.push(XmlElement { name, attributes, inner: String::new() });
			cursor = body_start;

			continue;
		}

		let body_end = matching_close(text, body_start, &name)
			.ok_or_else(|| Error::decode(format!("Element <{name}> is not closed.")))?;

		elements.push(XmlElement {
			inner: text[body_start..body_end].to_string(),
			name: name.clone(),
			attributes,
		});

		cursor = body_end + name.len() + 3;
	}

	Ok(elements)
}

/// Byte offset of the `</name>` closing the element opened just before `from`.
fn matching_close(text: &str, from: usize, name: &str) -> Option<usize> {
	let open = format!("<{name}");
	let close = format!("</{name}>");
	let mut depth = 1;
	let mut cursor = from;

	loop {
		let next_close = text[cursor..].find(&close)? + cursor;
		let nested_open = text[cursor..next_close].match_indices(&open).filter(|(idx, _)| {
			let after = text[cursor + idx + open.len()..].chars().next();

			matches!(after, Some(c) if c == '>' || c.is_whitespace())
		});

		depth += nested_open.count();
		depth -= 1;

		if depth == 0 {
			return Some(next_close);
		}

		cursor = next_close + close.len();
	}
}

fn element_value(element: &XmlElement) -> Result<Value> {
	let inner = element.inner.trim();

	if let Some(cdata) = inner.strip_prefix("<![CDATA[").and_then(|s| s.strip_suffix("]]>")) {
		return Ok(Value::String(cdata.to_string()));
	}

	let children = if inner.starts_with('<') { scan_elements(inner)? } else { Vec::new() };

	if children.is_empty() {
		return Ok(Value::String(unescape(inner)));
	}

	Ok(Value::Object(children_to_map(&children)?))
}

/// Repeated child names collapse into an array in document order.
fn children_to_map(children: &[XmlElement]) -> Result<Map<String, Value>> {
	let mut map = Map::new();

	for child in children {
		let value = element_value(child)?;

		match map.get_mut(&child.name) {
			Some(Value::Array(existing)) => existing.push(value),
			Some(existing) => {
				let first = existing.take();

				*existing = Value::Array(vec![first, value]);
			},
			None => {
				map.insert(child.name.clone(), value);
			},
		}
	}

	Ok(map)
}

fn unescape(text: &str) -> String {
	text.replace("&lt;", "<")
		.replace("&gt;", ">")
		.replace("&quot;", "\"")
		.replace("&apos;", "'")
		.replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn decodes_markup_items_with_repeated_children() {
		let raw = r#"Here you go:
<item_results>
<item id="a1"><score>8</score><reasoning>Covers &lt;auth&gt; flow.</reasoning></item>
<item id='b2'>
  <score>3</score>
  <tags><tag>x</tag><tag>y</tag></tags>
</item>
</item_results>"#;
		let decoded =
			SectionedDecoder::new(OutputFormat::Xml, None).decode(raw).expect("decode failed");

		assert_eq!(decoded.items.len(), 2);
		assert_eq!(decoded.items[0].id, "a1");
		assert_eq!(decoded.items[0].fields.get("reasoning"), Some(&json!("Covers <auth> flow.")));
		assert_eq!(decoded.items[1].id, "b2");
		assert_eq!(decoded.items[1].fields.get("tags"), Some(&json!({ "tag": ["x", "y"] })));
	}

	#[test]
	fn nested_same_name_elements_close_correctly() {
		let raw = "<item id=\"n\"><item>inner</item><score>1</score></item>";
		let items = XmlDecoder.decode_items(raw).expect("decode failed");

		assert_eq!(items.len(), 1);
		assert_eq!(items[0].fields.get("score"), Some(&json!("1")));
	}

	#[test]
	fn mixed_formats_decode_per_section() {
		let raw = r#"<item_results>
```json
{"items": [{"id": 7, "score": 9}]}
```
</item_results>
<batch_summary>
theme: authentication
files:
  - a.rs
  - b.rs
</batch_summary>"#;
		let decoded = SectionedDecoder::new(OutputFormat::Json, Some(OutputFormat::Yaml))
			.decode(raw)
			.expect("decode failed");

		assert_eq!(decoded.items[0].id, "7");
		assert_eq!(
			decoded.global.map(Value::Object),
			Some(json!({ "theme": "authentication", "files": ["a.rs", "b.rs"] }))
		);
	}

	#[test]
	fn bare_payload_is_accepted_without_global_schema() {
		let raw = "```yaml\n- id: a\n  score: 4\n```";
		let decoded =
			SectionedDecoder::new(OutputFormat::Yaml, None).decode(raw).expect("decode failed");

		assert_eq!(decoded.items[0].fields.get("score"), Some(&json!(4)));
	}

	#[test]
	fn missing_sections_fail_when_global_is_requested() {
		let raw = r#"[{"id": "a", "score": 1}]"#;
		let err = SectionedDecoder::new(OutputFormat::Json, Some(OutputFormat::Json))
			.decode(raw)
			.expect_err("Expected missing section error.");

		assert!(matches!(err, Error::Decode { .. }));
	}

	#[test]
	fn unparseable_payload_is_a_decode_error() {
		assert!(JsonDecoder.decode_items("no json here").is_err());
		assert!(XmlDecoder.decode_items("<item id=\"a\"><score>1</score>").is_err());
	}
}

use std::time::Duration;

use reqwest::{
	Client,
	header::{HeaderMap, HeaderName, HeaderValue},
};
use serde_json::{Map, Value};

use crate::{Error, Result, models::Record};

/// Client for the Neo4j HTTP transactional endpoint.
///
/// Every call is a single auto-commit transaction (`/db/{database}/tx/commit`); no session state
/// is held between calls.
#[derive(Clone, Debug)]
pub struct Neo4jStore {
	client: Client,
	endpoint: String,
	headers: HeaderMap,
}
impl Neo4jStore {
	pub fn new(cfg: &ragline_config::GraphStore) -> Result<Self> {
		let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
		let endpoint =
			format!("{}/db/{}/tx/commit", cfg.url.trim_end_matches('/'), cfg.database);
		let headers = default_headers(&cfg.default_headers)?;

		Ok(Self { client, endpoint, headers })
	}

	pub fn endpoint(&self) -> &str {
		&self.endpoint
	}

	pub async fn execute_read(
		&self,
		statement: &str,
		params: &Map<String, Value>,
	) -> Result<Vec<Record>> {
		let body = serde_json::json!({
			"statements": [{
				"statement": statement,
				"parameters": params,
				"resultDataContents": ["row"],
			}],
		});
		let res =
			self.client.post(&self.endpoint).headers(self.headers.clone()).json(&body).send().await?;
		let status = res.status();

		if !status.is_success() {
			return Err(Error::Status { status: status.as_u16() });
		}

		let json: Value = res.json().await?;

		parse_transaction_response(json)
	}
}

fn default_headers(extra: &Map<String, Value>) -> Result<HeaderMap> {
	let mut headers = HeaderMap::new();

	for (key, value) in extra {
		let raw = value
			.as_str()
			.ok_or_else(|| Error::InvalidHeader(format!("{key} must be a string.")))?;
		let name = HeaderName::from_bytes(key.as_bytes())
			.map_err(|err| Error::InvalidHeader(format!("{key}: {err}")))?;
		let value =
			HeaderValue::from_str(raw).map_err(|err| Error::InvalidHeader(format!("{key}: {err}")))?;

		headers.insert(name, value);
	}

	Ok(headers)
}

pub fn parse_transaction_response(json: Value) -> Result<Vec<Record>> {
	if let Some(first) = json.get("errors").and_then(Value::as_array).and_then(|e| e.first()) {
		return Err(Error::Query {
			code: first.get("code").and_then(Value::as_str).unwrap_or("Unknown").to_string(),
			message: first.get("message").and_then(Value::as_str).unwrap_or_default().to_string(),
		});
	}

	let Some(result) = json.get("results").and_then(Value::as_array).and_then(|r| r.first())
	else {
		return Err(Error::InvalidResponse("Transaction response has no results.".to_string()));
	};
	let columns: Vec<String> = result
		.get("columns")
		.and_then(Value::as_array)
		.map(|cols| cols.iter().filter_map(|c| c.as_str().map(str::to_string)).collect())
		.unwrap_or_default();
	let data = result.get("data").and_then(Value::as_array).cloned().unwrap_or_default();
	let mut records = Vec::with_capacity(data.len());

	for entry in data {
		let Some(Value::Array(row)) = entry.get("row").cloned() else {
			return Err(Error::InvalidResponse("Result entry is missing its row.".to_string()));
		};

		if row.len() != columns.len() {
			return Err(Error::InvalidResponse(format!(
				"Row has {} values for {} columns.",
				row.len(),
				columns.len()
			)));
		}

		records.push(Record::new(columns.clone(), row));
	}

	Ok(records)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_rows_against_columns() {
		let json = serde_json::json!({
			"results": [{
				"columns": ["entity", "labels"],
				"data": [
					{ "row": [{ "uuid": "s1", "name": "Alpha" }, ["Scope"]], "meta": [null, null] },
					{ "row": [{ "uuid": "s2", "name": "Beta" }, ["Scope"]], "meta": [null, null] }
				]
			}],
			"errors": []
		});
		let records = parse_transaction_response(json).expect("parse failed");

		assert_eq!(records.len(), 2);
		assert_eq!(
			records[1].get_map("entity").and_then(|m| m.get("name")),
			Some(&Value::from("Beta"))
		);
	}

	#[test]
	fn surfaces_cypher_errors() {
		let json = serde_json::json!({
			"results": [],
			"errors": [{
				"code": "Neo.ClientError.Statement.SyntaxError",
				"message": "Invalid input"
			}]
		});
		let err = parse_transaction_response(json).expect_err("Expected query error.");

		match err {
			Error::Query { code, .. } => assert_eq!(code, "Neo.ClientError.Statement.SyntaxError"),
			other => panic!("Unexpected error: {other:?}"),
		}
	}

	#[test]
	fn builds_endpoint_from_config() {
		let cfg = ragline_config::GraphStore {
			url: "http://localhost:7474/".to_string(),
			database: "graph".to_string(),
			timeout_ms: 1_000,
			default_headers: Map::new(),
		};
		let store = Neo4jStore::new(&cfg).expect("Failed to build store.");

		assert_eq!(store.endpoint(), "http://localhost:7474/db/graph/tx/commit");
	}
}

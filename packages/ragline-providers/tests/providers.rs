use reqwest::header::AUTHORIZATION;
use serde_json::{Map, Value};

#[test]
fn builds_bearer_auth_header() {
	let headers =
		ragline_providers::auth_headers("secret", &Map::new()).expect("Failed to build headers.");
	let value = headers.get(AUTHORIZATION).expect("Missing authorization header.");

	assert_eq!(value, "Bearer secret");
}

#[test]
fn default_headers_are_appended() {
	let mut extra = Map::new();

	extra.insert("x-tenant".to_string(), Value::String("acme".to_string()));

	let headers = ragline_providers::auth_headers("secret", &extra).expect("Failed to build headers.");

	assert_eq!(headers.get("x-tenant").expect("Missing tenant header."), "acme");
}

#[test]
fn non_string_default_header_is_rejected() {
	let mut extra = Map::new();

	extra.insert("x-retries".to_string(), Value::from(3));

	let err = ragline_providers::auth_headers("secret", &extra).expect_err("Expected error.");

	assert!(matches!(err, ragline_providers::Error::InvalidConfig { .. }));
}

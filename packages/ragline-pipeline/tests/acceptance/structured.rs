use std::sync::Arc;

use serde_json::{Value, json};

use ragline_pipeline::{
	BatchingOptions, Error, FieldCondition, FieldExposure, FieldType, LlmProvider, OutputFormat,
	OutputSchema, SchemaField, Settings, StructuredRequest,
};
use ragline_testkit::{MemoryGraph, ScriptedLlm, ScriptedVectorSearch, prompt_item_ids};

fn category_schema() -> OutputSchema {
	OutputSchema::new(vec![
		SchemaField::new("category", FieldType::String).one_of(["auth", "other"]).required(),
	])
}

fn xml_categories() -> ScriptedLlm {
	ScriptedLlm::new(|prompt| {
		let items = prompt_item_ids(prompt)
			.into_iter()
			.map(|id| format!("<item id=\"{id}\"><category>auth</category></item>"))
			.collect::<String>();

		Ok(format!("<item_results>{items}</item_results>"))
	})
}

fn functions_up_to_six() -> Vec<FieldCondition> {
	vec![FieldCondition::lte("lines", 6), FieldCondition::eq("type", "function")]
}

#[tokio::test]
async fn oversized_item_gets_its_own_batch() {
	let mut graph = MemoryGraph::new("uuid");

	let bodies = [
		("n1", "short".to_string()),
		("n2", "brief".to_string()),
		("n3", "x".repeat(1000)),
		("n4", "tiny".to_string()),
	];

	for (id, body) in bodies {
		graph = graph.node(&["Note"], json!({ "uuid": id, "body": body }));
	}

	let harness = super::harness_with(graph, ScriptedVectorSearch::new(), Settings::default());
	let llm = Arc::new(ScriptedLlm::new(|prompt| {
		let items = prompt_item_ids(prompt)
			.into_iter()
			.map(|id| format!("<item id=\"{id}\"><summary>about {id}</summary></item>"))
			.collect::<String>();

		Ok(format!("<item_results>{items}</item_results>"))
	}));
	let schema =
		OutputSchema::new(vec![SchemaField::new("summary", FieldType::String).required()]);
	let request = StructuredRequest::new(
		"Summarise each note.",
		FieldExposure::Fields(vec!["body".to_string()]),
		schema,
	)
	.with_batching(BatchingOptions { token_budget: Some(1000), ..BatchingOptions::default() });
	let results = harness
		.client
		.query("Note")
		.fetch_all()
		.llm_structured(request, Some(llm.clone() as Arc<dyn LlmProvider>))
		.execute()
		.await
		.expect("Pipeline failed.");
	let prompts = llm.stats().prompts();
	let big = prompts
		.iter()
		.find(|prompt| prompt.contains(&"x".repeat(1000)))
		.expect("The oversized note must be prompted.");

	assert!(prompts.len() >= 2);
	assert_eq!(prompt_item_ids(big), vec!["n3".to_string()]);
	assert_eq!(results.len(), 4);

	for result in &results {
		let id = result.entity.identity("uuid").expect("Notes carry identities.");

		assert_eq!(result.entity.get("summary"), Some(&Value::from(format!("about {id}"))));
		assert!(result.entity.get("body").is_some());
	}
}

#[tokio::test]
async fn mixed_formats_decode_items_and_merge_batch_summaries() {
	let harness = super::harness();
	let llm = Arc::new(ScriptedLlm::new(|prompt| {
		let ids = prompt_item_ids(prompt);
		let items = ids
			.iter()
			.map(|id| json!({ "id": id, "category": "auth", "ignored": true }))
			.collect::<Vec<_>>();

		Ok(format!(
			"Here you go.\n<item_results>\n{}\n</item_results>\n<batch_summary>\nthemes:\n  - {}\n</batch_summary>",
			json!({ "items": items }),
			ids.first().cloned().unwrap_or_default()
		))
	}));
	let global =
		OutputSchema::new(vec![SchemaField::new("themes", FieldType::Array).items(FieldType::String)]);
	let request =
		StructuredRequest::new("Classify each scope.", FieldExposure::Context, category_schema())
			.with_global_schema(global)
			.with_format(OutputFormat::Json, OutputFormat::Yaml)
			.with_batching(BatchingOptions { batch_size: 2, ..BatchingOptions::default() });
	let output = super::with_llm(harness.client.clone(), llm.clone() as Arc<dyn LlmProvider>)
		.query("Scope")
		.fetch_where(functions_up_to_six())
		.llm_structured(request, None)
		.execute_with_metadata()
		.await
		.expect("Pipeline failed.");

	assert_eq!(llm.stats().calls(), 2);
	assert_eq!(output.results.len(), 4);
	assert!(output.results.iter().all(|result| {
		result.entity.get("category") == Some(&Value::from("auth")) && result.entity.get("ignored").is_none()
	}));
	assert_eq!(
		output.metadata.operations[1].global_metadata,
		Some(json!({ "themes": ["s00", "s04"] }))
	);
	assert_eq!(output.metadata.operations[1].round_trips, 2);
}

#[tokio::test]
async fn omitted_item_fails_the_whole_pipeline() {
	let harness = super::harness();
	let llm = Arc::new(ScriptedLlm::fixed(
		"<item_results><item id=\"s00\"><category>auth</category></item></item_results>",
	));
	let request =
		StructuredRequest::new("Classify each scope.", FieldExposure::Context, category_schema());
	let err = super::with_llm(harness.client.clone(), llm as Arc<dyn LlmProvider>)
		.query("Scope")
		.fetch_where(functions_up_to_six())
		.llm_structured(request, None)
		.execute()
		.await
		.expect_err("A missing item must fail strict extraction.");

	assert!(matches!(err, Error::Decode { .. }), "Unexpected error: {err}");
}

#[tokio::test]
async fn enum_violations_are_decode_errors() {
	let harness = super::harness();
	let llm = Arc::new(ScriptedLlm::new(|prompt| {
		let items = prompt_item_ids(prompt)
			.into_iter()
			.map(|id| format!("<item id=\"{id}\"><category>billing</category></item>"))
			.collect::<String>();

		Ok(format!("<item_results>{items}</item_results>"))
	}));
	let request =
		StructuredRequest::new("Classify each scope.", FieldExposure::Context, category_schema());
	let err = super::with_llm(harness.client.clone(), llm as Arc<dyn LlmProvider>)
		.query("Scope")
		.fetch_ids(["s00"])
		.llm_structured(request, None)
		.execute()
		.await
		.expect_err("Values outside the enum must be rejected.");

	assert!(matches!(err, Error::Decode { .. }), "Unexpected error: {err}");
}

#[tokio::test]
async fn cached_responses_skip_repeat_calls() {
	let settings = Settings { cache_responses: true, ..Settings::default() };
	let harness = super::harness_with(super::code_graph(), super::code_vectors(), settings);
	let llm = Arc::new(xml_categories());
	let client = super::with_llm(harness.client.clone(), llm.clone() as Arc<dyn LlmProvider>);
	let run = || {
		let request =
			StructuredRequest::new("Classify each scope.", FieldExposure::Context, category_schema());

		client.query("Scope").fetch_where(functions_up_to_six()).llm_structured(request, None).execute()
	};
	let first = run().await.expect("First run failed.");
	let second = run().await.expect("Second run failed.");

	assert_eq!(first, second);
	assert_eq!(llm.stats().calls(), 1);
}

#[tokio::test]
async fn batch_endpoint_only_receives_cache_misses() {
	let settings = Settings { cache_responses: true, ..Settings::default() };
	let harness = super::harness_with(super::code_graph(), super::code_vectors(), settings);
	let llm = Arc::new(xml_categories().with_batch_endpoint());
	let client = super::with_llm(harness.client.clone(), llm.clone() as Arc<dyn LlmProvider>);
	let run = || {
		let request =
			StructuredRequest::new("Classify each scope.", FieldExposure::Context, category_schema())
				.with_batching(BatchingOptions { batch_size: 2, ..BatchingOptions::default() });

		client.query("Scope").fetch_where(functions_up_to_six()).llm_structured(request, None).execute()
	};
	let first = run().await.expect("First run failed.");
	let second = run().await.expect("Second run failed.");

	assert_eq!(first, second);
	assert_eq!(first.len(), 4);
	assert_eq!(llm.batch_calls(), 1);
	assert_eq!(llm.stats().calls(), 2);
}

#[tokio::test]
async fn results_without_identity_are_rejected() {
	let harness = super::harness();
	let llm = Arc::new(xml_categories());
	let request =
		StructuredRequest::new("Classify each scope.", FieldExposure::Context, category_schema());
	let err = super::with_llm(harness.client.clone(), llm.clone() as Arc<dyn LlmProvider>)
		.query("Scope")
		.fetch_ids(["s00"])
		.llm_structured(request, None)
		.with_identity(|_| None)
		.execute()
		.await
		.expect_err("Anonymous results cannot be extracted.");

	assert!(matches!(err, Error::InvalidRequest { .. }), "Unexpected error: {err}");
	assert_eq!(llm.stats().calls(), 0);
}

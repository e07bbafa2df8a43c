use std::{sync::Arc, time::Duration};

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use ragline_pipeline::{
	Direction, EmbeddingProvider, Error, FieldCondition, LlmProvider, QueryPlan, RerankOptions,
	SemanticOptions, Settings, SortDirection,
};
use ragline_testkit::{HashEmbedding, ItemScoringLlm, ScriptedLlm};

fn slow_llm() -> Arc<ScriptedLlm> {
	Arc::new(
		ScriptedLlm::fixed("<item_results></item_results>").with_delay(Duration::from_millis(500)),
	)
}

#[tokio::test]
async fn cancelled_token_stops_before_the_first_query() {
	let harness = super::harness();
	let token = CancellationToken::new();

	token.cancel();

	let err = harness
		.client
		.query("Scope")
		.fetch_all()
		.with_cancellation(token)
		.execute()
		.await
		.expect_err("A cancelled pipeline must not run.");

	assert!(matches!(err, Error::Cancelled { .. }), "Unexpected error: {err}");
	assert_eq!(harness.graph.round_trips(), 0);
}

#[tokio::test]
async fn cancellation_interrupts_a_soft_failing_stage() {
	let harness = super::harness();
	let llm = slow_llm();
	let token = CancellationToken::new();
	let canceller = token.clone();

	tokio::spawn(async move {
		tokio::time::sleep(Duration::from_millis(20)).await;
		canceller.cancel();
	});

	let err = super::with_llm(harness.client.clone(), llm as Arc<dyn LlmProvider>)
		.query("Scope")
		.fetch_ids(["s00", "s01"])
		.llm_rerank("Anything?", RerankOptions::default())
		.with_cancellation(token)
		.execute()
		.await
		.expect_err("Cancellation must surface even from rerank.");

	assert!(matches!(err, Error::Cancelled { .. }), "Unexpected error: {err}");
}

#[tokio::test]
async fn deadline_bounds_slow_providers() {
	let harness = super::harness();
	let err = super::with_llm(harness.client.clone(), slow_llm() as Arc<dyn LlmProvider>)
		.query("Scope")
		.fetch_ids(["s00"])
		.llm_rerank("Anything?", RerankOptions::default())
		.with_timeout(Duration::from_millis(50))
		.execute()
		.await
		.expect_err("The deadline must fire.");

	assert!(matches!(err, Error::DeadlineExceeded { .. }), "Unexpected error: {err}");
}

#[tokio::test]
async fn count_pushes_a_single_fetch_down_to_the_store() {
	let harness = super::harness();
	let total = harness
		.client
		.query("Scope")
		.fetch_where(vec![FieldCondition::eq("type", "function")])
		.limit(3)
		.count()
		.await
		.expect("Count failed.");
	let queries = harness.graph.queries();

	assert_eq!(total, 30);
	assert_eq!(queries.len(), 1);
	assert!(queries[0].text.ends_with("RETURN count(n) AS total"));
}

#[tokio::test]
async fn count_runs_multi_step_pipelines_before_pagination() {
	let harness = super::harness();
	let total = harness
		.client
		.query("Scope")
		.semantic(super::LOGIN, SemanticOptions::new("scope").top_k(7))
		.offset(5)
		.count()
		.await
		.expect("Count failed.");

	assert_eq!(total, 7);
}

#[tokio::test]
async fn expand_attaches_neighbours_at_minimum_depth() {
	let harness = super::harness();
	let results = harness
		.client
		.query("Scope")
		.fetch_ids(["s00", "s01"])
		.expand("CALLS", 2, Direction::Outgoing)
		.filter(FieldCondition::eq("type", "function"))
		.execute()
		.await
		.expect("Pipeline failed.");

	assert_eq!(super::ids(&results), vec!["s00"]);

	let related = results[0]
		.related()
		.iter()
		.map(|neighbour| (neighbour.entity.identity("uuid").unwrap_or_default(), neighbour.depth))
		.collect::<Vec<_>>();

	assert_eq!(related, vec![("s01".to_string(), 1), ("s02".to_string(), 2)]);
	assert!(results[0].related().iter().all(|neighbour| neighbour.relationship_type == "CALLS"));
	assert_eq!(harness.graph.round_trips(), 2);
}

#[tokio::test]
async fn fetch_related_follows_one_hop_from_the_anchor() {
	let harness = super::harness();
	let results = harness
		.client
		.query("Scope")
		.fetch_related("file_a", "CONTAINS", Direction::Outgoing)
		.execute_flat()
		.await
		.expect("Pipeline failed.");
	let ids = results.iter().filter_map(|entity| entity.identity("uuid")).collect::<Vec<_>>();

	assert_eq!(ids, vec!["s00", "s01", "s02"]);
}

#[tokio::test]
async fn ordering_and_pagination_apply_after_all_steps() {
	let harness = super::harness();
	let results = harness
		.client
		.query("Scope")
		.filter(FieldCondition::eq("type", "function"))
		.client_filter("long scopes", |result| {
			result.entity.get("lines").and_then(Value::as_i64).is_some_and(|lines| lines > 40)
		})
		.order_by("lines", SortDirection::Desc)
		.offset(2)
		.limit(3)
		.execute()
		.await
		.expect("Pipeline failed.");

	assert_eq!(super::ids(&results), vec!["s54", "s52", "s50"]);
}

#[tokio::test]
async fn embeddings_are_written_to_the_target_field() {
	let harness = super::harness();
	let embedding = Arc::new(HashEmbedding::new(4));
	let results = harness
		.client
		.clone()
		.with_embedding(embedding.clone() as Arc<dyn EmbeddingProvider>)
		.query("Scope")
		.fetch_ids(["s00", "s01"])
		.generate_embeddings(["name", "type"], "embedding", None)
		.execute()
		.await
		.expect("Pipeline failed.");

	assert_eq!(embedding.calls(), 1);
	assert_eq!(embedding.texts_embedded(), 2);

	for result in &results {
		let vector = result.entity.get("embedding").and_then(Value::as_array).expect("Embedding missing.");

		assert_eq!(vector.len(), 4);
	}

	let expected = embedding.vector("scope_0\nfunction");
	let stored = results[0]
		.entity
		.get("embedding")
		.and_then(Value::as_array)
		.map(|values| values.iter().filter_map(Value::as_f64).map(|v| v as f32).collect::<Vec<_>>());

	assert_eq!(stored, Some(expected));
}

#[tokio::test]
async fn stale_embeddings_are_reported() {
	let harness = super::harness();
	let output = harness
		.client
		.query("Scope")
		.fetch_ids(["s02", "s03"])
		.execute_with_metadata()
		.await
		.expect("Pipeline failed.");

	assert_eq!(output.metadata.warnings.len(), 1);
	assert!(output.metadata.warnings[0].contains("embedding_stale"));
	assert_eq!(output.metadata.final_count, 2);
}

#[tokio::test]
async fn stale_warnings_only_cover_the_returned_page() {
	let harness = super::harness();
	let run = |offset: usize| {
		harness
			.client
			.query("Scope")
			.fetch_ids(["s02", "s03", "s04"])
			.offset(offset)
			.limit(1)
			.execute_with_metadata()
	};
	let clean = run(0).await.expect("Pipeline failed.");
	let stale = run(1).await.expect("Pipeline failed.");

	assert_eq!(super::ids(&clean.results), vec!["s02"]);
	assert!(clean.metadata.warnings.is_empty());
	assert_eq!(super::ids(&stale.results), vec!["s03"]);
	assert_eq!(stale.metadata.warnings.len(), 1);
}

#[tokio::test]
async fn store_failures_fail_hard() {
	let harness = super::harness_with(
		super::code_graph().failing("connection reset"),
		super::code_vectors(),
		Settings::default(),
	);
	let err = harness
		.client
		.query("Scope")
		.fetch_all()
		.execute()
		.await
		.expect_err("Store failures are not absorbed.");

	assert!(matches!(err, Error::Storage { .. }), "Unexpected error: {err}");
}

#[tokio::test]
async fn json_plans_run_like_builder_pipelines() {
	let harness = super::harness();
	let llm = Arc::new(ItemScoringLlm::new([("s00", 2.0), ("s01", 8.0), ("s02", 5.0)]));
	let client = super::with_llm(harness.client.clone(), llm as Arc<dyn LlmProvider>);
	let plan: QueryPlan = serde_json::from_value(json!({
		"entity_type": "Scope",
		"steps": [
			{ "op": "semantic", "query": super::LOGIN, "index": "scope", "top_k": 3 },
			{ "op": "llm_rerank", "question": "Login handlers?", "strategy": { "type": "replace" } }
		],
		"limit": 2
	}))
	.expect("Plan must parse.");
	let results = plan.into_builder(&client).execute().await.expect("Pipeline failed.");

	assert_eq!(super::ids(&results), vec!["s01", "s02"]);
}

use std::{sync::Arc, time::Duration};

use ragline_pipeline::{
	BatchingOptions, Error, FieldCondition, LlmProvider, MergeStrategy, RerankOptions,
	SemanticOptions, Settings,
};
use ragline_testkit::{ItemScoringLlm, ScriptedLlm, prompt_item_ids};

use super::scope_id;

#[tokio::test]
async fn semantic_then_rerank_returns_top_k_by_blended_score() {
	let harness = super::harness();
	let llm = Arc::new(ItemScoringLlm::new((0..super::SCOPES).map(|i| (scope_id(i), (i % 11) as f64))));
	let client = super::with_llm(harness.client.clone(), llm.clone() as Arc<dyn LlmProvider>);
	let output = client
		.query("Scope")
		.semantic(super::HASHING, SemanticOptions::new("scope").top_k(50))
		.llm_rerank("Which scopes hash passwords?", RerankOptions::default().top_k(10))
		.execute_with_metadata()
		.await
		.expect("Pipeline failed.");
	let results = &output.results;

	assert_eq!(results.len(), 10);
	super::assert_descending(results);

	for result in results {
		assert!(result.score_breakdown.contains_key("semantic"));
		assert!(result.score_breakdown.contains_key("llm"));
	}

	// Rerank default batch size is 10.
	assert_eq!(llm.stats().calls(), 5);
	assert_eq!(output.metadata.operations[1].round_trips, 5);
	assert_eq!(results[0].entity.identity("uuid").as_deref(), Some("s54"));
}

#[tokio::test]
async fn rerank_without_context_is_a_configuration_error() {
	let harness = super::harness();
	let llm = Arc::new(ItemScoringLlm::new([("s00", 5.0)]));
	let err = harness
		.client
		.clone()
		.with_llm(llm.clone())
		.query("Scope")
		.fetch_all()
		.llm_rerank("Anything?", RerankOptions::default())
		.execute()
		.await
		.expect_err("Rerank without an EntityContext must fail.");

	assert!(matches!(err, Error::Configuration { .. }), "Unexpected error: {err}");
	assert_eq!(llm.stats().calls(), 0);
	assert_eq!(harness.graph.round_trips(), 0);
}

#[tokio::test]
async fn replace_strategy_thresholds_and_keeps_reasoning() {
	let harness = super::harness();
	let llm = Arc::new(ItemScoringLlm::new([("s00", 9.0), ("s02", 3.0), ("s04", 6.0)]).omit("s06"));
	let client = super::with_llm(harness.client.clone(), llm as Arc<dyn LlmProvider>);
	let results = client
		.query("Scope")
		.fetch_where(vec![FieldCondition::lte("lines", 6), FieldCondition::eq("type", "function")])
		.llm_rerank(
			"Entry points?",
			RerankOptions::default().strategy(MergeStrategy::Replace).min_score(5.0).with_reasoning(),
		)
		.execute()
		.await
		.expect("Pipeline failed.");

	// s06 was never evaluated and keeps its fetch score.
	assert_eq!(super::ids(&results), vec!["s06", "s00", "s04"]);
	assert_eq!(results[1].score, 0.9);
	assert_eq!(
		results[1].context.as_ref().and_then(|ctx| ctx.llm_reasoning.as_deref()),
		Some("Scored s00 at 9.")
	);
}

#[tokio::test]
async fn llm_failure_keeps_previous_ranking() {
	let harness = super::harness();
	let client = super::with_llm(
		harness.client.clone(),
		Arc::new(ScriptedLlm::failing("rate limited")) as Arc<dyn LlmProvider>,
	);
	let output = client
		.query("Scope")
		.semantic(super::LOGIN, SemanticOptions::new("scope").top_k(3))
		.llm_rerank("Login handlers?", RerankOptions::default())
		.execute_with_metadata()
		.await
		.expect("Rerank failures must not fail the pipeline.");

	assert!(output.metadata.degraded);
	assert_eq!(super::ids(&output.results), vec!["s00", "s01", "s02"]);
	assert!(output.results.iter().all(|result| !result.score_breakdown.contains_key("llm")));
}

#[tokio::test]
async fn batches_run_within_the_concurrency_bound() {
	let harness = super::harness();
	let llm = Arc::new(
		ScriptedLlm::new(|prompt| {
			let items = prompt_item_ids(prompt)
				.into_iter()
				.map(|id| format!("<item id=\"{id}\"><score>5</score></item>"))
				.collect::<String>();

			Ok(format!("<item_results>{items}</item_results>"))
		})
		.with_delay(Duration::from_millis(20)),
	);
	let client = super::with_llm(harness.client.clone(), llm.clone() as Arc<dyn LlmProvider>);
	let batching = BatchingOptions { batch_size: 5, concurrency: Some(2), ..BatchingOptions::default() };
	let results = client
		.query("Scope")
		.semantic(super::LOGIN, SemanticOptions::new("scope").top_k(20))
		.llm_rerank("Login handlers?", RerankOptions::default().batching(batching))
		.execute()
		.await
		.expect("Pipeline failed.");

	assert_eq!(results.len(), 20);
	assert_eq!(llm.stats().calls(), 4);
	assert!(llm.stats().peak_in_flight() <= 2);
	assert!(llm.stats().prompts().iter().all(|prompt| prompt_item_ids(prompt).len() == 5));
}

#[tokio::test]
async fn cached_responses_stay_with_their_provider() {
	let settings = Settings { cache_responses: true, ..Settings::default() };
	let harness = super::harness_with(super::code_graph(), super::code_vectors(), settings);
	let lenient = Arc::new(ItemScoringLlm::new([("s00", 1.0), ("s01", 1.0)]));
	let strict = Arc::new(ItemScoringLlm::new([("s00", 9.0), ("s01", 9.0)]));
	let client = super::with_llm(harness.client.clone(), lenient.clone() as Arc<dyn LlmProvider>);
	let rerank = |options: RerankOptions| {
		client
			.query("Scope")
			.fetch_ids(["s00", "s01"])
			.llm_rerank("Entry points?", options.strategy(MergeStrategy::Replace))
			.execute()
	};
	let first = rerank(RerankOptions::default()).await.expect("Pipeline failed.");
	let overridden = rerank(RerankOptions::default().provider(strict.clone() as Arc<dyn LlmProvider>))
		.await
		.expect("Pipeline failed.");
	let repeated = rerank(RerankOptions::default()).await.expect("Pipeline failed.");

	assert!(first.iter().all(|result| (result.score - 0.1).abs() < 1e-9));
	assert!(overridden.iter().all(|result| (result.score - 0.9).abs() < 1e-9));
	assert_eq!(first, repeated);
	assert_eq!(lenient.stats().calls(), 1);
	assert_eq!(strict.stats().calls(), 1);
}

use ragline_pipeline::{FieldCondition, SemanticOptions, Settings};

#[tokio::test]
async fn seeded_search_respects_top_k_and_bounds() {
	let harness = super::harness();
	let results = harness
		.client
		.query("Scope")
		.semantic(super::HASHING, SemanticOptions::new("scope").top_k(5))
		.execute()
		.await
		.expect("Pipeline failed.");

	assert_eq!(super::ids(&results), vec!["s59", "s58", "s57", "s56", "s55"]);
	super::assert_descending(&results);

	for result in &results {
		assert!((0.0..=1.0).contains(&result.score));
		assert_eq!(result.score_breakdown.get("semantic"), Some(&result.score));
		assert!(result.entity.has_label("Scope"));
	}

	assert_eq!(harness.graph.round_trips(), 0);
}

#[tokio::test]
async fn constrained_search_blends_with_existing_scores() {
	let harness = super::harness();
	let results = harness
		.client
		.query("Scope")
		.fetch_ids(["s10", "s20", "s30", "missing"])
		.semantic(super::HASHING, SemanticOptions::new("scope"))
		.execute()
		.await
		.expect("Pipeline failed.");
	let requests = harness.vector.requests();

	assert_eq!(super::ids(&results), vec!["s30", "s20", "s10"]);
	assert_eq!(requests.len(), 1);
	assert_eq!(requests[0].top_k, 3);
	assert_eq!(
		requests[0].filter_ids.as_deref(),
		Some(&["s10".to_string(), "s20".to_string(), "s30".to_string()][..])
	);

	let top = &results[0];

	assert!((top.score - (0.3 * 1.0 + 0.7 * 0.5)).abs() < 1e-9);
	assert_eq!(top.score_breakdown.get("previous"), Some(&1.0));
}

#[tokio::test]
async fn chained_searches_stay_bounded_and_follow_the_latest_query() {
	let harness = super::harness();
	let results = harness
		.client
		.query("Scope")
		.semantic(super::HASHING, SemanticOptions::new("scope").top_k(10))
		.semantic(super::LOGIN, SemanticOptions::new("scope"))
		.execute()
		.await
		.expect("Pipeline failed.");
	let expected = (50..60).map(super::scope_id).collect::<Vec<_>>();

	// The second query reverses the first query's order.
	assert_eq!(super::ids(&results), expected);
	super::assert_descending(&results);

	for result in &results {
		let previous = result.score_breakdown["previous"];
		let latest = result.score_breakdown["semantic"];

		assert!((0.0..=1.0).contains(&result.score));
		assert!((result.score - (0.3 * previous + 0.7 * latest)).abs() < 1e-9);
		assert!((result.score - latest).abs() < (previous - latest).abs());
	}
}

#[tokio::test]
async fn min_score_drops_weak_matches() {
	let harness = super::harness();
	let results = harness
		.client
		.query("Scope")
		.semantic(super::LOGIN, SemanticOptions::new("scope").top_k(50).min_score(0.845))
		.execute()
		.await
		.expect("Pipeline failed.");

	assert_eq!(results.len(), 6);
	assert!(results.iter().all(|result| result.score >= 0.845));
}

#[tokio::test]
async fn empty_input_falls_back_to_seeded_search() {
	let harness = super::harness();
	let results = harness
		.client
		.query("Scope")
		.fetch_where(vec![FieldCondition::eq("type", "interface")])
		.semantic(super::LOGIN, SemanticOptions::new("scope").top_k(3))
		.execute()
		.await
		.expect("Pipeline failed.");
	let requests = harness.vector.requests();

	assert_eq!(super::ids(&results), vec!["s00", "s01", "s02"]);
	assert_eq!(harness.vector.calls(), 1);
	assert!(requests[0].filter_ids.is_none());
	assert!(results.iter().all(|result| result.score_breakdown.get("previous").is_none()));
}

#[tokio::test]
async fn vector_failure_keeps_filtered_input() {
	let harness = super::harness_with(
		super::code_graph(),
		super::code_vectors().failing("index offline"),
		Settings::default(),
	);
	let output = harness
		.client
		.query("Scope")
		.fetch_ids(["s01", "s02", "s04"])
		.semantic(super::LOGIN, SemanticOptions::new("scope"))
		.filter(FieldCondition::eq("type", "function"))
		.execute_with_metadata()
		.await
		.expect("Semantic failures must not fail the pipeline.");

	assert!(output.metadata.degraded);
	assert!(output.metadata.operations[1].error.as_deref().is_some_and(|e| e.contains("index offline")));
	assert_eq!(super::ids(&output.results), vec!["s02", "s04"]);
	assert!(output.results.iter().all(|result| result.score == 1.0));
}

#[tokio::test]
async fn unknown_index_is_rejected_before_any_call() {
	let harness = super::harness();
	let err = harness
		.client
		.query("Scope")
		.semantic(super::LOGIN, SemanticOptions::new("documents"))
		.execute()
		.await
		.expect_err("Unknown index must fail.");

	assert!(matches!(err, ragline_pipeline::Error::Configuration { .. }), "Unexpected error: {err}");
	assert_eq!(harness.vector.calls(), 0);
}

#[tokio::test]
async fn index_override_targets_another_collection() {
	let harness = super::harness();

	harness
		.client
		.query("Scope")
		.semantic(super::LOGIN, SemanticOptions::new("scope").index_override("scopes_v2"))
		.execute()
		.await
		.expect("Pipeline failed.");

	assert_eq!(harness.vector.requests()[0].index.collection, "scopes_v2");
}

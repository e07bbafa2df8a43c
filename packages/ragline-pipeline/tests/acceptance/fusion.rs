use ragline_pipeline::{
	Direction, FieldCondition, OperationKind, RelationshipCondition, SemanticOptions,
};

#[tokio::test]
async fn fetch_and_filter_fuse_into_one_query() {
	let harness = super::harness();
	let output = harness
		.client
		.query("Scope")
		.fetch_where(vec![FieldCondition::eq("type", "function")])
		.filter(FieldCondition::gt("lines", 40))
		.execute_with_metadata()
		.await
		.expect("Pipeline failed.");
	let queries = harness.graph.queries();

	assert_eq!(queries.len(), 1);
	assert!(
		queries[0].text.contains("WHERE n.`type` = $p0 AND n.`lines` > $p1"),
		"Unexpected query: {}",
		queries[0].text
	);
	assert_eq!(output.metadata.operations.len(), 1);
	assert!(output.metadata.operations[0].optimized);
	assert_eq!(output.metadata.operations[0].merged_indices, vec![1]);
	assert_eq!(output.results.len(), 9);
	assert!(output.results.iter().all(|result| {
		result.entity.get("type").and_then(|v| v.as_str()) == Some("function")
			&& result.entity.get("lines").and_then(|v| v.as_i64()).is_some_and(|lines| lines > 40)
	}));
}

#[tokio::test]
async fn fusion_does_not_change_results() {
	let harness = super::harness();
	let build = |fused: bool| {
		let builder = harness
			.client
			.query("Scope")
			.fetch_all()
			.filter(FieldCondition::starts_with("name", "scope_1"))
			.filter(FieldCondition::one_of("type", ["function"]))
			.semantic(super::HASHING, SemanticOptions::new("scope"))
			.filter(FieldCondition::lte("lines", 16))
			.limit(5);

		if fused { builder } else { builder.disable_fusion() }
	};
	let fused = build(true).execute().await.expect("Fused pipeline failed.");
	let unfused = build(false).execute().await.expect("Unfused pipeline failed.");

	assert_eq!(super::ids(&fused), super::ids(&unfused));
	assert_eq!(super::ids(&fused), vec!["s16", "s14", "s12", "s10"]);

	for (a, b) in fused.iter().zip(&unfused) {
		assert!((a.score - b.score).abs() < 1e-12);
	}
}

#[tokio::test]
async fn fusion_into_expand_does_not_change_neighbours() {
	let harness = super::harness();
	let build = |fused: bool| {
		let builder = harness
			.client
			.query("Scope")
			.fetch_ids(["s00", "s01", "s02", "s03"])
			.expand("CALLS", 2, Direction::Outgoing)
			.filter(FieldCondition::eq("type", "function"));

		if fused { builder } else { builder.disable_fusion() }
	};
	let fused = build(true).execute_with_metadata().await.expect("Fused pipeline failed.");
	let unfused = build(false).execute_with_metadata().await.expect("Unfused pipeline failed.");
	let neighbours = |results: &[ragline_pipeline::SearchResult]| {
		results
			.iter()
			.map(|result| {
				let related = result
					.related()
					.iter()
					.map(|n| (n.entity.identity("uuid").unwrap_or_default(), n.depth))
					.collect::<Vec<_>>();

				(result.entity.identity("uuid").unwrap_or_default(), result.score, related)
			})
			.collect::<Vec<_>>()
	};

	assert!(fused.metadata.operations[1].optimized);
	assert_eq!(fused.metadata.operations.len() + 1, unfused.metadata.operations.len());
	assert_eq!(neighbours(&fused.results), neighbours(&unfused.results));
	assert_eq!(
		neighbours(&fused.results),
		vec![
			("s00".to_string(), 1.0, vec![("s01".to_string(), 1), ("s02".to_string(), 2)]),
			("s02".to_string(), 1.0, vec![("s03".to_string(), 1), ("s04".to_string(), 2)]),
		]
	);
}

#[tokio::test]
async fn relationship_filter_after_semantic_runs_on_its_own() {
	let harness = super::harness();
	let builder = harness
		.client
		.query("Scope")
		.semantic(super::LOGIN, SemanticOptions::new("scope").top_k(10))
		.where_related(
			RelationshipCondition::new("CONTAINS", Direction::Incoming).target_label("File"),
		);
	let plan = builder.explain().expect("Explain failed.");

	assert_eq!(plan.steps.len(), 2);
	assert_eq!(plan.steps[1].kind, OperationKind::Filter);
	assert!(plan.steps[0].merged_indices.is_empty());

	let output = builder.execute_with_metadata().await.expect("Pipeline failed.");

	assert_eq!(output.metadata.operations[1].round_trips, 1);
	assert_eq!(super::ids(&output.results), vec!["s00", "s01", "s02", "s03", "s04"]);
	assert_eq!(harness.vector.calls(), 1);
	assert_eq!(harness.graph.round_trips(), 1);
}

#[tokio::test]
async fn field_filter_before_a_relationship_filter_still_fuses() {
	let harness = super::harness();
	let builder = harness
		.client
		.query("Scope")
		.fetch_all()
		.filter(FieldCondition::eq("type", "function"))
		.where_related(RelationshipCondition::new("CONTAINS", Direction::Incoming).target_label("File"));
	let plan = builder.explain().expect("Explain failed.");

	assert_eq!(plan.steps.len(), 2);
	assert_eq!(plan.steps[0].merged_indices, vec![1]);
	assert!(plan.steps[0].query.as_deref().is_some_and(|q| q.contains("n.`type` = $p0")));
	assert_eq!(plan.steps[1].kind, OperationKind::Filter);

	let results = builder.execute().await.expect("Pipeline failed.");
	let queries = harness.graph.queries();

	assert_eq!(super::ids(&results), vec!["s00", "s02", "s04"]);
	assert_eq!(queries.len(), 2);
	assert!(queries[0].text.contains("n.`type` = $p0"));
}

#[tokio::test]
async fn repeated_execution_is_idempotent() {
	let harness = super::harness();
	let run = || {
		harness
			.client
			.query("Scope")
			.fetch_where(vec![FieldCondition::regex("name", "scope_[0-9]")])
			.semantic(super::HASHING, SemanticOptions::new("scope"))
			.execute()
	};
	let first = run().await.expect("First run failed.");
	let second = run().await.expect("Second run failed.");

	assert_eq!(first, second);
	assert_eq!(first.len(), 10);
}

#[test]
fn explain_shows_fused_cypher_without_touching_the_store() {
	let harness = super::harness();
	let plan = harness
		.client
		.query("Scope")
		.filter(FieldCondition::eq("type", "class"))
		.explain()
		.expect("Explain failed.");

	assert!(plan.steps[0].implicit);
	assert_eq!(plan.steps[0].merged_operations, vec!["filter type eq \"class\"".to_string()]);
	assert!(plan.steps[0].query.as_deref().is_some_and(|q| q.contains("n.`type` = $p0")));
	assert_eq!(harness.graph.round_trips(), 0);
}

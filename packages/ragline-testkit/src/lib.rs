//! In-process doubles for the pipeline's backends: a property graph that evaluates query plans,
//! a scripted vector index, scripted LLMs and a deterministic embedder.

mod embedding;
mod error;
mod graph;
mod llm;
mod vector;

pub use embedding::HashEmbedding;
pub use error::{Error, Result};
pub use graph::MemoryGraph;
pub use llm::{CallStats, ItemScoringLlm, ScriptedLlm, prompt_item_ids};
pub use vector::ScriptedVectorSearch;

use std::sync::Arc;

use serde_json::Value;

use ragline_pipeline::{GraphStore, RagClient, Settings};

/// A client over `graph` with default settings and no optional backends.
pub fn client(graph: Arc<MemoryGraph>) -> RagClient {
	RagClient::new(graph as Arc<dyn GraphStore>, Settings::default())
}

/// Parses a fixture embedded with `include_str!`.
pub fn fixture(text: &str) -> Result<Value> {
	Ok(serde_json::from_str(text)?)
}

use std::{
	collections::HashMap,
	sync::{
		LazyLock, Mutex,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};

use regex::Regex;

use ragline_pipeline::{BoxFuture, LlmProvider, Result as PipelineResult};

static ITEM_OPEN: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r#"<item id="([^"]*)">"#).expect("Item regex is valid."));

type Responder = Box<dyn Fn(&str) -> PipelineResult<String> + Send + Sync>;

/// Identities of the items rendered into a structured prompt, in prompt order.
pub fn prompt_item_ids(prompt: &str) -> Vec<String> {
	let items = prompt
		.split_once("## Items")
		.map(|(_, rest)| rest.split_once("## Output").map_or(rest, |(items, _)| items))
		.unwrap_or_default();

	ITEM_OPEN
		.captures_iter(items)
		.filter_map(|caps| caps.get(1))
		.map(|m| m.as_str().replace("&quot;", "\"").replace("&lt;", "<").replace("&amp;", "&"))
		.collect()
}

/// Counts calls and the peak number of requests in flight.
#[derive(Debug, Default)]
pub struct CallStats {
	calls: AtomicUsize,
	in_flight: AtomicUsize,
	peak: AtomicUsize,
	prompts: Mutex<Vec<String>>,
}
impl CallStats {
	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}

	pub fn peak_in_flight(&self) -> usize {
		self.peak.load(Ordering::SeqCst)
	}

	pub fn prompts(&self) -> Vec<String> {
		self.prompts.lock().map(|prompts| prompts.clone()).unwrap_or_default()
	}

	fn enter(&self, prompt: &str) {
		self.calls.fetch_add(1, Ordering::SeqCst);

		let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;

		self.peak.fetch_max(now, Ordering::SeqCst);

		if let Ok(mut prompts) = self.prompts.lock() {
			prompts.push(prompt.to_string());
		}
	}

	fn leave(&self) {
		self.in_flight.fetch_sub(1, Ordering::SeqCst);
	}
}

/// LLM whose response is computed from the prompt by a closure.
pub struct ScriptedLlm {
	respond: Responder,
	delay: Option<Duration>,
	batch_endpoint: bool,
	batch_calls: AtomicUsize,
	stats: CallStats,
}
impl ScriptedLlm {
	pub fn new<F>(respond: F) -> Self
	where
		F: Fn(&str) -> PipelineResult<String> + Send + Sync + 'static,
	{
		Self {
			respond: Box::new(respond),
			delay: None,
			batch_endpoint: false,
			batch_calls: AtomicUsize::new(0),
			stats: CallStats::default(),
		}
	}

	pub fn fixed(response: impl Into<String>) -> Self {
		let response = response.into();

		Self::new(move |_| Ok(response.clone()))
	}

	pub fn failing(message: impl Into<String>) -> Self {
		let message = message.into();

		Self::new(move |_| Err(ragline_pipeline::Error::provider(message.clone())))
	}

	pub fn with_delay(mut self, delay: Duration) -> Self {
		self.delay = Some(delay);

		self
	}

	/// Advertises `generate_batch` so multi-batch requests arrive in one call.
	pub fn with_batch_endpoint(mut self) -> Self {
		self.batch_endpoint = true;

		self
	}

	pub fn batch_calls(&self) -> usize {
		self.batch_calls.load(Ordering::SeqCst)
	}

	pub fn stats(&self) -> &CallStats {
		&self.stats
	}
}
impl LlmProvider for ScriptedLlm {
	fn generate<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, PipelineResult<String>> {
		Box::pin(async move {
			self.stats.enter(prompt);

			if let Some(delay) = self.delay {
				tokio::time::sleep(delay).await;
			}

			let response = (self.respond)(prompt);

			self.stats.leave();

			response
		})
	}

	fn supports_batch(&self) -> bool {
		self.batch_endpoint
	}

	fn generate_batch<'a>(
		&'a self,
		prompts: &'a [String],
	) -> BoxFuture<'a, PipelineResult<Vec<String>>> {
		Box::pin(async move {
			self.batch_calls.fetch_add(1, Ordering::SeqCst);

			let mut responses = Vec::with_capacity(prompts.len());

			for prompt in prompts {
				responses.push(self.generate(prompt).await?);
			}

			Ok(responses)
		})
	}
}

/// Relevance judge that answers every rendered item with a fixed 0-10 score in the XML item
/// format. Items without a scripted score get `default_score`.
pub struct ItemScoringLlm {
	scores: HashMap<String, f64>,
	default_score: Option<f64>,
	skip: Vec<String>,
	stats: CallStats,
}
impl ItemScoringLlm {
	pub fn new<I, S>(scores: I) -> Self
	where
		I: IntoIterator<Item = (S, f64)>,
		S: Into<String>,
	{
		Self {
			scores: scores.into_iter().map(|(id, score)| (id.into(), score)).collect(),
			default_score: None,
			skip: Vec::new(),
			stats: CallStats::default(),
		}
	}

	pub fn default_score(mut self, score: f64) -> Self {
		self.default_score = Some(score);

		self
	}

	/// Leaves `id` out of every response.
	pub fn omit(mut self, id: impl Into<String>) -> Self {
		self.skip.push(id.into());

		self
	}

	pub fn stats(&self) -> &CallStats {
		&self.stats
	}

	fn respond(&self, prompt: &str) -> String {
		let mut body = String::from("<item_results>\n");

		for id in prompt_item_ids(prompt) {
			if self.skip.contains(&id) {
				continue;
			}

			let Some(score) = self.scores.get(&id).copied().or(self.default_score) else {
				continue;
			};

			body.push_str(&format!(
				"<item id=\"{id}\"><score>{score}</score><reasoning>Scored {id} at {score}.</reasoning></item>\n"
			));
		}

		body.push_str("</item_results>");

		body
	}
}
impl LlmProvider for ItemScoringLlm {
	fn generate<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, PipelineResult<String>> {
		Box::pin(async move {
			self.stats.enter(prompt);

			let response = self.respond(prompt);

			self.stats.leave();

			Ok(response)
		})
	}
}

use std::{
	collections::{HashMap, VecDeque},
	sync::Mutex,
};

const DEFAULT_CAPACITY: usize = 1_024;

/// In-process cache of raw LLM responses keyed by the blake3 hash of the provider namespace and
/// the rendered prompt.
#[derive(Debug)]
pub struct ResponseCache {
	capacity: usize,
	inner: Mutex<CacheState>,
}

#[derive(Debug, Default)]
struct CacheState {
	entries: HashMap<String, String>,
	order: VecDeque<String>,
}

impl ResponseCache {
	pub fn new(capacity: usize) -> Self {
		Self { capacity: capacity.max(1), inner: Mutex::new(CacheState::default()) }
	}

	pub fn key(namespace: &str, prompt: &str) -> String {
		let mut hasher = blake3::Hasher::new();

		hasher.update(&(namespace.len() as u64).to_le_bytes());
		hasher.update(namespace.as_bytes());
		hasher.update(prompt.as_bytes());

		hasher.finalize().to_hex().to_string()
	}

	pub fn get(&self, namespace: &str, prompt: &str) -> Option<String> {
		let state = self.inner.lock().ok()?;

		state.entries.get(&Self::key(namespace, prompt)).cloned()
	}

	/// Oldest entries are evicted first once the cache is full.
	pub fn insert(&self, namespace: &str, prompt: &str, response: String) {
		let Ok(mut state) = self.inner.lock() else { return };
		let key = Self::key(namespace, prompt);

		if state.entries.insert(key.clone(), response).is_none() {
			state.order.push_back(key);
		}

		while state.order.len() > self.capacity {
			if let Some(oldest) = state.order.pop_front() {
				state.entries.remove(&oldest);
			}
		}
	}

	pub fn len(&self) -> usize {
		self.inner.lock().map(|state| state.entries.len()).unwrap_or(0)
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
impl Default for ResponseCache {
	fn default() -> Self {
		Self::new(DEFAULT_CAPACITY)
	}
}

use std::sync::atomic::{AtomicUsize, Ordering};

use ragline_pipeline::{BoxFuture, EmbeddingProvider, Result as PipelineResult};

/// Deterministic embedder: each text maps to `dimensions` floats folded from its bytes.
pub struct HashEmbedding {
	dimensions: usize,
	calls: AtomicUsize,
	texts: AtomicUsize,
}
impl HashEmbedding {
	pub fn new(dimensions: usize) -> Self {
		Self { dimensions: dimensions.max(1), calls: AtomicUsize::new(0), texts: AtomicUsize::new(0) }
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}

	pub fn texts_embedded(&self) -> usize {
		self.texts.load(Ordering::SeqCst)
	}

	pub fn vector(&self, text: &str) -> Vec<f32> {
		let mut vector = vec![0.0_f32; self.dimensions];

		for (i, byte) in text.bytes().enumerate() {
			vector[i % self.dimensions] += f32::from(byte) / 255.0;
		}

		vector
	}
}
impl EmbeddingProvider for HashEmbedding {
	fn embed<'a>(&'a self, texts: &'a [String]) -> BoxFuture<'a, PipelineResult<Vec<Vec<f32>>>> {
		Box::pin(async move {
			self.calls.fetch_add(1, Ordering::SeqCst);
			self.texts.fetch_add(texts.len(), Ordering::SeqCst);

			Ok(texts.iter().map(|text| self.vector(text)).collect())
		})
	}
}

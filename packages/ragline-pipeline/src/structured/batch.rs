use std::ops::Range;

/// Estimated token count of `text`, rounded up.
pub fn estimate_tokens(text: &str, chars_per_token: usize) -> usize {
	text.chars().count().div_ceil(chars_per_token.max(1))
}

/// Greedy left-to-right packing under an item cap and an optional token budget.
///
/// Items are never split or dropped and no batch is empty. An item whose cost alone exceeds the
/// budget forms a singleton batch.
pub fn pack_batches(costs: &[usize], max_items: usize, token_budget: Option<usize>) -> Vec<Range<usize>> {
	let max_items = max_items.max(1);
	let mut batches = Vec::new();
	let mut start = 0;
	let mut used = 0_usize;

	for (idx, cost) in costs.iter().copied().enumerate() {
		let full = idx - start >= max_items;
		let over_budget = token_budget.is_some_and(|budget| used.saturating_add(cost) > budget);

		if idx > start && (full || over_budget) {
			batches.push(start..idx);

			start = idx;
			used = 0;
		}

		used = used.saturating_add(cost);
	}

	if start < costs.len() {
		batches.push(start..costs.len());
	}

	batches
}

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::{Error, Result};

const RETRY_BASE_DELAY_MS: u64 = 250;

/// Sends one chat completion request and returns the assistant message text.
///
/// Transient failures (timeouts, connection errors, HTTP 429 and 5xx) are retried up to
/// `max_attempts` times with a linear backoff. Any other failure is returned immediately.
pub async fn generate(cfg: &ragline_config::LlmProviderConfig, prompt: &str) -> Result<String> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = serde_json::json!({
		"model": cfg.model,
		"temperature": cfg.temperature,
		"messages": [{ "role": "user", "content": prompt }],
	});
	let headers = crate::auth_headers(&cfg.api_key, &cfg.default_headers)?;
	let attempts = cfg.max_attempts.max(1);
	let mut attempt = 0;

	loop {
		attempt += 1;

		match send(&client, &url, headers.clone(), &body, &cfg.provider_id).await {
			Ok(json) => return parse_completion(&json),
			Err(err) if err.is_transient() && attempt < attempts => {
				tracing::warn!(
					error = %err,
					provider_id = %cfg.provider_id,
					attempt,
					"LLM request failed. Retrying."
				);

				tokio::time::sleep(Duration::from_millis(RETRY_BASE_DELAY_MS * attempt as u64))
					.await;
			},
			Err(err) => return Err(err),
		}
	}
}

async fn send(
	client: &Client,
	url: &str,
	headers: reqwest::header::HeaderMap,
	body: &Value,
	provider_id: &str,
) -> Result<Value> {
	let res = client.post(url).headers(headers).json(body).send().await?;
	let status = res.status();

	if !status.is_success() {
		return Err(Error::Status { provider_id: provider_id.to_string(), status: status.as_u16() });
	}

	Ok(res.json().await?)
}

fn parse_completion(json: &Value) -> Result<String> {
	json.get("choices")
		.and_then(|v| v.as_array())
		.and_then(|arr| arr.first())
		.and_then(|choice| choice.get("message"))
		.and_then(|msg| msg.get("content"))
		.and_then(|c| c.as_str())
		.map(str::to_string)
		.ok_or_else(|| Error::InvalidResponse {
			message: "Completion response is missing choices[0].message.content.".to_string(),
		})
}

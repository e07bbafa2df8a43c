pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Configuration error: {message}")]
	Configuration { message: String },
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Decode error: {message}")]
	Decode { message: String },
	#[error("Cancelled during {stage}.")]
	Cancelled { stage: String },
	#[error("Deadline exceeded during {stage}.")]
	DeadlineExceeded { stage: String },
}
impl Error {
	pub fn configuration(message: impl Into<String>) -> Self {
		Self::Configuration { message: message.into() }
	}

	pub fn invalid_request(message: impl Into<String>) -> Self {
		Self::InvalidRequest { message: message.into() }
	}

	pub fn storage(message: impl Into<String>) -> Self {
		Self::Storage { message: message.into() }
	}

	pub fn provider(message: impl Into<String>) -> Self {
		Self::Provider { message: message.into() }
	}

	pub fn decode(message: impl Into<String>) -> Self {
		Self::Decode { message: message.into() }
	}

	/// Cancellation and deadline expiry must reach the caller even from soft-failing stages.
	pub fn is_interruption(&self) -> bool {
		matches!(self, Self::Cancelled { .. } | Self::DeadlineExceeded { .. })
	}
}

impl From<ragline_storage::Error> for Error {
	fn from(err: ragline_storage::Error) -> Self {
		Self::Storage { message: err.to_string() }
	}
}

impl From<ragline_providers::Error> for Error {
	fn from(err: ragline_providers::Error) -> Self {
		Self::Provider { message: err.to_string() }
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		Self::Decode { message: err.to_string() }
	}
}

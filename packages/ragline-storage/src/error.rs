#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Http(#[from] reqwest::Error),
	#[error(transparent)]
	SerdeJson(#[from] serde_json::Error),
	#[error("Graph query failed with {code}: {message}")]
	Query { code: String, message: String },
	#[error("Graph store returned HTTP {status}.")]
	Status { status: u16 },
	#[error("Invalid response: {0}")]
	InvalidResponse(String),
	#[error("Invalid header: {0}")]
	InvalidHeader(String),
	#[error(transparent)]
	Qdrant(#[from] Box<qdrant_client::QdrantError>),
}
impl From<qdrant_client::QdrantError> for Error {
	fn from(err: qdrant_client::QdrantError) -> Self {
		Self::Qdrant(Box::new(err))
	}
}

pub mod mock;
pub mod qdrant;

pub use mock::MockIndex;
pub use qdrant::{QdrantConfig, QdrantIndex};

pub mod errors;
pub mod frame;
pub mod ids;
pub mod passage;
pub mod provider;
pub mod stream;

pub use errors::{ConnectionError, DecodeError, EmbeddingError, GenerationError, RetrievalError};
pub use frame::{Correlation, InboundMessage, MsgType, OutboundMessage, WireMessage};
pub use passage::RetrievedPassage;
pub use provider::{Embedder, Generator, VectorIndex};
pub use stream::{FragmentStream, GenerationFragment};

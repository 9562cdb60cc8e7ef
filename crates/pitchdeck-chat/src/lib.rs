//! Streaming assistant chat: a line-oriented decoder for the completion wire
//! format and a session that folds decoded deltas into a transcript.

pub mod decoder;
pub mod error;
pub mod session;
pub mod transport;

pub use decoder::{StreamDecoder, decode};
pub use error::ChatError;
pub use session::{ChatNotice, ChatSession, ChatSnapshot, SendOutcome};
pub use transport::{ByteStream, ChatResponse, ChatTransport, HttpChatTransport};

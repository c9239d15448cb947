// Public modules
pub mod message;
pub mod session;
pub mod wire;

// Re-exports
pub use message::{Message, Role};
pub use session::{Session, SessionId};
pub use wire::{
    ChatRequest, ChatResponse, HistoryEntry, PlainTextRequest, PlainTextTurn, StreamFrame,
};

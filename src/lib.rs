// Public modules
pub mod chat;
pub mod client;
pub mod decode;
pub mod error;
pub mod manager;
pub mod observability;
pub mod sse;
pub mod storage;
pub mod store;
pub mod throttle;
pub mod types;
pub mod typewriter;
pub mod utils;

// Re-exports
pub use client::{Backend, ChatClient, ChunkStream, ClientConfig, HttpBackend, WireFormat};
pub use error::{Error, Result};
pub use manager::{SessionEvent, SessionManager};
pub use observability::register_biometrics;
pub use storage::{DirectoryStorage, KeyValueStorage, MemoryStorage, NullStorage};
pub use store::SessionStore;
pub use throttle::Cooldown;
pub use types::*;
pub use typewriter::{RevealBuffer, Typewriter};

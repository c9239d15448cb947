//! Chat application module for interactive coaching conversations.
//!
//! This module provides a streaming REPL chat interface built on top of the
//! coachline client library. It supports:
//!
//! - Streaming replies revealed a word at a time
//! - Stopping a reply mid-stream while keeping what was shown
//! - Slash commands for saving, loading, and managing sessions
//!
//! # Architecture
//!
//! The module is organized into several components:
//!
//! - [`config`]: CLI argument parsing and configuration
//! - [`session`]: The reply driver tying client, typewriter, and manager together
//! - [`commands`]: Slash command parsing and handling
//! - [`render`]: Terminal output

mod commands;
mod config;
mod render;
mod session;

pub use commands::{ChatCommand, help_text, parse_command};
pub use config::{ChatArgs, ChatConfig, DEFAULT_GREETING};
pub use render::{PlainTextRenderer, Renderer};
pub use session::{ChatSession, StreamOutcome};

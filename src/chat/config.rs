//! Configuration types for the chat application.
//!
//! This module provides CLI argument parsing via `arrrg` and configuration
//! structures for controlling chat behavior.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use arrrg_derive::CommandLine;

use crate::client::{ClientConfig, WireFormat};
use crate::error::{Error, Result};
use crate::throttle::DEFAULT_COOLDOWN;
use crate::typewriter::{DEFAULT_MIN_STEP, DEFAULT_TICK};

/// Greeting shown at the top of every new conversation.
pub const DEFAULT_GREETING: &str = "Hello! How Can I Assist You Today?";

/// Directory under `$HOME` where sessions are kept by default.
const DEFAULT_STORAGE_SUBDIR: &str = ".coachline/sessions";

/// Command-line arguments for the coachline-chat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Server root for the generation endpoint.
    #[arrrg(optional, "Server base URL (default: $COACHLINE_BASE_URL or http://localhost:4000/)", "URL")]
    pub base_url: Option<String>,

    /// Wire format spoken by the server.
    #[arrrg(optional, "Wire format: event-stream or plain-text (default: event-stream)", "FORMAT")]
    pub wire_format: Option<String>,

    /// Number of prior turns sent as context.
    #[arrrg(optional, "Prior turns sent as context (default: 10, or 20 for plain-text)", "TURNS")]
    pub history: Option<usize>,

    /// Directory holding saved sessions.
    #[arrrg(optional, "Session directory (default: ~/.coachline/sessions)", "DIR")]
    pub storage_dir: Option<String>,

    /// Keep sessions in memory only.
    #[arrrg(flag, "Do not persist sessions")]
    pub ephemeral: bool,

    /// Greeting for new conversations.
    #[arrrg(optional, "Greeting for new conversations", "TEXT")]
    pub greeting: Option<String>,

    /// Start conversations without a greeting.
    #[arrrg(flag, "Start conversations without a greeting")]
    pub no_greeting: bool,

    /// Interval between revealed words, in milliseconds.
    #[arrrg(optional, "Reveal interval in milliseconds (default: 30)", "MS")]
    pub tick_ms: Option<u64>,

    /// Minimum characters revealed per tick.
    #[arrrg(optional, "Minimum characters revealed per tick (default: 1)", "CHARS")]
    pub min_step: Option<usize>,

    /// Minimum spacing between requests, in milliseconds.
    #[arrrg(optional, "Cooldown between requests in milliseconds (default: 4000)", "MS")]
    pub cooldown_ms: Option<u64>,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,
}

/// Configuration for a chat session.
///
/// This struct holds the resolved configuration values after processing
/// command-line arguments with appropriate defaults.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Settings for the generation endpoint.
    pub client: ClientConfig,

    /// Assistant message seeded into new conversations.
    pub greeting: Option<String>,

    /// Interval between reveals.
    pub tick: Duration,

    /// Minimum characters revealed per tick.
    pub min_step: usize,

    /// Minimum spacing between requests.
    pub cooldown: Duration,

    /// Directory for saved sessions; `None` keeps them in memory.
    pub storage_dir: Option<PathBuf>,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,
}

impl ChatConfig {
    /// Creates a new ChatConfig with default values.
    ///
    /// Defaults:
    /// - Client: [`ClientConfig::default`]
    /// - Greeting: none
    /// - Reveal: one word every 30 ms
    /// - Cooldown: 4 s
    /// - Storage: in memory
    /// - Color: enabled
    pub fn new() -> Self {
        Self {
            client: ClientConfig::default(),
            greeting: None,
            tick: DEFAULT_TICK,
            min_step: DEFAULT_MIN_STEP,
            cooldown: DEFAULT_COOLDOWN,
            storage_dir: None,
            use_color: true,
        }
    }

    /// Sets the client configuration.
    pub fn with_client(mut self, client: ClientConfig) -> Self {
        self.client = client;
        self
    }

    /// Sets the greeting.
    pub fn with_greeting(mut self, greeting: impl Into<String>) -> Self {
        self.greeting = Some(greeting.into());
        self
    }

    /// Sets the reveal interval.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Sets the minimum reveal step.
    pub fn with_min_step(mut self, min_step: usize) -> Self {
        self.min_step = min_step;
        self
    }

    /// Sets the request cooldown.
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Sets the session directory.
    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(dir.into());
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<ChatArgs> for ChatConfig {
    type Error = Error;

    fn try_from(args: ChatArgs) -> Result<Self> {
        let mut client = ClientConfig::from_env();
        if let Some(base_url) = args.base_url {
            client = client.with_base_url(base_url);
        }
        if let Some(wire_format) = args.wire_format {
            client = client.with_wire_format(wire_format.parse::<WireFormat>()?);
        }
        if let Some(history) = args.history {
            client = client.with_history_window(history);
        }
        client.endpoint(&client.stream_path)?;

        let greeting = if args.no_greeting {
            None
        } else {
            Some(args.greeting.unwrap_or_else(|| DEFAULT_GREETING.to_string()))
        };
        let storage_dir = if args.ephemeral {
            None
        } else {
            match args.storage_dir {
                Some(dir) => Some(PathBuf::from(dir)),
                None => Some(default_storage_dir()?),
            }
        };

        Ok(ChatConfig {
            client,
            greeting,
            tick: args.tick_ms.map(Duration::from_millis).unwrap_or(DEFAULT_TICK),
            min_step: args.min_step.unwrap_or(DEFAULT_MIN_STEP),
            cooldown: args
                .cooldown_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_COOLDOWN),
            storage_dir,
            use_color: !args.no_color,
        })
    }
}

fn default_storage_dir() -> Result<PathBuf> {
    match env::var_os("HOME") {
        Some(home) => Ok(PathBuf::from(home).join(DEFAULT_STORAGE_SUBDIR)),
        None => Err(Error::validation(
            "HOME is not set; pass --storage-dir or --ephemeral",
            Some("storage_dir".to_string()),
        )),
    }
}

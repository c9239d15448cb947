//! Core chat session management.
//!
//! This module provides the `ChatSession` struct which drives one reply at a
//! time: it records the user turn, streams the reply through the typewriter
//! into the conversation, and saves the result.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::chat::config::ChatConfig;
use crate::chat::render::Renderer;
use crate::client::{ChatClient, ChunkStream};
use crate::error::Result;
use crate::manager::SessionManager;
use crate::observability::{STREAM_DURATION, STREAM_STOPPED};
use crate::storage::{DirectoryStorage, KeyValueStorage, MemoryStorage};
use crate::store::SessionStore;
use crate::throttle::Cooldown;
use crate::typewriter::Typewriter;

/// How a call to [`ChatSession::send_streaming`] ended.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The whole reply was revealed and saved.
    Completed,
    /// The user stopped the reply; what was revealed is kept.
    Stopped,
    /// The input was blank and nothing was sent.
    Ignored,
}

/// A chat session that manages conversation state and server interactions.
pub struct ChatSession<S: KeyValueStorage> {
    client: ChatClient,
    manager: SessionManager<S>,
    cooldown: Cooldown,
    tick: Duration,
    min_step: usize,
}

impl ChatSession<Arc<dyn KeyValueStorage>> {
    /// Creates a new chat session from configuration alone.
    ///
    /// Sessions are kept under `config.storage_dir`, or in memory when unset.
    pub fn from_config(config: &ChatConfig) -> Result<Self> {
        let storage: Arc<dyn KeyValueStorage> = match &config.storage_dir {
            Some(dir) => Arc::new(DirectoryStorage::open(dir)?),
            None => Arc::new(MemoryStorage::new()),
        };
        let client = ChatClient::new(config.client.clone())?;
        let manager = SessionManager::new(SessionStore::new(storage));
        Ok(Self::new(client, manager, config))
    }
}

impl<S: KeyValueStorage> ChatSession<S> {
    /// Creates a new chat session and starts a fresh conversation.
    pub fn new(client: ChatClient, manager: SessionManager<S>, config: &ChatConfig) -> Self {
        let mut manager = match &config.greeting {
            Some(greeting) => manager.with_greeting(greeting.clone()),
            None => manager,
        };
        manager.start_new_conversation();
        Self {
            client,
            manager,
            cooldown: Cooldown::new(config.cooldown),
            tick: config.tick,
            min_step: config.min_step,
        }
    }

    /// The conversation state.
    pub fn manager(&self) -> &SessionManager<S> {
        &self.manager
    }

    /// The conversation state, for session commands.
    pub fn manager_mut(&mut self) -> &mut SessionManager<S> {
        &mut self.manager
    }

    pub fn client(&self) -> &ChatClient {
        &self.client
    }

    /// Sends a user message and streams the response.
    ///
    /// This method:
    /// 1. Rejects the request if the cooldown has not elapsed
    /// 2. Adds the user message and an empty assistant placeholder
    /// 3. Streams the reply through the typewriter into the placeholder
    /// 4. Saves the conversation
    ///
    /// Cancelling `cancel` stops the reply: ticking halts, the revealed text
    /// is kept and `Ok(StreamOutcome::Stopped)` is returned.
    ///
    /// # Errors
    ///
    /// Returns the cooldown error without touching the conversation. Any
    /// failure to get a reply removes the placeholder, shows an inline
    /// error, and is returned.
    pub async fn send_streaming(
        &mut self,
        user_input: &str,
        renderer: &mut dyn Renderer,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome> {
        let prompt = user_input.trim();
        if prompt.is_empty() {
            return Ok(StreamOutcome::Ignored);
        }
        if let Err(err) = self.cooldown.try_acquire() {
            renderer.print_error(&err.user_message());
            return Err(err);
        }

        self.manager.add_user_message(prompt);
        self.manager.add_assistant_chunk("");
        let history = self
            .manager
            .history_window(self.client.config().history_window());
        renderer.start_response();
        let start = Instant::now();

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            opened = self.client.stream(prompt, &history) => Some(opened),
        };
        let outcome = match opened {
            None => Ok(StreamOutcome::Stopped),
            Some(Ok(chunks)) => self.pump(chunks, renderer, cancel).await,
            Some(Err(err)) => Err(err),
        };
        STREAM_DURATION.add(start.elapsed().as_secs_f64());

        match outcome {
            Ok(outcome) => {
                self.drop_empty_placeholder();
                if outcome == StreamOutcome::Stopped {
                    STREAM_STOPPED.click();
                    debug!("reply stopped by user");
                    renderer.print_interrupted();
                } else {
                    renderer.finish_response();
                }
                self.manager.save_conversation();
                Ok(outcome)
            }
            Err(err) => {
                if self
                    .manager
                    .messages()
                    .last()
                    .is_some_and(|m| m.is_assistant())
                {
                    self.manager.remove_last_message();
                }
                warn!(error = %err, "reply failed");
                renderer.print_error(&err.user_message());
                Err(err)
            }
        }
    }

    async fn pump(
        &mut self,
        mut chunks: ChunkStream,
        renderer: &mut dyn Renderer,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome> {
        let (typewriter, mut fragments) = Typewriter::spawn(self.tick, self.min_step);
        let mut receiving = true;
        let outcome = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(StreamOutcome::Stopped),
                fragment = fragments.recv() => match fragment {
                    Some(fragment) => self.reveal(&fragment, renderer),
                    None => break Ok(StreamOutcome::Completed),
                },
                chunk = chunks.next(), if receiving => match chunk {
                    Some(Ok(text)) => typewriter.push(&text),
                    Some(Err(err)) => break Err(err),
                    None => {
                        receiving = false;
                        typewriter.finish();
                    }
                },
            }
        };

        // Dropping `chunks` detaches from the network read.
        drop(chunks);
        typewriter.stop().await;
        if matches!(outcome, Ok(StreamOutcome::Stopped)) {
            while let Some(fragment) = fragments.recv().await {
                self.reveal(&fragment, renderer);
            }
        }
        outcome
    }

    fn reveal(&mut self, fragment: &str, renderer: &mut dyn Renderer) {
        self.manager.add_assistant_chunk(fragment);
        renderer.print_text(fragment);
    }

    fn drop_empty_placeholder(&mut self) {
        if self
            .manager
            .messages()
            .last()
            .is_some_and(|m| m.is_assistant() && m.text.is_empty())
        {
            self.manager.remove_last_message();
        }
    }
}

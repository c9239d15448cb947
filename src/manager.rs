//! Conversation state.
//!
//! [`SessionManager`] owns the active conversation buffer and the ordered
//! list of saved sessions, and writes through to a [`SessionStore`]. UI code
//! reads state through the accessor methods and learns about changes by
//! subscribing to [`SessionEvent`]s.
//!
//! Saving follows a create-or-update rule. A buffer bound to an existing
//! session overwrites that session in place and keeps its position in the
//! list. An unbound buffer becomes a new session at the front of the list.

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::storage::KeyValueStorage;
use crate::store::SessionStore;
use crate::types::session::derive_title;
use crate::{Message, Result, Role, Session, SessionId};

const EVENT_CAPACITY: usize = 64;

/// A change notification for observers of a [`SessionManager`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The active buffer's messages changed.
    MessagesChanged,
    /// The list of saved sessions changed.
    SessionsChanged,
    /// The active buffer was bound, unbound or replaced.
    ActiveSessionChanged,
}

#[derive(Debug)]
struct ActiveSession {
    messages: Vec<Message>,
    bound: Option<SessionId>,
    candidate: SessionId,
}

impl ActiveSession {
    fn fresh() -> Self {
        Self {
            messages: Vec::new(),
            bound: None,
            candidate: SessionId::generate(),
        }
    }

    /// False for an empty buffer or one holding only the untouched greeting.
    fn has_conversation(&self, greeting: Option<&str>) -> bool {
        match self.messages.as_slice() {
            [] => false,
            [only] => !(only.is_assistant() && greeting == Some(only.text.as_str())),
            _ => true,
        }
    }
}

/// In-memory conversation state backed by a durable store.
pub struct SessionManager<S: KeyValueStorage> {
    store: SessionStore<S>,
    sessions: Vec<Session>,
    active: ActiveSession,
    greeting: Option<String>,
    events: broadcast::Sender<SessionEvent>,
}

impl<S: KeyValueStorage> SessionManager<S> {
    /// Create a manager and load saved sessions from `store`.
    ///
    /// A store that cannot be listed starts the manager with no sessions.
    pub fn new(store: SessionStore<S>) -> Self {
        let sessions = match store.list() {
            Ok(sessions) => sessions,
            Err(err) => {
                warn!(error = %err, "failed to load saved sessions");
                Vec::new()
            }
        };
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            sessions,
            active: ActiveSession::fresh(),
            greeting: None,
            events,
        }
    }

    /// Seed new conversations with `greeting` as the first assistant message.
    pub fn with_greeting(mut self, greeting: impl Into<String>) -> Self {
        self.greeting = Some(greeting.into());
        self
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// The durable store.
    pub fn store(&self) -> &SessionStore<S> {
        &self.store
    }

    ////////////////////////////////////////// Active buffer //////////////////////////////////////

    /// Clear the active buffer and start an unsaved conversation.
    ///
    /// Returns the candidate id the conversation will be saved under.
    pub fn start_new_conversation(&mut self) -> SessionId {
        self.active = ActiveSession::fresh();
        if let Some(greeting) = &self.greeting {
            self.active.messages.push(Message::assistant(greeting.clone()));
        }
        self.notify(SessionEvent::ActiveSessionChanged);
        self.notify(SessionEvent::MessagesChanged);
        self.active.candidate
    }

    /// Append a user turn. Blank input is ignored.
    pub fn add_user_message(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.active.messages.push(Message::user(text));
        self.notify(SessionEvent::MessagesChanged);
    }

    /// Grow the trailing assistant message, or start one.
    pub fn add_assistant_chunk(&mut self, text: &str) {
        match self.active.messages.last_mut() {
            Some(last) if last.role == Role::Assistant => last.text.push_str(text),
            _ => self.active.messages.push(Message::assistant(text)),
        }
        self.notify(SessionEvent::MessagesChanged);
    }

    /// Pop the newest message.
    pub fn remove_last_message(&mut self) -> Option<Message> {
        let removed = self.active.messages.pop();
        if removed.is_some() {
            self.notify(SessionEvent::MessagesChanged);
        }
        removed
    }

    /// The active buffer's messages, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.active.messages
    }

    /// The saved session the buffer is bound to, if any.
    pub fn active_session_id(&self) -> Option<SessionId> {
        self.active.bound
    }

    /// The id an unbound buffer will be saved under.
    pub fn candidate_id(&self) -> SessionId {
        self.active.candidate
    }

    /// The last `limit` completed turns before the newest user message.
    ///
    /// Empty assistant placeholders are skipped. Used as request context.
    pub fn history_window(&self, limit: usize) -> Vec<Message> {
        let mut end = self.active.messages.len();
        if let Some(last_user) = self.active.messages.iter().rposition(Message::is_user) {
            end = last_user;
        }
        let completed: Vec<&Message> = self.active.messages[..end]
            .iter()
            .filter(|m| !(m.is_assistant() && m.text.is_empty()))
            .collect();
        let start = completed.len().saturating_sub(limit);
        completed[start..].iter().map(|m| (*m).clone()).collect()
    }

    ///////////////////////////////////////////// Sessions ////////////////////////////////////////

    /// Persist the active buffer without clearing it.
    ///
    /// An unbound buffer is saved under its candidate id and becomes bound to
    /// it, so later saves update the same session. Returns `None`, saving
    /// nothing, when the buffer is empty or holds only the seeded greeting. A failed write is logged and
    /// the in-memory list stays authoritative; the next save retries.
    pub fn save_conversation(&mut self) -> Option<SessionId> {
        if !self.active.has_conversation(self.greeting.as_deref()) {
            return None;
        }

        let id = self.active.bound.unwrap_or(self.active.candidate);
        let messages = self.active.messages.clone();
        let saved = match self.sessions.iter_mut().find(|s| s.id == id) {
            Some(existing) => {
                existing.replace_messages(messages);
                existing.clone()
            }
            None => {
                let session = Session::new(id, messages);
                self.sessions.insert(0, session.clone());
                session
            }
        };
        self.persist(&saved);

        let newly_bound = self.active.bound.replace(id).is_none();
        self.notify(SessionEvent::SessionsChanged);
        if newly_bound {
            self.notify(SessionEvent::ActiveSessionChanged);
        }
        Some(id)
    }

    /// Save the active buffer and clear it.
    ///
    /// Returns the number of saved sessions. An empty or greeting-only buffer
    /// is left alone and the current count is returned.
    pub fn reset_conversation(&mut self) -> usize {
        if self.save_conversation().is_some() {
            self.active = ActiveSession::fresh();
            self.notify(SessionEvent::ActiveSessionChanged);
            self.notify(SessionEvent::MessagesChanged);
        }
        self.sessions.len()
    }

    /// Replace the active buffer with a saved session.
    ///
    /// Returns false, leaving everything untouched, when `id` is unknown.
    pub fn load_session(&mut self, id: SessionId) -> bool {
        let Some(session) = self.sessions.iter().find(|s| s.id == id) else {
            return false;
        };
        self.active = ActiveSession {
            messages: session.messages.clone(),
            bound: Some(id),
            candidate: id,
        };
        self.notify(SessionEvent::ActiveSessionChanged);
        self.notify(SessionEvent::MessagesChanged);
        true
    }

    /// Delete a saved session, clearing the buffer if it was bound to it.
    pub fn delete_session(&mut self, id: SessionId) -> Result<()> {
        let before = self.sessions.len();
        self.sessions.retain(|s| s.id != id);
        if self.sessions.len() != before {
            self.notify(SessionEvent::SessionsChanged);
        }
        if self.active.bound == Some(id) {
            self.active = ActiveSession::fresh();
            self.notify(SessionEvent::ActiveSessionChanged);
            self.notify(SessionEvent::MessagesChanged);
        }
        self.store.delete(id)
    }

    /// Rename a saved session. Blank titles and unknown ids are ignored.
    pub fn update_session_title(&mut self, id: SessionId, title: &str) -> Result<()> {
        let title = title.trim();
        if title.is_empty() {
            return Ok(());
        }
        let Some(session) = self.sessions.iter_mut().find(|s| s.id == id) else {
            return Ok(());
        };
        session.rename(title);
        let renamed = session.clone();
        self.notify(SessionEvent::SessionsChanged);
        self.store.put(&renamed)
    }

    /// Drop every saved session and clear the active buffer.
    pub fn clear_all_sessions(&mut self) -> Result<()> {
        self.sessions.clear();
        self.active = ActiveSession::fresh();
        self.notify(SessionEvent::SessionsChanged);
        self.notify(SessionEvent::ActiveSessionChanged);
        self.notify(SessionEvent::MessagesChanged);
        self.store.clear()
    }

    /// Saved sessions in display order.
    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    /// Look up a saved session.
    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    /// Number of saved sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// The title the active buffer would be saved with.
    pub fn pending_title(&self) -> String {
        derive_title(&self.active.messages)
    }

    fn persist(&self, session: &Session) {
        if let Err(err) = self.store.put(session) {
            warn!(session = %session.id, error = %err, "failed to persist session");
        } else {
            debug!(session = %session.id, messages = session.messages.len(), "saved session");
        }
    }

    fn notify(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

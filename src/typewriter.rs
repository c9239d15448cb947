//! Paced reveal of streamed text.
//!
//! Network chunks arrive in bursts. The [`Typewriter`] smooths them out by
//! revealing the received text a word at a time on a fixed tick, publishing
//! each newly revealed fragment on a channel. The network side appends to a
//! shared [`RevealBuffer`] while the ticker reads from it; both go through
//! one mutex so an append is never observed half-done.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::observability::REVEAL_TICKS;

/// Default interval between reveals.
pub const DEFAULT_TICK: Duration = Duration::from_millis(30);

/// Default minimum number of characters revealed per tick.
pub const DEFAULT_MIN_STEP: usize = 1;

/// Received text plus a cursor marking how much of it has been shown.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RevealBuffer {
    full: String,
    revealed: usize,
    finished: bool,
}

impl RevealBuffer {
    /// Create a new, empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received text.
    pub fn push(&mut self, text: &str) {
        self.full.push_str(text);
    }

    /// Mark that no more text will arrive.
    pub fn finish(&mut self) {
        self.finished = true;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Everything received so far.
    pub fn full(&self) -> &str {
        &self.full
    }

    /// The part already revealed.
    pub fn revealed(&self) -> &str {
        &self.full[..self.revealed]
    }

    /// True when every received character has been revealed.
    pub fn is_caught_up(&self) -> bool {
        self.revealed == self.full.len()
    }

    /// True when caught up and no more text will arrive.
    pub fn is_done(&self) -> bool {
        self.finished && self.is_caught_up()
    }

    /// Reveal the next word.
    ///
    /// Moves past at least `min_step` characters, then up to and including
    /// the next whitespace character. Without further whitespace the rest of
    /// the received text is revealed. Returns the newly revealed fragment, or
    /// `None` when already caught up.
    pub fn advance(&mut self, min_step: usize) -> Option<String> {
        let pending = &self.full[self.revealed..];
        if pending.is_empty() {
            return None;
        }
        let skip = pending
            .char_indices()
            .nth(min_step.max(1))
            .map(|(idx, _)| idx)
            .unwrap_or(pending.len());
        let end = pending[skip..]
            .char_indices()
            .find(|(_, c)| c.is_whitespace())
            .map(|(idx, c)| skip + idx + c.len_utf8())
            .unwrap_or(pending.len());
        let fragment = pending[..end].to_string();
        self.revealed += end;
        Some(fragment)
    }
}

/// A running reveal ticker.
///
/// Feed it with [`push`](Typewriter::push), call
/// [`finish`](Typewriter::finish) when the network side is done, and read
/// revealed fragments from the receiver returned by
/// [`spawn`](Typewriter::spawn). The receiver closes once everything has been
/// revealed or the typewriter is stopped.
#[derive(Debug)]
pub struct Typewriter {
    buffer: Arc<Mutex<RevealBuffer>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Typewriter {
    /// Start a ticker revealing at least `min_step` characters every `tick`.
    pub fn spawn(tick: Duration, min_step: usize) -> (Self, mpsc::UnboundedReceiver<String>) {
        let buffer = Arc::new(Mutex::new(RevealBuffer::new()));
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_ticker(
            Arc::clone(&buffer),
            cancel.clone(),
            tx,
            tick,
            min_step,
        ));
        (
            Self {
                buffer,
                cancel,
                task,
            },
            rx,
        )
    }

    /// Append received text for revealing.
    pub fn push(&self, text: &str) {
        lock(&self.buffer).push(text);
    }

    /// Signal that the network side is done.
    pub fn finish(&self) {
        lock(&self.buffer).finish();
    }

    /// The text revealed so far.
    pub fn revealed(&self) -> String {
        lock(&self.buffer).revealed().to_string()
    }

    /// Halt ticking immediately and return what was revealed.
    ///
    /// Text received but not yet revealed is discarded. Once this returns,
    /// the receiver yields any fragments already published and then closes.
    pub async fn stop(mut self) -> String {
        self.cancel.cancel();
        let _ = (&mut self.task).await;
        lock(&self.buffer).revealed().to_string()
    }
}

impl Drop for Typewriter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_ticker(
    buffer: Arc<Mutex<RevealBuffer>>,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<String>,
    tick: Duration,
    min_step: usize,
) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {}
        }
        let (fragment, done) = {
            let mut buffer = lock(&buffer);
            (buffer.advance(min_step), buffer.is_done())
        };
        if let Some(fragment) = fragment {
            REVEAL_TICKS.click();
            if tx.send(fragment).is_err() {
                return;
            }
        }
        if done {
            return;
        }
    }
}

fn lock(buffer: &Mutex<RevealBuffer>) -> MutexGuard<'_, RevealBuffer> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reveal_all(text: &str, min_step: usize) -> Vec<String> {
        let mut buffer = RevealBuffer::new();
        buffer.push(text);
        std::iter::from_fn(|| buffer.advance(min_step)).collect()
    }

    #[test]
    fn reveals_word_by_word() {
        assert_eq!(
            reveal_all("Drink more water", 1),
            vec!["Drink ", "more ", "water"]
        );
    }

    #[test]
    fn leading_space_is_kept_with_next_word() {
        assert_eq!(reveal_all(" world!", 1), vec![" world!"]);
    }

    #[test]
    fn min_step_skips_short_words() {
        assert_eq!(reveal_all("a bc def", 3), vec!["a bc ", "def"]);
        assert_eq!(reveal_all("ab", 10), vec!["ab"]);
    }

    #[test]
    fn multibyte_text_stays_on_char_boundaries() {
        let words = reveal_all("caf\u{e9} cr\u{e8}me \u{1f4aa}", 1);
        assert_eq!(words.concat(), "caf\u{e9} cr\u{e8}me \u{1f4aa}");
        assert_eq!(words[0], "caf\u{e9} ");
    }

    #[test]
    fn catches_up_then_resumes_on_push() {
        let mut buffer = RevealBuffer::new();
        buffer.push("Hello");
        assert_eq!(buffer.advance(1).as_deref(), Some("Hello"));
        assert!(buffer.is_caught_up());
        assert!(!buffer.is_done());
        assert_eq!(buffer.advance(1), None);
        buffer.push(" world");
        buffer.finish();
        assert_eq!(buffer.advance(1).as_deref(), Some(" world"));
        assert!(buffer.is_done());
        assert_eq!(buffer.revealed(), "Hello world");
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_reveals_everything_then_closes() {
        let (typewriter, mut rx) = Typewriter::spawn(DEFAULT_TICK, DEFAULT_MIN_STEP);
        typewriter.push("Hello");
        typewriter.push(" world");
        typewriter.push("!");
        typewriter.finish();

        let mut fragments = Vec::new();
        while let Some(fragment) = rx.recv().await {
            fragments.push(fragment);
        }
        assert_eq!(fragments.concat(), "Hello world!");
        assert_eq!(typewriter.revealed(), "Hello world!");
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_waits_for_more_text() {
        let (typewriter, mut rx) = Typewriter::spawn(DEFAULT_TICK, DEFAULT_MIN_STEP);
        typewriter.push("Rest ");
        assert_eq!(rx.recv().await.as_deref(), Some("Rest "));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(rx.try_recv().is_err());

        typewriter.push("day");
        typewriter.finish();
        assert_eq!(rx.recv().await.as_deref(), Some("day"));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_keeps_only_revealed_text() {
        let (typewriter, mut rx) = Typewriter::spawn(DEFAULT_TICK, DEFAULT_MIN_STEP);
        typewriter.push("one two three");
        typewriter.finish();

        assert_eq!(rx.recv().await.as_deref(), Some("one "));
        assert_eq!(rx.recv().await.as_deref(), Some("two "));

        let revealed = typewriter.stop().await;
        assert_eq!(revealed, "one two ");
        assert_eq!(rx.recv().await, None);
    }
}

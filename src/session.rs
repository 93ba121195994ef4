//! Chat session management: transcript ownership and the turn lifecycle.
//!
//! A [`ChatSession`] owns the conversation transcript and enforces the
//! single-submission-in-flight policy: at most one streaming request is active
//! at a time, and each user turn is immediately paired with exactly one
//! assistant turn that tracks its outcome. Cumulative snapshots from the
//! reader overwrite the trailing assistant turn in place while it is
//! `Streaming`; once it is `Settled` or `Failed` it is never touched again.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::backend::ChatBackend;
use crate::streaming::StreamingResponseReader;
use crate::types::{ChatError, ChatMessage, Role, Turn, TurnPhase};

/// Fixed recovery text for a failed request. The trailing assistant turn's
/// content is replaced with this and the turn settles; `Failed` is reserved
/// for explicit cancellation.
pub const REQUEST_FAILED_APOLOGY: &str = "Sorry, there was an error processing your request.";

/// Called with the full transcript after every mutation, in mutation order.
pub type TranscriptObserver = Arc<dyn Fn(&[Turn]) + Send + Sync>;

struct SessionState {
    transcript: Vec<Turn>,
    in_flight: bool,
    worker: Option<AbortHandle>,
}

/// Controller for one conversation with the backend.
pub struct ChatSession {
    backend: Arc<dyn ChatBackend>,
    model: String,
    state: Arc<Mutex<SessionState>>,
    observer: Option<TranscriptObserver>,
}

impl ChatSession {
    pub fn new(backend: Arc<dyn ChatBackend>, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
            state: Arc::new(Mutex::new(SessionState {
                transcript: Vec::new(),
                in_flight: false,
                worker: None,
            })),
            observer: None,
        }
    }

    /// Register an observer notified after every transcript mutation.
    pub fn with_observer(mut self, observer: TranscriptObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Submit a user turn and start streaming the assistant's reply.
    ///
    /// Returns [`ChatError::Busy`] without side effects while a prior
    /// submission's assistant turn has not yet settled or failed.
    pub fn submit(&self, text: impl Into<String>) -> Result<(), ChatError> {
        let (messages, snapshot) = {
            let mut st = self.state.lock().unwrap();
            if st.in_flight {
                return Err(ChatError::Busy);
            }
            st.transcript.push(Turn::user(text));
            st.transcript.push(Turn::assistant_placeholder());
            st.in_flight = true;

            // Seed the request with the full prior transcript plus the new
            // user turn; the empty placeholder is not sent.
            let seed = &st.transcript[..st.transcript.len() - 1];
            let messages: Vec<ChatMessage> = seed.iter().map(ChatMessage::from).collect();
            (messages, st.transcript.clone())
        };
        notify(&self.observer, &snapshot);

        let backend = Arc::clone(&self.backend);
        let model = self.model.clone();
        let state = Arc::clone(&self.state);
        let observer = self.observer.clone();
        let handle = tokio::spawn(async move {
            let outcome = drive(backend, &model, messages, &state, &observer).await;
            finalize(&state, &observer, outcome);
        });
        self.state.lock().unwrap().worker = Some(handle.abort_handle());
        Ok(())
    }

    /// Abort the in-flight submission, if any, marking the trailing assistant
    /// turn `Failed` with whatever content had streamed so far. Safe to call
    /// when idle.
    pub fn cancel(&self) {
        let (abort, snapshot) = {
            let mut st = self.state.lock().unwrap();
            if !st.in_flight {
                return;
            }
            st.in_flight = false;
            let abort = st.worker.take();
            if let Some(turn) = st.transcript.last_mut() {
                if turn.role == Role::Assistant && turn.phase == TurnPhase::Streaming {
                    turn.phase = TurnPhase::Failed;
                }
            }
            settle_pending_user(&mut st.transcript);
            (abort, st.transcript.clone())
        };
        // Aborting the worker drops the response body, releasing the
        // connection.
        if let Some(handle) = abort {
            handle.abort();
        }
        debug!("submission cancelled");
        notify(&self.observer, &snapshot);
    }

    /// Copy of the transcript in chronological order.
    pub fn transcript(&self) -> Vec<Turn> {
        self.state.lock().unwrap().transcript.clone()
    }

    /// Whether a submission is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.state.lock().unwrap().in_flight
    }

    /// Poll until the in-flight submission (if any) reaches a terminal state.
    pub async fn wait_idle(&self) {
        while self.is_busy() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

fn notify(observer: &Option<TranscriptObserver>, transcript: &[Turn]) {
    if let Some(observer) = observer {
        observer(transcript);
    }
}

/// Settle the user turn preceding the trailing assistant turn once its
/// outcome is known.
fn settle_pending_user(transcript: &mut [Turn]) {
    let len = transcript.len();
    if len >= 2 && transcript[len - 2].phase == TurnPhase::Pending {
        transcript[len - 2].phase = TurnPhase::Settled;
    }
}

/// Stream the response, folding each cumulative snapshot into the transcript.
async fn drive(
    backend: Arc<dyn ChatBackend>,
    model: &str,
    messages: Vec<ChatMessage>,
    state: &Arc<Mutex<SessionState>>,
    observer: &Option<TranscriptObserver>,
) -> Result<(), ChatError> {
    let source = backend.stream_chat(&messages, model).await?;
    let mut reader = StreamingResponseReader::new(source);
    loop {
        match reader.next_snapshot().await? {
            Some(text) => apply_snapshot(state, observer, text),
            None => return Ok(()),
        }
    }
}

/// Overwrite the trailing assistant turn with the cumulative snapshot. A turn
/// that already left `Streaming` (cancellation won the race) is not touched.
fn apply_snapshot(
    state: &Arc<Mutex<SessionState>>,
    observer: &Option<TranscriptObserver>,
    text: &str,
) {
    let snapshot = {
        let mut st = state.lock().unwrap();
        match st.transcript.last_mut() {
            Some(turn) if turn.role == Role::Assistant && turn.phase == TurnPhase::Streaming => {
                turn.content = text.to_string();
            }
            _ => return,
        }
        st.transcript.clone()
    };
    notify(observer, &snapshot);
}

fn finalize(
    state: &Arc<Mutex<SessionState>>,
    observer: &Option<TranscriptObserver>,
    outcome: Result<(), ChatError>,
) {
    let snapshot = {
        let mut st = state.lock().unwrap();
        let settled = match st.transcript.last_mut() {
            Some(turn) if turn.role == Role::Assistant && turn.phase == TurnPhase::Streaming => {
                match &outcome {
                    Ok(()) => {
                        turn.phase = TurnPhase::Settled;
                    }
                    Err(e) => {
                        warn!(error = %e, "chat request failed");
                        turn.content = REQUEST_FAILED_APOLOGY.to_string();
                        turn.phase = TurnPhase::Settled;
                    }
                }
                true
            }
            // Cancelled concurrently, nothing left to do
            _ => false,
        };
        if settled {
            settle_pending_user(&mut st.transcript);
        }
        st.in_flight = false;
        st.worker = None;
        if !settled {
            return;
        }
        st.transcript.clone()
    };
    notify(observer, &snapshot);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::ChunkStream;
    use async_trait::async_trait;

    /// Backend that replays scripted fragments, optionally failing.
    struct ScriptedBackend {
        fragments: Vec<&'static str>,
        trailing_error: Option<ChatError>,
        reject: Option<ChatError>,
    }

    impl ScriptedBackend {
        fn new(fragments: Vec<&'static str>) -> Self {
            Self {
                fragments,
                trailing_error: None,
                reject: None,
            }
        }

        fn failing_with(mut self, error: ChatError) -> Self {
            self.trailing_error = Some(error);
            self
        }

        fn rejecting(error: ChatError) -> Self {
            Self {
                fragments: Vec::new(),
                trailing_error: None,
                reject: Some(error),
            }
        }
    }

    struct ScriptedSource {
        fragments: std::vec::IntoIter<&'static str>,
        trailing_error: Option<ChatError>,
    }

    #[async_trait]
    impl ChunkStream for ScriptedSource {
        async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ChatError> {
            // Yield so the observer sees every intermediate snapshot in order
            tokio::task::yield_now().await;
            match self.fragments.next() {
                Some(fragment) => Ok(Some(fragment.as_bytes().to_vec())),
                None => match self.trailing_error.take() {
                    Some(error) => Err(error),
                    None => Ok(None),
                },
            }
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn stream_chat(
            &self,
            _messages: &[ChatMessage],
            _model: &str,
        ) -> Result<Box<dyn ChunkStream>, ChatError> {
            if let Some(error) = &self.reject {
                return Err(error.clone());
            }
            Ok(Box::new(ScriptedSource {
                fragments: self.fragments.clone().into_iter(),
                trailing_error: self.trailing_error.clone(),
            }))
        }
    }

    /// Backend whose stream blocks until the returned guard is dropped.
    struct BlockingBackend {
        release: Arc<tokio::sync::Notify>,
    }

    struct BlockingSource {
        release: Arc<tokio::sync::Notify>,
        released: bool,
    }

    #[async_trait]
    impl ChunkStream for BlockingSource {
        async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ChatError> {
            if self.released {
                return Ok(None);
            }
            self.release.notified().await;
            self.released = true;
            Ok(Some(b"late".to_vec()))
        }
    }

    #[async_trait]
    impl ChatBackend for BlockingBackend {
        async fn stream_chat(
            &self,
            _messages: &[ChatMessage],
            _model: &str,
        ) -> Result<Box<dyn ChunkStream>, ChatError> {
            Ok(Box::new(BlockingSource {
                release: Arc::clone(&self.release),
                released: false,
            }))
        }
    }

    fn trailing_contents(observed: &[Vec<Turn>]) -> Vec<String> {
        observed
            .iter()
            .filter_map(|t| t.last())
            .filter(|turn| turn.role == Role::Assistant)
            .map(|turn| turn.content.clone())
            .collect()
    }

    #[tokio::test]
    async fn streamed_reply_progresses_and_settles() {
        let observed: Arc<Mutex<Vec<Vec<Turn>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&observed);
        let backend = Arc::new(ScriptedBackend::new(vec!["Hi", " there", "!"]));
        let session = ChatSession::new(backend, "test-model").with_observer(Arc::new(
            move |transcript: &[Turn]| {
                sink.lock().unwrap().push(transcript.to_vec());
            },
        ));

        session.submit("hello").unwrap();
        session.wait_idle().await;

        let transcript = session.transcript();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].role, Role::User);
        assert_eq!(transcript[0].content, "hello");
        assert_eq!(transcript[0].phase, TurnPhase::Settled);
        assert_eq!(transcript[1].role, Role::Assistant);
        assert_eq!(transcript[1].content, "Hi there!");
        assert_eq!(transcript[1].phase, TurnPhase::Settled);

        let contents = trailing_contents(&observed.lock().unwrap());
        assert_eq!(contents, vec!["", "Hi", "Hi there", "Hi there!", "Hi there!"]);
    }

    #[tokio::test]
    async fn submit_while_in_flight_is_busy() {
        let release = Arc::new(tokio::sync::Notify::new());
        let backend = Arc::new(BlockingBackend {
            release: Arc::clone(&release),
        });
        let session = ChatSession::new(backend, "test-model");

        session.submit("first").unwrap();
        assert_eq!(session.submit("second"), Err(ChatError::Busy));
        // The rejected submission must leave no trace
        assert_eq!(session.transcript().len(), 2);

        release.notify_one();
        session.wait_idle().await;
        assert_eq!(session.transcript().len(), 2);
        assert_eq!(session.transcript()[1].phase, TurnPhase::Settled);

        // Idle again: a new submission is accepted
        session.submit("third").unwrap();
        session.wait_idle().await;
        assert_eq!(session.transcript().len(), 4);
    }

    #[tokio::test]
    async fn failed_request_settles_with_apology() {
        let backend = Arc::new(
            ScriptedBackend::new(vec!["par"])
                .failing_with(ChatError::Transport("reset".into())),
        );
        let session = ChatSession::new(backend, "test-model");

        session.submit("hello").unwrap();
        session.wait_idle().await;

        let transcript = session.transcript();
        assert_eq!(transcript[1].content, REQUEST_FAILED_APOLOGY);
        assert_eq!(transcript[1].phase, TurnPhase::Settled);
        assert_eq!(transcript[0].phase, TurnPhase::Settled);
    }

    #[tokio::test]
    async fn rejected_request_settles_with_apology() {
        let backend = Arc::new(ScriptedBackend::rejecting(ChatError::Transport(
            "model not loaded".into(),
        )));
        let session = ChatSession::new(backend, "test-model");

        session.submit("hello").unwrap();
        session.wait_idle().await;

        let transcript = session.transcript();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[1].content, REQUEST_FAILED_APOLOGY);
        assert_eq!(transcript[1].phase, TurnPhase::Settled);
    }

    #[tokio::test]
    async fn cancel_marks_turn_failed_and_is_idempotent() {
        let release = Arc::new(tokio::sync::Notify::new());
        let backend = Arc::new(BlockingBackend {
            release: Arc::clone(&release),
        });
        let session = ChatSession::new(backend, "test-model");

        // Cancel while idle is a no-op
        session.cancel();
        assert!(session.transcript().is_empty());

        session.submit("hello").unwrap();
        assert!(session.is_busy());
        session.cancel();
        session.cancel();

        assert!(!session.is_busy());
        let transcript = session.transcript();
        assert_eq!(transcript[1].phase, TurnPhase::Failed);
        assert_eq!(transcript[1].content, "");

        // The aborted worker must not resurrect the turn
        release.notify_one();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let transcript = session.transcript();
        assert_eq!(transcript[1].phase, TurnPhase::Failed);
        assert_eq!(transcript[1].content, "");
    }

    #[tokio::test]
    async fn settled_turns_are_sent_on_the_next_submission() {
        let backend = Arc::new(ScriptedBackend::new(vec!["ok"]));
        let session = ChatSession::new(backend, "test-model");

        session.submit("one").unwrap();
        session.wait_idle().await;
        session.submit("two").unwrap();
        session.wait_idle().await;

        let transcript = session.transcript();
        assert_eq!(transcript.len(), 4);
        assert!(transcript.iter().all(|t| t.is_terminal()));
    }
}

//! Streaming session lifecycle and listener fan-out.
//!
//! A [`StreamSession`] opens one streaming response through its
//! [`Subscription`], then hands the response body to a background read-loop
//! task. The loop decodes one line at a time, drops heartbeats, and calls
//! every registered listener synchronously, in registration order.
//!
//! Sessions are single-use: once `Stopped`, a new session (and connection) is
//! required.

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;
use tokio::io::AsyncBufRead;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::rest::{RestClient, RestError, StreamBody};
use crate::stream::decoder::LineDecoder;
use crate::stream::proto::{AccountEventMessage, RateStreamMessage, StreamMessage};

/// Describes what a session subscribes to and how its stream is opened.
pub trait Subscription: Send + Sync + 'static {
    type Message: StreamMessage;

    /// Short feed name used in logs.
    const KIND: &'static str;

    /// Opens the streaming response for this subscription.
    fn open<'a>(
        &'a self,
        rest: &'a RestClient,
    ) -> impl Future<Output = Result<StreamBody, RestError>> + Send + 'a;
}

/// Price ticks for a set of instruments on one account.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RatesSubscription {
    /// Account the prices are quoted for.
    pub account_id: u64,
    /// Instrument names such as `EUR_USD`; must not be empty.
    pub instruments: Vec<String>,
}

impl Subscription for RatesSubscription {
    type Message = RateStreamMessage;

    const KIND: &'static str = "rates";

    fn open<'a>(
        &'a self,
        rest: &'a RestClient,
    ) -> impl Future<Output = Result<StreamBody, RestError>> + Send + 'a {
        rest.open_rates_stream(self.account_id, &self.instruments)
    }
}

/// Transaction events for a set of accounts.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EventsSubscription {
    /// Accounts whose transactions are streamed; must not be empty.
    pub account_ids: Vec<u64>,
}

impl Subscription for EventsSubscription {
    type Message = AccountEventMessage;

    const KIND: &'static str = "events";

    fn open<'a>(
        &'a self,
        rest: &'a RestClient,
    ) -> impl Future<Output = Result<StreamBody, RestError>> + Send + 'a {
        rest.open_events_stream(&self.account_ids)
    }
}

/// Session streaming price ticks.
pub type RatesSession = StreamSession<RatesSubscription>;
/// Session streaming account transactions.
pub type EventsSession = StreamSession<EventsSubscription>;

/// Lifecycle of a [`StreamSession`]; only moves forward.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    /// Constructed, not started.
    Idle,
    /// Connection open, read-loop active.
    Running,
    /// Stop requested; the read-loop has not exited yet.
    Stopping,
    /// Terminal.
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Why a read-loop exited.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StreamTermination {
    /// `stop` was observed.
    Stopped,
    /// The server ended the response.
    Closed,
    /// A read or decode error ended the stream.
    Failed(String),
}

/// Errors returned by [`StreamSession::start`].
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot {operation} a session that is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("failed to open stream: {0}")]
    Connect(#[from] RestError),
}

/// Identifies a registered listener for [`StreamSession::unsubscribe`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ListenerId(u64);

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Listeners<T> {
    entries: RwLock<Vec<(ListenerId, Listener<T>)>>,
    next_id: AtomicU64,
}

impl<T> Listeners<T> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn add(&self, listener: Listener<T>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Calls every listener registered at the time of the call. The lock is
    /// released before any listener runs, so listeners may (un)subscribe.
    fn dispatch(&self, message: &T, kind: &'static str) {
        let snapshot: Vec<Listener<T>> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in snapshot {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(message))).is_err() {
                warn!(event = "stream_listener_panicked", kind);
            }
        }
    }
}

/// Requests shutdown of a session from anywhere.
#[derive(Clone, Debug)]
pub struct StopHandle {
    shutdown: CancellationToken,
    state: Arc<watch::Sender<SessionState>>,
}

impl StopHandle {
    /// Idempotent. `Running` becomes `Stopping`; an `Idle` session becomes
    /// `Stopped` without ever opening a connection.
    pub fn stop(&self) {
        self.state.send_if_modified(|state| match state {
            SessionState::Running => {
                *state = SessionState::Stopping;
                true
            }
            SessionState::Idle => {
                *state = SessionState::Stopped;
                true
            }
            SessionState::Stopping | SessionState::Stopped => false,
        });
        self.shutdown.cancel();
    }
}

/// Single-use streaming session.
pub struct StreamSession<S: Subscription> {
    rest: RestClient,
    subscription: S,
    listeners: Arc<Listeners<S::Message>>,
    stop: StopHandle,
    task: Option<JoinHandle<StreamTermination>>,
}

impl<S: Subscription> StreamSession<S> {
    /// Creates an `Idle` session. Nothing is sent until [`Self::start`].
    pub fn new(rest: RestClient, subscription: S) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            rest,
            subscription,
            listeners: Arc::new(Listeners::new()),
            stop: StopHandle {
                shutdown: CancellationToken::new(),
                state: Arc::new(state),
            },
            task: None,
        }
    }

    /// What this session streams.
    pub fn subscription(&self) -> &S {
        &self.subscription
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.stop.state.borrow()
    }

    /// Receiver that observes every state change, including the read-loop
    /// reaching `Stopped` on its own.
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.stop.state.subscribe()
    }

    /// Cloneable handle that stops this session from another task.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Registers `listener` for every non-heartbeat message.
    ///
    /// Listeners run on the read-loop task and stall it while they run. A
    /// panicking listener is logged and skipped; it does not end the session.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&S::Message) + Send + Sync + 'static,
    {
        self.listeners.add(Arc::new(listener))
    }

    /// Returns `false` when `id` was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Registers a listener that forwards clones of each message into a
    /// channel. Messages sent after the receiver is dropped are discarded.
    pub fn subscribe_channel(&self) -> mpsc::UnboundedReceiver<S::Message>
    where
        S::Message: Clone,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(move |message: &S::Message| {
            let _ = tx.send(message.clone());
        });
        rx
    }

    /// Opens the stream and spawns the read-loop. Returns once the loop is
    /// spawned, without waiting for any message.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        let state = self.state();
        if state != SessionState::Idle {
            return Err(SessionError::InvalidState {
                operation: "start",
                state,
            });
        }

        let body = self.subscription.open(&self.rest).await?;

        // A stop handle may have fired while the connection was opening.
        let started = self.stop.state.send_if_modified(|state| {
            if *state == SessionState::Idle {
                *state = SessionState::Running;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(SessionError::InvalidState {
                operation: "start",
                state: self.state(),
            });
        }

        debug!(event = "stream_session_started", kind = S::KIND);
        self.task = Some(tokio::spawn(read_loop(
            LineDecoder::<_, S::Message>::new(body),
            self.stop.shutdown.clone(),
            Arc::clone(&self.listeners),
            Arc::clone(&self.stop.state),
            S::KIND,
        )));
        Ok(())
    }

    /// Requests shutdown. Idempotent and never fails.
    ///
    /// The read-loop exits at its next iteration boundary; a read blocked on
    /// the network is abandoned and the connection dropped.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Waits for the read-loop to exit. Returns `None` if the session was
    /// never started or has already been joined.
    pub async fn join(&mut self) -> Option<StreamTermination> {
        let task = self.task.take()?;
        Some(match task.await {
            Ok(termination) => termination,
            Err(err) => StreamTermination::Failed(format!("read-loop task failed: {err}")),
        })
    }

    /// `stop` followed by `join`.
    pub async fn stop_and_join(&mut self) -> Option<StreamTermination> {
        self.stop();
        self.join().await
    }
}

impl StreamSession<RatesSubscription> {
    /// Rates session for `instruments` on `account_id`.
    pub fn for_instruments<I, N>(rest: RestClient, account_id: u64, instruments: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        Self::new(
            rest,
            RatesSubscription {
                account_id,
                instruments: instruments.into_iter().map(Into::into).collect(),
            },
        )
    }
}

impl StreamSession<EventsSubscription> {
    /// Events session for `account_ids`.
    pub fn for_accounts<I>(rest: RestClient, account_ids: I) -> Self
    where
        I: IntoIterator<Item = u64>,
    {
        Self::new(
            rest,
            EventsSubscription {
                account_ids: account_ids.into_iter().collect(),
            },
        )
    }
}

impl<S: Subscription> fmt::Debug for StreamSession<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("kind", &S::KIND)
            .field("state", &self.state())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl<S: Subscription> Drop for StreamSession<S> {
    fn drop(&mut self) {
        self.stop.shutdown.cancel();
    }
}

async fn read_loop<R, T>(
    mut decoder: LineDecoder<R, T>,
    shutdown: CancellationToken,
    listeners: Arc<Listeners<T>>,
    state: Arc<watch::Sender<SessionState>>,
    kind: &'static str,
) -> StreamTermination
where
    R: AsyncBufRead + Unpin,
    T: StreamMessage,
{
    let mut delivered: u64 = 0;
    let mut heartbeats: u64 = 0;

    let termination = loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break StreamTermination::Stopped,
            next = decoder.next_message() => next,
        };

        match next {
            Ok(Some(message)) if message.is_heartbeat() => {
                heartbeats += 1;
                trace!(event = "stream_heartbeat", kind);
            }
            Ok(Some(message)) => {
                if shutdown.is_cancelled() {
                    break StreamTermination::Stopped;
                }
                listeners.dispatch(&message, kind);
                delivered += 1;
            }
            Ok(None) => break StreamTermination::Closed,
            Err(err) => break StreamTermination::Failed(err.to_string()),
        }
    };

    // Dropping the decoder closes the connection.
    drop(decoder);
    state.send_replace(SessionState::Stopped);

    match &termination {
        StreamTermination::Failed(reason) => warn!(
            event = "stream_session_failed",
            kind,
            delivered,
            heartbeats,
            reason = reason.as_str()
        ),
        other => debug!(
            event = "stream_session_ended",
            kind,
            delivered,
            heartbeats,
            termination = ?other
        ),
    }
    termination
}

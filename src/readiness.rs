//! Named readiness signals
//!
//! Storage, migration, first-run setup and the web server start as separate
//! async units with no call relationship between them. Each one publishes a
//! [`Signal`] through a shared [`Readiness`] context, and anything that needs
//! that unit finished simply waits on the signal:
//!
//! ```rust,ignore
//! let readiness = Readiness::new();
//!
//! readiness.register(Signal::StorageReady, |_| async move {
//!     StorageHandle::connect("/var/lib/zcms/zcms.sqlite3").await
//! })?;
//!
//! // anywhere else, before or after the producer finishes
//! let storage = readiness.wait_for::<StorageHandle>(Signal::StorageReady).await?;
//! ```
//!
//! Producers are spawned on the tokio runtime the moment they are registered.
//! Each signal settles exactly once; every waiter, early or late, observes the
//! same value or the same error. A signal nobody registers never settles.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, error, info};

// =============================================================================
// Signals
// =============================================================================

/// Readiness events exchanged between startup components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// Storage is connected; value: [`crate::database::StorageHandle`]
    StorageReady,
    /// First-run initialization finished; value: [`crate::bootstrap::InstallOutcome`]
    FullInitDone,
    /// Migration engine finished; value: [`crate::migration::MigrationReport`]
    MigrationDone,
    /// Web server is accepting connections; value: `std::net::SocketAddr`
    WebReady,
}

impl Signal {
    pub const ALL: [Signal; 4] = [
        Signal::StorageReady,
        Signal::FullInitDone,
        Signal::MigrationDone,
        Signal::WebReady,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Signal::StorageReady => "storage-ready",
            Signal::FullInitDone => "full-init-done",
            Signal::MigrationDone => "migration-done",
            Signal::WebReady => "web-ready",
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors observed by producers and waiters of a signal
#[derive(Debug, Clone)]
pub enum ReadinessError {
    /// A producer was already registered for this signal
    AlreadyRegistered(Signal),
    /// The producer returned an error; shared by every waiter
    ProducerFailed {
        signal: Signal,
        cause: Arc<anyhow::Error>,
    },
    /// The producer panicked before settling the signal
    ProducerPanicked(Signal),
    /// The settled value is not of the requested type
    TypeMismatch {
        signal: Signal,
        expected: &'static str,
    },
    /// An opt-in wait deadline elapsed first
    Timeout { signal: Signal, after: Duration },
    /// The registry was torn down while waiting
    Closed(Signal),
}

impl ReadinessError {
    pub fn signal(&self) -> Signal {
        match self {
            ReadinessError::AlreadyRegistered(signal)
            | ReadinessError::ProducerPanicked(signal)
            | ReadinessError::Closed(signal) => *signal,
            ReadinessError::ProducerFailed { signal, .. }
            | ReadinessError::TypeMismatch { signal, .. }
            | ReadinessError::Timeout { signal, .. } => *signal,
        }
    }

    /// The producer's own error, when the producer failed
    pub fn cause(&self) -> Option<&anyhow::Error> {
        match self {
            ReadinessError::ProducerFailed { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReadinessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadinessError::AlreadyRegistered(signal) => {
                write!(f, "a producer is already registered for {}", signal)
            }
            ReadinessError::ProducerFailed { signal, cause } => {
                write!(f, "producer for {} failed: {:#}", signal, cause)
            }
            ReadinessError::ProducerPanicked(signal) => {
                write!(f, "producer for {} panicked", signal)
            }
            ReadinessError::TypeMismatch { signal, expected } => {
                write!(f, "{} did not settle with a value of type {}", signal, expected)
            }
            ReadinessError::Timeout { signal, after } => {
                write!(f, "timed out after {:?} waiting for {}", after, signal)
            }
            ReadinessError::Closed(signal) => {
                write!(f, "readiness registry closed while waiting for {}", signal)
            }
        }
    }
}

impl std::error::Error for ReadinessError {}

// =============================================================================
// Registry
// =============================================================================

type SignalValue = Arc<dyn Any + Send + Sync>;
type Outcome = Result<SignalValue, ReadinessError>;

/// Settle-once cell behind one signal
struct SignalCell {
    state: watch::Sender<Option<Outcome>>,
    registered: AtomicBool,
}

impl SignalCell {
    fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self {
            state,
            registered: AtomicBool::new(false),
        }
    }
}

/// Process-wide readiness context
///
/// Cheap to clone; all clones share the same signals. Create one at process
/// start and hand it to every component that registers or waits.
#[derive(Clone, Default)]
pub struct Readiness {
    cells: Arc<Mutex<HashMap<Signal, Arc<SignalCell>>>>,
}

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cell for `signal`, created on first reference
    fn cell(&self, signal: Signal) -> Arc<SignalCell> {
        let mut cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
        cells
            .entry(signal)
            .or_insert_with(|| Arc::new(SignalCell::new()))
            .clone()
    }

    /// Register the producer of `signal` and start it immediately
    ///
    /// The producer receives a clone of this context so it can wait on the
    /// signals it depends on. Its `Ok` value becomes the signal's value; its
    /// error is shared with every waiter. Must be called within a tokio runtime.
    pub fn register<F, Fut, T>(&self, signal: Signal, producer: F) -> Result<(), ReadinessError>
    where
        F: FnOnce(Readiness) -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Any + Send + Sync,
    {
        let cell = self.cell(signal);
        if cell.registered.swap(true, Ordering::AcqRel) {
            return Err(ReadinessError::AlreadyRegistered(signal));
        }

        let task = match std::panic::catch_unwind(AssertUnwindSafe(|| producer(self.clone()))) {
            Ok(task) => task,
            Err(_) => {
                error!("Producer for {} panicked before starting", signal);
                cell.state
                    .send_replace(Some(Err(ReadinessError::ProducerPanicked(signal))));
                return Ok(());
            }
        };
        debug!("Producer registered for {}", signal);

        tokio::spawn(async move {
            let outcome = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(value)) => {
                    info!("Signal {} completed", signal);
                    Ok(Arc::new(value) as SignalValue)
                }
                Ok(Err(e)) => {
                    error!("Producer for {} failed: {:#}", signal, e);
                    Err(ReadinessError::ProducerFailed {
                        signal,
                        cause: Arc::new(e),
                    })
                }
                Err(_) => {
                    error!("Producer for {} panicked", signal);
                    Err(ReadinessError::ProducerPanicked(signal))
                }
            };
            cell.state.send_replace(Some(outcome));
        });

        Ok(())
    }

    /// Whether `signal` has a registered producer
    pub fn is_registered(&self, signal: Signal) -> bool {
        self.cell(signal).registered.load(Ordering::Acquire)
    }

    /// Whether `signal` has settled, successfully or not
    pub fn is_completed(&self, signal: Signal) -> bool {
        self.cell(signal).state.borrow().is_some()
    }

    async fn settled(&self, signal: Signal) -> Outcome {
        let mut rx = self.cell(signal).state.subscribe();
        let state = rx
            .wait_for(|state| state.is_some())
            .await
            .map_err(|_| ReadinessError::Closed(signal))?;
        match state.as_ref() {
            Some(outcome) => outcome.clone(),
            None => Err(ReadinessError::Closed(signal)),
        }
    }

    /// Suspend until `signal` settles and return its value
    ///
    /// Returns immediately when the signal already settled. Waits indefinitely
    /// for a signal whose producer never finishes or was never registered.
    pub async fn wait_for<T: Any + Send + Sync>(&self, signal: Signal) -> Result<Arc<T>, ReadinessError> {
        self.settled(signal)
            .await?
            .downcast::<T>()
            .map_err(|_| ReadinessError::TypeMismatch {
                signal,
                expected: type_name::<T>(),
            })
    }

    /// Suspend until `signal` settles, discarding its value
    pub async fn wait(&self, signal: Signal) -> Result<(), ReadinessError> {
        self.settled(signal).await.map(|_| ())
    }

    /// [`Readiness::wait_for`] bounded by `timeout`
    pub async fn wait_for_timeout<T: Any + Send + Sync>(
        &self,
        signal: Signal,
        timeout: Duration,
    ) -> Result<Arc<T>, ReadinessError> {
        tokio::time::timeout(timeout, self.wait_for::<T>(signal))
            .await
            .map_err(|_| ReadinessError::Timeout {
                signal,
                after: timeout,
            })?
    }

    /// [`Readiness::wait`] bounded by `timeout`
    pub async fn wait_timeout(&self, signal: Signal, timeout: Duration) -> Result<(), ReadinessError> {
        tokio::time::timeout(timeout, self.wait(signal))
            .await
            .map_err(|_| ReadinessError::Timeout {
                signal,
                after: timeout,
            })?
    }
}

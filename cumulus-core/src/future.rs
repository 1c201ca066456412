use crate::prelude::*;
use parking_lot::Condvar;
use std::sync::Arc;

/// Value of `T` which will arrive at some later point in time.
#[derive(Debug)]
pub struct Future<T = ()> {
    inner: Arc<Inner<T>>,
}

/// Object used to resolve a `Future<T>`.
#[derive(Debug)]
pub struct Promise<T = ()> {
    inner: Arc<Inner<T>>,
}

#[derive(Debug)]
struct Inner<T> {
    cond: Condvar,
    state: Mutex<State<T>>,
}

enum State<T> {
    Empty,
    Completed(T),
    Poisoned,
}

impl<T> std::fmt::Debug for State<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            State::Empty => write!(f, "Empty"),
            State::Completed(_) => write!(f, "Completed(_)"),
            State::Poisoned => write!(f, "Poisoned"),
        }
    }
}

/// Error indicating that a promise was dropped before it was completed.
#[derive(Error, Debug)]
#[error("promise dropped while waiting for future to complete")]
pub struct FutureError;

impl<T> Promise<T> {
    /// Create a new future and promise. The promise should be given to the producer to write
    /// the value while the future must be given to the consumer to read the value.
    pub fn new() -> (Promise<T>, Future<T>) {
        let inner = Arc::new(Inner {
            cond: Condvar::new(),
            state: Mutex::new(State::Empty),
        });

        (
            Promise {
                inner: Arc::clone(&inner),
            },
            Future { inner },
        )
    }

    /// Complete this promise with the given value. This will resolve the associated [`Future`].
    pub fn complete(self, value: T) {
        let mut state = self.inner.state.lock();
        if let State::Empty = &*state {
            *state = State::Completed(value);
            self.inner.cond.notify_all();
        }
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        if let State::Empty = &*state {
            *state = State::Poisoned;
            self.inner.cond.notify_all();
        }
    }
}

impl<T> Future<T> {
    pub fn ready(value: T) -> Self {
        let inner = Arc::new(Inner {
            cond: Condvar::new(),
            state: Mutex::new(State::Completed(value)),
        });

        Future { inner }
    }

    /// Returns whether the value is available without blocking.
    pub fn is_ready(&self) -> bool {
        !matches!(&*self.inner.state.lock(), State::Empty)
    }

    /// Blocks the caller until the value of `T` is available.
    ///
    /// # Panics
    /// Panics if the associated [`Promise`] was dropped without completing it.
    pub fn wait(self) -> T {
        self.wait_or_err().expect("failed to get value from future")
    }

    /// Blocks the caller until the value of `T` is available.
    ///
    /// Returns an error if the associated [`Promise`] was dropped without completing it.
    pub fn wait_or_err(self) -> Result<T, FutureError> {
        let mut state = self.inner.state.lock();
        loop {
            match replace(&mut *state, State::Empty) {
                State::Empty => self.inner.cond.wait(&mut state),
                State::Completed(value) => return Ok(value),
                State::Poisoned => return Err(FutureError),
            }
        }
    }
}

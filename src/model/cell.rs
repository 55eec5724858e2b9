//! Async-readable holders for entity field values.
//!
//! All three flavours are single-threaded: state lives in a `RefCell`.
//! A reader that has to suspend parks a oneshot sender in the cell and is
//! handed the value of the completion (or failure) that wakes it.

use std::cell::{Cell, RefCell};
use std::fmt;

use tokio::sync::oneshot;

use crate::error::{GraphError, Result};

enum State<T> {
    Empty,
    Ready(T),
    Failed(GraphError),
}

/// Shared machinery behind [`OneShot`] and [`Volatile`].
struct Slot<T> {
    state: RefCell<State<T>>,
    waiters: RefCell<Vec<oneshot::Sender<Result<T>>>>,
}

impl<T: Clone> Slot<T> {
    fn new() -> Self {
        Self {
            state: RefCell::new(State::Empty),
            waiters: RefCell::new(Vec::new()),
        }
    }

    fn has_value(&self) -> bool {
        matches!(*self.state.borrow(), State::Ready(_))
    }

    fn read_value(&self) -> Option<T> {
        match &*self.state.borrow() {
            State::Ready(value) => Some(value.clone()),
            _ => None,
        }
    }

    fn failure(&self) -> Option<GraphError> {
        match &*self.state.borrow() {
            State::Failed(err) => Some(err.clone()),
            _ => None,
        }
    }

    fn wake(&self, outcome: Result<T>) {
        let waiters = std::mem::take(&mut *self.waiters.borrow_mut());
        for waiter in waiters {
            // a dropped receiver is a reader that stopped waiting
            let _ = waiter.send(outcome.clone());
        }
    }

    fn put(&self, value: T) {
        *self.state.borrow_mut() = State::Ready(value.clone());
        self.wake(Ok(value));
    }

    fn fail(&self, err: GraphError) {
        {
            let mut state = self.state.borrow_mut();
            if matches!(*state, State::Ready(_)) {
                return;
            }
            *state = State::Failed(err.clone());
        }
        self.wake(Err(err));
    }

    fn clear_failure(&self) {
        let mut state = self.state.borrow_mut();
        if matches!(*state, State::Failed(_)) {
            *state = State::Empty;
        }
    }

    async fn await_value(&self) -> Result<T> {
        loop {
            let rx = {
                match &*self.state.borrow() {
                    State::Ready(value) => return Ok(value.clone()),
                    State::Failed(err) => return Err(err.clone()),
                    State::Empty => {}
                }
                let (tx, rx) = oneshot::channel();
                self.waiters.borrow_mut().push(tx);
                rx
            };
            if let Ok(outcome) = rx.await {
                return outcome;
            }
        }
    }

    /// Waits for the next completion or failure, ignoring any held value.
    async fn await_next(&self) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.waiters.borrow_mut().push(tx);
        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => self.await_value().await,
        }
    }
}

/// Rejected completion of a [`OneShot`] with a value different from the one it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellConflict;

/// A cell completed at most once.
///
/// Completing again with an equal value is a no-op; a different value is
/// rejected with [`CellConflict`] and the held value is kept.
pub struct OneShot<T> {
    slot: Slot<T>,
}

impl<T: Clone + PartialEq> OneShot<T> {
    /// Creates an empty cell.
    pub fn new() -> Self {
        Self { slot: Slot::new() }
    }

    /// Whether the cell holds a value.
    pub fn has_value(&self) -> bool {
        self.slot.has_value()
    }

    /// Non-blocking read of the held value.
    pub fn read_value(&self) -> Option<T> {
        self.slot.read_value()
    }

    /// Failure recorded by the load that was populating this cell, if any.
    pub fn failure(&self) -> Option<GraphError> {
        self.slot.failure()
    }

    /// Suspends until the cell is completed or its load fails.
    pub async fn await_value(&self) -> Result<T> {
        self.slot.await_value().await
    }

    /// Completes the cell. Returns `Ok(true)` when the value was newly set.
    pub fn complete(&self, value: T) -> std::result::Result<bool, CellConflict> {
        if let Some(current) = self.slot.read_value() {
            return if current == value {
                Ok(false)
            } else {
                Err(CellConflict)
            };
        }
        self.slot.put(value);
        Ok(true)
    }

    pub(crate) fn fail(&self, err: GraphError) {
        self.slot.fail(err);
    }

    pub(crate) fn clear_failure(&self) {
        self.slot.clear_failure();
    }
}

impl<T: Clone + PartialEq> Default for OneShot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A cell completed repeatedly, each completion replacing the previous value.
///
/// A reader suspended before the first completion is resumed by the next
/// completion only; it does not observe later replacements. Once a value is
/// present every read returns the latest one immediately, unless a refresh
/// is running: readers then wait for the refresh to settle or fail. A failed
/// refresh keeps the held value and is reported to every reader until the
/// next completion or retry.
pub struct Volatile<T> {
    slot: Slot<T>,
    refreshing: Cell<bool>,
    refresh_failure: RefCell<Option<GraphError>>,
}

impl<T: Clone> Volatile<T> {
    /// Creates an empty cell.
    pub fn new() -> Self {
        Self {
            slot: Slot::new(),
            refreshing: Cell::new(false),
            refresh_failure: RefCell::new(None),
        }
    }

    /// Whether the cell holds a value.
    pub fn has_value(&self) -> bool {
        self.slot.has_value()
    }

    /// Non-blocking read of the latest value.
    pub fn read_value(&self) -> Option<T> {
        self.slot.read_value()
    }

    /// Failure recorded by the load that was populating or refreshing this
    /// cell, if any.
    pub fn failure(&self) -> Option<GraphError> {
        let refresh = self.refresh_failure.borrow().clone();
        refresh.or_else(|| self.slot.failure())
    }

    /// Suspends until the cell holds a value or its load fails.
    pub async fn await_value(&self) -> Result<T> {
        let refresh = self.refresh_failure.borrow().clone();
        if let Some(err) = refresh {
            return Err(err);
        }
        if self.refreshing.get() {
            return self.slot.await_next().await;
        }
        self.slot.await_value().await
    }

    /// Replaces the held value.
    pub fn complete(&self, value: T) {
        self.refreshing.set(false);
        self.refresh_failure.borrow_mut().take();
        self.slot.put(value);
    }

    /// Marks a held value as being refreshed. No-op on an empty cell.
    pub(crate) fn begin_refresh(&self) {
        if self.slot.has_value() {
            self.refreshing.set(true);
        }
    }

    /// Ends a refresh that left the value unchanged, releasing its readers.
    pub(crate) fn settle(&self) {
        if self.refreshing.replace(false) {
            if let Some(value) = self.slot.read_value() {
                self.slot.wake(Ok(value));
            }
        }
    }

    pub(crate) fn fail(&self, err: GraphError) {
        self.refreshing.set(false);
        if self.slot.has_value() {
            *self.refresh_failure.borrow_mut() = Some(err.clone());
            self.slot.wake(Err(err));
        } else {
            self.slot.fail(err);
        }
    }

    pub(crate) fn clear_failure(&self) {
        self.refresh_failure.borrow_mut().take();
        self.slot.clear_failure();
    }
}

impl<T: Clone> Default for Volatile<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A cell seeded with a neutral element and updated through a join function.
///
/// Always readable. `joined` tracks whether anything beyond the seed has been
/// merged in, which the loader uses to decide whether a load is still needed.
pub struct Monotonic<T> {
    value: RefCell<T>,
    join: fn(&T, &T) -> T,
    joined: std::cell::Cell<bool>,
    failure: RefCell<Option<GraphError>>,
}

impl<T: Clone + PartialEq> Monotonic<T> {
    /// Creates a cell holding `zero`.
    pub fn new(zero: T, join: fn(&T, &T) -> T) -> Self {
        Self {
            value: RefCell::new(zero),
            join,
            joined: std::cell::Cell::new(false),
            failure: RefCell::new(None),
        }
    }

    /// Always true: a monotonic cell is readable from creation.
    pub fn has_value(&self) -> bool {
        true
    }

    /// Current joined value.
    pub fn read_value(&self) -> T {
        self.value.borrow().clone()
    }

    /// Returns immediately with the current joined value.
    pub async fn await_value(&self) -> Result<T> {
        Ok(self.read_value())
    }

    /// Whether at least one update has been joined in.
    pub fn is_joined(&self) -> bool {
        self.joined.get()
    }

    /// Failure recorded by the most recent load of this cell, if any.
    pub fn failure(&self) -> Option<GraphError> {
        self.failure.borrow().clone()
    }

    /// Joins `update` into the held value. Returns `true` if the value changed.
    pub fn update(&self, update: &T) -> bool {
        let joined = (self.join)(&self.value.borrow(), update);
        self.joined.set(true);
        self.failure.borrow_mut().take();
        let mut value = self.value.borrow_mut();
        if *value == joined {
            return false;
        }
        *value = joined;
        true
    }

    pub(crate) fn fail(&self, err: GraphError) {
        *self.failure.borrow_mut() = Some(err);
    }

    pub(crate) fn clear_failure(&self) {
        self.failure.borrow_mut().take();
    }
}

impl<T: fmt::Debug + Clone> fmt::Debug for OneShot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.slot.state.borrow() {
            State::Empty => f.write_str("OneShot(<empty>)"),
            State::Ready(v) => write!(f, "OneShot({v:?})"),
            State::Failed(e) => write!(f, "OneShot(<failed: {e}>)"),
        }
    }
}

impl<T: fmt::Debug + Clone> fmt::Debug for Volatile<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.slot.state.borrow() {
            State::Empty => f.write_str("Volatile(<empty>)"),
            State::Ready(v) => write!(f, "Volatile({v:?})"),
            State::Failed(e) => write!(f, "Volatile(<failed: {e}>)"),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Monotonic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Monotonic({:?})", self.value.borrow())
    }
}

//! Cancellation and deadlines for blocking operations.
//!
//! A [Context] is a set of cancellation signals plus an optional deadline.
//! Each signal is the receiving end of a [flume] channel that never carries a
//! message: dropping the matching [CancelHandle] disconnects it, which wakes
//! every thread selecting on it.

use std::thread;
use std::time::{Duration, Instant};

use flume::{Receiver, Selector, Sender};

use crate::{Error, Result};

#[derive(Debug, Clone, Default)]
/// Carries cancellation and a deadline across threads.
///
/// Children created with [Context::with_cancel] or [Context::with_timeout]
/// are cancelled whenever their parent is.
pub struct Context {
    signals: Vec<Receiver<()>>,
    deadline: Option<Instant>,
}

#[derive(Debug)]
/// Cancels the [Context] it was created with.
///
/// Dropping the handle cancels too, so keep it alive as long as the work should run.
pub struct CancelHandle {
    sender: Option<Sender<()>>,
}

impl CancelHandle {
    pub fn cancel(&mut self) {
        self.sender.take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.sender.is_none()
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Returns a child context and the handle that cancels it.
    pub fn with_cancel(&self) -> (Context, CancelHandle) {
        let (sender, receiver) = flume::bounded(0);

        let mut signals = self.signals.clone();
        signals.push(receiver);

        (
            Context {
                signals,
                deadline: self.deadline,
            },
            CancelHandle {
                sender: Some(sender),
            },
        )
    }

    /// Returns a child context expiring after `timeout`, or at the parent's
    /// deadline if that comes first.
    pub fn with_timeout(&self, timeout: Duration) -> Context {
        let deadline = Instant::now() + timeout;

        Context {
            signals: self.signals.clone(),
            deadline: Some(match self.deadline {
                Some(parent) if parent < deadline => parent,
                _ => deadline,
            }),
        }
    }

    // === Getters ===

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline, if any.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.err().is_some()
    }

    /// The reason this context is done, if it is.
    pub fn err(&self) -> Option<Error> {
        if self.signals.iter().any(Receiver::is_disconnected) {
            return Some(Error::Cancelled);
        }

        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Error::Timeout),
            _ => None,
        }
    }

    /// Returns `Err` if the context is done.
    pub fn check(&self) -> Result<()> {
        match self.err() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    // === Public Methods ===

    /// Block on `receiver` until a message arrives, the context is done,
    /// or every sender is gone.
    pub fn recv<T>(&self, receiver: &Receiver<T>) -> Result<T> {
        self.check()?;

        let mut selector =
            Selector::new().recv(receiver, |result| result.map_err(|_| Error::Disconnected));

        for signal in &self.signals {
            selector = selector.recv(signal, |_| Err(Error::Cancelled));
        }

        self.wait(selector)
    }

    /// Block until `message` is accepted by `sender` or the context is done.
    pub fn send<T>(&self, sender: &Sender<T>, message: T) -> Result<()> {
        self.check()?;

        let mut selector = Selector::new().send(sender, message, |result| {
            result.map_err(|_| Error::Disconnected)
        });

        for signal in &self.signals {
            selector = selector.recv(signal, |_| Err(Error::Cancelled));
        }

        self.wait(selector)
    }

    /// Sleep for `duration`, waking early if the context is done.
    ///
    /// Returns `true` if the full duration elapsed with the context still live.
    pub fn sleep(&self, duration: Duration) -> bool {
        let wake = Instant::now() + duration;

        let until = match self.deadline {
            Some(deadline) if deadline < wake => deadline,
            _ => wake,
        };

        if self.signals.is_empty() {
            thread::sleep(until.saturating_duration_since(Instant::now()));
        } else {
            let mut selector = Selector::new();

            for signal in &self.signals {
                selector = selector.recv(signal, |_| ());
            }

            let _ = selector.wait_deadline(until);
        }

        Instant::now() >= wake && !self.is_cancelled()
    }

    // === Private Methods ===

    fn wait<T>(&self, selector: Selector<'_, Result<T>>) -> Result<T> {
        match self.deadline {
            Some(deadline) => selector.wait_deadline(deadline).unwrap_or(Err(Error::Timeout)),
            None => selector.wait(),
        }
    }
}

//! Connection entry: one pooled connection and its readiness state
//!
//! State, handle and last error sit together in one `watch` channel. Every
//! transition is a compare-and-set on the current state, so whichever party
//! settles a `Connecting` entry first (the connect task or a timed-out
//! waiter) wins and everybody else observes the same outcome.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::error::TenantError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Connecting,
    Ready,
    Errored,
    Closed,
}

/// Why an entry never became (or stopped being) usable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectFailure {
    Timeout(Duration),
    Driver(String),
    Closed,
}

impl ConnectFailure {
    pub fn into_error(self, tenant: &str) -> TenantError {
        match self {
            ConnectFailure::Timeout(timeout) => TenantError::ConnectTimeout {
                tenant: tenant.to_string(),
                timeout,
            },
            ConnectFailure::Driver(reason) => TenantError::connect(tenant, reason),
            ConnectFailure::Closed => TenantError::connect(tenant, "connection was closed"),
        }
    }
}

#[derive(Debug)]
struct Slot<C> {
    state: EntryState,
    handle: Option<C>,
    last_error: Option<ConnectFailure>,
}

#[derive(Debug)]
pub struct ConnectionEntry<C> {
    label: String,
    database_name: String,
    created_at: DateTime<Utc>,
    slot: watch::Sender<Slot<C>>,
}

impl<C: Clone> ConnectionEntry<C> {
    /// New entry in `Connecting`
    pub(crate) fn connecting(label: impl Into<String>, database_name: impl Into<String>) -> Self {
        let (slot, _) = watch::channel(Slot {
            state: EntryState::Connecting,
            handle: None,
            last_error: None,
        });

        Self {
            label: label.into(),
            database_name: database_name.into(),
            created_at: Utc::now(),
            slot,
        }
    }

    /// Canonical tenant id, or `core` for the shared database
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> EntryState {
        self.slot.borrow().state
    }

    pub fn last_error(&self) -> Option<ConnectFailure> {
        self.slot.borrow().last_error.clone()
    }

    /// Handle clone, only while `Ready`
    pub(crate) fn handle(&self) -> Option<C> {
        let slot = self.slot.borrow();
        match slot.state {
            EntryState::Ready => slot.handle.clone(),
            _ => None,
        }
    }

    /// `Connecting -> Ready`. Hands the handle back if the entry was already
    /// settled, so the caller can close it instead of leaking it.
    pub(crate) fn mark_ready(&self, handle: C) -> Result<(), C> {
        let mut handle = Some(handle);
        self.slot.send_if_modified(|slot| {
            if slot.state != EntryState::Connecting {
                return false;
            }
            slot.state = EntryState::Ready;
            slot.handle = handle.take();
            true
        });

        match handle {
            None => Ok(()),
            Some(unused) => Err(unused),
        }
    }

    /// `Connecting -> Errored`. Returns whether this call made the transition.
    pub(crate) fn mark_errored(&self, failure: ConnectFailure) -> bool {
        self.slot.send_if_modified(|slot| {
            if slot.state != EntryState::Connecting {
                return false;
            }
            slot.state = EntryState::Errored;
            slot.last_error = Some(failure);
            true
        })
    }

    /// Move to `Closed` and surrender the handle for the caller to close.
    /// A `Connecting` entry passes through `Errored` first.
    pub(crate) fn close(&self) -> Option<C> {
        self.mark_errored(ConnectFailure::Closed);

        let mut taken = None;
        self.slot.send_if_modified(|slot| match slot.state {
            EntryState::Ready | EntryState::Errored => {
                slot.state = EntryState::Closed;
                taken = slot.handle.take();
                true
            }
            EntryState::Connecting | EntryState::Closed => false,
        });
        taken
    }

    /// Block until the entry leaves `Connecting`, at most `timeout`. On
    /// timeout the entry itself is moved to `Errored` so later callers do
    /// not queue behind a connect that will never finish.
    pub(crate) async fn wait_ready(&self, timeout: Duration) -> Result<C, ConnectFailure> {
        let mut rx = self.slot.subscribe();
        let settled = tokio::time::timeout(timeout, async move {
            rx.wait_for(|slot| slot.state != EntryState::Connecting)
                .await
                .map(|_| ())
        })
        .await;

        if settled.is_err() {
            self.mark_errored(ConnectFailure::Timeout(timeout));
        }

        self.outcome()
    }

    fn outcome(&self) -> Result<C, ConnectFailure> {
        let slot = self.slot.borrow();
        match slot.state {
            EntryState::Ready => slot.handle.clone().ok_or(ConnectFailure::Closed),
            EntryState::Errored => Err(slot
                .last_error
                .clone()
                .unwrap_or_else(|| ConnectFailure::Driver("unknown connect failure".into()))),
            EntryState::Closed => Err(ConnectFailure::Closed),
            EntryState::Connecting => Err(ConnectFailure::Driver(
                "connection is still being established".into(),
            )),
        }
    }
}

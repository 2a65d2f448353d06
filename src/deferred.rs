//! The deferred value state machine.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::Waker;

use parking_lot::Mutex;

use crate::capability::ConstructorRef;
use crate::host::RejectionOperation;
use crate::job::Job;
use crate::reaction::Reaction;
use crate::{Runtime, Value};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredState {
    Pending,
    Fulfilled,
    Rejected,
}

impl DeferredState {
    pub fn is_settled(self) -> bool {
        self != DeferredState::Pending
    }
}

pub(crate) struct Slots {
    pub(crate) state: DeferredState,
    pub(crate) result: Value,
    /// Emptied for good at settlement.
    pub(crate) fulfill_reactions: Vec<Reaction>,
    pub(crate) reject_reactions: Vec<Reaction>,
    pub(crate) is_handled: bool,
    pub(crate) wakers: Vec<Waker>,
    properties: BTreeMap<String, Value>,
    constructor: Option<ConstructorRef>,
}

struct Shared {
    id: u64,
    slots: Mutex<Slots>,
}

/// A handle to one deferred value. Clones share the same value and compare
/// equal by identity.
#[derive(Clone)]
pub struct Deferred {
    shared: Arc<Shared>,
}

impl Deferred {
    pub(crate) fn pending(constructor: Option<ConstructorRef>) -> Self {
        Deferred {
            shared: Arc::new(Shared {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                slots: Mutex::new(Slots {
                    state: DeferredState::Pending,
                    result: Value::Undefined,
                    fulfill_reactions: Vec::new(),
                    reject_reactions: Vec::new(),
                    is_handled: false,
                    wakers: Vec::new(),
                    properties: BTreeMap::new(),
                    constructor,
                }),
            }),
        }
    }

    /// Process-unique, for diagnostics.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn state(&self) -> DeferredState {
        self.shared.slots.lock().state
    }

    /// The fulfillment value or rejection reason; `None` while pending.
    pub fn result(&self) -> Option<Value> {
        let slots = self.shared.slots.lock();
        slots.state.is_settled().then(|| slots.result.clone())
    }

    pub fn is_handled(&self) -> bool {
        self.shared.slots.lock().is_handled
    }

    /// The constructor that built this value, if any.
    pub fn constructor(&self) -> Option<ConstructorRef> {
        self.shared.slots.lock().constructor.clone()
    }

    pub fn set_constructor(&self, constructor: Option<ConstructorRef>) {
        self.shared.slots.lock().constructor = constructor;
    }

    /// An own property shadowing the intrinsic methods, e.g. a replaced `then`.
    pub fn property(&self, key: &str) -> Option<Value> {
        self.shared.slots.lock().properties.get(key).cloned()
    }

    pub fn set_property(&self, key: &str, value: impl Into<Value>) {
        self.shared
            .slots
            .lock()
            .properties
            .insert(key.to_owned(), value.into());
    }

    pub fn ptr_eq(&self, other: &Deferred) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn lock(&self) -> parking_lot::MutexGuard<'_, Slots> {
        self.shared.slots.lock()
    }

    pub(crate) fn fulfill(&self, rt: &Runtime, value: Value) {
        self.settle(rt, DeferredState::Fulfilled, value);
    }

    pub(crate) fn reject(&self, rt: &Runtime, reason: Value) {
        self.settle(rt, DeferredState::Rejected, reason);
    }

    fn settle(&self, rt: &Runtime, state: DeferredState, result: Value) {
        let (reactions, wakers, was_handled) = {
            let mut slots = self.lock();
            debug_assert_eq!(slots.state, DeferredState::Pending);
            let fulfill = std::mem::take(&mut slots.fulfill_reactions);
            let reject = std::mem::take(&mut slots.reject_reactions);
            slots.state = state;
            slots.result = result.clone();
            let reactions = match state {
                DeferredState::Rejected => reject,
                _ => fulfill,
            };
            (reactions, std::mem::take(&mut slots.wakers), slots.is_handled)
        };
        tracing::trace!(
            deferred = self.id(),
            ?state,
            reactions = reactions.len(),
            "settled"
        );
        if state == DeferredState::Rejected && !was_handled {
            rt.host().rejection_tracker(self, RejectionOperation::Reject);
        }
        for reaction in reactions {
            rt.enqueue(Job::Reaction {
                reaction,
                argument: result.clone(),
            });
        }
        for waker in wakers {
            waker.wake();
        }
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

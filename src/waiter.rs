//! Awaiting a deferred value from Rust async code.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::deferred::DeferredState;
use crate::host::RejectionOperation;
use crate::{Deferred, Runtime, Value};

/// Resolves with `Ok(value)` on fulfillment and `Err(reason)` on rejection.
///
/// Every waiter of the same deferred value is woken when it settles. Someone
/// still has to drain the runtime's job queue for settlement to happen.
#[derive(Debug)]
pub struct Settled {
    deferred: Deferred,
    runtime: Runtime,
}

impl Deferred {
    /// A future over this value's settlement. Awaiting counts as handling a
    /// rejection.
    pub fn settled(&self, rt: &Runtime) -> Settled {
        Settled {
            deferred: self.clone(),
            runtime: rt.clone(),
        }
    }
}

impl Future for Settled {
    type Output = Result<Value, Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let (reason, late_handle) = {
            let mut slots = self.deferred.lock();
            let was_handled = std::mem::replace(&mut slots.is_handled, true);
            match slots.state {
                DeferredState::Pending => {
                    if !slots.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                        slots.wakers.push(cx.waker().clone());
                    }
                    return Poll::Pending;
                }
                DeferredState::Fulfilled => return Poll::Ready(Ok(slots.result.clone())),
                DeferredState::Rejected => (slots.result.clone(), !was_handled),
            }
        };
        if late_handle {
            self.runtime
                .host()
                .rejection_tracker(&self.deferred, RejectionOperation::Handle);
        }
        Poll::Ready(Err(reason))
    }
}

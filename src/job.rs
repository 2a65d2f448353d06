//! Units of work placed on the runtime's job queue.

use std::fmt;

use crate::foreign::adopt_foreign;
use crate::reaction::Reaction;
use crate::{Deferred, Function, Runtime, Value};

pub enum Job {
    /// Runs a settled reaction's handler and feeds the outcome downstream.
    Reaction { reaction: Reaction, argument: Value },
    /// Drives a foreign `then` method with fresh resolving functions for
    /// `target`.
    AdoptForeign {
        target: Deferred,
        thenable: Value,
        then: Function,
    },
    /// Arbitrary host work, e.g. a simulated timer firing.
    Host(Box<dyn FnOnce(&Runtime) + Send>),
}

impl Job {
    pub(crate) fn run(self, rt: &Runtime) {
        match self {
            Job::Reaction { reaction, argument } => reaction.run(argument),
            Job::AdoptForeign {
                target,
                thenable,
                then,
            } => adopt_foreign(rt, &target, &thenable, &then),
            Job::Host(f) => f(rt),
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::Reaction { reaction, argument } => f
                .debug_struct("Reaction")
                .field("kind", &reaction.kind())
                .field("argument", argument)
                .finish(),
            Job::AdoptForeign { target, .. } => f
                .debug_struct("AdoptForeign")
                .field("target", target)
                .finish(),
            Job::Host(_) => f.write_str("Host"),
        }
    }
}

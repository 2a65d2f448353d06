//! Adoption of foreign thenables: any value with a callable `then` can
//! settle one of our deferred values.

use crate::resolving::ResolvingFunctions;
use crate::{Deferred, Function, Runtime, Value};

/// Calls `then` on `thenable` with a resolve/reject pair bound to `target`.
/// A throw from `then` rejects `target` unless one of the pair already ran.
pub fn adopt_foreign(rt: &Runtime, target: &Deferred, thenable: &Value, then: &Function) {
    let resolvers = ResolvingFunctions::new(rt, target);
    let (resolve, reject) = resolvers.functions();
    if let Err(thrown) = then.call(thenable, &[Value::Function(resolve), Value::Function(reject)]) {
        resolvers.reject(thrown);
    }
}

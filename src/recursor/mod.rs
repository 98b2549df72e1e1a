//! Full recursive resolution, the last link in the responder chain
//! (§4.F). Disabled by default; a zone opts in with `recursion_enabled:
//! true`. Two backends: `stub`, which always misses (used when the
//! binary is built without the `recursor-hickory` feature, or in tests),
//! and `hickory`, a real iterative/recursive resolver.

pub mod stub;

#[cfg(feature = "recursor-hickory")]
pub mod hickory;

use crate::zone::responder::{Answer, Question, Transport};

/// Returns `(answer, found)` rather than `Option<Answer>` so a resolved
/// NXDOMAIN (a real, authoritative "no such name" answer) is
/// distinguishable from "this backend has nothing to say" -- the latter
/// falls through to SERVFAIL, the former is the final reply.
#[async_trait::async_trait]
pub trait Recursor: Send + Sync {
    async fn handle_recursive(&self, question: &Question, transport: Transport) -> (Option<Answer>, bool);
}

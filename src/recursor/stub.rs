//! Always-miss backend. Used when `recursor-hickory` is disabled at
//! build time and a config still sets `recursion_enabled: true` -- in
//! that case startup fails with `ErrorKind::RecursionUnsupported`
//! (§3 Lifecycle) rather than silently running this backend, so in
//! practice this only ever runs in tests.

use super::Recursor;
use crate::zone::responder::{Answer, Question, Transport};

pub struct StubRecursor;

impl StubRecursor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StubRecursor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Recursor for StubRecursor {
    async fn handle_recursive(&self, _question: &Question, _transport: Transport) -> (Option<Answer>, bool) {
        (None, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_never_finds_anything() {
        let recursor = StubRecursor::new();
        let question = Question::new("example.com.", crate::zone::responder::QType::A, true);
        let (answer, found) = recursor.handle_recursive(&question, Transport::Udp).await;
        assert!(answer.is_none());
        assert!(!found);
    }
}

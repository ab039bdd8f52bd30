//! Cooperative cancellation: the engine checks a cancel token at the top of
//! each bar; on cancel, it stops as if it had hit end of data. Built on
//! `tokio_util`'s `CancellationToken`, which gates a purely synchronous loop
//! here rather than an async task — the same atomic-flag-plus-child-token
//! shape fits either way: cheap to clone, cheap to check, no polling
//! required.

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct CancelToken(CancellationToken);

impl CancelToken {
    pub fn new() -> Self {
        Self(CancellationToken::new())
    }

    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    pub fn child_token(&self) -> Self {
        Self(self.0.child_token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uncancelled_and_latches_once_cancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }
}

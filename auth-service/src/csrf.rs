use subtle::ConstantTimeEq;

use crate::error::{FlowError, FlowResult};
use crate::tokens::random_token;

/// Double-submit guard: a token minted for the anonymous session must
/// accompany every state-changing call and match the session-bound value.
/// Comparison is constant-time; mismatch aborts before any provider runs.
#[derive(Debug, Clone, Copy)]
pub struct CsrfGuard {
    enabled: bool,
}

impl CsrfGuard {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn mint(&self) -> String {
        random_token()
    }

    pub fn verify(&self, expected: Option<&str>, presented: Option<&str>) -> FlowResult<()> {
        if !self.enabled {
            return Ok(());
        }
        match (expected, presented) {
            (Some(expected), Some(presented)) if constant_time_eq(expected, presented) => Ok(()),
            _ => Err(FlowError::InvalidCsrf),
        }
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_tokens_pass() {
        let guard = CsrfGuard::new(true);
        let token = guard.mint();
        guard
            .verify(Some(&token), Some(&token))
            .expect("matching tokens");
    }

    #[test]
    fn mismatch_and_absence_are_rejected() {
        let guard = CsrfGuard::new(true);
        let token = guard.mint();
        assert!(matches!(
            guard.verify(Some(&token), Some("forged")),
            Err(FlowError::InvalidCsrf)
        ));
        assert!(matches!(
            guard.verify(Some(&token), None),
            Err(FlowError::InvalidCsrf)
        ));
        assert!(matches!(
            guard.verify(None, Some(&token)),
            Err(FlowError::InvalidCsrf)
        ));
    }

    #[test]
    fn disabled_guard_accepts_anything() {
        let guard = CsrfGuard::new(false);
        guard.verify(None, None).expect("disabled guard");
    }
}

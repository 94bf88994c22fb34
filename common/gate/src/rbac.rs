use common_auth::AuthPrincipal;
use serde::{Deserialize, Serialize};

use crate::context::GateContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// At least one listed role must match.
    Any,
    /// Every listed role must match.
    All,
}

/// Declarative role rule. `allow_guest` passes when there is no authenticated
/// principal at all, which is distinct from a principal with zero matching
/// roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RbacAbility {
    pub roles: Vec<String>,
    pub match_mode: MatchMode,
    #[serde(default)]
    pub allow_guest: bool,
}

impl RbacAbility {
    pub fn role(name: impl Into<String>) -> Self {
        Self {
            roles: vec![name.into()],
            match_mode: MatchMode::Any,
            allow_guest: false,
        }
    }

    pub fn any<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
            match_mode: MatchMode::Any,
            allow_guest: false,
        }
    }

    pub fn all<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
            match_mode: MatchMode::All,
            allow_guest: false,
        }
    }

    pub fn allow_guest(mut self) -> Self {
        self.allow_guest = true;
        self
    }

    pub fn evaluate(&self, principal: Option<&AuthPrincipal>) -> bool {
        let Some(principal) = principal else {
            return self.allow_guest;
        };
        match self.match_mode {
            MatchMode::Any => self.roles.iter().any(|role| principal.has_role(role)),
            MatchMode::All => self.roles.iter().all(|role| principal.has_role(role)),
        }
    }

    pub fn into_evaluator(self) -> impl Fn(&GateContext) -> bool + Send + Sync {
        move |ctx| self.evaluate(ctx.principal.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_roles(roles: &[&str]) -> AuthPrincipal {
        AuthPrincipal::new("p-1")
            .expect("principal")
            .with_roles(roles.iter().copied())
    }

    #[test]
    fn all_requires_every_role() {
        let ability = RbacAbility::all(["a", "b"]);
        assert!(ability.evaluate(Some(&with_roles(&["a", "b", "c"]))));
        assert!(!ability.evaluate(Some(&with_roles(&["a"]))));
    }

    #[test]
    fn any_requires_at_least_one_role() {
        let ability = RbacAbility::any(["a", "b"]);
        assert!(ability.evaluate(Some(&with_roles(&["b"]))));
        assert!(!ability.evaluate(Some(&with_roles(&["c"]))));
    }

    #[test]
    fn allow_guest_passes_only_without_principal() {
        let ability = RbacAbility::role("admin").allow_guest();
        assert!(ability.evaluate(None));
        // A principal with no matching roles is still denied.
        assert!(!ability.evaluate(Some(&with_roles(&["viewer"]))));
        assert!(ability.evaluate(Some(&with_roles(&["admin"]))));
    }

    #[test]
    fn guest_denied_by_default() {
        assert!(!RbacAbility::role("admin").evaluate(None));
    }
}

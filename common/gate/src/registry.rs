use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::warn;

use crate::context::{GateContext, GateEvaluation, GateObserver};
use crate::error::{GateError, GateResult};
use crate::rbac::RbacAbility;

type Evaluator = Arc<dyn Fn(&GateContext) -> bool + Send + Sync>;

struct Registration {
    evaluator: Evaluator,
}

/// Ability evaluation engine. Constructed at startup and threaded through
/// application state; populated during boot, read on every request.
///
/// Plain `register` rejects a name that is already taken so independently
/// initializing modules cannot silently clobber each other;
/// `register_managed` is the explicit override-eligible path and the newer
/// evaluator wins.
#[derive(Default)]
pub struct GateRegistry {
    abilities: RwLock<HashMap<String, Registration>>,
    observers: RwLock<Vec<Arc<dyn GateObserver>>>,
}

impl GateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, name: impl Into<String>, evaluator: F) -> GateResult<()>
    where
        F: Fn(&GateContext) -> bool + Send + Sync + 'static,
    {
        let name = name.into();
        let mut guard = self.abilities.write().expect("rwlock poisoned");
        if guard.contains_key(&name) {
            return Err(GateError::DuplicateAbility(name));
        }
        guard.insert(
            name,
            Registration {
                evaluator: Arc::new(evaluator),
            },
        );
        Ok(())
    }

    pub fn register_managed<F>(&self, name: impl Into<String>, evaluator: F)
    where
        F: Fn(&GateContext) -> bool + Send + Sync + 'static,
    {
        let name = name.into();
        let mut guard = self.abilities.write().expect("rwlock poisoned");
        guard.insert(
            name,
            Registration {
                evaluator: Arc::new(evaluator),
            },
        );
    }

    pub fn register_role_ability(
        &self,
        name: impl Into<String>,
        ability: RbacAbility,
    ) -> GateResult<()> {
        self.register(name, ability.into_evaluator())
    }

    pub fn register_role_ability_managed(&self, name: impl Into<String>, ability: RbacAbility) {
        self.register_managed(name, ability.into_evaluator());
    }

    pub fn contains(&self, name: &str) -> bool {
        let guard = self.abilities.read().expect("rwlock poisoned");
        guard.contains_key(name)
    }

    pub fn ability_names(&self) -> Vec<String> {
        let guard = self.abilities.read().expect("rwlock poisoned");
        let mut names = guard.keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }

    pub fn observe(&self, observer: Arc<dyn GateObserver>) {
        let mut guard = self.observers.write().expect("rwlock poisoned");
        guard.push(observer);
    }

    /// Non-throwing check. An unregistered ability is denied.
    pub fn can(&self, ability: &str, ctx: &GateContext) -> bool {
        self.evaluate(ability, ctx)
    }

    /// Throwing check for uniform short-circuiting in route handlers; the
    /// denial carries the ability name.
    pub fn authorize(&self, ability: &str, ctx: &GateContext) -> GateResult<()> {
        if self.evaluate(ability, ctx) {
            Ok(())
        } else {
            Err(GateError::Denied {
                ability: ability.to_string(),
                principal: ctx.principal.as_ref().map(|principal| principal.id.clone()),
            })
        }
    }

    fn evaluate(&self, ability: &str, ctx: &GateContext) -> bool {
        let evaluator = {
            let guard = self.abilities.read().expect("rwlock poisoned");
            guard.get(ability).map(|reg| reg.evaluator.clone())
        };

        let allowed = match evaluator {
            Some(evaluator) => evaluator(ctx),
            None => {
                warn!(ability, "gate check against unregistered ability");
                false
            }
        };

        let evaluation = GateEvaluation {
            ability: ability.to_string(),
            allowed,
            principal: ctx.principal.clone(),
            payload: ctx.payload_handle(),
        };
        let observers = {
            let guard = self.observers.read().expect("rwlock poisoned");
            guard.clone()
        };
        for observer in observers {
            observer.on_evaluation(&evaluation);
        }

        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common_auth::AuthPrincipal;
    use std::sync::Mutex;

    fn admin_ctx() -> GateContext {
        GateContext::for_principal(
            AuthPrincipal::new("admin-1")
                .expect("principal")
                .with_roles(["admin"]),
        )
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = GateRegistry::new();
        registry.register("reports.view", |_| true).expect("first");
        let err = registry
            .register("reports.view", |_| false)
            .expect_err("second must fail");
        assert_eq!(err.code(), "duplicate_ability");
        // The original evaluator stays in place.
        assert!(registry.can("reports.view", &GateContext::guest()));
    }

    #[test]
    fn managed_registration_replaces_evaluator() {
        let registry = GateRegistry::new();
        registry.register("reports.view", |_| true).expect("first");
        registry.register_managed("reports.view", |_| false);
        assert!(!registry.can("reports.view", &GateContext::guest()));
    }

    #[test]
    fn authorize_raises_with_ability_name() {
        let registry = GateRegistry::new();
        registry
            .register_role_ability("orders.delete", RbacAbility::role("admin"))
            .expect("register");

        registry
            .authorize("orders.delete", &admin_ctx())
            .expect("admin allowed");

        let err = registry
            .authorize("orders.delete", &GateContext::guest())
            .expect_err("guest denied");
        match err {
            GateError::Denied { ability, principal } => {
                assert_eq!(ability, "orders.delete");
                assert_eq!(principal, None);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unknown_ability_is_denied() {
        let registry = GateRegistry::new();
        assert!(!registry.can("nope", &admin_ctx()));
    }

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<(String, bool)>>,
    }

    impl GateObserver for Recording {
        fn on_evaluation(&self, evaluation: &GateEvaluation) {
            self.seen
                .lock()
                .expect("mutex poisoned")
                .push((evaluation.ability.clone(), evaluation.allowed));
        }
    }

    #[test]
    fn every_evaluation_reaches_observers() {
        let registry = GateRegistry::new();
        registry
            .register_role_ability("reports.view", RbacAbility::role("admin"))
            .expect("register");
        let observer = Arc::new(Recording::default());
        registry.observe(observer.clone());

        assert!(registry.can("reports.view", &admin_ctx()));
        assert!(!registry.can("reports.view", &GateContext::guest()));
        let _ = registry.authorize("reports.view", &GateContext::guest());

        let seen = observer.seen.lock().expect("mutex poisoned");
        assert_eq!(
            *seen,
            vec![
                ("reports.view".to_string(), true),
                ("reports.view".to_string(), false),
                ("reports.view".to_string(), false),
            ]
        );
    }
}

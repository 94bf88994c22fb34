use std::any::Any;
use std::sync::Arc;

use common_auth::AuthPrincipal;

use crate::error::GateResult;
use crate::registry::GateRegistry;

/// Fine-grained per-resource-type authorization rules beyond plain roles.
/// `can_create` takes no resource instance; creation is judged on the
/// principal alone.
pub trait ResourcePolicy<R>: Send + Sync
where
    R: Any + Send + Sync,
{
    fn can_view(&self, principal: Option<&AuthPrincipal>, resource: Option<&R>) -> bool;
    fn can_create(&self, principal: Option<&AuthPrincipal>) -> bool;
    fn can_update(&self, principal: Option<&AuthPrincipal>, resource: Option<&R>) -> bool;
    fn can_delete(&self, principal: Option<&AuthPrincipal>, resource: Option<&R>) -> bool;
}

/// Register the four canonical abilities (`<prefix>.view/create/update/delete`)
/// backed by one policy object. The resource instance travels through the
/// evaluation context payload and is downcast back to `R` here.
pub fn bind_policy<R, P>(registry: &GateRegistry, prefix: &str, policy: P) -> GateResult<()>
where
    R: Any + Send + Sync,
    P: ResourcePolicy<R> + 'static,
{
    let policy = Arc::new(policy);

    let view = policy.clone();
    registry.register(format!("{prefix}.view"), move |ctx| {
        view.can_view(ctx.principal.as_ref(), ctx.payload_ref::<R>())
    })?;

    let create = policy.clone();
    registry.register(format!("{prefix}.create"), move |ctx| {
        create.can_create(ctx.principal.as_ref())
    })?;

    let update = policy.clone();
    registry.register(format!("{prefix}.update"), move |ctx| {
        update.can_update(ctx.principal.as_ref(), ctx.payload_ref::<R>())
    })?;

    let delete = policy;
    registry.register(format!("{prefix}.delete"), move |ctx| {
        delete.can_delete(ctx.principal.as_ref(), ctx.payload_ref::<R>())
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::GateContext;

    struct Document {
        owner_id: String,
    }

    struct DocumentPolicy;

    impl ResourcePolicy<Document> for DocumentPolicy {
        fn can_view(&self, principal: Option<&AuthPrincipal>, _resource: Option<&Document>) -> bool {
            principal.is_some()
        }

        fn can_create(&self, principal: Option<&AuthPrincipal>) -> bool {
            principal
                .map(|principal| principal.has_role("author"))
                .unwrap_or(false)
        }

        fn can_update(&self, principal: Option<&AuthPrincipal>, resource: Option<&Document>) -> bool {
            match (principal, resource) {
                (Some(principal), Some(document)) => principal.id == document.owner_id,
                _ => false,
            }
        }

        fn can_delete(&self, principal: Option<&AuthPrincipal>, resource: Option<&Document>) -> bool {
            self.can_update(principal, resource)
        }
    }

    fn ctx_for(id: &str) -> GateContext {
        GateContext::for_principal(
            AuthPrincipal::new(id).expect("principal").with_roles(["author"]),
        )
    }

    #[test]
    fn update_allows_owner_and_denies_others() {
        let registry = GateRegistry::new();
        bind_policy(&registry, "documents", DocumentPolicy).expect("bind");

        let document = Document {
            owner_id: "owner-1".into(),
        };
        let owner = ctx_for("owner-1").with_payload(document);
        assert!(registry.can("documents.update", &owner));

        let document = Document {
            owner_id: "owner-1".into(),
        };
        let intruder = ctx_for("someone-else").with_payload(document);
        assert!(!registry.can("documents.update", &intruder));
    }

    #[test]
    fn create_is_judged_on_principal_alone() {
        let registry = GateRegistry::new();
        bind_policy(&registry, "documents", DocumentPolicy).expect("bind");

        assert!(registry.can("documents.create", &ctx_for("anyone")));
        assert!(!registry.can("documents.create", &GateContext::guest()));
    }

    #[test]
    fn binding_registers_all_four_abilities() {
        let registry = GateRegistry::new();
        bind_policy(&registry, "documents", DocumentPolicy).expect("bind");
        for action in ["view", "create", "update", "delete"] {
            assert!(registry.contains(&format!("documents.{action}")));
        }
    }

    #[test]
    fn binding_twice_conflicts() {
        let registry = GateRegistry::new();
        bind_policy(&registry, "documents", DocumentPolicy).expect("first");
        assert!(bind_policy(&registry, "documents", DocumentPolicy).is_err());
    }
}

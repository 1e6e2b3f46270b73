//! Approver resolution.
//!
//! Turns the abstract [`ApproverSpec`] of a level into the concrete set of
//! approvers who may decide it right now. Resolution happens against the
//! live directory on every decision, so role and department changes take
//! effect immediately; recorded delegations then rewrite the resolved set.

use crate::directory::IdentityDirectory;
use crate::error::{EngineError, EngineResult};
use approval_types::{
    ApprovalContext, ApprovalInstance, ApproverId, ApproverSpec, LevelDefinition, TenantId,
};
use std::sync::Arc;

/// Roles that may decide any level regardless of its approver spec.
const OVERRIDE_ROLES: [&str; 2] = ["admin", "super-admin"];

/// Resolves approver specifications to eligible identities.
#[derive(Clone)]
pub struct EligibilityResolver {
    directory: Arc<dyn IdentityDirectory>,
}

impl EligibilityResolver {
    pub fn new(directory: Arc<dyn IdentityDirectory>) -> Self {
        Self { directory }
    }

    /// Resolves a spec against the instance context. An empty result is
    /// a definition problem and fails loudly rather than silently
    /// skipping the level.
    pub async fn resolve(
        &self,
        spec: &ApproverSpec,
        context: &ApprovalContext,
    ) -> EngineResult<Vec<ApproverId>> {
        let tenant = &context.tenant_id;
        let resolved = match spec {
            ApproverSpec::User { ids } => {
                let mut active = Vec::with_capacity(ids.len());
                for id in ids {
                    if self.directory.is_active(tenant, id).await? {
                        active.push(id.clone());
                    }
                }
                active
            }
            ApproverSpec::Role { role } => self.directory.users_with_role(tenant, role).await?,
            ApproverSpec::Department { department, role } => {
                let department = department
                    .as_deref()
                    .or(context.requester_department.as_deref())
                    .ok_or_else(|| {
                        EngineError::configuration(
                            "department spec has no department and the requester has none",
                        )
                    })?;
                self.directory
                    .department_approvers(tenant, department, role.as_deref())
                    .await?
            }
            ApproverSpec::Dynamic { expression } => {
                self.directory
                    .resolve_expression(tenant, expression, context)
                    .await?
            }
        };

        let resolved = dedup_in_order(resolved);
        if resolved.is_empty() {
            return Err(EngineError::configuration(format!(
                "{} approver spec resolved to no active approvers",
                spec.kind()
            )));
        }
        Ok(resolved)
    }

    /// The eligible set for a level after applying recorded delegations.
    ///
    /// Delegations are replayed in submission order: each one hands the
    /// delegator's slot (position included, which matters for sequential
    /// levels) to the delegate. A delegation whose delegator no longer
    /// holds a slot is ignored; a delegate who already holds a slot does
    /// not gain a second one.
    pub async fn effective_eligible(
        &self,
        instance: &ApprovalInstance,
        level: &LevelDefinition,
    ) -> EngineResult<Vec<ApproverId>> {
        let mut eligible = self.resolve(&level.approver_spec, &instance.context).await?;
        for delegation in instance.delegations_for(level.level) {
            let Some(to) = delegation.delegate_to.as_ref() else {
                continue;
            };
            let Some(pos) = eligible.iter().position(|a| a == &delegation.approver) else {
                continue;
            };
            if eligible.contains(to) {
                eligible.remove(pos);
            } else {
                eligible[pos] = to.clone();
            }
        }
        Ok(eligible)
    }

    /// Whether `actor` may decide this level right now. Checked at
    /// decision time, not just at level entry, so directory drift counts.
    /// Admin and super-admin role holders pass regardless of the
    /// approver spec.
    pub async fn is_eligible(
        &self,
        instance: &ApprovalInstance,
        level: &LevelDefinition,
        actor: &ApproverId,
    ) -> EngineResult<bool> {
        if actor.is_system() {
            return Ok(true);
        }
        if self
            .effective_eligible(instance, level)
            .await?
            .contains(actor)
        {
            return Ok(true);
        }
        self.has_override_role(instance.tenant_id(), actor).await
    }

    /// Whether the actor holds one of the administrative override roles.
    pub async fn has_override_role(
        &self,
        tenant: &TenantId,
        actor: &ApproverId,
    ) -> EngineResult<bool> {
        for role in OVERRIDE_ROLES {
            if self.directory.has_role(tenant, actor, role).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Whether the actor exists and is active in the directory.
    pub async fn is_active(&self, tenant: &TenantId, actor: &ApproverId) -> EngineResult<bool> {
        self.directory.is_active(tenant, actor).await
    }
}

fn dedup_in_order(ids: Vec<ApproverId>) -> Vec<ApproverId> {
    let mut seen = std::collections::HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{DirectoryUser, StaticDirectory};
    use approval_types::{
        ApprovalMode, Decision, DecisionAction, SubjectRef, TenantId, WorkflowDefinition,
    };

    fn tenant() -> TenantId {
        TenantId::new("acme")
    }

    fn directory() -> Arc<StaticDirectory> {
        Arc::new(
            StaticDirectory::new()
                .with_user(DirectoryUser::new(tenant(), "alice").with_role("finance"))
                .with_user(DirectoryUser::new(tenant(), "bob").with_role("finance"))
                .with_user(DirectoryUser::new(tenant(), "carol"))
                .with_user(DirectoryUser::new(tenant(), "dora").deactivated())
                .with_user(
                    DirectoryUser::new(tenant(), "mgr-1")
                        .in_department("engineering")
                        .as_manager(),
                )
                .with_user(DirectoryUser::new(tenant(), "root").with_role("admin")),
        )
    }

    fn context() -> ApprovalContext {
        ApprovalContext::new(tenant(), ApproverId::new("dev-1")).with_department("engineering")
    }

    fn instance_with_level(spec: ApproverSpec) -> ApprovalInstance {
        let mut definition = WorkflowDefinition::new("review");
        definition
            .add_level(LevelDefinition::new(
                1,
                "Review",
                spec,
                ApprovalMode::All,
            ))
            .unwrap();
        let mut instance = ApprovalInstance::new(
            definition,
            SubjectRef::new("change_request", "chg-1"),
            context(),
        );
        instance.enter_level(1, None);
        instance
    }

    #[tokio::test]
    async fn user_spec_keeps_order_and_drops_inactive() {
        let resolver = EligibilityResolver::new(directory());
        let spec = ApproverSpec::users(["bob", "dora", "alice", "bob"]);
        let resolved = resolver.resolve(&spec, &context()).await.unwrap();
        assert_eq!(
            resolved,
            vec![ApproverId::new("bob"), ApproverId::new("alice")]
        );
    }

    #[tokio::test]
    async fn empty_resolution_is_a_configuration_error() {
        let resolver = EligibilityResolver::new(directory());
        let spec = ApproverSpec::role("auditor");
        let err = resolver.resolve(&spec, &context()).await.unwrap_err();
        assert!(err.to_string().contains("no active approvers"));
    }

    #[tokio::test]
    async fn department_spec_falls_back_to_requester_department() {
        let resolver = EligibilityResolver::new(directory());
        let spec = ApproverSpec::requester_department_managers();
        let resolved = resolver.resolve(&spec, &context()).await.unwrap();
        assert_eq!(resolved, vec![ApproverId::new("mgr-1")]);
    }

    #[tokio::test]
    async fn delegations_rewrite_the_eligible_set_in_place() {
        let resolver = EligibilityResolver::new(directory());
        let spec = ApproverSpec::users(["alice", "bob"]);
        let mut instance = instance_with_level(spec);

        // alice hands her slot to carol; order is preserved.
        instance.record_decision(
            Decision::new(1, ApproverId::new("alice"), DecisionAction::Delegate)
                .with_delegate(ApproverId::new("carol")),
        );
        let level = instance.definition.level(1).unwrap().clone();
        let eligible = resolver.effective_eligible(&instance, &level).await.unwrap();
        assert_eq!(
            eligible,
            vec![ApproverId::new("carol"), ApproverId::new("bob")]
        );

        // bob delegating to carol collapses his slot instead of duplicating.
        instance.record_decision(
            Decision::new(1, ApproverId::new("bob"), DecisionAction::Delegate)
                .with_delegate(ApproverId::new("carol")),
        );
        let eligible = resolver.effective_eligible(&instance, &level).await.unwrap();
        assert_eq!(eligible, vec![ApproverId::new("carol")]);
    }

    #[tokio::test]
    async fn eligibility_covers_delegates_and_admins() {
        let resolver = EligibilityResolver::new(directory());
        let spec = ApproverSpec::users(["alice"]);
        let mut instance = instance_with_level(spec);
        let level = instance.definition.level(1).unwrap().clone();

        assert!(resolver
            .is_eligible(&instance, &level, &ApproverId::new("alice"))
            .await
            .unwrap());
        assert!(!resolver
            .is_eligible(&instance, &level, &ApproverId::new("carol"))
            .await
            .unwrap());
        // Admin role holders pass without being in the approver spec.
        assert!(resolver
            .is_eligible(&instance, &level, &ApproverId::new("root"))
            .await
            .unwrap());
        // The synthesized system approver always passes.
        assert!(resolver
            .is_eligible(&instance, &level, &ApproverId::system())
            .await
            .unwrap());

        instance.record_decision(
            Decision::new(1, ApproverId::new("alice"), DecisionAction::Delegate)
                .with_delegate(ApproverId::new("carol")),
        );
        assert!(!resolver
            .is_eligible(&instance, &level, &ApproverId::new("alice"))
            .await
            .unwrap());
        assert!(resolver
            .is_eligible(&instance, &level, &ApproverId::new("carol"))
            .await
            .unwrap());
    }
}

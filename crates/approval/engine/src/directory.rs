//! Identity directory seam.
//!
//! Approver specifications name people indirectly (a role, a department's
//! managers, a dynamic expression). An [`IdentityDirectory`] turns those
//! references into concrete approver ids at evaluation time, so staffing
//! changes take effect without touching stored workflow state.

use crate::error::{EngineError, EngineResult};
use approval_types::{ApprovalContext, ApproverId, TenantId};
use async_trait::async_trait;

/// Read-only view of who works where and holds which roles.
///
/// Implementations should return approvers in a stable order: sequential
/// levels collect decisions in exactly the order the directory returns.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// Active users holding `role` within the tenant.
    async fn users_with_role(&self, tenant: &TenantId, role: &str)
        -> EngineResult<Vec<ApproverId>>;

    /// Active approvers for a department. `role` narrows to holders of
    /// that role inside the department; `None` means the department's
    /// managers.
    async fn department_approvers(
        &self,
        tenant: &TenantId,
        department: &str,
        role: Option<&str>,
    ) -> EngineResult<Vec<ApproverId>>;

    /// Evaluates a dynamic approver expression against the context the
    /// instance was created with.
    async fn resolve_expression(
        &self,
        tenant: &TenantId,
        expression: &str,
        context: &ApprovalContext,
    ) -> EngineResult<Vec<ApproverId>>;

    /// Whether the user exists and is currently active.
    async fn is_active(&self, tenant: &TenantId, user: &ApproverId) -> EngineResult<bool>;

    /// Whether the user currently holds `role`.
    async fn has_role(
        &self,
        tenant: &TenantId,
        user: &ApproverId,
        role: &str,
    ) -> EngineResult<bool>;
}

/// One user in a [`StaticDirectory`].
#[derive(Debug, Clone)]
pub struct DirectoryUser {
    pub tenant: TenantId,
    pub id: ApproverId,
    pub roles: Vec<String>,
    pub department: Option<String>,
    pub manager: bool,
    pub active: bool,
}

impl DirectoryUser {
    pub fn new(tenant: TenantId, id: impl Into<String>) -> Self {
        Self {
            tenant,
            id: ApproverId::new(id),
            roles: Vec::new(),
            department: None,
            manager: false,
            active: true,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn in_department(mut self, department: impl Into<String>) -> Self {
        self.department = Some(department.into());
        self
    }

    pub fn as_manager(mut self) -> Self {
        self.manager = true;
        self
    }

    pub fn deactivated(mut self) -> Self {
        self.active = false;
        self
    }
}

/// Fixed in-memory directory, built once at startup.
///
/// Suitable for tests and single-process deployments. Expressions are
/// interpreted against the instance context:
///
/// - `requester` resolves to the requester themselves
/// - `requester_manager` resolves to the managers of the requester's
///   department
/// - `role:<name>` resolves to holders of the named role
#[derive(Debug, Default, Clone)]
pub struct StaticDirectory {
    users: Vec<DirectoryUser>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user: DirectoryUser) -> Self {
        self.users.push(user);
        self
    }

    fn lookup(&self, tenant: &TenantId, user: &ApproverId) -> Option<&DirectoryUser> {
        self.users
            .iter()
            .find(|u| &u.tenant == tenant && &u.id == user)
    }

    fn active_in_tenant<'a>(
        &'a self,
        tenant: &'a TenantId,
    ) -> impl Iterator<Item = &'a DirectoryUser> {
        self.users
            .iter()
            .filter(move |u| &u.tenant == tenant && u.active)
    }
}

#[async_trait]
impl IdentityDirectory for StaticDirectory {
    async fn users_with_role(
        &self,
        tenant: &TenantId,
        role: &str,
    ) -> EngineResult<Vec<ApproverId>> {
        Ok(self
            .active_in_tenant(tenant)
            .filter(|u| u.roles.iter().any(|r| r == role))
            .map(|u| u.id.clone())
            .collect())
    }

    async fn department_approvers(
        &self,
        tenant: &TenantId,
        department: &str,
        role: Option<&str>,
    ) -> EngineResult<Vec<ApproverId>> {
        Ok(self
            .active_in_tenant(tenant)
            .filter(|u| u.department.as_deref() == Some(department))
            .filter(|u| match role {
                Some(role) => u.roles.iter().any(|r| r == role),
                None => u.manager,
            })
            .map(|u| u.id.clone())
            .collect())
    }

    async fn resolve_expression(
        &self,
        tenant: &TenantId,
        expression: &str,
        context: &ApprovalContext,
    ) -> EngineResult<Vec<ApproverId>> {
        match expression {
            "requester" => Ok(vec![context.requester.clone()]),
            "requester_manager" => {
                let department = context.requester_department.as_deref().ok_or_else(|| {
                    EngineError::eligibility("requester has no department on record")
                })?;
                self.department_approvers(tenant, department, None).await
            }
            other => match other.strip_prefix("role:") {
                Some(role) => self.users_with_role(tenant, role).await,
                None => Err(EngineError::configuration(format!(
                    "unknown approver expression: {other}"
                ))),
            },
        }
    }

    async fn is_active(&self, tenant: &TenantId, user: &ApproverId) -> EngineResult<bool> {
        Ok(self.lookup(tenant, user).map(|u| u.active).unwrap_or(false))
    }

    async fn has_role(
        &self,
        tenant: &TenantId,
        user: &ApproverId,
        role: &str,
    ) -> EngineResult<bool> {
        Ok(self
            .lookup(tenant, user)
            .map(|u| u.active && u.roles.iter().any(|r| r == role))
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant() -> TenantId {
        TenantId::new("acme")
    }

    fn directory() -> StaticDirectory {
        StaticDirectory::new()
            .with_user(
                DirectoryUser::new(tenant(), "mgr-1")
                    .with_role("manager")
                    .in_department("engineering")
                    .as_manager(),
            )
            .with_user(
                DirectoryUser::new(tenant(), "fin-1")
                    .with_role("finance")
                    .in_department("finance"),
            )
            .with_user(
                DirectoryUser::new(tenant(), "fin-2")
                    .with_role("finance")
                    .in_department("finance")
                    .deactivated(),
            )
    }

    #[tokio::test]
    async fn role_lookup_skips_inactive_users() {
        let dir = directory();
        let holders = dir.users_with_role(&tenant(), "finance").await.unwrap();
        assert_eq!(holders, vec![ApproverId::new("fin-1")]);
    }

    #[tokio::test]
    async fn department_lookup_defaults_to_managers() {
        let dir = directory();
        let managers = dir
            .department_approvers(&tenant(), "engineering", None)
            .await
            .unwrap();
        assert_eq!(managers, vec![ApproverId::new("mgr-1")]);

        let finance = dir
            .department_approvers(&tenant(), "finance", Some("finance"))
            .await
            .unwrap();
        assert_eq!(finance, vec![ApproverId::new("fin-1")]);
    }

    #[tokio::test]
    async fn expressions_resolve_against_the_context() {
        let dir = directory();
        let context = ApprovalContext::new(tenant(), ApproverId::new("dev-1"))
            .with_department("engineering");

        let managers = dir
            .resolve_expression(&tenant(), "requester_manager", &context)
            .await
            .unwrap();
        assert_eq!(managers, vec![ApproverId::new("mgr-1")]);

        let requester = dir
            .resolve_expression(&tenant(), "requester", &context)
            .await
            .unwrap();
        assert_eq!(requester, vec![ApproverId::new("dev-1")]);

        let err = dir
            .resolve_expression(&tenant(), "phase_of_moon", &context)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown approver expression"));
    }

    #[tokio::test]
    async fn unknown_users_are_inactive_and_roleless() {
        let dir = directory();
        let ghost = ApproverId::new("ghost");
        assert!(!dir.is_active(&tenant(), &ghost).await.unwrap());
        assert!(!dir.has_role(&tenant(), &ghost, "manager").await.unwrap());

        let inactive = ApproverId::new("fin-2");
        assert!(!dir.has_role(&tenant(), &inactive, "finance").await.unwrap());
    }
}

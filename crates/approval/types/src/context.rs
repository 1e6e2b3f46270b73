//! Subject references and the approval context supplied by the subject domain.
//!
//! The engine never loads business entities itself. The subject domain hands
//! it an [`ApprovalContext`] carrying everything resolution and condition
//! evaluation need: tenant, requester role/department, and a free-form
//! attribute map.

use crate::{ApproverId, TenantId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Subject Reference ────────────────────────────────────────────────

/// Reference to the business entity gated by an approval instance
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectRef {
    /// Kind of subject, e.g. "change", "service_request", "ticket"
    pub subject_type: String,
    /// Identifier within the subject domain
    pub subject_id: String,
}

impl SubjectRef {
    pub fn new(subject_type: impl Into<String>, subject_id: impl Into<String>) -> Self {
        Self {
            subject_type: subject_type.into(),
            subject_id: subject_id.into(),
        }
    }
}

impl std::fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.subject_type, self.subject_id)
    }
}

// ── Approval Context ─────────────────────────────────────────────────

/// Snapshot of the subject's surroundings, taken when the engine needs to
/// resolve approvers or evaluate level conditions.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalContext {
    /// Tenant the subject belongs to; scopes every identity lookup
    pub tenant_id: TenantId,
    /// Who raised the subject
    pub requester: ApproverId,
    /// Requester's role at context-fetch time
    pub requester_role: String,
    /// Requester's department at context-fetch time
    pub requester_department: Option<String>,
    /// Free-form subject attributes for conditions and dynamic specs
    #[serde(default)]
    pub attributes: serde_json::Map<String, Value>,
}

impl ApprovalContext {
    pub fn new(tenant_id: TenantId, requester: ApproverId) -> Self {
        Self {
            tenant_id,
            requester,
            requester_role: String::new(),
            requester_department: None,
            attributes: serde_json::Map::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.requester_role = role.into();
        self
    }

    pub fn with_department(mut self, department: impl Into<String>) -> Self {
        self.requester_department = Some(department.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Look up an attribute by dotted path, e.g. `"request.amount"`.
    pub fn attribute(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.attributes.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_context() -> ApprovalContext {
        ApprovalContext::new(TenantId::new("t-1"), ApproverId::new("u-9"))
            .with_role("engineer")
            .with_department("platform")
            .with_attribute("priority", json!("high"))
            .with_attribute("request", json!({"amount": 1200, "owner": "u-9"}))
    }

    #[test]
    fn attribute_lookup_walks_dotted_paths() {
        let ctx = sample_context();
        assert_eq!(ctx.attribute("priority"), Some(&json!("high")));
        assert_eq!(ctx.attribute("request.amount"), Some(&json!(1200)));
        assert_eq!(ctx.attribute("request.missing"), None);
        assert_eq!(ctx.attribute("absent"), None);
    }

    #[test]
    fn subject_ref_displays_as_path() {
        let subject = SubjectRef::new("change", "chg-42");
        assert_eq!(subject.to_string(), "change/chg-42");
    }
}

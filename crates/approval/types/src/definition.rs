//! Workflow definitions: templates describing the chain of approval levels.
//!
//! A definition is authored by administrators, validated on registration,
//! and treated as immutable once an instance has been created from it: the
//! instance embeds a full snapshot, so later template edits never touch
//! in-flight approvals.

use crate::errors::DefinitionError;
use crate::{ApprovalContext, ApproverId, DefinitionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Workflow Definition ──────────────────────────────────────────────

/// Template for a multi-level approval chain
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique definition identifier
    pub id: DefinitionId,
    /// Human-readable name; several versions may share one name
    pub name: String,
    /// What the chain is for
    #[serde(default)]
    pub description: String,
    /// Subject types this definition applies to (empty = any)
    #[serde(default)]
    pub subject_types: Vec<String>,
    /// Attribute predicates a subject must satisfy for this definition
    /// to apply (empty = always applicable)
    #[serde(default)]
    pub applicability: Vec<Condition>,
    /// Ordered levels; level numbers strictly ascending and unique
    pub levels: Vec<LevelDefinition>,
    /// Inactive definitions are kept for history but never instantiated
    pub is_active: bool,
    /// When the definition was authored
    pub created_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: DefinitionId::generate(),
            name: name.into(),
            description: String::new(),
            subject_types: Vec::new(),
            applicability: Vec::new(),
            levels: Vec::new(),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn for_subject_type(mut self, subject_type: impl Into<String>) -> Self {
        self.subject_types.push(subject_type.into());
        self
    }

    pub fn with_applicability(mut self, condition: Condition) -> Self {
        self.applicability.push(condition);
        self
    }

    /// Append a level. Level numbers must arrive strictly ascending.
    pub fn add_level(&mut self, level: LevelDefinition) -> Result<(), DefinitionError> {
        if let Some(last) = self.levels.last() {
            if level.level == last.level {
                return Err(DefinitionError::DuplicateLevel(level.level));
            }
            if level.level < last.level {
                return Err(DefinitionError::NonAscendingLevels {
                    previous: last.level,
                    found: level.level,
                });
            }
        }
        self.levels.push(level);
        Ok(())
    }

    /// Look up a level by number.
    pub fn level(&self, number: u32) -> Option<&LevelDefinition> {
        self.levels.iter().find(|l| l.level == number)
    }

    /// The lowest-numbered level.
    pub fn first_level(&self) -> Option<&LevelDefinition> {
        self.levels.first()
    }

    /// The next level strictly after `number`, in chain order.
    pub fn next_level_after(&self, number: u32) -> Option<&LevelDefinition> {
        self.levels.iter().find(|l| l.level > number)
    }

    pub fn total_levels(&self) -> usize {
        self.levels.len()
    }

    /// Whether this definition applies to the given subject type and context.
    pub fn applies_to(&self, subject_type: &str, ctx: &ApprovalContext) -> bool {
        if !self.is_active {
            return false;
        }
        if !self.subject_types.is_empty()
            && !self.subject_types.iter().any(|t| t == subject_type)
        {
            return false;
        }
        conditions_hold(&self.applicability, ctx)
    }

    /// Full structural validation, run at registration time.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.name.trim().is_empty() {
            return Err(DefinitionError::EmptyName);
        }
        if self.levels.is_empty() {
            return Err(DefinitionError::NoLevels);
        }

        let mut previous: Option<u32> = None;
        for level in &self.levels {
            if level.level == 0 {
                return Err(DefinitionError::ZeroLevelNumber);
            }
            if let Some(prev) = previous {
                if level.level == prev {
                    return Err(DefinitionError::DuplicateLevel(level.level));
                }
                if level.level < prev {
                    return Err(DefinitionError::NonAscendingLevels {
                        previous: prev,
                        found: level.level,
                    });
                }
            }
            previous = Some(level.level);

            level.validate()?;

            if level.reject_action == RejectAction::ReturnToLevel {
                match level.return_to_level {
                    None => {
                        return Err(DefinitionError::MissingReturnTarget { level: level.level })
                    }
                    Some(target) => {
                        if target >= level.level || self.level(target).is_none() {
                            return Err(DefinitionError::InvalidReturnTarget {
                                level: level.level,
                                target,
                            });
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

// ── Level Definition ─────────────────────────────────────────────────

/// One stage of the approval chain
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LevelDefinition {
    /// Position in the chain; strictly ascending within a definition
    pub level: u32,
    /// Display name, e.g. "Line manager review"
    pub name: String,
    /// Who may decide here
    pub approver_spec: ApproverSpec,
    /// Quorum rule for this level
    pub mode: ApprovalMode,
    /// Overrides the natural `any`/`majority` threshold, e.g. "2 of 3"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_approvals: Option<u32>,
    /// Deadline, counted from level entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_hours: Option<u32>,
    /// What happens when the deadline passes unresolved
    pub timeout_action: TimeoutAction,
    /// Whether approvers may reject at this level
    pub allow_reject: bool,
    /// Whether approvers may delegate their slot at this level
    pub allow_delegate: bool,
    /// How a rejected level resolves the instance
    pub reject_action: RejectAction,
    /// Target for `RejectAction::ReturnToLevel`; must name an earlier level
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_to_level: Option<u32>,
    /// Predicates over subject attributes; if any fails the level is skipped
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl LevelDefinition {
    pub fn new(
        level: u32,
        name: impl Into<String>,
        approver_spec: ApproverSpec,
        mode: ApprovalMode,
    ) -> Self {
        Self {
            level,
            name: name.into(),
            approver_spec,
            mode,
            minimum_approvals: None,
            timeout_hours: None,
            timeout_action: TimeoutAction::None,
            allow_reject: true,
            allow_delegate: false,
            reject_action: RejectAction::End,
            return_to_level: None,
            conditions: Vec::new(),
        }
    }

    pub fn with_minimum_approvals(mut self, minimum: u32) -> Self {
        self.minimum_approvals = Some(minimum);
        self
    }

    pub fn with_timeout(mut self, hours: u32, action: TimeoutAction) -> Self {
        self.timeout_hours = Some(hours);
        self.timeout_action = action;
        self
    }

    pub fn with_reject_action(mut self, action: RejectAction) -> Self {
        self.reject_action = action;
        self
    }

    /// Configure rejection to restart voting at an earlier level.
    pub fn with_return_to_level(mut self, target: u32) -> Self {
        self.reject_action = RejectAction::ReturnToLevel;
        self.return_to_level = Some(target);
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn allow_delegation(mut self) -> Self {
        self.allow_delegate = true;
        self
    }

    pub fn deny_reject(mut self) -> Self {
        self.allow_reject = false;
        self
    }

    fn validate(&self) -> Result<(), DefinitionError> {
        match &self.approver_spec {
            ApproverSpec::User { ids } if ids.is_empty() => {
                return Err(DefinitionError::EmptyApprovers { level: self.level });
            }
            ApproverSpec::Role { role } if role.trim().is_empty() => {
                return Err(DefinitionError::EmptyApprovers { level: self.level });
            }
            ApproverSpec::Dynamic { expression } if expression.trim().is_empty() => {
                return Err(DefinitionError::EmptyApprovers { level: self.level });
            }
            _ => {}
        }

        if let Some(minimum) = self.minimum_approvals {
            if minimum == 0 {
                return Err(DefinitionError::InvalidMinimumApprovals {
                    level: self.level,
                    minimum,
                });
            }
            if !matches!(self.mode, ApprovalMode::Any | ApprovalMode::Majority) {
                return Err(DefinitionError::MinimumApprovalsNotApplicable { level: self.level });
            }
        }

        if self.timeout_action != TimeoutAction::None
            && self.timeout_hours.map_or(true, |h| h == 0)
        {
            return Err(DefinitionError::MissingTimeout { level: self.level });
        }

        Ok(())
    }
}

// ── Approver Spec ────────────────────────────────────────────────────

/// Abstract description of who may decide at a level, resolved to concrete
/// identities against the approval context
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ApproverSpec {
    /// Fixed identities
    User { ids: Vec<ApproverId> },
    /// Every active tenant user holding the role
    Role { role: String },
    /// Managers of the requester's department, or of a named department;
    /// with `role` set, holders of that role within the department
    Department {
        department: Option<String>,
        role: Option<String>,
    },
    /// Expression evaluated against subject attributes,
    /// e.g. "requester_manager"
    Dynamic { expression: String },
}

impl ApproverSpec {
    pub fn users<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::User {
            ids: ids.into_iter().map(|id| ApproverId::new(id)).collect(),
        }
    }

    pub fn role(role: impl Into<String>) -> Self {
        Self::Role { role: role.into() }
    }

    /// Managers of the requester's own department.
    pub fn requester_department_managers() -> Self {
        Self::Department {
            department: None,
            role: None,
        }
    }

    pub fn department(department: impl Into<String>) -> Self {
        Self::Department {
            department: Some(department.into()),
            role: None,
        }
    }

    pub fn department_role(department: impl Into<String>, role: impl Into<String>) -> Self {
        Self::Department {
            department: Some(department.into()),
            role: Some(role.into()),
        }
    }

    pub fn dynamic(expression: impl Into<String>) -> Self {
        Self::Dynamic {
            expression: expression.into(),
        }
    }

    /// Spec kind for logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::User { .. } => "user",
            Self::Role { .. } => "role",
            Self::Department { .. } => "department",
            Self::Dynamic { .. } => "dynamic",
        }
    }
}

// ── Approval Mode ────────────────────────────────────────────────────

/// Quorum rule deciding when a level is satisfied or rejected
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalMode {
    /// First approve satisfies; rejects alone never reject
    Any,
    /// Every currently-eligible approver must approve; one reject fails fast
    All,
    /// Approvals past half satisfy; rejections making that unreachable reject
    Majority,
    /// Approvers decide one at a time in eligible-set order
    Sequential,
}

// ── Timeout Action ───────────────────────────────────────────────────

/// Automatic behavior once a level's deadline passes unresolved
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeoutAction {
    /// No transition; the level merely shows as overdue
    None,
    /// Synthesize a system approve and run it through the engine
    AutoApprove,
    /// Synthesize a system reject and run it through the engine
    AutoReject,
    /// Notify and optionally extend the deadline; never changes the outcome
    Escalate,
}

// ── Reject Action ────────────────────────────────────────────────────

/// How a rejected level resolves the instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectAction {
    /// Instance becomes `rejected`, terminal
    End,
    /// Restart voting at an earlier level (lossy: its decisions are cleared)
    ReturnToLevel,
    /// Ask the subject domain; its directive is authoritative
    Custom,
}

// ── Conditions ───────────────────────────────────────────────────────

/// Predicate over subject attributes
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Dotted attribute path, e.g. "request.amount"
    pub field: String,
    pub operator: ConditionOperator,
    pub value: Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// Evaluate against a context. Missing attributes satisfy only
    /// `NotEquals`.
    pub fn matches(&self, ctx: &ApprovalContext) -> bool {
        let actual = match ctx.attribute(&self.field) {
            Some(value) => value,
            None => return self.operator == ConditionOperator::NotEquals,
        };

        match self.operator {
            ConditionOperator::Equals => *actual == self.value,
            ConditionOperator::NotEquals => *actual != self.value,
            ConditionOperator::Contains => match actual {
                Value::String(s) => self
                    .value
                    .as_str()
                    .map(|needle| s.contains(needle))
                    .unwrap_or(false),
                Value::Array(items) => items.contains(&self.value),
                _ => false,
            },
            ConditionOperator::GreaterThan => compare(actual, &self.value)
                .map(|o| o == std::cmp::Ordering::Greater)
                .unwrap_or(false),
            ConditionOperator::LessThan => compare(actual, &self.value)
                .map(|o| o == std::cmp::Ordering::Less)
                .unwrap_or(false),
        }
    }
}

/// All predicates must hold; an empty list always holds.
pub fn conditions_hold(conditions: &[Condition], ctx: &ApprovalContext) -> bool {
    conditions.iter().all(|c| c.matches(ctx))
}

fn compare(actual: &Value, expected: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(a), Some(b)) = (actual.as_f64(), expected.as_f64()) {
        return a.partial_cmp(&b);
    }
    if let (Some(a), Some(b)) = (actual.as_str(), expected.as_str()) {
        return Some(a.cmp(b));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TenantId;
    use serde_json::json;

    fn two_level_definition() -> WorkflowDefinition {
        let mut def = WorkflowDefinition::new("Change approval");
        def.add_level(LevelDefinition::new(
            1,
            "Manager",
            ApproverSpec::users(["u-1"]),
            ApprovalMode::Any,
        ))
        .unwrap();
        def.add_level(LevelDefinition::new(
            2,
            "CAB",
            ApproverSpec::role("cab-member"),
            ApprovalMode::Majority,
        ))
        .unwrap();
        def
    }

    fn ctx() -> ApprovalContext {
        ApprovalContext::new(TenantId::new("t-1"), ApproverId::new("u-9"))
            .with_attribute("risk", json!("high"))
            .with_attribute("amount", json!(250))
    }

    #[test]
    fn add_level_enforces_ascending_numbers() {
        let mut def = two_level_definition();
        let dup = LevelDefinition::new(2, "Dup", ApproverSpec::users(["x"]), ApprovalMode::Any);
        assert!(matches!(
            def.add_level(dup),
            Err(DefinitionError::DuplicateLevel(2))
        ));
        let lower = LevelDefinition::new(1, "Low", ApproverSpec::users(["x"]), ApprovalMode::Any);
        assert!(matches!(
            def.add_level(lower),
            Err(DefinitionError::NonAscendingLevels { .. })
        ));
    }

    #[test]
    fn validate_accepts_well_formed_definition() {
        assert!(two_level_definition().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_chain() {
        let def = WorkflowDefinition::new("Empty");
        assert!(matches!(def.validate(), Err(DefinitionError::NoLevels)));
    }

    #[test]
    fn validate_requires_return_target_to_be_earlier() {
        let mut def = two_level_definition();
        def.add_level(
            LevelDefinition::new(3, "Final", ApproverSpec::users(["u-3"]), ApprovalMode::Any)
                .with_return_to_level(3),
        )
        .unwrap();
        assert!(matches!(
            def.validate(),
            Err(DefinitionError::InvalidReturnTarget { level: 3, target: 3 })
        ));
    }

    #[test]
    fn validate_requires_timeout_hours_for_timeout_actions() {
        let mut def = WorkflowDefinition::new("Timeouts");
        let mut level =
            LevelDefinition::new(1, "L1", ApproverSpec::users(["u-1"]), ApprovalMode::Any);
        level.timeout_action = TimeoutAction::AutoApprove;
        def.add_level(level).unwrap();
        assert!(matches!(
            def.validate(),
            Err(DefinitionError::MissingTimeout { level: 1 })
        ));
    }

    #[test]
    fn validate_rejects_minimum_on_all_mode() {
        let mut def = WorkflowDefinition::new("Minimums");
        def.add_level(
            LevelDefinition::new(1, "L1", ApproverSpec::users(["a", "b"]), ApprovalMode::All)
                .with_minimum_approvals(2),
        )
        .unwrap();
        assert!(matches!(
            def.validate(),
            Err(DefinitionError::MinimumApprovalsNotApplicable { level: 1 })
        ));
    }

    #[test]
    fn validate_rejects_empty_user_list() {
        let mut def = WorkflowDefinition::new("Empty users");
        def.add_level(LevelDefinition::new(
            1,
            "L1",
            ApproverSpec::User { ids: vec![] },
            ApprovalMode::Any,
        ))
        .unwrap();
        assert!(matches!(
            def.validate(),
            Err(DefinitionError::EmptyApprovers { level: 1 })
        ));
    }

    #[test]
    fn applicability_checks_subject_type_and_conditions() {
        let def = two_level_definition()
            .for_subject_type("change")
            .with_applicability(Condition::new(
                "risk",
                ConditionOperator::Equals,
                json!("high"),
            ));
        assert!(def.applies_to("change", &ctx()));
        assert!(!def.applies_to("ticket", &ctx()));

        let low = ApprovalContext::new(TenantId::new("t-1"), ApproverId::new("u-9"))
            .with_attribute("risk", json!("low"));
        assert!(!def.applies_to("change", &low));
    }

    #[test]
    fn condition_operators_cover_value_shapes() {
        let c = ctx();
        assert!(Condition::new("amount", ConditionOperator::GreaterThan, json!(100)).matches(&c));
        assert!(Condition::new("amount", ConditionOperator::LessThan, json!(1000)).matches(&c));
        assert!(Condition::new("risk", ConditionOperator::Contains, json!("hi")).matches(&c));
        assert!(
            Condition::new("missing", ConditionOperator::NotEquals, json!("x")).matches(&c)
        );
        assert!(!Condition::new("missing", ConditionOperator::Equals, json!("x")).matches(&c));
    }

    #[test]
    fn next_level_after_follows_chain_order() {
        let def = two_level_definition();
        assert_eq!(def.next_level_after(1).map(|l| l.level), Some(2));
        assert!(def.next_level_after(2).is_none());
    }
}

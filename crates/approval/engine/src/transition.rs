//! Transition engine: the main entry point for the approval engine
//!
//! The engine owns every state change an approval instance can undergo. It:
//! 1. Registers workflow definitions and snapshots them into new instances
//! 2. Records approver decisions and re-runs the quorum evaluator
//! 3. Advances the level chain, skipping levels whose conditions fail
//! 4. Applies reject actions, deadline auto-actions, and cancellation
//! 5. Appends the audit trail and fans out best-effort notifications
//!
//! Every mutation is optimistic: load at a version, apply in memory, save
//! with compare-and-set, retry on version conflicts with bounded backoff.
//! Audit events and notices are buffered during the attempt and flushed
//! only after the save commits, so a losing writer leaves no trace.

use crate::config::EngineConfig;
use crate::directory::IdentityDirectory;
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::evaluator::{evaluate, next_in_sequence, LevelOutcome};
use crate::notify::{ApprovalNotice, NotificationSink};
use crate::registry::DefinitionRegistry;
use crate::resolver::EligibilityResolver;
use crate::subject::{RejectDirective, SubjectDomain};
use approval_storage::{ApprovalStore, QueryWindow};
use approval_types::{
    ApprovalContext, ApprovalInstance, ApprovalMode, ApprovalSummary, ApproverId, AuditEvent,
    AuditKind, AuditRecord, CorrelationId, Decision, DecisionAction, DefinitionId, InstanceId,
    InstanceStatus, LevelDefinition, RejectAction, SubjectRef, TenantId, TimeoutAction,
    WorkflowDefinition,
};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::sync::{Arc, RwLock};

/// A decision submitted on behalf of an approver.
#[derive(Debug, Clone)]
pub struct SubmitDecision {
    pub approver: ApproverId,
    pub action: DecisionAction,
    pub comment: Option<String>,
    pub delegate_to: Option<ApproverId>,
    /// Level the caller saw when deciding. `None` targets the current
    /// level; a stale value is refused instead of landing on the wrong
    /// level.
    pub level: Option<u32>,
}

impl SubmitDecision {
    pub fn approve(approver: ApproverId) -> Self {
        Self {
            approver,
            action: DecisionAction::Approve,
            comment: None,
            delegate_to: None,
            level: None,
        }
    }

    pub fn reject(approver: ApproverId, comment: impl Into<String>) -> Self {
        Self {
            approver,
            action: DecisionAction::Reject,
            comment: Some(comment.into()),
            delegate_to: None,
            level: None,
        }
    }

    pub fn delegate(approver: ApproverId, delegate_to: ApproverId) -> Self {
        Self {
            approver,
            action: DecisionAction::Delegate,
            comment: None,
            delegate_to: Some(delegate_to),
            level: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Pin the submission to the level the approver was shown.
    pub fn at_level(mut self, level: u32) -> Self {
        self.level = Some(level);
        self
    }
}

/// What a timeout check did to an overdue instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutDisposition {
    /// The instance or level resolved before the check acted.
    AlreadyResolved,
    /// The current level has no deadline or has not reached it.
    NotDue,
    /// Deadline passed but the level's timeout action is `None`.
    Overdue,
    /// A system approval was synthesized and applied.
    AutoApproved,
    /// A system rejection was synthesized and applied.
    AutoRejected,
    /// An escalation round fired; `extended` says whether the deadline
    /// was pushed out once more.
    Escalated { extended: bool },
    /// All escalation rounds are spent; the level stays overdue.
    EscalationExhausted,
}

/// Side effects accumulated while a transition is applied in memory,
/// flushed only after the compare-and-set save commits.
#[derive(Default)]
struct SideEffects {
    audit: Vec<AuditEvent>,
    notices: Vec<ApprovalNotice>,
    advanced_levels: Vec<u32>,
    concluded: bool,
}

/// The approval engine.
pub struct TransitionEngine {
    store: Arc<dyn ApprovalStore>,
    subjects: Arc<dyn SubjectDomain>,
    notifier: Arc<dyn NotificationSink>,
    resolver: EligibilityResolver,
    definitions: RwLock<DefinitionRegistry>,
    config: EngineConfig,
}

impl TransitionEngine {
    pub fn new(
        store: Arc<dyn ApprovalStore>,
        directory: Arc<dyn IdentityDirectory>,
        subjects: Arc<dyn SubjectDomain>,
        notifier: Arc<dyn NotificationSink>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            subjects,
            notifier,
            resolver: EligibilityResolver::new(directory),
            definitions: RwLock::new(DefinitionRegistry::new()),
            config,
        }
    }

    pub(crate) fn store(&self) -> &Arc<dyn ApprovalStore> {
        &self.store
    }

    // ── Definition management ────────────────────────────────────────

    /// Validates and registers a workflow definition.
    pub fn register_definition(&self, definition: WorkflowDefinition) -> EngineResult<DefinitionId> {
        self.registry_write()?.register(definition)
    }

    pub fn definition(&self, id: &DefinitionId) -> EngineResult<WorkflowDefinition> {
        Ok(self.registry_read()?.get(id)?.clone())
    }

    pub fn definitions(&self) -> EngineResult<Vec<WorkflowDefinition>> {
        Ok(self.registry_read()?.list().into_iter().cloned().collect())
    }

    /// Retires a definition from applicability matching. In-flight
    /// instances keep their snapshots.
    pub fn deactivate_definition(&self, id: &DefinitionId) -> EngineResult<()> {
        self.registry_write()?.deactivate(id)
    }

    /// The definition that would govern a new approval for this subject
    /// type and context, if any.
    pub fn applicable_definition(
        &self,
        subject_type: &str,
        context: &ApprovalContext,
    ) -> EngineResult<Option<WorkflowDefinition>> {
        Ok(self
            .registry_read()?
            .find_applicable(subject_type, context)
            .cloned())
    }

    fn registry_read(&self) -> EngineResult<std::sync::RwLockReadGuard<'_, DefinitionRegistry>> {
        self.definitions
            .read()
            .map_err(|_| EngineError::persistence("definition registry lock poisoned"))
    }

    fn registry_write(&self) -> EngineResult<std::sync::RwLockWriteGuard<'_, DefinitionRegistry>> {
        self.definitions
            .write()
            .map_err(|_| EngineError::persistence("definition registry lock poisoned"))
    }

    // ── Instance creation ────────────────────────────────────────────

    /// Creates an approval instance from a registered definition and
    /// enters the first level whose conditions hold. If every level is
    /// skipped the instance concludes as approved immediately.
    pub async fn create(
        &self,
        definition_id: &DefinitionId,
        subject: SubjectRef,
        context: ApprovalContext,
    ) -> EngineResult<ApprovalInstance> {
        let definition = self.definition(definition_id)?;
        if !definition.is_active {
            return Err(EngineError::validation(format!(
                "definition {definition_id} is retired"
            )));
        }
        if !definition.subject_types.is_empty()
            && !definition.subject_types.contains(&subject.subject_type)
        {
            return Err(EngineError::validation(format!(
                "definition {} does not govern {} subjects",
                definition.name, subject.subject_type
            )));
        }
        self.create_with_definition(definition, subject, context)
            .await
    }

    /// Creates an instance under the most recently registered active
    /// definition applicable to the subject type and context.
    pub async fn create_for_subject(
        &self,
        subject: SubjectRef,
        context: ApprovalContext,
    ) -> EngineResult<ApprovalInstance> {
        let definition = self
            .applicable_definition(&subject.subject_type, &context)?
            .ok_or_else(|| {
                EngineError::validation(format!(
                    "no active approval definition applies to {} subjects",
                    subject.subject_type
                ))
            })?;
        self.create_with_definition(definition, subject, context)
            .await
    }

    async fn create_with_definition(
        &self,
        definition: WorkflowDefinition,
        subject: SubjectRef,
        context: ApprovalContext,
    ) -> EngineResult<ApprovalInstance> {
        let correlation = CorrelationId::generate();
        let mut instance = ApprovalInstance::new(definition, subject, context);
        let mut effects = SideEffects::default();

        self.advance_chain(&mut instance, None, &mut effects)
            .await
            .map_err(|e| e.with_correlation(&correlation))?;

        self.store
            .create_instance(&instance)
            .await
            .map_err(|e| EngineError::from(e).with_correlation(&correlation))?;
        self.flush_effects(&instance, effects, &correlation).await;

        tracing::info!(
            correlation = %correlation,
            instance_id = %instance.id,
            definition = %instance.definition.name,
            subject = %instance.subject,
            current_level = ?instance.current_level,
            "approval instance created"
        );
        Ok(instance)
    }

    // ── Decisions ────────────────────────────────────────────────────

    /// Records an approver's decision on the current level and applies
    /// whatever transition follows from it. Retries internally on
    /// concurrent modification.
    pub async fn submit(
        &self,
        instance_id: &InstanceId,
        submission: SubmitDecision,
    ) -> EngineResult<ApprovalInstance> {
        if submission.approver.is_system() {
            return Err(EngineError::validation(
                "the system identity cannot submit decisions directly",
            ));
        }
        let correlation = CorrelationId::generate();
        let mut attempt = 1;
        loop {
            match self.submit_once(instance_id, &submission, &correlation).await {
                Err(err) if matches!(err.kind(), ErrorKind::ConcurrentModification { .. }) => {
                    if attempt >= self.config.retry.max_attempts {
                        tracing::warn!(
                            correlation = %correlation,
                            instance_id = %instance_id,
                            attempts = attempt,
                            "decision submission kept losing version races"
                        );
                        return Err(EngineError::concurrent_modification(attempt)
                            .with_correlation(&correlation));
                    }
                    tokio::time::sleep(self.config.retry.backoff_delay(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err.with_correlation(&correlation)),
                Ok(instance) => return Ok(instance),
            }
        }
    }

    async fn submit_once(
        &self,
        instance_id: &InstanceId,
        submission: &SubmitDecision,
        correlation: &CorrelationId,
    ) -> EngineResult<ApprovalInstance> {
        let stored = self.store.load_instance(instance_id).await?;
        let mut instance = stored.instance;
        let version = stored.version;

        if instance.is_terminal() {
            return Err(EngineError::instance_terminal(instance.status));
        }
        let current = instance.current_level.ok_or_else(|| {
            EngineError::persistence("pending instance has no current level")
        })?;

        // A submission pinned to a level the caller saw must still match
        // the current level; anything else is stale or premature.
        if let Some(target) = submission.level {
            if target != current {
                let state = instance.level_state(target).ok_or_else(|| {
                    EngineError::validation(format!("level {target} does not exist"))
                })?;
                return Err(if state.is_pending() {
                    EngineError::validation(format!("level {target} is not active yet"))
                } else {
                    EngineError::level_already_decided(target)
                });
            }
        }

        let level_def = instance
            .definition
            .level(current)
            .ok_or_else(|| {
                EngineError::configuration(format!(
                    "current level {current} is missing from the definition snapshot"
                ))
            })?
            .clone();

        match submission.action {
            DecisionAction::Approve => {}
            DecisionAction::Reject => {
                if !level_def.allow_reject {
                    return Err(EngineError::validation(format!(
                        "level {current} does not allow rejection"
                    )));
                }
                if submission.comment.as_deref().map_or(true, |c| c.trim().is_empty()) {
                    return Err(EngineError::validation("rejection requires a comment"));
                }
            }
            DecisionAction::Delegate => {
                if !level_def.allow_delegate {
                    return Err(EngineError::validation(format!(
                        "level {current} does not allow delegation"
                    )));
                }
                let delegate = submission.delegate_to.as_ref().ok_or_else(|| {
                    EngineError::validation("delegation requires a delegate")
                })?;
                if delegate == &submission.approver {
                    return Err(EngineError::validation("cannot delegate to yourself"));
                }
            }
        }

        let effective = self.resolver.effective_eligible(&instance, &level_def).await?;
        let holds_slot = effective.contains(&submission.approver);
        if !holds_slot {
            if submission.action == DecisionAction::Delegate {
                return Err(EngineError::eligibility(
                    "only a current eligible approver may delegate their slot",
                ));
            }
            if !self
                .resolver
                .has_override_role(instance.tenant_id(), &submission.approver)
                .await?
            {
                return Err(EngineError::eligibility(format!(
                    "{} is not eligible to decide level {current}",
                    submission.approver
                )));
            }
        } else if level_def.mode == ApprovalMode::Sequential
            && submission.action != DecisionAction::Delegate
        {
            let decisions = instance.decisions_for(current);
            if let Some(next) = next_in_sequence(&effective, &decisions) {
                if next != &submission.approver {
                    return Err(EngineError::eligibility(format!(
                        "level {current} decides in order; it is {next}'s turn"
                    )));
                }
            }
        }

        if submission.action == DecisionAction::Delegate {
            if let Some(delegate) = submission.delegate_to.as_ref() {
                if effective.contains(delegate) {
                    // Handing a slot to someone who already holds one would
                    // shrink the quorum; refuse rather than surprise.
                    return Err(EngineError::validation(format!(
                        "{delegate} already holds a slot at level {current}"
                    )));
                }
                if !self
                    .resolver
                    .is_active(instance.tenant_id(), delegate)
                    .await?
                {
                    return Err(EngineError::validation(format!(
                        "cannot delegate to {delegate}: not an active user"
                    )));
                }
            }
        }

        let mut decision = Decision::new(current, submission.approver.clone(), submission.action);
        if let Some(comment) = &submission.comment {
            decision = decision.with_comment(comment.clone());
        }
        if let Some(delegate) = &submission.delegate_to {
            decision = decision.with_delegate(delegate.clone());
        }

        let mut effects = SideEffects::default();
        self.apply_decision(&mut instance, &level_def, decision, &mut effects)
            .await?;

        self.store.save_instance(&instance, version).await?;
        self.flush_effects(&instance, effects, correlation).await;

        tracing::info!(
            correlation = %correlation,
            instance_id = %instance.id,
            approver = %submission.approver,
            action = submission.action.as_str(),
            level = current,
            status = %instance.status,
            "decision recorded"
        );
        Ok(instance)
    }

    /// Records a decision, re-evaluates the level, and applies the
    /// resulting transition. Shared by human submissions and the
    /// scheduler's synthesized system decisions.
    async fn apply_decision(
        &self,
        instance: &mut ApprovalInstance,
        level_def: &LevelDefinition,
        decision: Decision,
        effects: &mut SideEffects,
    ) -> EngineResult<()> {
        let level = decision.level;
        let approver = decision.approver.clone();
        let action = decision.action;
        let origin = decision.origin;
        let delegate_to = decision.delegate_to.clone();
        let superseded = instance.record_decision(decision).is_some();

        let verb = match action {
            DecisionAction::Approve => "approved",
            DecisionAction::Reject => "rejected",
            DecisionAction::Delegate => "delegated",
        };
        effects.audit.push(
            AuditEvent::new(
                AuditKind::DecisionRecorded,
                instance.id.clone(),
                approver.clone(),
                format!("{approver} {verb} level {level}"),
            )
            .with_level(level)
            .with_payload(json!({
                "action": action.as_str(),
                "origin": origin,
                "delegate_to": delegate_to,
                "superseded": superseded,
            })),
        );

        let effective = self.resolver.effective_eligible(instance, level_def).await?;
        let outcome = {
            let decisions = instance.decisions_for(level);
            evaluate(level_def, &effective, &decisions)
        };

        match outcome {
            LevelOutcome::Pending => Ok(()),
            LevelOutcome::Satisfied => {
                instance.satisfy_level(level);
                effects.audit.push(
                    AuditEvent::new(
                        AuditKind::LevelTerminal,
                        instance.id.clone(),
                        ApproverId::system(),
                        format!("level {} ({}) satisfied", level, level_def.name),
                    )
                    .with_level(level)
                    .with_payload(json!({"status": "satisfied"})),
                );
                self.advance_chain(instance, Some(level), effects).await
            }
            LevelOutcome::Rejected => self.apply_rejection(instance, level_def, effects).await,
        }
    }

    /// Applies the level's reject action after its quorum rejected.
    async fn apply_rejection(
        &self,
        instance: &mut ApprovalInstance,
        level_def: &LevelDefinition,
        effects: &mut SideEffects,
    ) -> EngineResult<()> {
        let level = level_def.level;
        let directive = match level_def.reject_action {
            RejectAction::End => RejectDirective::End,
            RejectAction::ReturnToLevel => {
                let target = level_def.return_to_level.ok_or_else(|| {
                    EngineError::configuration(format!(
                        "level {level} has no return target configured"
                    ))
                })?;
                RejectDirective::ReturnToLevel(target)
            }
            RejectAction::Custom => self.subjects.reject_directive(instance, level).await?,
        };

        instance.reject_level(level);
        effects.audit.push(
            AuditEvent::new(
                AuditKind::LevelTerminal,
                instance.id.clone(),
                ApproverId::system(),
                format!("level {} ({}) rejected", level, level_def.name),
            )
            .with_level(level)
            .with_payload(json!({"status": "rejected"})),
        );

        match directive {
            RejectDirective::End => {
                instance.reject();
                self.conclude_effects(instance, effects);
                Ok(())
            }
            RejectDirective::ReturnToLevel(target) => {
                if target >= level {
                    return Err(EngineError::configuration(format!(
                        "cannot return from level {level} to level {target}"
                    )));
                }
                let target_def = instance.definition.level(target).cloned().ok_or_else(|| {
                    EngineError::configuration(format!(
                        "return target level {target} does not exist"
                    ))
                })?;
                self.enter_level(instance, &target_def, effects, true).await
            }
        }
    }

    // ── Level chain ──────────────────────────────────────────────────

    /// Walks the level chain forward from `after` (or from the first
    /// level), skipping levels whose conditions do not hold, and enters
    /// the first applicable one. With no level left the instance
    /// concludes as approved.
    async fn advance_chain(
        &self,
        instance: &mut ApprovalInstance,
        after: Option<u32>,
        effects: &mut SideEffects,
    ) -> EngineResult<()> {
        let mut next = match after {
            None => instance.definition.first_level().cloned(),
            Some(level) => instance.definition.next_level_after(level).cloned(),
        };

        while let Some(level_def) = next {
            if approval_types::conditions_hold(&level_def.conditions, &instance.context) {
                return self.enter_level(instance, &level_def, effects, false).await;
            }
            instance.skip_level(level_def.level);
            effects.audit.push(
                AuditEvent::new(
                    AuditKind::LevelTerminal,
                    instance.id.clone(),
                    ApproverId::system(),
                    format!(
                        "level {} ({}) skipped: entry conditions not met",
                        level_def.level, level_def.name
                    ),
                )
                .with_level(level_def.level)
                .with_payload(json!({"status": "skipped"})),
            );
            next = instance.definition.next_level_after(level_def.level).cloned();
        }

        instance.approve();
        self.conclude_effects(instance, effects);
        Ok(())
    }

    /// Enters (or re-enters) a level: resolves its approvers, computes
    /// the deadline, resets the level state, and queues the level-entered
    /// audit event and notification.
    async fn enter_level(
        &self,
        instance: &mut ApprovalInstance,
        level_def: &LevelDefinition,
        effects: &mut SideEffects,
        reentry: bool,
    ) -> EngineResult<()> {
        let eligible = self
            .resolver
            .resolve(&level_def.approver_spec, &instance.context)
            .await?;
        let due_at = level_def
            .timeout_hours
            .map(|hours| Utc::now() + Duration::hours(i64::from(hours)));

        instance.enter_level(level_def.level, due_at);

        let message = if reentry {
            format!(
                "level {} ({}) restarted; earlier votes cleared",
                level_def.level, level_def.name
            )
        } else {
            format!("level {} ({}) entered", level_def.level, level_def.name)
        };
        effects.audit.push(
            AuditEvent::new(
                AuditKind::LevelEntered,
                instance.id.clone(),
                ApproverId::system(),
                message,
            )
            .with_level(level_def.level)
            .with_payload(json!({
                "eligible": eligible,
                "due_at": due_at,
                "reentry": reentry,
            })),
        );
        effects.notices.push(ApprovalNotice::decision_requested(
            instance.id.clone(),
            instance.subject.clone(),
            level_def.level,
            &level_def.name,
            eligible,
        ));
        effects.advanced_levels.push(level_def.level);
        Ok(())
    }

    fn conclude_effects(&self, instance: &ApprovalInstance, effects: &mut SideEffects) {
        effects.audit.push(
            AuditEvent::new(
                AuditKind::WorkflowTerminal,
                instance.id.clone(),
                ApproverId::system(),
                format!("workflow {}", instance.status),
            )
            .with_payload(json!({"status": instance.status.as_str()})),
        );
        effects.notices.push(ApprovalNotice::concluded(
            instance.id.clone(),
            instance.subject.clone(),
            vec![instance.context.requester.clone()],
            instance.status.as_str(),
        ));
        effects.concluded = true;
    }

    // ── Cancellation ─────────────────────────────────────────────────

    /// Cancels a non-terminal instance. Only the requester or an
    /// override-role holder may cancel.
    pub async fn cancel(
        &self,
        instance_id: &InstanceId,
        actor: &ApproverId,
        reason: &str,
    ) -> EngineResult<ApprovalInstance> {
        let correlation = CorrelationId::generate();
        let mut attempt = 1;
        loop {
            match self.cancel_once(instance_id, actor, reason, &correlation).await {
                Err(err) if matches!(err.kind(), ErrorKind::ConcurrentModification { .. }) => {
                    if attempt >= self.config.retry.max_attempts {
                        return Err(EngineError::concurrent_modification(attempt)
                            .with_correlation(&correlation));
                    }
                    tokio::time::sleep(self.config.retry.backoff_delay(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err.with_correlation(&correlation)),
                Ok(instance) => return Ok(instance),
            }
        }
    }

    async fn cancel_once(
        &self,
        instance_id: &InstanceId,
        actor: &ApproverId,
        reason: &str,
        correlation: &CorrelationId,
    ) -> EngineResult<ApprovalInstance> {
        let stored = self.store.load_instance(instance_id).await?;
        let mut instance = stored.instance;
        let version = stored.version;

        if instance.is_terminal() {
            return Err(EngineError::instance_terminal(instance.status));
        }
        let authorized = actor == &instance.context.requester
            || self
                .resolver
                .has_override_role(instance.tenant_id(), actor)
                .await?;
        if !authorized {
            return Err(EngineError::eligibility(
                "only the requester or an administrator may cancel an approval",
            ));
        }

        instance.cancel();
        let mut effects = SideEffects::default();
        effects.audit.push(
            AuditEvent::new(
                AuditKind::WorkflowTerminal,
                instance.id.clone(),
                actor.clone(),
                format!("workflow cancelled by {actor}: {reason}"),
            )
            .with_payload(json!({"status": "cancelled", "reason": reason})),
        );
        effects.notices.push(ApprovalNotice::concluded(
            instance.id.clone(),
            instance.subject.clone(),
            vec![instance.context.requester.clone()],
            instance.status.as_str(),
        ));
        effects.concluded = true;

        self.store.save_instance(&instance, version).await?;
        self.flush_effects(&instance, effects, correlation).await;

        tracing::info!(
            correlation = %correlation,
            instance_id = %instance.id,
            actor = %actor,
            "approval instance cancelled"
        );
        Ok(instance)
    }

    // ── Timeouts ─────────────────────────────────────────────────────

    /// Checks the instance's current level deadline against `now` and
    /// applies the configured timeout action. Idempotent: a level that
    /// resolved since the caller noticed it was due reports
    /// [`TimeoutDisposition::AlreadyResolved`] and changes nothing.
    pub async fn apply_timeout(
        &self,
        instance_id: &InstanceId,
        now: DateTime<Utc>,
    ) -> EngineResult<TimeoutDisposition> {
        let correlation = CorrelationId::generate();
        let mut attempt = 1;
        loop {
            match self.apply_timeout_once(instance_id, now, &correlation).await {
                Err(err) if matches!(err.kind(), ErrorKind::ConcurrentModification { .. }) => {
                    if attempt >= self.config.retry.max_attempts {
                        return Err(EngineError::concurrent_modification(attempt)
                            .with_correlation(&correlation));
                    }
                    tokio::time::sleep(self.config.retry.backoff_delay(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err.with_correlation(&correlation)),
                Ok(disposition) => return Ok(disposition),
            }
        }
    }

    async fn apply_timeout_once(
        &self,
        instance_id: &InstanceId,
        now: DateTime<Utc>,
        correlation: &CorrelationId,
    ) -> EngineResult<TimeoutDisposition> {
        let stored = self.store.load_instance(instance_id).await?;
        let mut instance = stored.instance;
        let version = stored.version;

        // Re-verify under the same optimistic exclusivity as decisions:
        // a human may have resolved the level since the sweep saw it.
        if instance.is_terminal() {
            return Ok(TimeoutDisposition::AlreadyResolved);
        }
        let Some(current) = instance.current_level else {
            return Ok(TimeoutDisposition::AlreadyResolved);
        };
        let Some(state) = instance.level_state(current) else {
            return Ok(TimeoutDisposition::AlreadyResolved);
        };
        if !state.is_pending() {
            return Ok(TimeoutDisposition::AlreadyResolved);
        }
        if !state.is_overdue(now) {
            return Ok(TimeoutDisposition::NotDue);
        }
        let escalation_rounds = state.escalation_rounds;
        let due_extensions = state.due_extensions;

        let level_def = instance
            .definition
            .level(current)
            .ok_or_else(|| {
                EngineError::configuration(format!(
                    "current level {current} is missing from the definition snapshot"
                ))
            })?
            .clone();

        let mut effects = SideEffects::default();
        let disposition = match level_def.timeout_action {
            TimeoutAction::None => return Ok(TimeoutDisposition::Overdue),
            TimeoutAction::AutoApprove => {
                effects.audit.push(timeout_fired_event(
                    &instance,
                    current,
                    "deadline passed; auto-approving",
                    json!({"action": "auto_approve"}),
                ));
                let decision = Decision::system(
                    current,
                    DecisionAction::Approve,
                    "approval deadline passed; approved automatically",
                );
                self.apply_decision(&mut instance, &level_def, decision, &mut effects)
                    .await?;
                TimeoutDisposition::AutoApproved
            }
            TimeoutAction::AutoReject => {
                effects.audit.push(timeout_fired_event(
                    &instance,
                    current,
                    "deadline passed; auto-rejecting",
                    json!({"action": "auto_reject"}),
                ));
                let decision = Decision::system(
                    current,
                    DecisionAction::Reject,
                    "approval deadline passed; rejected automatically",
                );
                self.apply_decision(&mut instance, &level_def, decision, &mut effects)
                    .await?;
                TimeoutDisposition::AutoRejected
            }
            TimeoutAction::Escalate => {
                if escalation_rounds > self.config.escalation.max_extensions {
                    // Every bounded extension is spent and the final
                    // escalation notice already went out.
                    return Ok(TimeoutDisposition::EscalationExhausted);
                }
                let extended = due_extensions < self.config.escalation.max_extensions;
                instance.mark_escalated(current);
                if extended {
                    let next_due =
                        now + Duration::hours(i64::from(self.config.escalation.extension_hours));
                    instance.extend_level_due(current, next_due);
                }
                effects.audit.push(timeout_fired_event(
                    &instance,
                    current,
                    "deadline passed; escalating",
                    json!({"action": "escalate", "extended": extended}),
                ));
                let recipients = self.resolver.effective_eligible(&instance, &level_def).await?;
                effects.notices.push(ApprovalNotice::escalated(
                    instance.id.clone(),
                    instance.subject.clone(),
                    current,
                    recipients,
                    extended,
                ));
                TimeoutDisposition::Escalated { extended }
            }
        };

        self.store.save_instance(&instance, version).await?;
        self.flush_effects(&instance, effects, correlation).await;

        tracing::info!(
            correlation = %correlation,
            instance_id = %instance.id,
            level = current,
            disposition = ?disposition,
            "timeout applied"
        );
        Ok(disposition)
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub async fn instance(&self, instance_id: &InstanceId) -> EngineResult<ApprovalInstance> {
        Ok(self.store.load_instance(instance_id).await?.instance)
    }

    /// Summary projection, enriched with the approvers still expected to
    /// act on the current level (effective eligible set minus voters).
    pub async fn summary(&self, instance_id: &InstanceId) -> EngineResult<ApprovalSummary> {
        let instance = self.instance(instance_id).await?;
        let mut summary = instance.summary();
        if let Some(current) = instance.current_level {
            if let Some(level_def) = instance.definition.level(current) {
                summary.pending_approvers = self
                    .resolver
                    .effective_eligible(&instance, level_def)
                    .await?
                    .into_iter()
                    .filter(|approver| {
                        instance
                            .decision_by(current, approver)
                            .map_or(true, |d| !d.is_vote())
                    })
                    .collect();
            }
        }
        Ok(summary)
    }

    /// Instance summaries newest-first, optionally filtered.
    pub async fn list(
        &self,
        tenant: Option<&TenantId>,
        status: Option<InstanceStatus>,
        window: QueryWindow,
    ) -> EngineResult<Vec<ApprovalSummary>> {
        let stored = self.store.list_instances(tenant, status, window).await?;
        Ok(stored.into_iter().map(|s| s.instance.summary()).collect())
    }

    /// The open instance for a subject, if any.
    pub async fn find_open(
        &self,
        tenant: &TenantId,
        subject: &SubjectRef,
    ) -> EngineResult<Option<ApprovalInstance>> {
        Ok(self
            .store
            .find_open_by_subject(tenant, subject)
            .await?
            .map(|s| s.instance))
    }

    /// One instance's audit trail, oldest first.
    pub async fn audit_trail(
        &self,
        instance_id: &InstanceId,
        window: QueryWindow,
    ) -> EngineResult<Vec<AuditRecord>> {
        Ok(self.store.list_audit(instance_id, window).await?)
    }

    // ── Side effects ─────────────────────────────────────────────────

    /// Flushes buffered audit events, notices, and domain callbacks after
    /// a committed save. Failures here are logged, never propagated: the
    /// state change already holds.
    async fn flush_effects(
        &self,
        instance: &ApprovalInstance,
        effects: SideEffects,
        correlation: &CorrelationId,
    ) {
        for event in effects.audit {
            if let Err(err) = self.store.append_audit(event).await {
                tracing::error!(
                    correlation = %correlation,
                    instance_id = %instance.id,
                    error = %err,
                    "failed to append audit event"
                );
            }
        }
        for notice in effects.notices {
            if let Err(err) = self.notifier.deliver(notice).await {
                tracing::warn!(
                    correlation = %correlation,
                    instance_id = %instance.id,
                    error = %err,
                    "notice delivery failed"
                );
            }
        }
        for level in effects.advanced_levels {
            if let Err(err) = self.subjects.on_level_advanced(instance, level).await {
                tracing::warn!(
                    correlation = %correlation,
                    instance_id = %instance.id,
                    level,
                    error = %err,
                    "level-advanced callback failed"
                );
            }
        }
        if effects.concluded {
            if let Err(err) = self.subjects.on_concluded(instance).await {
                tracing::error!(
                    correlation = %correlation,
                    instance_id = %instance.id,
                    status = %instance.status,
                    error = %err,
                    "conclusion callback failed"
                );
            }
        }
    }
}

fn timeout_fired_event(
    instance: &ApprovalInstance,
    level: u32,
    message: &str,
    payload: serde_json::Value,
) -> AuditEvent {
    AuditEvent::new(
        AuditKind::TimeoutFired,
        instance.id.clone(),
        ApproverId::system(),
        format!("level {level}: {message}"),
    )
    .with_level(level)
    .with_payload(payload)
}

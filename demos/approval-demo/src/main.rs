//! Multi-Level Approval Engine Demo
//!
//! Walks one purchase order through a three-level approval chain:
//! dynamic manager resolution, a majority vote with a changed mind,
//! a conditional executive level with delegation, and the tamper-evident
//! audit trail left behind. A second scenario lets a deadline fire and
//! shows the sweep auto-approving on behalf of the system.

use approval_engine::{
    DirectoryUser, EngineConfig, NoopNotifier, NoopSubjectDomain, StaticDirectory, SubmitDecision,
    TimeoutScheduler, TransitionEngine,
};
use approval_storage::memory::MemoryApprovalStore;
use approval_storage::QueryWindow;
use approval_types::{
    ApprovalContext, ApprovalInstance, ApprovalMode, ApproverId, ApproverSpec, Condition,
    ConditionOperator, InstanceId, LevelDefinition, SubjectRef, TenantId, TimeoutAction,
    WorkflowDefinition,
};
use chrono::{Duration, Utc};
use colored::*;
use serde_json::json;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("approval_engine=warn")
        .init();

    banner();

    let tenant = TenantId::new("acme");
    let engine = Arc::new(TransitionEngine::new(
        Arc::new(MemoryApprovalStore::new()),
        Arc::new(build_directory(&tenant)),
        Arc::new(NoopSubjectDomain),
        Arc::new(NoopNotifier),
        EngineConfig::default(),
    ));

    let def_id = engine.register_definition(purchase_definition())?;
    println!(
        "  Registered definition {} ({})",
        "Purchase approval".bold(),
        def_id
    );
    println!();

    run_purchase_scenario(&engine, &tenant).await?;
    println!();
    run_deadline_scenario(&engine).await?;

    println!();
    println!("{}", "Demo complete!".green().bold());
    Ok(())
}

fn banner() {
    println!(
        "{}",
        "══════════════════════════════════════════════════════════════".cyan()
    );
    println!(
        "{}",
        "   Multi-Level Approval Engine - End-to-End Walkthrough".cyan().bold()
    );
    println!(
        "{}",
        "══════════════════════════════════════════════════════════════".cyan()
    );
    println!();
}

fn build_directory(tenant: &TenantId) -> StaticDirectory {
    StaticDirectory::new()
        .with_user(
            DirectoryUser::new(tenant.clone(), "mgr-1")
                .in_department("engineering")
                .as_manager(),
        )
        .with_user(DirectoryUser::new(tenant.clone(), "fin-1").with_role("finance"))
        .with_user(DirectoryUser::new(tenant.clone(), "fin-2").with_role("finance"))
        .with_user(DirectoryUser::new(tenant.clone(), "fin-3").with_role("finance"))
        .with_user(DirectoryUser::new(tenant.clone(), "cfo"))
        .with_user(DirectoryUser::new(tenant.clone(), "deputy-cfo"))
        .with_user(DirectoryUser::new(tenant.clone(), "alice").in_department("engineering"))
}

/// Three levels: the requester's manager, a majority of finance, and a
/// CFO sign-off that only activates for orders above 50k.
fn purchase_definition() -> WorkflowDefinition {
    let mut def = WorkflowDefinition::new("Purchase approval").for_subject_type("purchase_order");
    def.add_level(LevelDefinition::new(
        1,
        "Line manager",
        ApproverSpec::requester_department_managers(),
        ApprovalMode::Any,
    ))
    .expect("level numbers ascend");
    def.add_level(
        LevelDefinition::new(
            2,
            "Finance review",
            ApproverSpec::role("finance"),
            ApprovalMode::Majority,
        )
        .with_minimum_approvals(2),
    )
    .expect("level numbers ascend");
    def.add_level(
        LevelDefinition::new(3, "CFO sign-off", ApproverSpec::users(["cfo"]), ApprovalMode::Any)
            .allow_delegation()
            .with_condition(Condition::new(
                "amount",
                ConditionOperator::GreaterThan,
                json!(50_000),
            )),
    )
    .expect("level numbers ascend");
    def
}

async fn run_purchase_scenario(
    engine: &Arc<TransitionEngine>,
    tenant: &TenantId,
) -> anyhow::Result<()> {
    section("Scenario 1: 82k purchase order, three approval levels");

    let context = ApprovalContext::new(tenant.clone(), ApproverId::new("alice"))
        .with_department("engineering")
        .with_attribute("amount", json!(82_000))
        .with_attribute("vendor", json!("Crate & Cable GmbH"));
    let instance = engine
        .create_for_subject(SubjectRef::new("purchase_order", "po-1041"), context)
        .await?;
    print_state("alice files po-1041 for 82,000", &instance);

    // Level 1 resolves dynamically to the managers of alice's department.
    let instance = engine
        .submit(&instance.id, SubmitDecision::approve(ApproverId::new("mgr-1")))
        .await?;
    print_state("mgr-1 approves (line manager)", &instance);

    // Finance needs two of three. fin-1 first rejects, then changes
    // their mind; the resubmission replaces the earlier vote.
    let instance = engine
        .submit(
            &instance.id,
            SubmitDecision::reject(ApproverId::new("fin-1"), "missing cost breakdown"),
        )
        .await?;
    print_state("fin-1 rejects: missing cost breakdown", &instance);

    let instance = engine
        .submit(&instance.id, SubmitDecision::approve(ApproverId::new("fin-1")))
        .await?;
    print_state("fin-1 approves after the breakdown lands", &instance);

    let instance = engine
        .submit(&instance.id, SubmitDecision::approve(ApproverId::new("fin-2")))
        .await?;
    print_state("fin-2 approves, finance majority reached", &instance);

    // 82k > 50k, so the CFO level activated. The CFO is traveling and
    // hands the slot to their deputy.
    let instance = engine
        .submit(
            &instance.id,
            SubmitDecision::delegate(ApproverId::new("cfo"), ApproverId::new("deputy-cfo")),
        )
        .await?;
    print_state("cfo delegates the sign-off to deputy-cfo", &instance);

    let summary = engine.summary(&instance.id).await?;
    let waiting: Vec<String> = summary
        .pending_approvers
        .iter()
        .map(ToString::to_string)
        .collect();
    println!("  {:<48} {}", "", format!("waiting on: {}", waiting.join(", ")).dimmed());

    let instance = engine
        .submit(&instance.id, SubmitDecision::approve(ApproverId::new("deputy-cfo")))
        .await?;
    print_state("deputy-cfo approves", &instance);

    print_trail(engine, &instance.id).await?;
    Ok(())
}

async fn run_deadline_scenario(engine: &Arc<TransitionEngine>) -> anyhow::Result<()> {
    section("Scenario 2: a deadline fires and the sweep auto-approves");

    let mut def = WorkflowDefinition::new("Routine restock").for_subject_type("purchase_order");
    def.add_level(
        LevelDefinition::new(
            1,
            "Line manager",
            ApproverSpec::requester_department_managers(),
            ApprovalMode::Any,
        )
        .with_timeout(4, TimeoutAction::AutoApprove),
    )
    .expect("level numbers ascend");
    def.add_level(LevelDefinition::new(
        2,
        "Finance review",
        ApproverSpec::role("finance"),
        ApprovalMode::Any,
    ))
    .expect("level numbers ascend");
    let def_id = engine.register_definition(def)?;

    let context = ApprovalContext::new(TenantId::new("acme"), ApproverId::new("alice"))
        .with_department("engineering")
        .with_attribute("amount", json!(900));
    let instance = engine
        .create(&def_id, SubjectRef::new("purchase_order", "po-1042"), context)
        .await?;
    print_state("alice files po-1042, manager has 4 hours", &instance);

    // Nobody decides. Pretend five hours pass and run one sweep.
    let (scheduler, _sweep_rx) = TimeoutScheduler::new(engine.clone(), EngineConfig::default().sweep);
    let report = scheduler.sweep_at(Utc::now() + Duration::hours(5)).await?;
    println!(
        "  Sweep report: {} scanned, {} auto-approved",
        report.scanned, report.auto_approved
    );

    let instance = engine.instance(&instance.id).await?;
    print_state("after the sweep, the system approved level 1", &instance);

    print_trail(engine, &instance.id).await?;
    Ok(())
}

fn section(title: &str) {
    println!(
        "{}",
        "──────────────────────────────────────────────────────────────".yellow()
    );
    println!("  {}", title.yellow().bold());
    println!(
        "{}",
        "──────────────────────────────────────────────────────────────".yellow()
    );
    println!();
}

fn print_state(action: &str, instance: &ApprovalInstance) {
    let summary = instance.summary();
    let position = match (summary.current_level, summary.current_level_name.as_deref()) {
        (Some(level), Some(name)) => format!("level {level} ({name})"),
        (Some(level), None) => format!("level {level}"),
        (None, _) => "-".to_string(),
    };
    println!(
        "  {:<48} {} {}",
        action,
        format!("[{}]", summary.status).bold(),
        position.dimmed()
    );
}

async fn print_trail(engine: &TransitionEngine, instance_id: &InstanceId) -> anyhow::Result<()> {
    println!();
    println!("  {}", "Audit trail".bold());
    let trail = engine.audit_trail(instance_id, QueryWindow::default()).await?;
    for record in &trail {
        println!(
            "    #{:<3} {:<18} {}",
            record.sequence,
            record.kind.as_str(),
            record.message.dimmed()
        );
    }
    println!();
    Ok(())
}

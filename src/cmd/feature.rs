//! One-shot feature commands — create, resume, approve, status, list,
//! cancel.

use anyhow::Result;
use console::style;
use dialoguer::Confirm;

use foreman::state::WorkflowState;

use crate::Cli;

pub async fn cmd_create(cli: &Cli, title: &str, description: Option<&str>) -> Result<()> {
    let orchestrator = super::build_orchestrator(cli)?;
    let state = orchestrator
        .create_feature(title, description.unwrap_or(title))
        .await?;

    println!(
        "{} feature #{} created",
        style("✓").green(),
        state.feature_id
    );
    println!("  branch:   {}", state.branch_name);
    println!("  worktree: {}", state.worktree_path.display());
    println!("  phase:    {}", state.current_phase);
    Ok(())
}

pub async fn cmd_resume(cli: &Cli, feature_id: u64) -> Result<()> {
    let orchestrator = super::build_orchestrator(cli)?;
    let state = orchestrator.resume_setup(feature_id).await?;
    println!(
        "{} feature #{} setup resumed, now in {}",
        style("✓").green(),
        feature_id,
        state.current_phase
    );
    Ok(())
}

pub async fn cmd_approve(cli: &Cli, feature_id: u64) -> Result<()> {
    let orchestrator = super::build_orchestrator(cli)?;
    orchestrator.approve_gate(feature_id).await?;
    println!(
        "{} approval recorded for feature #{}; the workflow advances on the next tick",
        style("✓").green(),
        feature_id
    );
    Ok(())
}

pub async fn cmd_status(cli: &Cli, feature_id: u64) -> Result<()> {
    let orchestrator = super::build_orchestrator(cli)?;
    let Some(state) = orchestrator.feature_state(feature_id)? else {
        anyhow::bail!("no workflow exists for feature {feature_id}");
    };

    println!("{} {}", style(format!("#{feature_id}")).bold(), state.title);
    println!("  phase: {}", style(state.current_phase).cyan());
    println!("  label: {}", state.status_label());

    let pending = state.pending_workers();
    if !pending.is_empty() {
        println!("  waiting on: {}", pending.join(", "));
    }
    if state.current_phase.is_gate()
        && let Some(record) = state.active_record()
    {
        let verdict = if record.human_approved {
            style("approved").green()
        } else {
            style("awaiting approval").yellow()
        };
        println!("  gate: {verdict}");
    }

    println!("  history:");
    for record in &state.phase_history {
        let mark = if record.completed_at.is_some() {
            style("✓").green()
        } else {
            style("…").dim()
        };
        println!(
            "    {mark} {} ({})",
            record.phase,
            record.started_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

pub async fn cmd_list(cli: &Cli) -> Result<()> {
    let orchestrator = super::build_orchestrator(cli)?;
    let states = orchestrator.list_features()?;
    if states.is_empty() {
        println!("no features tracked");
        return Ok(());
    }

    for state in &states {
        print_summary_line(state);
    }
    Ok(())
}

fn print_summary_line(state: &WorkflowState) {
    let phase = if state.current_phase.is_terminal() {
        style(state.current_phase.to_string()).dim()
    } else {
        style(state.current_phase.to_string()).cyan()
    };
    println!(
        "{:>6}  {}  {}",
        style(format!("#{}", state.feature_id)).bold(),
        phase,
        state.title
    );
}

pub async fn cmd_cancel(cli: &Cli, feature_id: u64, force: bool) -> Result<()> {
    if !force {
        let confirmed = Confirm::new()
            .with_prompt(format!("Cancel the workflow for feature #{feature_id}?"))
            .default(false)
            .interact()?;
        if !confirmed {
            return Ok(());
        }
    }

    let orchestrator = super::build_orchestrator(cli)?;
    orchestrator.cancel_feature(feature_id).await?;
    println!("{} feature #{feature_id} cancelled", style("✓").green());
    Ok(())
}

//! Phase definitions for the Foreman workflow.
//!
//! This module provides:
//! - `WorkflowPhase` enum covering the full delivery sequence, gates, and
//!   terminal states
//! - Table-driven accessors for gate-ness, successor, status label, required
//!   workers, and prompt templates
//!
//! The phase order is fixed at compile time and never mutated at runtime.
//! Everything the state machine and dispatcher need to know about a phase is
//! answered from these tables rather than scattered conditionals.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix reserved for orchestrator-managed status labels on the tracker.
pub const STATUS_LABEL_PREFIX: &str = "status:";

/// One stage of the fixed delivery workflow.
///
/// Work phases require named workers to each signal completion; gates require
/// a single human approval; program-executed phases (setup, PR creation,
/// cleanup) require neither. `Done` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowPhase {
    #[serde(rename = "PHASE_1_SETUP")]
    Phase1Setup,
    #[serde(rename = "PHASE_2_SPECS")]
    Phase2Specs,
    #[serde(rename = "GATE_1_SPECS")]
    Gate1Specs,
    #[serde(rename = "PHASE_3_PLANS")]
    Phase3Plans,
    #[serde(rename = "GATE_2_PLANS")]
    Gate2Plans,
    #[serde(rename = "PHASE_4_TESTS")]
    Phase4Tests,
    #[serde(rename = "GATE_3_TESTS")]
    Gate3Tests,
    #[serde(rename = "PHASE_5_IMPLEMENTATION")]
    Phase5Implementation,
    #[serde(rename = "PHASE_6_CREATE_PR")]
    Phase6CreatePr,
    #[serde(rename = "PHASE_7_REVIEW")]
    Phase7Review,
    #[serde(rename = "GATE_4_MERGE")]
    Gate4Merge,
    #[serde(rename = "PHASE_8_CLEANUP")]
    Phase8Cleanup,
    #[serde(rename = "DONE")]
    Done,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

/// The forward phase sequence. `Cancelled` is reachable only by operator
/// action, never by advancing, so it does not appear here.
const SEQUENCE: &[WorkflowPhase] = &[
    WorkflowPhase::Phase1Setup,
    WorkflowPhase::Phase2Specs,
    WorkflowPhase::Gate1Specs,
    WorkflowPhase::Phase3Plans,
    WorkflowPhase::Gate2Plans,
    WorkflowPhase::Phase4Tests,
    WorkflowPhase::Gate3Tests,
    WorkflowPhase::Phase5Implementation,
    WorkflowPhase::Phase6CreatePr,
    WorkflowPhase::Phase7Review,
    WorkflowPhase::Gate4Merge,
    WorkflowPhase::Phase8Cleanup,
    WorkflowPhase::Done,
];

impl WorkflowPhase {
    /// All phases in forward order, terminals last.
    pub fn sequence() -> &'static [WorkflowPhase] {
        SEQUENCE
    }

    /// Position in the forward order. `Cancelled` sorts after everything.
    pub fn index(&self) -> usize {
        SEQUENCE
            .iter()
            .position(|p| p == self)
            .unwrap_or(SEQUENCE.len())
    }

    /// Whether this phase is a human approval gate.
    pub fn is_gate(&self) -> bool {
        matches!(
            self,
            WorkflowPhase::Gate1Specs
                | WorkflowPhase::Gate2Plans
                | WorkflowPhase::Gate3Tests
                | WorkflowPhase::Gate4Merge
        )
    }

    /// Whether this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowPhase::Done | WorkflowPhase::Cancelled)
    }

    /// The next phase in the workflow, or `None` for terminal phases.
    pub fn successor(&self) -> Option<WorkflowPhase> {
        let idx = SEQUENCE.iter().position(|p| p == self)?;
        SEQUENCE.get(idx + 1).copied()
    }

    /// The status label the tracker should carry while in this phase.
    pub fn status_label(&self) -> &'static str {
        match self {
            WorkflowPhase::Phase1Setup | WorkflowPhase::Phase2Specs => "status:new",
            WorkflowPhase::Gate1Specs | WorkflowPhase::Phase3Plans => "status:specs-ready",
            WorkflowPhase::Gate2Plans | WorkflowPhase::Phase4Tests => "status:plans-ready",
            WorkflowPhase::Gate3Tests => "status:tests-designed",
            WorkflowPhase::Phase5Implementation | WorkflowPhase::Phase6CreatePr => {
                "status:implementing"
            }
            WorkflowPhase::Phase7Review => "status:in-review",
            WorkflowPhase::Gate4Merge | WorkflowPhase::Phase8Cleanup => "status:approved",
            WorkflowPhase::Done => "status:done",
            WorkflowPhase::Cancelled => "status:cancelled",
        }
    }

    /// Workers that must each signal completion before this phase can
    /// advance. Empty for gates, program-executed phases, and terminals.
    pub fn required_workers(&self) -> &'static [&'static str] {
        match self {
            WorkflowPhase::Phase2Specs => &["duc"],
            WorkflowPhase::Phase3Plans => &["dede", "dali", "gus"],
            WorkflowPhase::Phase4Tests => &["marie"],
            WorkflowPhase::Phase5Implementation => &["dede", "dali", "gus"],
            WorkflowPhase::Phase7Review => &["dede", "dali", "gus", "marie"],
            _ => &[],
        }
    }

    /// Prompt template for workers dispatched in this phase.
    ///
    /// Placeholders `{worker}` and `{feature_id}` are substituted at
    /// dispatch time. Phases without a template get a generic fallback
    /// built by the dispatcher.
    pub fn prompt_template(&self) -> Option<&'static str> {
        match self {
            WorkflowPhase::Phase2Specs => Some(
                "You are @{worker}, the architecture specialist.\n\
                 \n\
                 Your task: review feature #{feature_id} and write architecture \
                 specifications.\n\
                 \n\
                 1. Read the feature description and any prior discussion\n\
                 2. Design the system architecture for this feature\n\
                 3. Write specs to `.plans/{feature_id}/specs/`\n\
                 4. Post a comment containing \u{2705} with a summary when done\n",
            ),
            WorkflowPhase::Phase3Plans => Some(
                "You are @{worker}, an implementation planner.\n\
                 \n\
                 Your task: read the approved specs for feature #{feature_id} and \
                 write an implementation plan for your area.\n\
                 \n\
                 1. Read `.plans/{feature_id}/specs/`\n\
                 2. Write your plan to `.plans/{feature_id}/plans/{worker}.md`\n\
                 3. Post a comment containing \u{2705} with a summary when done\n",
            ),
            WorkflowPhase::Phase4Tests => Some(
                "You are @{worker}, the test designer.\n\
                 \n\
                 Your task: design the test suite for feature #{feature_id} from \
                 the approved plans.\n\
                 \n\
                 1. Read `.plans/{feature_id}/plans/`\n\
                 2. Write test designs to `.plans/{feature_id}/tests/`\n\
                 3. Post a comment containing \u{2705} with a summary when done\n",
            ),
            WorkflowPhase::Phase5Implementation => Some(
                "You are @{worker}, an implementer.\n\
                 \n\
                 Your task: implement your plan for feature #{feature_id} \
                 test-first, following the approved test designs.\n\
                 \n\
                 1. Read `.plans/{feature_id}/plans/{worker}.md` and the test designs\n\
                 2. Implement with tests passing\n\
                 3. Post a comment containing \u{2705} with a summary when done\n",
            ),
            WorkflowPhase::Phase7Review => Some(
                "You are @{worker}, a reviewer.\n\
                 \n\
                 Your task: review the pull request for feature #{feature_id} in \
                 your area of expertise and post findings.\n\
                 \n\
                 1. Read the diff and the specs under `.plans/{feature_id}/`\n\
                 2. Post review findings as comments\n\
                 3. Post a comment containing \u{2705} with a summary when done\n",
            ),
            _ => None,
        }
    }
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowPhase::Phase1Setup => "PHASE_1_SETUP",
            WorkflowPhase::Phase2Specs => "PHASE_2_SPECS",
            WorkflowPhase::Gate1Specs => "GATE_1_SPECS",
            WorkflowPhase::Phase3Plans => "PHASE_3_PLANS",
            WorkflowPhase::Gate2Plans => "GATE_2_PLANS",
            WorkflowPhase::Phase4Tests => "PHASE_4_TESTS",
            WorkflowPhase::Gate3Tests => "GATE_3_TESTS",
            WorkflowPhase::Phase5Implementation => "PHASE_5_IMPLEMENTATION",
            WorkflowPhase::Phase6CreatePr => "PHASE_6_CREATE_PR",
            WorkflowPhase::Phase7Review => "PHASE_7_REVIEW",
            WorkflowPhase::Gate4Merge => "GATE_4_MERGE",
            WorkflowPhase::Phase8Cleanup => "PHASE_8_CLEANUP",
            WorkflowPhase::Done => "DONE",
            WorkflowPhase::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

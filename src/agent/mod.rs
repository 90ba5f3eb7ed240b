//! Bounded agent: planner, tool executor, and state graph runner

pub mod graph;
pub mod planner;
pub mod state;
pub mod tools;

pub use graph::GraphRunner;
pub use planner::{LlmPlanner, Planner, RulePlanner, TOOL_DRAFT_ANSWER, TOOL_SEARCH_EVIDENCE};
pub use state::{
    AgenticAnswerState, GraphRunLimits, GraphRunOutput, PlanStep, TerminatedReason, ToolCallRecord,
};
pub use tools::{ToolDefinition, ToolExecutionResult, ToolExecutor, ToolFn};

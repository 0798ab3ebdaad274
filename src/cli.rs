use crate::error::{ArbeitError, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;

const LONG_ABOUT: &str = r#"
Arbeit - task graph memory for coding agents

Tasks form a forest (parent_of, at most 4 levels deep) with blocking edges
between them. Each task carries an ordered step list, discoveries, decisions,
context entries and progress items, all stored in .arbeit/arbeit.db.

Agent workflow:
  arbeit init                                  create .arbeit/ in the project
  arbeit tool task_create --args '{...}'       run a single tool call
  arbeit serve                                 line-delimited JSON tool calls on stdin

Rules enforced on every write:
  - in_progress needs a plan (except epics)
  - completed needs description and plan, and no open blockers
  - relationships never form cycles and never exceed depth 4
"#;

#[derive(Parser, Clone, Debug)]
#[command(name = "arbeit")]
#[command(about = "Task graph memory for coding agents")]
#[command(long_about = LONG_ABOUT)]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Project directory (defaults to ARBEIT_PROJECT_DIR, then the nearest .arbeit/)
    #[arg(long, global = true)]
    pub dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Create .arbeit/ and the database in the project directory
    Init,

    /// Report whether the project directory is initialized
    Status,

    /// Run one tool call and print its JSON response
    ///
    /// Examples:
    ///   arbeit tool task_create --args '{"title": "Fix login", "type": "bug"}'
    ///   echo '{"query": "active_tasks"}' | arbeit tool query
    Tool {
        /// Tool name, e.g. task_create, query, steps_add
        name: String,

        /// JSON arguments; read from stdin when omitted
        #[arg(long)]
        args: Option<String>,
    },

    /// List the available tool names
    Tools,

    /// Serve line-delimited JSON tool calls on stdin
    Serve,
}

pub fn read_stdin() -> Result<String> {
    let mut buffer = String::new();
    std::io::stdin().read_to_string(&mut buffer)?;
    Ok(buffer)
}

/// Parse tool arguments, treating blank input as `{}`.
pub fn parse_tool_args(raw: &str) -> Result<serde_json::Value> {
    if raw.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    serde_json::from_str(raw).map_err(|e| ArbeitError::InvalidInput(format!("Invalid JSON: {}", e)))
}

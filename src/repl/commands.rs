//! Built-in REPL commands
//!
//! Anything that does not start with `/` is a question for the pipeline.

use anyhow::Result;
use colored::*;

use crate::repl::ReplState;
use crate::session::SessionStore;
use crate::types::RetrievalStrategy;

/// REPL command types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    History,
    Summaries,
    Clear,
    Strategy { strategy: RetrievalStrategy },
    Require { enable: bool },
    HistoryMode { enable: bool },
    Exit,
    Unknown { input: String },
}

/// Parses and executes REPL commands
#[derive(Debug, Default)]
pub struct CommandHandler;

impl CommandHandler {
    pub fn new() -> Self {
        CommandHandler
    }

    pub fn parse(&self, input: &str) -> Command {
        let trimmed = input.trim();
        let unknown = || Command::Unknown {
            input: input.to_string(),
        };

        let Some(body) = trimmed.strip_prefix('/') else {
            return unknown();
        };
        let parts: Vec<&str> = body.split_whitespace().collect();
        let Some(name) = parts.first() else {
            return unknown();
        };

        match name.to_lowercase().as_str() {
            "help" | "h" => Command::Help,
            "exit" | "quit" | "q" => Command::Exit,
            "history" => Command::History,
            "summaries" => Command::Summaries,
            "clear" | "reset" => Command::Clear,
            "strategy" => match parts.get(1).map(|s| s.parse::<RetrievalStrategy>()) {
                Some(Ok(strategy)) => Command::Strategy { strategy },
                _ => unknown(),
            },
            "require" => match parts.get(1).and_then(|s| parse_switch(s)) {
                Some(enable) => Command::Require { enable },
                None => unknown(),
            },
            "history-mode" => match parts.get(1).and_then(|s| parse_switch(s)) {
                Some(enable) => Command::HistoryMode { enable },
                None => unknown(),
            },
            _ => unknown(),
        }
    }

    /// Execute a command
    ///
    /// Returns true if the REPL should continue, false if it should exit.
    pub async fn execute(
        &self,
        command: Command,
        state: &mut ReplState,
        sessions: &SessionStore,
    ) -> Result<bool> {
        match command {
            Command::Help => self.show_help(),
            Command::Exit => {
                println!("{}", "Goodbye!".green());
                return Ok(false);
            }
            Command::History => self.show_history(state, sessions).await,
            Command::Summaries => self.show_summaries(state, sessions).await,
            Command::Clear => {
                sessions.clear(&state.session_id).await;
                println!(
                    "{}",
                    format!("Session {} cleared.", state.session_id).yellow()
                );
            }
            Command::Strategy { strategy } => {
                state.strategy = strategy;
                println!("{}", format!("Retrieval strategy: {}", strategy).cyan());
            }
            Command::Require { enable } => {
                state.require_retrieval = enable;
                println!("{}", format!("Require retrieval {}", on_off(enable)).cyan());
            }
            Command::HistoryMode { enable } => {
                state.history_enabled = enable;
                println!("{}", format!("Conversation history {}", on_off(enable)).cyan());
            }
            Command::Unknown { input } => {
                println!("{}", format!("Unknown command: {}", input).red());
                println!("Type {} for available commands", "/help".cyan());
            }
        }
        Ok(true)
    }

    fn show_help(&self) {
        println!("\n{}", "Available Commands:".bold().cyan());
        println!("{}", "=".repeat(60).cyan());

        let commands = [
            ("/help, /h", "Show this help message"),
            ("/history", "Show stored turns of this session"),
            ("/summaries", "Show compacted summaries of this session"),
            ("/clear", "Forget this session's history"),
            ("/strategy vector|llm", "Select the retrieval strategy"),
            ("/require on|off", "Fail when nothing relevant is retrieved"),
            ("/history-mode on|off", "Include conversation history in prompts"),
            ("/exit, /quit, /q", "Exit REPL"),
        ];

        for (cmd, desc) in commands {
            println!("  {:<22} {}", cmd.green(), desc);
        }

        println!("\n{}", "Usage:".bold());
        println!("  - Type a question directly (no / prefix)");
        println!("  - Press {} while an answer streams to cancel it", "Ctrl-C".cyan());
        println!("  - Press {} or {} to exit", "Ctrl-D".cyan(), "/exit".cyan());
        println!();
    }

    async fn show_history(&self, state: &ReplState, sessions: &SessionStore) {
        let snapshot = sessions.get_history(&state.session_id).await;
        if snapshot.turns.is_empty() {
            println!("{}", "No turns stored yet.".yellow());
            return;
        }

        println!("\n{}", format!("Session {}:", state.session_id).bold().cyan());
        for turn in &snapshot.turns {
            println!("  {} {}", format!("[{}]", turn.sequence).dimmed(), turn.question);
            println!("      {}", preview(&turn.answer, 120).dimmed());
        }
        println!();
    }

    async fn show_summaries(&self, state: &ReplState, sessions: &SessionStore) {
        let snapshot = sessions.get_history(&state.session_id).await;
        if snapshot.summaries.is_empty() {
            println!("{}", "No summaries yet.".yellow());
            return;
        }

        for summary in &snapshot.summaries {
            let range = summary.covered_turn_range;
            println!(
                "\n{}",
                format!("Turns {}-{} ({:?}):", range.first, range.last, summary.source)
                    .bold()
                    .cyan()
            );
            println!("{}", summary.render().trim_end());
        }
        println!();
    }
}

/// Check if input is a command (starts with /)
pub fn is_command(input: &str) -> bool {
    input.trim().starts_with('/')
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "on" | "true" | "1" => Some(true),
        "off" | "false" | "0" => Some(false),
        _ => None,
    }
}

fn on_off(enable: bool) -> &'static str {
    if enable {
        "enabled"
    } else {
        "disabled"
    }
}

/// First `max_chars` characters on one line
fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut)
}

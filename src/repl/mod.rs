//! Interactive terminal front-end
//!
//! One REPL is one conversation: every question goes to the streaming
//! pipeline under the same session id, so follow-ups see earlier turns.
//! Ctrl-C while an answer streams cancels that request only.

pub mod commands;
pub mod input;

use anyhow::Result;
use colored::*;
use futures_util::StreamExt;
use std::io::Write;
use std::path::PathBuf;

use crate::rag::{PipelineSettings, StreamingPipeline};
use crate::repl::commands::{is_command, CommandHandler};
use crate::repl::input::{InputHandler, ReadOutcome};
use crate::types::{AnalysisRequest, ResponseEvent, RetrievalStrategy};

/// Per-conversation toggles changed by commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplState {
    pub session_id: String,
    pub strategy: RetrievalStrategy,
    pub require_retrieval: bool,
    pub history_enabled: bool,
}

impl ReplState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            strategy: RetrievalStrategy::default(),
            require_retrieval: false,
            history_enabled: true,
        }
    }

    fn from_settings(session_id: String, settings: PipelineSettings) -> Self {
        Self {
            require_retrieval: settings.require_retrieval,
            history_enabled: settings.history_enabled,
            ..Self::new(session_id)
        }
    }

    /// Pipeline settings with this conversation's toggles applied
    pub fn apply(&self, settings: PipelineSettings) -> PipelineSettings {
        PipelineSettings {
            history_enabled: self.history_enabled,
            require_retrieval: self.require_retrieval,
            ..settings
        }
    }
}

/// REPL session coordinator
pub struct ReplSession {
    input_handler: InputHandler,
    command_handler: CommandHandler,
    pipeline: StreamingPipeline,
    state: ReplState,
}

impl ReplSession {
    /// New REPL over `pipeline`; a random session id is used when none is given
    pub fn new(
        pipeline: StreamingPipeline,
        history_path: PathBuf,
        session_id: Option<String>,
    ) -> Result<Self> {
        let session_id = session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let state = ReplState::from_settings(session_id, pipeline.settings());

        Ok(ReplSession {
            input_handler: InputHandler::with_history(history_path)?,
            command_handler: CommandHandler::new(),
            pipeline,
            state,
        })
    }

    pub fn state(&self) -> &ReplState {
        &self.state
    }

    pub async fn run(&mut self) -> Result<()> {
        self.show_welcome();

        loop {
            match self.input_handler.read_line()? {
                ReadOutcome::Line(line) if line.is_empty() => continue,
                ReadOutcome::Line(line) if is_command(&line) => {
                    let command = self.command_handler.parse(&line);
                    let keep_going = self
                        .command_handler
                        .execute(command, &mut self.state, self.pipeline.sessions())
                        .await?;
                    if !keep_going {
                        break;
                    }
                }
                ReadOutcome::Line(question) => self.ask(question).await?,
                ReadOutcome::Interrupted => {
                    println!("{}", "Type /exit or press Ctrl-D to quit".dimmed());
                }
                ReadOutcome::Eof => {
                    println!("{}", "Goodbye!".green());
                    break;
                }
            }
        }

        self.input_handler.save_history()?;
        Ok(())
    }

    /// Stream one answer to stdout
    async fn ask(&mut self, question: String) -> Result<()> {
        let pipeline = self
            .pipeline
            .clone()
            .with_settings(self.state.apply(self.pipeline.settings()));
        let request = AnalysisRequest::new(question)
            .with_session(self.state.session_id.clone())
            .with_strategy(self.state.strategy);

        let mut events = pipeline.stream(request);
        let mut stdout = std::io::stdout();

        loop {
            tokio::select! {
                event = events.next() => {
                    let Some(event) = event else { break };
                    let terminal = event.is_terminal();
                    render_event(&mut stdout, &event)?;
                    if terminal {
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    events.cancel();
                    println!("\n{}", "Answer cancelled.".yellow());
                    break;
                }
            }
        }
        Ok(())
    }

    fn show_welcome(&self) {
        println!("{}", "medstream".bold().cyan());
        println!(
            "{}",
            format!(
                "session {} | strategy {} | /help for commands",
                self.state.session_id, self.state.strategy
            )
            .dimmed()
        );
        println!();
    }
}

fn render_event(out: &mut impl Write, event: &ResponseEvent) -> Result<()> {
    match event {
        ResponseEvent::Start { .. } => {}
        ResponseEvent::Chunk { content, .. } => {
            write!(out, "{}", content)?;
            out.flush()?;
        }
        ResponseEvent::End { total_chunks, .. } => {
            writeln!(out)?;
            writeln!(out, "{}", format!("({} chunks)", total_chunks).dimmed())?;
        }
        ResponseEvent::Error { kind, error } => {
            writeln!(out)?;
            writeln!(out, "{}", format!("Error [{}]: {}", kind, error).red())?;
        }
    }
    Ok(())
}

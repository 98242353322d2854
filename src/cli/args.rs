//! Command-line argument parsing for medstream
//!
//! Provides clap-based CLI with subcommands and verbosity control.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::types::RetrievalStrategy;

/// medstream - session-aware medical question answering over a knowledge base
#[derive(Parser, Debug)]
#[command(name = "medstream")]
#[command(version)]
#[command(about = "Answer medical questions with retrieval and conversation memory", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbosity level: -q (quiet), default (normal), -v (verbose), -vv (very verbose)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Subcommand (interactive chat when omitted)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Start an interactive conversation
    Chat {
        /// Resume a session id instead of starting a fresh one
        #[arg(long)]
        session: Option<String>,
    },

    /// Ask one question and print the response as SSE frames
    Ask {
        /// The question
        #[arg(value_name = "QUESTION")]
        question: String,

        /// Session id (generated when omitted)
        #[arg(long)]
        session: Option<String>,

        /// Retrieval strategy: vector or llm
        #[arg(long, default_value = "vector")]
        strategy: RetrievalStrategy,

        /// Knowledge base JSON file for this request
        #[arg(long = "kb", value_name = "FILE")]
        knowledge_base: Option<PathBuf>,

        /// Structured patient data JSON file
        #[arg(long, value_name = "FILE")]
        patient: Option<PathBuf>,

        /// Fail when retrieval finds nothing relevant
        #[arg(long)]
        require_retrieval: bool,

        /// Ignore conversation history
        #[arg(long)]
        no_history: bool,
    },

    /// Display the effective configuration
    Config,
}

/// Verbosity level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
    VeryVerbose,
}

impl Args {
    /// Get verbosity level based on flags
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else {
            match self.verbose {
                0 => Verbosity::Normal,
                1 => Verbosity::Verbose,
                _ => Verbosity::VeryVerbose,
            }
        }
    }

    /// Subcommand to run, defaulting to a fresh chat
    pub fn command(&self) -> Commands {
        self.command
            .clone()
            .unwrap_or(Commands::Chat { session: None })
    }
}

impl Verbosity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verbosity::Quiet => "quiet",
            Verbosity::Normal => "normal",
            Verbosity::Verbose => "verbose",
            Verbosity::VeryVerbose => "very_verbose",
        }
    }

    /// Default log filter; `RUST_LOG` takes precedence
    pub fn log_level(&self) -> &'static str {
        match self {
            Verbosity::Quiet => "error",
            Verbosity::Normal => "warn",
            Verbosity::Verbose => "info",
            Verbosity::VeryVerbose => "debug",
        }
    }
}

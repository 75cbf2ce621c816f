//! CLI argument definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "mesmer", version, about = "A mentalist that learns from every audience")]
pub struct Args {
    /// Override the ledger database path
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Override the provider base URL
    #[arg(long, global = true)]
    pub provider_url: Option<String>,

    /// Override the provider model
    #[arg(long, global = true)]
    pub model: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start an interactive performance; /end finishes the session
    Chat {
        /// Opaque user identity token
        #[arg(long, default_value = "local")]
        user: String,

        /// Persona to perform as
        #[arg(long, default_value = "the_mentalist")]
        persona: String,
    },

    /// Show technique metrics for a persona
    Stats {
        #[arg(default_value = "the_mentalist")]
        persona: String,
    },

    /// Show the synthesized learnings briefing for a persona
    Summary {
        #[arg(default_value = "the_mentalist")]
        persona: String,
    },

    /// Show what a persona remembers about one user
    Memory {
        user: String,

        #[arg(default_value = "the_mentalist")]
        persona: String,
    },

    /// List available personas
    Personas,
}

//! CLI argument definitions

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "propmatch")]
#[command(author, version, about = "Natural-language property search demo harness")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format
    #[arg(long, global = true, value_enum, default_value = "cli")]
    pub format: OutputFormat,

    /// Simulate the LLM provider being unreachable, to exercise the
    /// hybrid-only degraded path.
    #[arg(long, global = true)]
    pub simulate_llm_down: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a natural-language search against the fixture listing set
    Search(SearchArgs),

    /// Generate a match explanation for one listing
    Explain(ExplainArgs),

    /// Stream a match explanation for one listing
    ExplainStream(ExplainArgs),

    /// Rebuild the BM25 lexical corpus from the fixture sample
    Reindex,
}

#[derive(Args)]
pub struct SearchArgs {
    /// Search query, e.g. "3 bedroom house under 4 million in Rondebosch"
    pub query: Vec<String>,

    /// Page number
    #[arg(long, default_value = "1")]
    pub page: u32,

    /// Results per page
    #[arg(long, default_value = "10")]
    pub page_size: u32,

    /// Simulated client IP, for rate-limit and quarantine testing
    #[arg(long, default_value = "127.0.0.1")]
    pub ip: String,
}

#[derive(Args)]
pub struct ExplainArgs {
    /// Search query this explanation is relative to
    pub query: Vec<String>,

    /// Listing key to explain
    #[arg(long)]
    pub listing: i64,

    /// Simulated client IP
    #[arg(long, default_value = "127.0.0.1")]
    pub ip: String,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Cli,
    Json,
}

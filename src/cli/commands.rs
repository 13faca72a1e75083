use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "query-orchestrator")]
#[command(author, version, about = "Conversational query service with cached chat history", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API
    Serve {
        /// Overrides server.host
        #[arg(long)]
        host: Option<String>,

        /// Overrides server.port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Ask one question in a conversation and record the exchange
    Query {
        query: String,

        #[arg(short, long)]
        user: String,

        #[arg(short, long)]
        chat: String,

        /// Title of a document to pull similar documents for
        #[arg(short = 'd', long)]
        doc_title: Option<String>,
    },

    /// Show the current history view of a conversation
    History {
        #[arg(short, long)]
        user: String,

        #[arg(short, long)]
        chat: String,

        /// Number of turns (capped at history.max_turns)
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

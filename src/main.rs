use anyhow::Result;
use clap::Parser;
use query_orchestrator::cli::{Cli, Commands};
use query_orchestrator::{utils, App, ConversationKey, QueryRequest, Settings};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let mut settings = Settings::new()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level)),
        )
        .init();

    if let Commands::Serve { host, port } = &cli.command {
        if let Some(host) = host {
            settings.server.host = host.clone();
        }
        if let Some(port) = port {
            settings.server.port = *port;
        }
    }

    let app = App::start(settings).await?;

    let result = match cli.command {
        Commands::Serve { .. } => app.serve().await,
        Commands::Query {
            query,
            user,
            chat,
            doc_title,
        } => handle_query(&app, query, user, chat, doc_title).await,
        Commands::History { user, chat, limit } => handle_history(&app, user, chat, limit).await,
    };

    app.shutdown().await?;

    result
}

async fn handle_query(
    app: &App,
    query: String,
    user: String,
    chat: String,
    doc_title: Option<String>,
) -> Result<()> {
    utils::print_pending("Sending request...");

    let request = QueryRequest {
        user_id: user,
        chat_id: chat,
        query,
        selected_doc_title: doc_title,
    };

    match app.service().execute(request).await {
        Ok(response) => {
            utils::print_answer(&response.answer);
            Ok(())
        }
        Err(e) => {
            utils::print_failure("Query failed", &e);
            Err(e.into())
        }
    }
}

async fn handle_history(app: &App, user: String, chat: String, limit: Option<usize>) -> Result<()> {
    let key = ConversationKey::new(user, chat);
    let turns = app.history().get_history(&key, limit).await?;
    utils::print_conversation(&key, &turns);
    Ok(())
}

use clap::{Parser, Subcommand};
use scrape_index::commands::{
    delete_document, drop_collection, get_document, list_collections, process, query,
    show_config, show_status,
};

#[derive(Parser)]
#[command(name = "scrape-index")]
#[command(about = "Embed scraped pages into a local vector database and search them")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed a JSON record (or an array of records) and store it
    Process {
        /// JSON string or path to a JSON file
        input: String,
        /// Collection to store into (defaults to the configured collection)
        #[arg(long)]
        collection: Option<String>,
        /// Only compute embeddings, do not store anything
        #[arg(long)]
        no_store: bool,
        /// Print full embedding vectors instead of their sizes
        #[arg(long)]
        full: bool,
    },
    /// Search a collection for documents similar to the query text
    Query {
        /// Text to search for
        text: String,
        #[arg(long)]
        collection: Option<String>,
        /// Maximum number of results (capped at 20)
        #[arg(long)]
        limit: Option<usize>,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// List all collections
    List,
    /// Show a stored document
    Get {
        id: String,
        #[arg(long)]
        collection: Option<String>,
    },
    /// Delete a stored document
    Delete {
        id: String,
        #[arg(long)]
        collection: Option<String>,
    },
    /// Delete a collection and all of its documents
    Drop { collection: String },
    /// Show current configuration
    Config,
    /// Show embedding backend and collection statistics
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Process {
            input,
            collection,
            no_store,
            full,
        } => {
            process(&input, collection, !no_store, full).await?;
        }
        Commands::Query {
            text,
            collection,
            limit,
            json,
        } => {
            query(&text, collection, limit, json).await?;
        }
        Commands::List => {
            list_collections().await?;
        }
        Commands::Get { id, collection } => {
            get_document(&id, collection).await?;
        }
        Commands::Delete { id, collection } => {
            delete_document(&id, collection).await?;
        }
        Commands::Drop { collection } => {
            drop_collection(&collection).await?;
        }
        Commands::Config => {
            show_config()?;
        }
        Commands::Status => {
            show_status().await?;
        }
    }

    Ok(())
}

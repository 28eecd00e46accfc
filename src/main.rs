use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use vecdocs::DocumentUpdate;
use vecdocs::commands::{
    add_document, init_store, list_documents, list_points, parse_metadata, refresh_document,
    remove_document, search_documents, show_document, show_status, update_document,
};
use vecdocs::config::{Config, get_config_dir, show_config};
use vecdocs::documents::{DEFAULT_LIST_LIMIT, DEFAULT_TOP_K};

#[derive(Parser)]
#[command(name = "vecdocs")]
#[command(about = "A content-addressed document store with embedding search")]
#[command(version)]
struct Cli {
    /// Configuration directory (defaults to $VECDOCS_CONFIG_DIR or the platform config dir)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration and create the database
    Init,
    /// Show or change the configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
        /// Embedding model name
        #[arg(long)]
        model: Option<String>,
        /// Embedding dimensionality
        #[arg(long)]
        dimensions: Option<usize>,
        /// Base URL of the OpenAI-compatible embeddings endpoint
        #[arg(long)]
        base_url: Option<String>,
    },
    /// Add a new document
    Add {
        /// Unique document name
        name: String,
        /// Document content
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        content: Option<String>,
        /// Read the document content from a file
        #[arg(long)]
        file: Option<PathBuf>,
        /// Metadata as a JSON object
        #[arg(long)]
        metadata: Option<String>,
        /// Compute the document's embedding immediately
        #[arg(long)]
        embed: bool,
    },
    /// List documents in id order
    List {
        /// Only list documents after this id
        #[arg(long)]
        after: Option<String>,
        /// Page size
        #[arg(long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: usize,
    },
    /// Show a single document
    Show {
        /// Document ID
        id: String,
    },
    /// Update a document's name, content or metadata
    Update {
        /// Document ID
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        content: Option<String>,
        /// Metadata keys to merge, as a JSON object
        #[arg(long)]
        metadata: Option<String>,
    },
    /// Remove a document and its points
    Remove {
        /// Document ID
        id: String,
    },
    /// List the points of a document
    Points {
        /// Document ID
        document_id: String,
    },
    /// Re-embed a document whose points are missing or stale
    Refresh {
        /// Document ID
        document_id: String,
    },
    /// Show whether a document's points are current
    Status {
        /// Document ID
        document_id: String,
    },
    /// Search documents by similarity to a query
    Search {
        query: String,
        /// Number of matches to return
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
        /// Include the matched documents
        #[arg(long)]
        documents: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => get_config_dir()?,
    };
    let mut config = Config::load(&config_dir).context("Failed to load configuration")?;

    match cli.command {
        Commands::Init => {
            init_store(&config).await?;
        }
        Commands::Config {
            show,
            model,
            dimensions,
            base_url,
        } => {
            let changed = model.is_some() || dimensions.is_some() || base_url.is_some();
            if let Some(model) = model {
                config.embedding.set_model(model)?;
            }
            if let Some(dimensions) = dimensions {
                config.embedding.set_dimensions(dimensions)?;
            }
            if let Some(base_url) = base_url {
                config.embedding.set_base_url(base_url)?;
            }
            if changed {
                config.save()?;
                eprintln!("Configuration saved to {}", config.config_file_path().display());
            }
            if show || !changed {
                show_config(&config)?;
            }
        }
        Commands::Add {
            name,
            content,
            file,
            metadata,
            embed,
        } => {
            let content = match (content, file) {
                (Some(content), _) => content,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                (None, None) => anyhow::bail!("Either --content or --file is required"),
            };
            let metadata = metadata.as_deref().map(parse_metadata).transpose()?;
            add_document(&config, name, &content, metadata, embed).await?;
        }
        Commands::List { after, limit } => {
            list_documents(&config, after, limit).await?;
        }
        Commands::Show { id } => {
            show_document(&config, &id).await?;
        }
        Commands::Update {
            id,
            name,
            content,
            metadata,
        } => {
            let metadata = metadata.as_deref().map(parse_metadata).transpose()?;
            let update = DocumentUpdate {
                name,
                content,
                metadata,
            };
            update_document(&config, &id, update).await?;
        }
        Commands::Remove { id } => {
            remove_document(&config, &id).await?;
        }
        Commands::Points { document_id } => {
            list_points(&config, &document_id).await?;
        }
        Commands::Refresh { document_id } => {
            refresh_document(&config, &document_id).await?;
        }
        Commands::Status { document_id } => {
            show_status(&config, &document_id).await?;
        }
        Commands::Search {
            query,
            top_k,
            documents,
        } => {
            search_documents(&config, &query, top_k, documents).await?;
        }
    }

    Ok(())
}

//! # Patent Harness CLI (`pth`)
//!
//! The `pth` binary drives the whole workflow: database setup, document
//! ingestion, question answering, and section-by-section drafting.
//!
//! ## Usage
//!
//! ```bash
//! pth --config ./config/pth.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pth init` | Create the session databases and their tables |
//! | `pth ingest --primary a.pdf --claims c.docx` | Extract, chunk and index uploads |
//! | `pth retrieve "<query>"` | Show the chunks a query retrieves |
//! | `pth ask "<question>"` | Answer one question from the indexed documents |
//! | `pth chat` | Interactive question answering |
//! | `pth claims show` | Show the extracted title and claims |
//! | `pth section status` | Workflow progress and unlock state |
//! | `pth section generate <key>` | Draft a section from documents and claims |
//! | `pth section save <key> --file f` | Persist section content |
//! | `pth section skip <key>` | Skip an optional section |
//! | `pth section context` | Prior-section context as the model sees it |
//! | `pth memory history` | Recorded conversation turns |
//! | `pth serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! pth init
//! pth ingest --primary ./disclosure.pdf --supplementary ./slides.pptx --claims ./claims.docx
//! pth section generate background --query "wireless charging pads" --save
//! pth section skip summary
//! pth section context --full
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use patent_harness::config::load_config;
use patent_harness::ingest::{collect_directory, Slot, Upload};
use patent_harness::sections::SectionKey;
use patent_harness::session::Session;
use patent_harness::{chat, claims, drafting, ingest, logging, memory, migrate, sections, server};

/// Patent Harness: document question answering and guided patent
/// drafting over a local retrieval index.
///
/// All commands accept `--config`. See `config/pth.example.toml`.
#[derive(Parser)]
#[command(
    name = "pth",
    about = "Patent Harness: document Q&A and section-by-section patent drafting",
    version,
    long_about = "Patent Harness ingests invention disclosures, slide decks and claims documents, \
    indexes them for retrieval, answers questions about them, and drafts a patent specification \
    one gated section at a time with session memory and claim-aware prompts."
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "./config/pth.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the session databases and run schema migrations.
    Init,

    /// Extract, chunk and index documents.
    ///
    /// Each run indexes into a fresh namespace unless `--append` is given.
    Ingest {
        /// Primary disclosure documents.
        #[arg(long)]
        primary: Vec<PathBuf>,

        /// The claims document (title and claims are extracted from it).
        #[arg(long)]
        claims: Vec<PathBuf>,

        /// Supporting material such as slide decks.
        #[arg(long)]
        supplementary: Vec<PathBuf>,

        /// Ingest every supported file under a directory as primary.
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Add to the active namespace instead of starting a new one.
        #[arg(long)]
        append: bool,
    },

    /// Show the chunks a query retrieves.
    Retrieve {
        query: String,

        /// Search the claims namespace instead of the general one.
        #[arg(long)]
        claims: bool,

        /// Number of results (defaults to `retrieval.top_k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Answer a question from the indexed documents.
    Ask {
        question: String,

        /// Print the retrieved sources after the answer.
        #[arg(long)]
        sources: bool,
    },

    /// Interactive question answering on stdin.
    Chat {
        #[arg(long)]
        sources: bool,
    },

    /// Inspect the extracted claims.
    Claims {
        #[command(subcommand)]
        action: ClaimsAction,
    },

    /// Draft, save and inspect patent sections.
    Section {
        #[command(subcommand)]
        action: SectionAction,
    },

    /// Inspect session memory.
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },

    /// Start the HTTP API server.
    Serve,
}

#[derive(Subcommand)]
enum ClaimsAction {
    /// Print the title of invention and every claim.
    Show,
}

#[derive(Subcommand)]
enum SectionAction {
    /// Saved, skipped and locked state of every workflow section.
    Status,

    /// Print the latest saved version of a section.
    Show { key: SectionKey },

    /// Prior-section context as assembled for generation.
    Context {
        /// Ignore the configured context cap.
        #[arg(long)]
        full: bool,
    },

    /// Generate a draft for a section.
    Generate {
        key: SectionKey,

        /// Guidance for this section; also used as the retrieval query.
        #[arg(long, default_value = "")]
        query: String,

        /// Save the generated text as the section content.
        #[arg(long)]
        save: bool,
    },

    /// Save content for a section from a file (`-` for stdin).
    Save {
        key: SectionKey,

        #[arg(long)]
        file: PathBuf,

        #[arg(long)]
        query: Option<String>,
    },

    /// Skip an optional section.
    Skip { key: SectionKey },
}

#[derive(Subcommand)]
enum MemoryAction {
    /// Print recorded conversation turns, oldest first.
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() {
    logging::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let cfg = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => return migrate::run_migrations(&cfg).await,
        Commands::Serve => return server::run_server(Session::open(cfg).await?).await,
        _ => {}
    }

    let session = Session::open(cfg).await?;
    let result = dispatch(&session, cli.command).await;
    session.close().await;
    result
}

async fn dispatch(session: &Session, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Init | Commands::Serve => {}
        Commands::Ingest {
            primary,
            claims,
            supplementary,
            dir,
            append,
        } => {
            let uploads = collect_uploads(&primary, &claims, &supplementary, dir.as_deref())?;
            ingest::run_ingest(session, uploads, append).await?;
        }
        Commands::Retrieve { query, claims, k } => {
            chat::run_retrieve(session, &query, claims, k).await?;
        }
        Commands::Ask { question, sources } => {
            chat::run_ask(session, &question, sources).await?;
        }
        Commands::Chat { sources } => chat::run_chat(session, sources).await?,
        Commands::Claims {
            action: ClaimsAction::Show,
        } => claims::run_show(&session.claims).await?,
        Commands::Section { action } => match action {
            SectionAction::Status => sections::run_status(&session.sections).await?,
            SectionAction::Show { key } => sections::run_show(&session.sections, &key).await?,
            SectionAction::Context { full } => drafting::run_context(session, full).await?,
            SectionAction::Generate { key, query, save } => {
                drafting::run_generate(session, &key, &query, save).await?;
            }
            SectionAction::Save { key, file, query } => {
                drafting::run_save(session, &key, &file, query.as_deref()).await?;
            }
            SectionAction::Skip { key } => drafting::run_skip(session, &key).await?,
        },
        Commands::Memory {
            action: MemoryAction::History { limit },
        } => {
            memory::run_history(session.memory.store(), session.memory.namespace(), limit).await?;
        }
    }
    Ok(())
}

fn collect_uploads(
    primary: &[PathBuf],
    claims: &[PathBuf],
    supplementary: &[PathBuf],
    dir: Option<&std::path::Path>,
) -> anyhow::Result<Vec<Upload>> {
    let mut uploads: Vec<Upload> = primary
        .iter()
        .map(|p| Upload::new(Slot::Primary, p))
        .collect();
    if let Some(dir) = dir {
        uploads.extend(
            collect_directory(dir)?
                .into_iter()
                .map(|p| Upload::new(Slot::Primary, p)),
        );
    }
    uploads.extend(supplementary.iter().map(|p| Upload::new(Slot::Supplementary, p)));
    uploads.extend(claims.iter().map(|p| Upload::new(Slot::Claims, p)));
    Ok(uploads)
}

//! Curriculum Content admin CLI
//!
//! Inspects and initialises a curriculum store. Every command prints JSON.
//!
//! ## Usage
//!
//! ```bash
//! # Create the storage directory, config and database
//! curriculum-content init
//!
//! # Row counts
//! curriculum-content stats
//!
//! # Change ledger of one content item (also after deletion)
//! curriculum-content history fractions-ks2
//!
//! # KS2 maths and English, second page of 10
//! curriculum-content search --key-stage KS2 --subject Mathematics --subject English \
//!     --page 2 --page-size 10
//!
//! # Grants held by a user
//! curriculum-content grants alice
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use curriculum_content::{
    Config, DifficultyLevel, LearningStyle, SearchFilters, Services, Sort, SortField, SortOrder, UserId,
    WorkflowStatus,
};

#[derive(Parser, Debug)]
#[command(name = "curriculum-content")]
#[command(about = "Curriculum content lifecycle store")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "CURRICULUM_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "CURRICULUM_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the storage directory, default config and database schema
    Init,

    /// Print row counts
    Stats,

    /// Print the change ledger of a content item
    History {
        content_id: String,
        /// Only the records of this learning-style variant
        #[arg(long)]
        style: Option<LearningStyle>,
    },

    /// Filter content metadata
    Search {
        #[arg(long = "key-stage")]
        key_stages: Vec<String>,
        #[arg(long = "subject")]
        subjects: Vec<String>,
        #[arg(long = "content-type")]
        content_types: Vec<String>,
        #[arg(long = "difficulty")]
        difficulties: Vec<DifficultyLevel>,
        #[arg(long = "status")]
        statuses: Vec<WorkflowStatus>,
        #[arg(long = "region")]
        regions: Vec<String>,
        #[arg(long)]
        keyword: Option<String>,
        #[arg(long)]
        created_by: Option<String>,
        /// Inclusive lower bound on updated_at (RFC 3339)
        #[arg(long)]
        updated_from: Option<DateTime<Utc>>,
        /// Inclusive upper bound on updated_at (RFC 3339)
        #[arg(long)]
        updated_to: Option<DateTime<Utc>>,
        /// updated-at, created-at or title
        #[arg(long)]
        sort: Option<String>,
        /// Sort ascending instead of descending
        #[arg(long)]
        asc: bool,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long)]
        page_size: Option<u32>,
    },

    /// List the grants held by a user
    Grants {
        user_id: String,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_sort_field(raw: &str) -> anyhow::Result<SortField> {
    Ok(match raw {
        "updated-at" | "updatedAt" => SortField::UpdatedAt,
        "created-at" | "createdAt" => SortField::CreatedAt,
        "title" => SortField::Title,
        other => bail!("unknown sort field '{}'", other),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("curriculum_content=info".parse()?),
        )
        .init();

    let args = Args::parse();

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path).with_context(|| format!("loading {}", config_path.display()))?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    config.validate()?;

    let services = Services::open(&config)?;

    match args.command {
        Command::Init => {
            let config_path = config.config_path();
            if !config_path.exists() {
                config.save(&config_path)?;
                info!(path = %config_path.display(), "Created default config");
            }
            info!(path = %config.database_path().display(), "Database ready");
            print_json(&services.db.stats()?)?;
        }
        Command::Stats => {
            print_json(&services.db.stats()?)?;
        }
        Command::History { content_id, style } => match style {
            Some(style) => print_json(&services.variants.history(&content_id, style)?)?,
            None => print_json(&services.content.history(&content_id)?)?,
        },
        Command::Search {
            key_stages,
            subjects,
            content_types,
            difficulties,
            statuses,
            regions,
            keyword,
            created_by,
            updated_from,
            updated_to,
            sort,
            asc,
            page,
            page_size,
        } => {
            let sort = match sort {
                Some(field) => Some(Sort {
                    field: parse_sort_field(&field)?,
                    order: if asc { SortOrder::Asc } else { SortOrder::Desc },
                }),
                None if asc => Some(Sort {
                    field: SortField::UpdatedAt,
                    order: SortOrder::Asc,
                }),
                None => None,
            };
            let filters = SearchFilters {
                key_stages,
                subjects,
                content_types,
                difficulties,
                statuses,
                regions,
                keyword,
                created_by,
                updated_from,
                updated_to,
                sort,
            };
            print_json(&services.search.search(&filters, page, page_size)?)?;
        }
        Command::Grants { user_id } => {
            let user = UserId::new(user_id)?;
            print_json(&services.permissions.grants_for_user(&user)?)?;
        }
    }

    Ok(())
}

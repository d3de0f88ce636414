// src/main.rs

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use gemvault::index::RebuildOutcome;
use gemvault::index::collection::group_of;
use gemvault::store::PutOutcome;
use gemvault::{Config, Repository};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "gemvault")]
#[command(author, version, about = "Private gem repository with atomic uploads and lazy documentation", long_about = None)]
struct Cli {
    /// Repository data directory (archives and index)
    #[arg(long, env = "GEMVAULT_DATA_DIR", default_value = "/var/lib/gemvault/data", global = true)]
    data_dir: PathBuf,

    /// Directory for generated documentation
    #[arg(long, env = "GEMVAULT_DOCS_DIR", default_value = "/var/lib/gemvault/docs", global = true)]
    docs_dir: PathBuf,

    /// Overwrite archives that already exist with different content
    #[arg(long, env = "GEMVAULT_ALLOW_REPLACE", global = true)]
    allow_replace: bool,

    /// Patch the index on upload instead of rebuilding it
    #[arg(long, env = "GEMVAULT_INCREMENTAL", global = true)]
    incremental: bool,

    /// Also write uncompressed index fragments
    #[arg(long, env = "GEMVAULT_BUILD_LEGACY", global = true)]
    build_legacy: bool,

    /// Largest accepted upload in bytes
    #[arg(long, env = "GEMVAULT_MAX_UPLOAD_SIZE", default_value_t = gemvault::config::DEFAULT_MAX_UPLOAD_SIZE, global = true)]
    max_upload_size: u64,

    /// Documentation build timeout in seconds
    #[arg(long, env = "GEMVAULT_DOC_TIMEOUT", default_value_t = gemvault::config::DEFAULT_DOC_BUILD_TIMEOUT.as_secs(), global = true)]
    doc_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a .gem archive
    Upload {
        /// Path to the archive
        file: PathBuf,
    },
    /// Delete a stored archive
    Delete {
        /// Archive filename, e.g. foo-1.0.gem
        filename: String,
    },
    /// Rebuild the index from the stored archives
    Reindex {
        /// Patch the existing index instead of rescanning everything
        #[arg(long)]
        incremental: bool,
    },
    /// List indexed gem versions
    List {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// List stored archive files
    Archives,
    /// Generate documentation for a gem and print where it lives
    Docs {
        /// Archive stem, e.g. foo-1.0
        name: String,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type
        shell: Shell,
    },
}

impl Cli {
    fn config(&self) -> Config {
        Config::new(&self.data_dir, &self.docs_dir)
            .with_allow_replace(self.allow_replace)
            .with_incremental_updates(self.incremental)
            .with_build_legacy(self.build_legacy)
            .with_max_upload_size(self.max_upload_size)
            .with_doc_build_timeout(Duration::from_secs(self.doc_timeout))
    }
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging; stdout is kept for command output
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.config();

    match cli.command {
        Commands::Upload { file } => {
            let content = fs::read(&file).with_context(|| format!("Failed to read {}", file.display()))?;
            let filename = file
                .file_name()
                .and_then(|n| n.to_str())
                .with_context(|| format!("{} has no usable filename", file.display()))?;

            let repo = Repository::open(config)?;
            let receipt = repo.upload(filename, &content)?;
            match receipt.outcome {
                PutOutcome::Stored => println!("Stored {} ({})", receipt.filename, receipt.version),
                PutOutcome::Replaced => println!("Replaced {} ({})", receipt.filename, receipt.version),
                PutOutcome::Duplicate => println!("{} is already stored, nothing to do", receipt.filename),
            }
            Ok(())
        }
        Commands::Delete { filename } => {
            let repo = Repository::open(config)?;
            if repo.delete(&filename)? {
                println!("Deleted {}", filename);
            } else {
                println!("{} was not stored", filename);
            }
            Ok(())
        }
        Commands::Reindex { incremental } => {
            let repo = Repository::open(config.with_incremental_updates(incremental))?;
            let outcome = repo.reindex(!incremental)?;
            match outcome {
                RebuildOutcome::Full => println!("Index rebuilt"),
                RebuildOutcome::Incremental => println!("Index updated"),
                RebuildOutcome::FellBack => println!("Incremental update failed; index rebuilt"),
                RebuildOutcome::Coalesced => println!("Index already up to date"),
            }
            Ok(())
        }
        Commands::List { json } => {
            let repo = Repository::open(config)?;
            let versions = repo.versions()?;
            if json {
                let all: Vec<_> = versions.iter().collect();
                println!("{}", serde_json::to_string_pretty(&all)?);
                return Ok(());
            }

            if versions.is_empty() {
                println!("No gems indexed");
                return Ok(());
            }
            for letter in versions.group_index() {
                println!("{}", letter.to_uppercase());
                for name in versions.names().into_iter().filter(|n| group_of(n) == Some(letter)) {
                    let listed: Vec<String> = versions
                        .by_name(name)
                        .iter()
                        .map(|v| match v.platform.as_str() {
                            gemvault::version::RUBY_PLATFORM => v.version.to_string(),
                            platform => format!("{} {}", v.version, platform),
                        })
                        .collect();
                    println!("  {} ({})", name, listed.join(", "));
                    if let Some(latest) = versions.latest(name) {
                        match repo.spec_for(latest) {
                            Ok(spec) => {
                                if let Some(summary) = spec.summary() {
                                    println!("    {}", summary);
                                }
                                if !spec.authors().is_empty() {
                                    println!("    by {}", spec.authors().join(", "));
                                }
                                if let Some(date) = spec.date() {
                                    println!("    released {}", date);
                                }
                            }
                            Err(e) => warn!("No gemspec details for {}: {}", latest, e),
                        }
                    }
                }
            }
            info!("{} versions indexed", versions.len());
            Ok(())
        }
        Commands::Archives => {
            let repo = Repository::open(config)?;
            let archives = repo.archives()?;
            for archive in &archives {
                println!(
                    "{:<48} {:>10}  {}",
                    archive.filename,
                    archive.size,
                    archive.modified.format("%Y-%m-%d %H:%M:%S")
                );
            }
            println!("{} archives", archives.len());
            Ok(())
        }
        Commands::Docs { name } => {
            let repo = Repository::open(config)?;
            let page = repo.doc_file(&name, "")?;
            println!("{}", page.display());
            Ok(())
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "gemvault", &mut io::stdout());
            Ok(())
        }
    }
}

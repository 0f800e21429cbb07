use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use jobtrackr::email::{IngestStats, RawEmail, ingest_email, sanitize_email, sanitize_jobs};
use jobtrackr::models::IngestionSource;
use jobtrackr::parsers::ParserRegistry;
use jobtrackr::pii::PiiPatterns;
use jobtrackr::processor::{DriverConfig, run_workers};
use jobtrackr::{Database, Settings};

#[derive(Parser)]
#[command(name = "jobtrackr")]
#[command(about = "Ingest job alert emails into deduplicated postings and opportunities")]
struct Cli {
    /// Database file (overrides JOBTRACKR_DATABASE)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Parse alert emails (.eml) and stage their listings
    Ingest {
        /// Raw email files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Where the records came from (email, api, webhook)
        #[arg(long, default_value = "email")]
        source: IngestionSource,

        /// Show what would be staged without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Turn staged rows into postings and opportunities
    Process {
        /// Parallel workers, one database connection each
        #[arg(short, long, default_value = "1")]
        workers: usize,

        /// Rows claimed per page (overrides JOBTRACKR_BATCH_SIZE)
        #[arg(short, long)]
        batch_size: Option<usize>,
    },

    /// Print a redacted, human-readable copy of an email
    Sanitize {
        /// Raw email file
        file: PathBuf,

        /// Print the whitelisted headers as JSON instead of the body
        #[arg(long, conflicts_with = "jobs")]
        headers: bool,

        /// Print the parsed listings as JSON instead of the body
        #[arg(long)]
        jobs: bool,
    },

    /// Show staging row counts per status
    Status,

    /// List opportunities with their posting counts
    Opportunities,

    /// Show a job posting
    ShowPosting {
        /// Posting ID
        id: i64,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let mut settings = Settings::from_env();
    let cli = Cli::parse();
    if let Some(path) = cli.database {
        settings.database_path = path;
    }

    let default_level = if settings.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => {
            let db = Database::open(&settings.database_path)?;
            db.init()?;
            println!("Database initialized at {}", db.path().display());
        }

        Commands::Ingest {
            files,
            source,
            dry_run,
        } => {
            let db = if dry_run {
                None
            } else {
                let db = Database::open(&settings.database_path)?;
                db.ensure_initialized()?;
                Some(db)
            };
            let registry = ParserRegistry::with_defaults(&settings.alert_keywords);
            tracing::debug!(
                platforms = ?registry.platforms(),
                keywords = ?settings.alert_keywords,
                "parsers ready"
            );

            let mut stats = IngestStats::default();
            let mut errors = 0;
            for file in &files {
                let outcome = RawEmail::from_file(file)
                    .and_then(|email| ingest_email(&registry, &email, source, db.as_ref()));
                match outcome {
                    Ok((email_stats, records)) => {
                        if dry_run {
                            for record in &records {
                                println!(
                                    "[DRY RUN] Would stage: {} at {} ({})",
                                    record.title,
                                    if record.company.is_empty() {
                                        "Unknown"
                                    } else {
                                        &record.company
                                    },
                                    record.platform
                                );
                            }
                        }
                        stats.merge(email_stats);
                    }
                    Err(e) => {
                        errors += 1;
                        eprintln!("  Error processing {}: {:#}", file.display(), e);
                    }
                }
            }

            println!(
                "Emails: {} ({} unmatched, {} errors). Jobs found: {}, staged: {}, duplicates: {}",
                stats.emails_found,
                stats.emails_unmatched,
                errors,
                stats.jobs_found,
                stats.jobs_staged,
                stats.duplicates
            );
        }

        Commands::Process {
            workers,
            batch_size,
        } => {
            Database::open(&settings.database_path)?.ensure_initialized()?;
            let mut config = DriverConfig::from_settings(&settings);
            if let Some(size) = batch_size {
                config.batch_size = size.max(1);
            }
            let summary = run_workers(&settings.database_path, workers, &config)?;
            println!(
                "Processing complete. Success={}, Failed={}, Deferred={}",
                summary.succeeded, summary.failed, summary.deferred
            );
        }

        Commands::Sanitize {
            file,
            headers,
            jobs,
        } => {
            let patterns = PiiPatterns::from_settings(&settings).context(
                "Redaction needs JOBTRACKR_USER_FIRST_NAME, JOBTRACKR_USER_LAST_NAME \
                 and JOBTRACKR_EMAIL_ADDRESS",
            )?;
            let email = RawEmail::from_file(&file)?;
            if jobs {
                let registry = ParserRegistry::with_defaults(&settings.alert_keywords);
                let records = sanitize_jobs(&registry, &email, &patterns);
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                let sample = sanitize_email(&email, &patterns);
                if headers {
                    println!("{}", serde_json::to_string_pretty(&sample.headers)?);
                } else {
                    print!("{}", sample.html);
                }
            }
        }

        Commands::Status => {
            let db = Database::open(&settings.database_path)?;
            db.ensure_initialized()?;
            let counts = db.status_counts()?;
            if counts.is_empty() {
                println!("Nothing staged.");
            } else {
                for (status, count) in counts {
                    println!("{:<10} {:>6}", status, count);
                }
            }
        }

        Commands::Opportunities => {
            let db = Database::open(&settings.database_path)?;
            db.ensure_initialized()?;
            let opportunities = db.list_opportunities()?;
            if opportunities.is_empty() {
                println!("No opportunities found.");
            } else {
                println!(
                    "{:<6} {:<8} {:<30} {:<20} {:<20} {:>8}",
                    "ID", "PRIORITY", "TITLE", "COMPANY", "LOCATION", "POSTINGS"
                );
                println!("{}", "-".repeat(97));
                for entry in opportunities {
                    let o = entry.opportunity;
                    println!(
                        "{:<6} {:<8} {:<30} {:<20} {:<20} {:>8}",
                        o.id,
                        o.priority.as_str(),
                        truncate(&o.title, 28),
                        truncate(&o.company, 18),
                        truncate(o.location.as_deref().unwrap_or("-"), 18),
                        entry.posting_count
                    );
                }
            }
        }

        Commands::ShowPosting { id } => {
            let db = Database::open(&settings.database_path)?;
            db.ensure_initialized()?;
            match db.get_posting(id)? {
                Some(posting) => {
                    println!("Posting #{}", posting.id);
                    println!("Title: {}", posting.title);
                    println!("Company: {}", posting.company);
                    if let Some(location) = &posting.location {
                        println!("Location: {}", location);
                    }
                    if let Some(rating) = posting.rating {
                        println!("Rating: {}", rating);
                    }
                    if let Some(salary) = &posting.salary {
                        println!("Salary: {}", salary);
                    }
                    println!("Platform: {} (via {})", posting.platform, posting.ingestion_source);
                    println!(
                        "URL: {}",
                        posting.canonical_url.as_deref().unwrap_or(&posting.raw_url)
                    );
                    if let Some(opportunity_id) = posting.job_opportunity_id {
                        match db.get_opportunity(opportunity_id)? {
                            Some(o) => println!(
                                "Opportunity: #{} {} at {} [{}]",
                                o.id,
                                o.title,
                                o.company,
                                o.priority.as_str()
                            ),
                            None => println!("Opportunity: #{}", opportunity_id),
                        }
                    }
                    println!("Fingerprint: {}", posting.posting_fingerprint);
                    println!("Created: {}", posting.created_at);
                    if let Some(summary) = &posting.summary {
                        println!("\n--- Summary ---\n{}", summary);
                    }
                }
                None => {
                    println!("Posting #{} not found.", id);
                }
            }
        }
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

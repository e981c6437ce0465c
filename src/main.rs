use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use trawler::config::Config;
use trawler::db::{self, Database};
use trawler::pipeline::scheduler::Scheduler;
use trawler::pipeline::{sweep, Pipeline};
use trawler::ranking::ratings::DEFAULT_RATING_TTL;
use trawler::ranking::{DbRatings, RankingEngine, RatingCache};
use trawler::twitter::client::HttpTimelineClient;
use trawler::twitter::search::{Crawler, SearchQuery};
use trawler::twitter::session::SessionPool;

/// Trawler: crawl topic searches, rank what's taking off, hand the best
/// of it to the edit queue.
#[derive(Parser)]
#[command(name = "trawler", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Run every crawl and maintenance task until Ctrl-C
    Run,

    /// Run one search and print the scored results (nothing is saved)
    Search {
        /// The topic query
        query: String,

        /// How many minutes back to search (default: 60)
        #[arg(long, default_value = "60")]
        minutes: u32,
    },

    /// Delete candidates older than the maximum age
    Sweep,

    /// Show database and queue status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    // Set up structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("trawler=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            info!("Initializing Trawler database...");
            let config = Config::load()?;
            let db = db::initialize_sqlite(&config.db_path)?;
            let table_count = db.table_count().await?;
            println!("Database initialized at: {}", config.db_path);
            println!("Tables created: {table_count}");
            println!("\nTrawler is ready. Next step: set TRAWLER_SESSIONS and");
            println!("TRAWLER_QUERIES in your .env file.");
            println!("\nThen run: cargo run -- run");
        }

        Commands::Run => {
            let config = Config::load()?;
            config.require_sessions()?;
            config.require_queries()?;
            let db = db::initialize_sqlite(&config.db_path)?;
            let pipeline = build_pipeline(&config, db)?;

            let cancel = CancellationToken::new();
            {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    match tokio::signal::ctrl_c().await {
                        Ok(()) => info!("Shutdown requested, stopping tasks"),
                        Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C, stopping"),
                    }
                    cancel.cancel();
                });
            }

            println!(
                "Crawling {} queries with {} identities. Ctrl-C to stop.",
                config.queries.len(),
                config.session_tokens.len()
            );
            Scheduler::new(pipeline, config.scheduler_settings(), cancel)
                .run()
                .await?;
            println!("{}", "Stopped.".bold());
        }

        Commands::Search { query, minutes } => {
            let config = Config::load()?;
            config.require_sessions()?;
            let db = db::open_sqlite(&config.db_path)
                .or_else(|_| db::in_memory())
                .context("Failed to open a database for author ratings")?;
            let pipeline = build_pipeline(&config, db)?;
            let cancel = CancellationToken::new();

            let session = pipeline.pool.acquire(&cancel).await?;
            let now = Utc::now();
            let search = SearchQuery::new(&query)
                .since(now - chrono::Duration::minutes(i64::from(minutes)))
                .until(now);

            println!("Searching {}...", search.to_query_string().cyan());
            let outcome = pipeline.crawler.search(&session, search, &cancel).await?;
            if outcome.throttled {
                println!(
                    "{}",
                    "Throttled by the platform, showing partial results.".yellow()
                );
            }

            let captured_at = Utc::now();
            let mut results = Vec::with_capacity(outcome.tweets.len());
            for tweet in outcome.tweets {
                match pipeline
                    .ranking
                    .capture(tweet, pipeline.ratings.as_ref(), captured_at)
                    .await
                {
                    Ok(scored) => results.push(scored),
                    Err(e) => warn!(error = %e, "Failed to score tweet, skipping"),
                }
            }
            trawler::output::terminal::display_scored(&results, pipeline.ranking.current_top());
        }

        Commands::Sweep => {
            let config = Config::load()?;
            let db = db::open_sqlite(&config.db_path)?;
            let deleted = sweep::run(db.as_ref(), config.max_age(), Utc::now()).await?;

            println!("\n{}", "Sweep complete.".bold());
            println!("  Stale candidates deleted: {deleted}");
            println!("  Candidates remaining: {}", db.candidate_count().await?);
        }

        Commands::Status => {
            let config = Config::load()?;
            let db = match db::open_sqlite(&config.db_path) {
                Ok(db) => db,
                Err(_) => {
                    println!("Database: not initialized");
                    println!("\nRun `trawler init` to set up the database.");
                    return Ok(());
                }
            };
            trawler::status::show(&db, &config.db_path, config.admission_threshold).await?;
        }
    }

    Ok(())
}

/// Wire the HTTP source, identity pool, ranking and rating cache together.
fn build_pipeline(config: &Config, db: Arc<dyn Database>) -> Result<Pipeline> {
    let client = HttpTimelineClient::new(&config.api_url, config.page_size)?;
    let crawler = Crawler::new(Arc::new(client), config.batch_size);
    let pool = SessionPool::from_tokens(&config.session_tokens, config.governor_settings());
    let ratings = RatingCache::new(Arc::new(DbRatings::new(db.clone())), DEFAULT_RATING_TTL);

    Ok(Pipeline::new(
        db,
        Arc::new(pool),
        crawler,
        RankingEngine::new(config.admission_threshold),
        Arc::new(ratings),
    ))
}

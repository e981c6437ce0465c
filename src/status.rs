// System status display: DB stats, working set, publish queue, crawl progress.

use anyhow::Result;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;

use crate::db::models::CrawlProgress;
use crate::db::Database;
use crate::output::terminal;

/// Display system status to the terminal.
pub async fn show(db: &Arc<dyn Database>, db_path: &str, threshold: f64) -> Result<()> {
    if !Path::new(db_path).exists() {
        println!("Database: not initialized");
        println!("\nRun `trawler init` to set up the database.");
        return Ok(());
    }

    // Database file size
    let file_size = std::fs::metadata(db_path)
        .map(|m| format_bytes(m.len()))
        .unwrap_or_else(|_| "unknown".to_string());
    println!("Database: {} ({})", db_path, file_size);

    let candidates = db.candidate_count().await?;
    println!("Tracked candidates: {candidates}");
    if let Some(top) = db.get_fastest_growing().await? {
        terminal::display_candidate("fastest", &top);
    }
    if let Some(next) = db.get_oldest_above_threshold(threshold, Utc::now()).await? {
        terminal::display_candidate("next to refresh", &next);
    }

    println!("Published URLs: {}", db.published_count().await?);
    terminal::display_edit_queue(&db.pending_edits(5).await?);

    // Crawl progress per query
    let crawls: Vec<(String, String)> = db
        .get_all_scan_state()
        .await?
        .into_iter()
        .filter(|(key, _)| key.starts_with("crawl:"))
        .collect();
    if crawls.is_empty() {
        println!("Crawls: never run");
        println!("  Run `trawler run` to start crawling");
    } else {
        println!("Crawls:");
        for (key, value) in crawls {
            let query = key.trim_start_matches("crawl:");
            match serde_json::from_str::<CrawlProgress>(&value) {
                Ok(p) if p.identity.is_some() => println!(
                    "  {query}: window {} .. {} in progress on {}",
                    p.since.format("%H:%M:%S"),
                    p.until.format("%H:%M:%S"),
                    p.identity.as_deref().unwrap_or("?"),
                ),
                Ok(p) => println!(
                    "  {query}: caught up to {}",
                    p.until.format("%Y-%m-%d %H:%M:%S UTC")
                ),
                Err(_) => println!("  {query}: unreadable progress"),
            }
        }
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

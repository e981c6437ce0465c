// Colored terminal output for scored search results and the edit queue.
//
// The main.rs commands delegate here for anything table-shaped.

use colored::Colorize;

use super::truncate_chars;
use crate::db::models::{EditQueueEntry, TweetSnapshot};
use crate::ranking::Assessment;

/// Display scored tweets from a one-off search, best growth first.
pub fn display_scored(results: &[(TweetSnapshot, Assessment)], threshold: f64) {
    if results.is_empty() {
        println!("No tweets matched.");
        return;
    }

    let mut ranked: Vec<&(TweetSnapshot, Assessment)> = results.iter().collect();
    ranked.sort_by(|a, b| b.1.growth_speed.total_cmp(&a.1.growth_speed));

    println!(
        "\n{}",
        format!(
            "=== {} tweets (admission threshold {:.0}) ===",
            ranked.len(),
            threshold
        )
        .bold()
    );
    println!();

    println!(
        "  {:>4}  {:<20} {:>8}  {:>9}  {:<6}  {}",
        "Rank".dimmed(),
        "Author".dimmed(),
        "Score".dimmed(),
        "Growth/s".dimmed(),
        "Admit".dimmed(),
        "Text".dimmed(),
    );
    println!("  {}", "-".repeat(90).dimmed());

    for (i, (snapshot, assessment)) in ranked.iter().enumerate() {
        let admit = if assessment.admit {
            "yes".green().bold().to_string()
        } else if assessment.is_dead() {
            "dead".red().to_string()
        } else {
            "no".dimmed().to_string()
        };

        println!(
            "  {:>4}. @{:<18} {:>8.1}  {:>9.4}  {:<6}  {}",
            i + 1,
            truncate_chars(&snapshot.author, 17),
            assessment.score,
            assessment.growth_speed,
            admit,
            truncate_chars(&snapshot.text.replace('\n', " "), 60),
        );
    }

    let admitted = ranked.iter().filter(|(_, a)| a.admit).count();
    println!();
    if admitted > 0 {
        println!("  {} {} would be promoted", "+".green().bold(), admitted);
    } else {
        println!("  {}", "Nothing clears the admission threshold.".dimmed());
    }
}

/// Display the oldest entries waiting in the edit queue.
pub fn display_edit_queue(entries: &[EditQueueEntry]) {
    if entries.is_empty() {
        println!("Edit queue: empty");
        return;
    }

    println!("Edit queue: {} oldest:", entries.len());
    for entry in entries {
        println!(
            "  #{:<5} {} ({:.3}/s, queued {})",
            entry.id,
            entry.snapshot.url.cyan(),
            entry.snapshot.growth_speed,
            entry.enqueued_at.dimmed(),
        );
    }
}

/// One line per candidate, for the status command.
pub fn display_candidate(label: &str, snapshot: &TweetSnapshot) {
    println!(
        "  {:<16} @{} {:.3}/s, {} likes, posted {}",
        label.bold(),
        snapshot.author,
        snapshot.growth_speed,
        snapshot.likes,
        snapshot.posted_at.format("%Y-%m-%d %H:%M UTC"),
    );
    println!("  {:<16} {}", "", snapshot.url.cyan());
}

// Node status display: DB stats, peer count, outbox backlog.

use anyhow::Result;
use colored::Colorize;
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::db::Database;

/// Display node status to the terminal.
pub async fn show(db: &Arc<dyn Database>, config: &Config) -> Result<()> {
    let db_path = &config.db_path;
    if !Path::new(db_path).exists() {
        println!("Database: not initialized");
        println!("\nRun `grapevine init` to set up the database.");
        return Ok(());
    }

    let file_size = std::fs::metadata(db_path)
        .map(|m| format_bytes(m.len()))
        .unwrap_or_else(|_| "unknown".to_string());
    println!("Database: {} ({})", db_path, file_size);
    println!("Public URL: {}", config.public_url);

    let counts = db.store_counts().await?;
    println!(
        "Authors: {} local, {} cached from peers",
        counts.local_authors, counts.shadow_authors
    );
    println!(
        "Content: {} posts, {} comments, {} likes",
        counts.posts, counts.comments, counts.likes
    );
    println!("Pending follow requests: {}", counts.follow_requests);

    if counts.nodes == 0 {
        println!("Peer nodes: none registered");
        println!("  Run `grapevine node add` to connect to another node");
    } else {
        println!("Peer nodes: {}", counts.nodes);
    }

    let outbox = db.outbox_stats().await?;
    if outbox.dead > 0 {
        println!(
            "Outbox: {} pending, {}",
            outbox.pending,
            format!("{} dead", outbox.dead).red().bold()
        );
        println!("  Run `grapevine outbox --requeue` to retry dead deliveries");
    } else {
        println!("Outbox: {} pending", outbox.pending);
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

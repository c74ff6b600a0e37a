// Colored terminal output for node lists, outbox state and federation runs.
//
// This module handles all terminal-specific formatting. The main.rs command
// handlers delegate here.

use colored::Colorize;

use super::truncate_chars;
use crate::db::models::{Node, OutboxEntry, OutboxState};
use crate::federation::backfill::BackfillReport;
use crate::federation::outbox::DrainReport;
use crate::federation::reconciler::ReconcileReport;

/// Display the registered peer nodes.
pub fn display_nodes(nodes: &[Node]) {
    if nodes.is_empty() {
        println!("No peer nodes registered. Add one with `grapevine node add`.");
        return;
    }

    println!(
        "\n{}",
        format!("=== Peer Nodes ({}) ===", nodes.len()).bold()
    );
    println!();
    println!(
        "  {:<28} {:<40} {:<16} {:<16}",
        "Host".dimmed(),
        "API URL".dimmed(),
        "We send as".dimmed(),
        "They send as".dimmed(),
    );
    println!("  {}", "-".repeat(100).dimmed());

    for node in nodes {
        println!(
            "  {:<28} {:<40} {:<16} {:<16}",
            node.host.bold(),
            truncate_chars(&node.api_url, 40),
            node.node_name,
            node.inbound_username,
        );
    }
    println!();
}

/// Display outbox entries, newest state first.
pub fn display_outbox(entries: &[OutboxEntry]) {
    if entries.is_empty() {
        println!("Outbox is empty.");
        return;
    }

    println!(
        "\n{}",
        format!("=== Outbox ({} entries) ===", entries.len()).bold()
    );
    println!();
    println!(
        "  {:<8} {:<8} {:>8}  {:<36}  {}",
        "State".dimmed(),
        "Kind".dimmed(),
        "Attempts".dimmed(),
        "Recipient".dimmed(),
        "Last error".dimmed(),
    );
    println!("  {}", "-".repeat(100).dimmed());

    for entry in entries {
        let state = match entry.state {
            OutboxState::Pending => "pending".yellow(),
            OutboxState::Dead => "dead".red().bold(),
        };
        let error = entry
            .last_error
            .as_deref()
            .map(|e| truncate_chars(e, 60))
            .unwrap_or_default();
        println!(
            "  {:<8} {:<8} {:>8}  {:<36}  {}",
            state,
            entry.kind,
            entry.attempt_count,
            entry.recipient_id,
            error.dimmed(),
        );
    }
    println!();
}

pub fn display_drain(report: &DrainReport) {
    println!(
        "Outbox drained: {} delivered, {} retrying, {}",
        report.delivered.to_string().green(),
        report.retried.to_string().yellow(),
        if report.dead > 0 {
            format!("{} dead", report.dead).red().bold()
        } else {
            "0 dead".normal()
        },
    );
}

pub fn display_reconcile(author_id: &str, report: &ReconcileReport) {
    println!("Follow requests for {}:", author_id.bold());
    println!("  {} confirmed", report.confirmed.to_string().green());
    println!("  {} still pending", report.pending);
    if report.unreachable > 0 {
        println!(
            "  {} {} unreachable (left pending)",
            "!".bright_red(),
            report.unreachable
        );
    }
}

pub fn display_backfill(report: &BackfillReport) {
    println!(
        "Synced {} node(s): {} authors cached, {} entries skipped",
        report.nodes_synced, report.authors_resolved, report.entries_skipped
    );
    for host in &report.nodes_failed {
        println!("  {} {} could not be synced", "!".bright_red(), host);
    }
}

//! Terminal rendering for bundles and status lines.

use owo_colors::OwoColorize;
use stash_core::{Bundle, Category, Cluster};

pub fn success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

pub fn warning(message: &str) {
    eprintln!("{} {}", "!".yellow(), message);
}

pub fn print_bundle(category: &Category, bundle: &Bundle) {
    let title = if bundle.title().is_empty() {
        category.as_str()
    } else {
        bundle.title()
    };
    println!("{} {}", title.bold(), format!("[{category}]").dimmed());

    if !bundle.has_cluster() {
        println!("  {}", "(no clusters)".dimmed());
        return;
    }
    for cluster in bundle.clusters() {
        print_cluster(cluster);
    }
}

fn print_cluster(cluster: &Cluster) {
    let status = if cluster.has_more() {
        format!("more at {}", cluster.cursor()).cyan().to_string()
    } else {
        "end".dimmed().to_string()
    };
    println!(
        "  {} {} ({})",
        cluster.title().bold(),
        format!("#{}", cluster.id()).dimmed(),
        status
    );
    if !cluster.subtitle().is_empty() {
        println!("    {}", cluster.subtitle().italic());
    }
    for item in cluster.items() {
        println!("    - {} {}", item.name(), item.id().dimmed());
    }
}

/// Plain-text line for one cluster
pub fn cluster_summary(cluster: &Cluster) -> String {
    let ids: Vec<&str> = cluster.items().iter().map(|item| item.id()).collect();
    format!(
        "{} #{} [{}] {}",
        cluster.title(),
        cluster.id(),
        ids.join(", "),
        if cluster.has_more() { "more" } else { "end" }
    )
}

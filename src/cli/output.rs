// Output formatting and display for CLI

use crate::config::PoolConfig;
use crate::process::commandline;
use colored::*;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Print an error message to stderr
pub fn print_error(error: &str) {
    eprintln!("{} {}", "✗ Error:".red().bold(), error);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a success message
pub fn print_success_msg(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a formatted table of the cores in a pool file
pub fn print_pool(pool: &PoolConfig) {
    #[derive(Tabled)]
    struct CoreRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Command")]
        command: String,
        #[tabled(rename = "Env")]
        env: String,
    }

    let rows: Vec<CoreRow> = pool
        .cores
        .iter()
        .map(|core| CoreRow {
            name: truncate(&core.display_name(), 20),
            command: truncate(&commandline::to_string(&core.command), 60),
            env: core.env.len().to_string(),
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("\n{}\n", table);

    let supervisor = &pool.supervisor;
    let working_dir = supervisor
        .working_dir
        .as_ref()
        .map(|d| d.display().to_string())
        .unwrap_or_else(|| "(inherited)".to_string());
    println!("  {:<15} {}", "Working dir:".bold(), working_dir);
    println!("  {:<15} {} ms", "Fast fail:".bold(), supervisor.fast_fail_ms);
    println!("  {:<15} {} ms", "Stop timeout:".bold(), supervisor.stop_timeout_ms);
    println!("  {:<15} {} ms", "Kill timeout:".bold(), supervisor.kill_timeout_ms);
    println!();
    println!(
        "{}",
        format!("Total: {} core(s)", pool.cores.len())
            .dimmed()
            .italic()
    );
}

/// Truncate a string to a maximum length
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

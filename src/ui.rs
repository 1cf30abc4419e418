use colored::{ColoredString, Colorize};
use converge::FinalState;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Colored label for a transaction's final state
pub fn state_label(state: FinalState) -> ColoredString {
    match state {
        FinalState::Applied => "applied".green().bold(),
        FinalState::Skipped => "already applied".green(),
        FinalState::Rejected => "rejected".yellow().bold(),
        FinalState::Failed => "failed".red().bold(),
        FinalState::RolledBack => "rolled back".red().bold(),
        FinalState::Fatal => "FATAL".on_red().white().bold(),
    }
}

/// Truncate a path string for display, keeping the end
pub fn truncate_path(path: &str, max_len: usize) -> String {
    if path.len() <= max_len {
        path.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        format!("...{}", &path[path.len() - max_len + 3..])
    }
}

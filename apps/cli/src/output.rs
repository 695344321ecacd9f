//! Output formatting for the CLI.

use clap::ValueEnum;
use feed_synchronizer::Post;
use serde::Serialize;
use serde_json::json;

/// Output format.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Print any serializable value as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message.
pub fn print_success(message: &str, format: &OutputFormat) {
    match format {
        OutputFormat::Text => println!("{}", message),
        OutputFormat::Json => {
            println!("{}", json!({ "status": "success", "message": message }));
        }
    }
}

/// Print an error message.
pub fn print_error(message: &str, format: &OutputFormat) {
    match format {
        OutputFormat::Text => eprintln!("Error: {}", message),
        OutputFormat::Json => {
            eprintln!("{}", json!({ "status": "error", "message": message }));
        }
    }
}

/// Print a table row.
pub fn print_row(label: &str, value: &str) {
    println!("  {:<16} {}", format!("{}:", label), value);
}

/// Print a divider line.
pub fn print_divider() {
    println!("{}", "-".repeat(50));
}

/// Print a heading.
pub fn print_heading(text: &str) {
    println!("\n{}", text);
    print_divider();
}

/// Print one post as a card, or as a single JSON line.
pub fn print_post(post: &Post, format: &OutputFormat) {
    match format {
        OutputFormat::Text => {
            println!(
                "[{}] {}  {}",
                post.author_initial(),
                post.author_name(),
                post.date_label()
            );
            if let Some(caption) = post.caption.as_deref().filter(|c| !c.is_empty()) {
                println!("    {}", caption);
            }
            println!("    {}", post.image_url);
            println!();
        }
        OutputFormat::Json => {
            if let Ok(line) = serde_json::to_string(post) {
                println!("{}", line);
            }
        }
    }
}

use std::io::{IsTerminal, Write};

use tracing::warn;

/// Ask a yes/no question on the terminal. Anything but an explicit yes is a
/// no, and so is a non-interactive stdin.
pub fn confirm(question: &str) -> anyhow::Result<bool> {
    if !std::io::stdin().is_terminal() {
        warn!("stdin is not a terminal, treating \"{question}\" as no");
        return Ok(false);
    }

    print!("{question} (y/N): ");
    std::io::stdout().flush()?;
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(is_yes(&input))
}

fn is_yes(input: &str) -> bool {
    matches!(input.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

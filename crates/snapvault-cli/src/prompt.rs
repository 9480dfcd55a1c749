use colored::*;
use snapvault_core::{AmbiguousSummary, ConfirmPrompt};
use std::io::{self, Write};

pub fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        if io::stdin().read_line(&mut input)? == 0 {
            return Ok(default.unwrap_or(false));
        }

        match input.trim().to_uppercase().as_str() {
            "Y" | "YES" => return Ok(true),
            "N" | "NO" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}

/// Shows the ambiguous-match summary and asks once on the terminal.
pub struct TerminalPrompt;

impl ConfirmPrompt for TerminalPrompt {
    fn confirm(&self, summary: &AmbiguousSummary) -> bool {
        println!("{}", format!("{}", summary).yellow());
        prompt_confirm("Apply all ambiguous matches?", Some(false)).unwrap_or(false)
    }
}

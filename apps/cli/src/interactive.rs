//! Interactive menu mode.
//!
//! A thin dispatcher over the same run/status/config entry points the flag
//! driven CLI uses; no reconciliation logic lives here.

use std::io::Write;

use color_eyre::eyre::Result;

use triagesync_core::ReconcileMode;
use triagesync_shared::{TicketKey, load_config};

use crate::commands::{cmd_status, cmd_test_connection, run_mode};

pub(crate) async fn run_interactive(
    summarizer: Option<&str>,
    publisher: Option<&str>,
) -> Result<()> {
    let config = load_config()?;

    loop {
        println!();
        println!("{}", "=".repeat(60));
        println!("TRIAGESYNC - INTERACTIVE MODE");
        println!("{}", "=".repeat(60));
        println!("1. Update (converge on current top-N)");
        println!("2. Initialize (rebuild from scratch)");
        println!("3. Resize published set");
        println!("4. Force refresh all entries");
        println!("5. Test-update a single ticket");
        println!("6. Show status");
        println!("7. Test tracker connection");
        println!("8. Exit");

        let choice = prompt("\nSelect an option (1-8): ")?;
        let result = match choice.as_str() {
            "1" => {
                let size = prompt_size("Target size (empty = hold current): ", None)?;
                run_mode(&config, summarizer, publisher, ReconcileMode::Update, size).await
            }
            "2" => {
                let default = config.defaults.target_size;
                let size = prompt_size(
                    &format!("Target size (default {default}): "),
                    Some(default),
                )?;
                run_mode(&config, summarizer, publisher, ReconcileMode::Init, size).await
            }
            "3" => match prompt_size("New size: ", None)? {
                Some(size) => {
                    run_mode(
                        &config,
                        summarizer,
                        publisher,
                        ReconcileMode::Resize,
                        Some(size),
                    )
                    .await
                }
                None => {
                    println!("Resize needs a number.");
                    continue;
                }
            },
            "4" => {
                run_mode(
                    &config,
                    summarizer,
                    publisher,
                    ReconcileMode::ForceRefresh,
                    None,
                )
                .await
            }
            "5" => {
                let key = prompt("Ticket key: ")?;
                if key.is_empty() {
                    println!("A ticket key is required.");
                    continue;
                }
                run_mode(
                    &config,
                    summarizer,
                    publisher,
                    ReconcileMode::TestUpdate(TicketKey::from(key.as_str())),
                    None,
                )
                .await
            }
            "6" => cmd_status().await,
            "7" => cmd_test_connection(&config).await,
            "8" | "q" | "quit" | "exit" => {
                println!("Goodbye!");
                return Ok(());
            }
            _ => {
                println!("Invalid choice. Please enter a number between 1-8.");
                continue;
            }
        };

        // One failed operation should not end the session.
        if let Err(e) = result {
            println!("\nOperation failed: {e}");
        }
    }
}

/// Print a prompt and read one trimmed line from stdin.
fn prompt(text: &str) -> Result<String> {
    print!("{text}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Read an optional number; empty input yields the default.
fn prompt_size(text: &str, default: Option<usize>) -> Result<Option<usize>> {
    loop {
        let raw = prompt(text)?;
        if raw.is_empty() {
            return Ok(default);
        }
        match raw.parse::<usize>() {
            Ok(n) => return Ok(Some(n)),
            Err(_) => println!("Please enter a number."),
        }
    }
}

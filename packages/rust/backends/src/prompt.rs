//! Summarization prompt assembly and summary cleanup.

use triagesync_shared::Ticket;

/// Maximum summary length accepted by the publishing side.
const MAX_SUMMARY_LEN: usize = 2000;

/// One descendant ticket with its distance from the ultimate parent
/// (1 = direct child, 2 = grandchild, ...).
#[derive(Debug, Clone)]
pub struct Descendant {
    pub ticket: Ticket,
    pub generation: u32,
}

/// Build the summarization prompt: the parent title followed by every
/// descendant title, labelled by generation so the bot sees the hierarchy
/// depth without needing the graph itself.
pub fn build_summary_prompt(ticket: &Ticket, descendants: &[Descendant]) -> String {
    let mut lines = vec![format!("Parent Ticket Summary: {}", ticket.title)];
    if let Some(description) = ticket.description.as_deref() {
        if !description.is_empty() {
            lines.push(format!("Parent Ticket Details: {description}"));
        }
    }

    // Number descendants within their generation, like the tracker UI counts
    // siblings.
    let mut per_generation: Vec<u32> = Vec::new();
    for descendant in descendants {
        let generation = descendant.generation.max(1) as usize;
        if per_generation.len() < generation {
            per_generation.resize(generation, 0);
        }
        per_generation[generation - 1] += 1;
        lines.push(format!(
            "{} {} Summary: {}",
            generation_label(descendant.generation),
            per_generation[generation - 1],
            descendant.ticket.title
        ));
    }

    lines.push(String::new());
    lines.push(
        "Please analyze the tickets above and provide a concise, structured summary \
         capturing the main problem, key patterns across the duplicates, common pain \
         points, and suggested actions, in 2-3 paragraphs."
            .to_string(),
    );
    lines.join("\n")
}

/// Human label for a generation depth: Child, Grandchild, Great-Grandchild...
pub fn generation_label(generation: u32) -> String {
    match generation {
        0 | 1 => "Child".to_string(),
        2 => "Grandchild".to_string(),
        n => format!("{}Grandchild", "Great-".repeat((n - 2) as usize)),
    }
}

/// Normalize a bot-produced summary before submitting it to a publishing
/// backend: collapse whitespace, strip markdown emphasis, cap the length.
pub fn clean_summary(summary: &str) -> String {
    let mut cleaned = summary
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace("**", "")
        .replace('*', "")
        .replace('`', "");

    if cleaned.len() > MAX_SUMMARY_LEN {
        let mut cut = MAX_SUMMARY_LEN - 3;
        while !cleaned.is_char_boundary(cut) {
            cut -= 1;
        }
        cleaned.truncate(cut);
        cleaned.push_str("...");
    }

    cleaned
}

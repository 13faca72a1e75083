//! Console rendering for the `query` and `history` commands

use crate::history::{ConversationKey, Role, Turn};
use colored::*;

fn role_label(role: Role) -> ColoredString {
    match role {
        Role::User => "You:".yellow().bold(),
        Role::Assistant => "Assistant:".green().bold(),
        Role::System => "System:".magenta().bold(),
    }
}

/// One turn per line, continuation lines indented under the label
pub fn format_turn(turn: &Turn) -> String {
    let label = role_label(turn.role);
    let indent = " ".repeat(label.chars().count() + 1);
    let mut lines = turn.content.lines();
    let first = lines.next().unwrap_or_default();
    let mut out = format!("{} {}", label, first);
    for line in lines {
        out.push('\n');
        out.push_str(&indent);
        out.push_str(line);
    }
    out
}

pub fn print_conversation(key: &ConversationKey, turns: &[Turn]) {
    let title = format!("Conversation {}", key);
    println!("\n{}", title.bright_cyan().bold());
    println!("{}", "=".repeat(title.chars().count()).bright_cyan());

    if turns.is_empty() {
        println!("{}", "No turns recorded yet".blue());
        return;
    }
    for turn in turns {
        println!("{}", format_turn(turn));
    }
    println!("{}", format!("\n{} turn(s)", turns.len()).dimmed());
}

pub fn print_answer(answer: &str) {
    println!("\n{}", format_turn(&Turn::assistant(answer)));
}

pub fn print_pending(text: &str) {
    println!("{}", text.blue());
}

pub fn print_failure(context: &str, error: &dyn std::fmt::Display) {
    eprintln!("{} {}", format!("{}:", context).red().bold(), error);
}

use console::{Emoji, style};

use crate::core::supervisor::{RunOutcome, RunResult};

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static GLOBE: Emoji<'_, '_> = Emoji("🌐 ", "");
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");
pub static LOOM: Emoji<'_, '_> = Emoji("🧵 ", "");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_info(msg: &str) {
    println!("{} {}", INFO_ICON, style(msg).blue());
}

pub fn print_warn(msg: &str) {
    println!("{} {}", WARN_ICON, style(msg).yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_status(label: &str, msg: &str) {
    println!("  {} {}: {}", GEAR, style(label).bold().cyan(), msg);
}

pub fn print_link(label: &str, url: &str) {
    println!(
        "  {} {}: {}",
        GLOBE,
        style(label).bold(),
        style(url).underlined().cyan()
    );
}

pub fn print_banner() {
    println!();
    println!("{}{}", LOOM, style("agentloom").bold().magenta());
    println!("{}\n", style("Agents that run on their own schedule.").cyan());
}

/// Render a run result for the terminal.
pub fn print_run_result(result: &RunResult) {
    print_status("Agent", &result.agent_id);
    print_status("Mode", &format!("{:?}", result.mode).to_lowercase());
    print_status("Attempts", &result.attempts.to_string());
    for step in &result.steps {
        let mark = if step.ok { style("ok").green() } else { style("failed").red() };
        println!(
            "    turn {} {} {}: {}",
            step.turn,
            step.decision.target(),
            mark,
            step.summary
        );
    }
    match &result.outcome {
        RunOutcome::Failed { .. } => print_error(&result.summary()),
        RunOutcome::Reply { acted: false, .. } => print_warn(&result.summary()),
        _ => print_success(&result.summary()),
    }
}

pub fn print_goodbye() {
    println!("\n{} {}", LOOM, style("agentloom stopped.").bold().cyan());
}

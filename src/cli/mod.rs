mod agent_cmd;
mod serve;

use anyhow::Result;
use console::style;
use std::path::PathBuf;

use crate::config::AppConfig;
use crate::core::terminal::{self, print_error};

fn print_help() {
    terminal::print_banner();

    println!("  {}", style("Commands").bold().underlined());
    for (cmd, desc) in [
        ("serve", "Start the queue worker and HTTP API"),
        ("run", "Run one agent now and print the result"),
        ("agents", "List the agents a user owns"),
        ("help", "Show this help"),
    ] {
        println!("    {:<10} {}", style(cmd).green().bold(), desc);
    }

    println!("\n  {}", style("Flags").bold().underlined());
    for (flag, desc) in [
        ("--config <path>", "Config file (default: $AGENTLOOM_CONFIG, then the user config dir)"),
        ("--api-host <host>", "serve: bind address"),
        ("--api-port <port>", "serve: bind port"),
        ("--agent <id>", "run: agent to run"),
        ("--prompt <text>", "run: instruction; omit for an unattended run"),
        ("--user <id>", "run, agents: caller identity"),
    ] {
        println!("    {:<20} {}", style(flag).cyan(), desc);
    }

    println!(
        "\n {} {} <command> [flags]\n",
        style("Usage:").bold(),
        style("agentloom").green()
    );
}

/// Value following the first occurrence of any of `names`, scanning from `start`.
pub(crate) fn flag_value(args: &[String], start: usize, names: &[&str]) -> Option<String> {
    let mut i = start;
    while i < args.len() {
        if names.contains(&args[i].as_str()) {
            return args.get(i + 1).cloned();
        }
        i += 1;
    }
    None
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RunCommandArgs {
    pub agent: String,
    pub prompt: Option<String>,
    pub user: String,
}

pub(crate) fn parse_run_command_args(args: &[String], start: usize) -> Option<RunCommandArgs> {
    let agent = flag_value(args, start, &["--agent", "-a"])?;
    Some(RunCommandArgs {
        agent,
        prompt: flag_value(args, start, &["--prompt", "-p"]),
        user: flag_value(args, start, &["--user", "-u"]).unwrap_or_else(|| "local".to_string()),
    })
}

pub(crate) fn parse_api_server_flags(
    args: &[String],
    start: usize,
    api_host: String,
    api_port: u16,
) -> (String, u16) {
    let host = flag_value(args, start, &["--api-host"]).unwrap_or(api_host);
    let port = flag_value(args, start, &["--api-port"])
        .and_then(|p| p.parse().ok())
        .unwrap_or(api_port);
    (host, port)
}

async fn load_config(args: &[String]) -> Result<AppConfig> {
    let explicit = flag_value(args, 2, &["--config", "-c"]).map(PathBuf::from);
    AppConfig::load(explicit.as_deref()).await
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cmd = args.get(1).map(String::as_str).unwrap_or("help");

    match cmd {
        "serve" => {
            let mut config = load_config(&args).await?;
            (config.api.host, config.api.port) =
                parse_api_server_flags(&args, 2, config.api.host, config.api.port);
            serve::run_server(config).await
        }
        "run" => {
            let Some(parsed) = parse_run_command_args(&args, 2) else {
                print_error("Error: --agent is required for run.");
                print_help();
                return Ok(());
            };
            let config = load_config(&args).await?;
            agent_cmd::run_once(config, parsed).await
        }
        "agents" => {
            let Some(user) = flag_value(&args, 2, &["--user", "-u"]) else {
                print_error("Error: --user is required for agents.");
                return Ok(());
            };
            let config = load_config(&args).await?;
            agent_cmd::list_agents(config, &user).await
        }
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => {
            print_error(&format!("Unknown command '{}'.", other));
            print_help();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{flag_value, parse_api_server_flags, parse_run_command_args};

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_run_command_args_reads_agent_prompt_and_user() {
        let args = argv(&[
            "agentloom", "run", "--agent", "a1", "--prompt", "hello", "--user", "u7",
        ]);
        let parsed = parse_run_command_args(&args, 2).unwrap();
        assert_eq!(parsed.agent, "a1");
        assert_eq!(parsed.prompt.as_deref(), Some("hello"));
        assert_eq!(parsed.user, "u7");
    }

    #[test]
    fn run_without_prompt_is_unattended_and_needs_an_agent() {
        let parsed = parse_run_command_args(&argv(&["agentloom", "run", "-a", "a1"]), 2).unwrap();
        assert_eq!(parsed.prompt, None);
        assert_eq!(parsed.user, "local");
        assert!(parse_run_command_args(&argv(&["agentloom", "run"]), 2).is_none());
    }

    #[test]
    fn parse_api_server_flags_reads_host_and_port() {
        let args = argv(&[
            "agentloom", "serve", "--api-host", "0.0.0.0", "--api-port", "19000",
        ]);
        let (host, port) = parse_api_server_flags(&args, 2, "127.0.0.1".to_string(), 17890);
        assert_eq!(host, "0.0.0.0");
        assert_eq!(port, 19000);
    }

    #[test]
    fn bad_port_keeps_the_configured_one() {
        let args = argv(&["agentloom", "serve", "--api-port", "nope"]);
        let (_, port) = parse_api_server_flags(&args, 2, "127.0.0.1".to_string(), 17890);
        assert_eq!(port, 17890);
    }

    #[test]
    fn dangling_flag_has_no_value() {
        assert_eq!(flag_value(&argv(&["agentloom", "serve", "--config"]), 2, &["--config"]), None);
    }
}

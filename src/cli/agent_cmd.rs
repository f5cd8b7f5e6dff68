use anyhow::Result;
use console::style;

use super::RunCommandArgs;
use crate::config::AppConfig;
use crate::core::agent::RunRequest;
use crate::core::runtime::Runtime;
use crate::core::terminal;
use crate::logging;

/// One foreground run. Recurring entries are left alone; only `serve` fires them.
pub async fn run_once(config: AppConfig, args: RunCommandArgs) -> Result<()> {
    logging::init(config.logging.max_level(), false);
    let (runtime, _receiver) = Runtime::from_config(config).await?;

    terminal::print_info(&format!("Running agent {}...", args.agent));
    let request = RunRequest::new(&args.agent, &args.user).with_instruction(args.prompt);
    let result = runtime.supervisor.run(request).await;
    terminal::print_run_result(&result);

    runtime.queue.close().await?;
    Ok(())
}

pub async fn list_agents(config: AppConfig, user: &str) -> Result<()> {
    logging::init(config.logging.max_level(), true);
    let (runtime, _receiver) = Runtime::from_config(config).await?;
    let agents = runtime.manager.list_agents(user).await?;
    runtime.queue.close().await?;

    if agents.is_empty() {
        terminal::print_warn(&format!("User '{}' has no agents.", user));
        return Ok(());
    }
    for agent in agents {
        let schedule = match agent.schedule.effective() {
            Some(repeat) => format!("{:?}", repeat),
            None => "manual".to_string(),
        };
        println!(
            "  {}  {}  {}",
            style(&agent.id).dim(),
            style(&agent.name).bold(),
            style(schedule).cyan()
        );
    }
    Ok(())
}

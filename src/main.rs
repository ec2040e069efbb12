use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use taskq_core::AppConfig;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod app;
mod shutdown;

use app::{AppCommand, Application, EXIT_FAILURE};
use shutdown::{wait_for_shutdown_signal, ShutdownManager};

/// 收到关闭信号后等待命令结束的上限
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

fn cli() -> Command {
    Command::new("taskq")
        .version("1.0.0")
        .about("后台任务分发层")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .global(true)
                .help("配置文件路径（缺省时按默认路径查找）"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .global(true)
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .default_value("info"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .global(true)
                .help("日志格式")
                .value_parser(["json", "pretty"])
                .default_value("pretty"),
        )
        .subcommand(
            Command::new("worker")
                .about("运行 worker")
                .arg(Arg::new("task").value_name("TASK").help("只服务该任务")),
        )
        .subcommand(
            Command::new("drain").about("回放序列存储中的任务").arg(
                Arg::new("once")
                    .long("once")
                    .action(ArgAction::SetTrue)
                    .help("只回放一轮"),
            ),
        )
        .subcommand(Command::new("purge-sequence").about("清空序列存储"))
        .subcommand(Command::new("ping").about("探测消息代理是否可达"))
}

fn parse_command(matches: &clap::ArgMatches) -> Result<AppCommand> {
    match matches.subcommand() {
        Some(("worker", sub)) => Ok(AppCommand::Worker {
            task: sub.get_one::<String>("task").cloned(),
        }),
        Some(("drain", sub)) => Ok(AppCommand::Drain {
            once: sub.get_flag("once"),
        }),
        Some(("purge-sequence", _)) => Ok(AppCommand::PurgeSequence),
        Some(("ping", _)) => Ok(AppCommand::Ping),
        Some((other, _)) => Err(anyhow::anyhow!("不支持的命令: {other}")),
        None => Err(anyhow::anyhow!("缺少子命令")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let log_level = matches
        .get_one::<String>("log-level")
        .map_or("info", String::as_str);
    let log_format = matches
        .get_one::<String>("log-format")
        .map_or("pretty", String::as_str);

    init_logging(log_level, log_format)?;

    let command = parse_command(&matches)?;
    let config = AppConfig::load(config_path).context("加载配置失败")?;
    info!(
        "taskq 启动: environment={}, servers={}",
        config.environment,
        config.broker.servers_string()
    );

    let shutdown_manager = ShutdownManager::new();
    let app = Application::new(config, command);
    let mut app_handle = tokio::spawn(app.run(shutdown_manager.subscribe()));

    let code = tokio::select! {
        joined = &mut app_handle => joined.context("命令任务异常退出")??,
        _ = wait_for_shutdown_signal() => {
            info!("收到关闭信号，开始优雅关闭...");
            shutdown_manager.shutdown();
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, app_handle).await {
                Ok(joined) => joined.context("命令任务异常退出")??,
                Err(_) => {
                    warn!("关闭超时，强制退出");
                    EXIT_FAILURE
                }
            }
        }
    };

    if code != 0 {
        error!("taskq 以退出码 {} 结束", code);
        std::process::exit(code);
    }
    info!("taskq 已退出");
    Ok(())
}

/// 初始化日志系统
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_subcommands() {
        let matches = cli().get_matches_from(["taskq", "worker", "CheckTime"]);
        assert_eq!(
            parse_command(&matches).unwrap(),
            AppCommand::Worker {
                task: Some("CheckTime".to_string())
            }
        );

        let matches = cli().get_matches_from(["taskq", "--log-format", "json", "drain", "--once"]);
        assert_eq!(parse_command(&matches).unwrap(), AppCommand::Drain { once: true });
        assert_eq!(matches.get_one::<String>("log-format").unwrap(), "json");

        let matches = cli().get_matches_from(["taskq", "ping", "-c", "config/taskq.toml"]);
        assert_eq!(parse_command(&matches).unwrap(), AppCommand::Ping);
        assert_eq!(
            matches.get_one::<String>("config").unwrap(),
            "config/taskq.toml"
        );

        assert!(cli().try_get_matches_from(["taskq"]).is_err());
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        cli().debug_assert();
    }
}

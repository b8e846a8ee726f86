use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use scheduler_config::{AppConfig, LogFormat};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use workday_scheduler::app::Application;
use workday_scheduler::shutdown::{wait_for_shutdown_signal, ShutdownManager};

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let matches = Command::new("workday-scheduler")
        .version(env!("CARGO_PKG_VERSION"))
        .about("工作日历感知的后台任务调度系统")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，不指定时按默认路径查找"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
        .arg(
            Arg::new("shutdown-timeout")
                .long("shutdown-timeout")
                .value_name("SECONDS")
                .help("优雅关闭的最长等待时间")
                .value_parser(clap::value_parser!(u64))
                .default_value("30"),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config");

    // 加载配置
    let mut config = AppConfig::load(config_path.map(String::as_str)).with_context(|| {
        format!(
            "加载配置文件失败: {}",
            config_path.map(String::as_str).unwrap_or("<默认路径>")
        )
    })?;

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = format.parse().context("解析日志格式失败")?;
    }

    // 初始化日志系统
    init_logging(&config.observability.log_level, config.observability.log_format)?;

    info!("启动工作日历调度服务 v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "存储后端: {:?}, API: {}",
        config.storage.backend,
        if config.api.enabled {
            config.api.bind_address.as_str()
        } else {
            "禁用"
        }
    );

    let grace_period = matches
        .get_one::<u64>("shutdown-timeout")
        .copied()
        .unwrap_or(30);
    let shutdown_manager = ShutdownManager::with_grace_period(Duration::from_secs(grace_period));

    // 创建并启动应用
    let app = Application::new(config).await?;
    let shutdown_rx = shutdown_manager.subscribe();
    let mut app_handle = tokio::spawn(async move { app.run(shutdown_rx).await });

    // 等待关闭信号，应用提前退出时直接返回其结果
    let early_exit = tokio::select! {
        _ = wait_for_shutdown_signal() => None,
        result = &mut app_handle => Some(result),
    };
    match early_exit {
        None => {
            info!("收到关闭信号，开始优雅关闭...");
            shutdown_manager.shutdown();
            shutdown_manager.wait_with_grace(app_handle).await;
        }
        Some(Ok(result)) => result.context("应用运行失败")?,
        Some(Err(e)) => return Err(anyhow::Error::from(e).context("应用任务异常退出")),
    }

    info!("工作日历调度服务已退出");
    Ok(())
}

/// 初始化日志系统
fn init_logging(log_level: &str, log_format: LogFormat) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        LogFormat::Json => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        LogFormat::Pretty => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
    }

    Ok(())
}

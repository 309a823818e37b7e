use anyhow::{Context, Result};
use clap::{Arg, Command};
use tracing::{error, info, warn};

use ci_coordinator::app::Application;
use ci_coordinator::common::{
    init_logging, init_metrics, load_config, wait_for_shutdown_signal, StartupConfig,
};
use ci_coordinator::shutdown::ShutdownManager;

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let matches = Command::new("coordinator")
        .version("1.0.0")
        .about("持续集成测试调度器")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径"),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("HOST")
                .help("监听地址 (默认 localhost)"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("监听端口 (默认 8888)")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("results-dir")
                .long("results-dir")
                .value_name("DIR")
                .help("测试结果目录"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let startup = StartupConfig {
        config_path: matches.get_one::<String>("config").cloned(),
        log_level: matches.get_one::<String>("log-level").cloned(),
        log_format: matches.get_one::<String>("log-format").cloned(),
    };

    // 加载配置，命令行参数优先
    let mut config = load_config(&startup)?;

    // 初始化日志系统
    let (log_level, log_format) = startup.logging(&config.observability);
    init_logging(&log_level, &log_format)?;

    info!("启动持续集成测试调度器");
    if let Some(path) = &startup.config_path {
        info!("配置文件: {path}");
    }

    if let Some(host) = matches.get_one::<String>("host") {
        config.dispatcher.host = host.clone();
    }
    if let Some(port) = matches.get_one::<u16>("port") {
        config.dispatcher.port = *port;
    }
    if let Some(dir) = matches.get_one::<String>("results-dir") {
        config.dispatcher.results_dir = dir.into();
    }

    init_metrics(&config.observability)?;

    let shutdown_timeout = config.dispatcher.shutdown_timeout();
    let app = Application::new(config)?;

    // 创建优雅关闭管理器
    let shutdown_manager = ShutdownManager::new();

    // 先绑定监听地址，启动失败直接退出
    let handle = app.start().await.context("调度器启动失败")?;
    info!("调度器监听于 {}", handle.local_addr());

    let app_handle = {
        let token = shutdown_manager.subscribe();
        tokio::spawn(async move {
            token.cancelled().await;
            handle.shutdown().await;
        })
    };

    // 等待关闭信号
    wait_for_shutdown_signal().await;

    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown();

    // 等待调度器关闭，设置超时
    let joined = async {
        if let Err(e) = app_handle.await {
            error!("调度器关闭时发生错误: {e}");
        }
    };
    if shutdown_manager
        .wait_with_timeout(joined, shutdown_timeout)
        .await
    {
        info!("调度器已优雅关闭");
    } else {
        warn!("调度器关闭超时，强制退出");
    }

    info!("持续集成测试调度器已退出");
    Ok(())
}

use anyhow::Result;
use clap::{Arg, Command};
use tracing::{error, info};

use ci_coordinator::common::{
    init_logging, load_config, wait_for_shutdown_signal, StartupConfig,
};
use ci_coordinator::observer::RepoObserver;
use ci_coordinator::shutdown::ShutdownManager;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("observer")
        .version("1.0.0")
        .about("仓库观察者：发现新提交并通知调度器")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径"),
        )
        .arg(
            Arg::new("dispatcher-server")
                .long("dispatcher-server")
                .value_name("HOST:PORT")
                .help("调度器地址 (默认 localhost:8888)"),
        )
        .arg(
            Arg::new("update-script")
                .long("update-script")
                .value_name("PATH")
                .help("更新仓库的脚本"),
        )
        .arg(
            Arg::new("interval")
                .long("interval")
                .value_name("SECS")
                .help("轮询间隔（秒）")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .value_parser(["json", "pretty"]),
        )
        .arg(
            Arg::new("repo")
                .value_name("REPO")
                .help("被观察的仓库路径")
                .required(true),
        )
        .get_matches();

    let startup = StartupConfig {
        config_path: matches.get_one::<String>("config").cloned(),
        log_level: matches.get_one::<String>("log-level").cloned(),
        log_format: matches.get_one::<String>("log-format").cloned(),
    };
    let app_config = load_config(&startup)?;
    let (log_level, log_format) = startup.logging(&app_config.observability);
    init_logging(&log_level, &log_format)?;

    let mut config = app_config.observer;
    if let Some(server) = matches.get_one::<String>("dispatcher-server") {
        config.dispatcher_server = server.clone();
    }
    if let Some(script) = matches.get_one::<String>("update-script") {
        config.update_script = script.into();
    }
    if let Some(interval) = matches.get_one::<u64>("interval") {
        config.poll_interval_seconds = *interval;
    }

    let repo = matches
        .get_one::<String>("repo")
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("缺少仓库路径"))?;
    let observer = RepoObserver::new(config, repo.into())?;

    let shutdown_manager = ShutdownManager::new();
    let token = shutdown_manager.subscribe();

    tokio::select! {
        result = observer.run(token) => {
            if let Err(e) = &result {
                error!("仓库观察者失败: {:#}", e);
            }
            result
        }
        _ = wait_for_shutdown_signal() => {
            info!("收到关闭信号，仓库观察者退出");
            shutdown_manager.shutdown();
            Ok(())
        }
    }
}

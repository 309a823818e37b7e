use std::net::SocketAddr;

use anyhow::{Context, Result};
use ci_core::{AppConfig, ObservabilityConfig};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 通用的启动参数，未指定的日志参数取配置文件中的值
#[derive(Debug, Clone, Default)]
pub struct StartupConfig {
    pub config_path: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
}

impl StartupConfig {
    /// 按命令行优先的顺序确定日志级别与格式
    pub fn logging(&self, observability: &ObservabilityConfig) -> (String, String) {
        (
            self.log_level
                .clone()
                .unwrap_or_else(|| observability.log_level.clone()),
            self.log_format
                .clone()
                .unwrap_or_else(|| observability.log_format.clone()),
        )
    }
}

/// 初始化日志系统
pub fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
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

/// 加载应用配置，未指定配置文件时使用默认值与环境变量
pub fn load_config(startup_config: &StartupConfig) -> Result<AppConfig> {
    match startup_config.config_path.as_deref() {
        Some(path) => {
            AppConfig::load(Some(path)).with_context(|| format!("加载配置文件失败: {path}"))
        }
        None => AppConfig::load(None).context("加载默认配置失败"),
    }
}

/// 按配置安装 Prometheus 指标导出器
pub fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    if !config.metrics_enabled {
        return Ok(());
    }

    let address: SocketAddr = config
        .metrics_bind_address
        .parse()
        .with_context(|| format!("无效的指标监听地址: {}", config.metrics_bind_address))?;

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(address)
        .install()
        .map_err(|e| anyhow::anyhow!("安装Prometheus指标导出器失败: {e}"))?;

    info!("Prometheus指标导出器监听于 {}", address);
    Ok(())
}

/// 等待关闭信号
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}

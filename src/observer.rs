use std::path::PathBuf;

use anyhow::{Context, Result};
use ci_core::{
    protocol::{validate_commit_id, RESPONSE_OK},
    Command, ObserverConfig, RunnerEndpoint, Transport,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// 仓库观察者
///
/// 定期运行更新脚本；脚本发现新提交时会写入提交文件，观察者随后把该提交发给调度器。
pub struct RepoObserver {
    config: ObserverConfig,
    repo: PathBuf,
    dispatcher: RunnerEndpoint,
    transport: Transport,
}

impl RepoObserver {
    pub fn new(config: ObserverConfig, repo: PathBuf) -> Result<Self> {
        config.validate().context("观察者配置无效")?;
        let (host, port) = config.dispatcher_address()?;
        let transport = Transport::new(config.request_timeout());
        Ok(Self {
            config,
            repo,
            dispatcher: RunnerEndpoint::new(host, port),
            transport,
        })
    }

    /// 轮询直到收到停止信号；任何失败都直接返回给调用方
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!(
            "开始观察仓库 {}，调度器 {}",
            self.repo.display(),
            self.dispatcher
        );

        loop {
            if let Some(commit_id) = self.poll_once().await? {
                info!("提交 {} 已发送给调度器", commit_id);
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("收到停止信号，停止观察仓库");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }
    }

    /// 运行一次更新脚本，发现新提交时发送给调度器并返回该提交
    pub async fn poll_once(&self) -> Result<Option<String>> {
        self.update_repo().await?;

        let commit_id = match tokio::fs::read_to_string(&self.config.commit_file).await {
            Ok(contents) => contents.lines().next().unwrap_or_default().trim().to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("没有新的提交");
                return Ok(None);
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("读取提交文件失败: {}", self.config.commit_file.display())
                })
            }
        };
        validate_commit_id(&commit_id)
            .with_context(|| format!("提交文件内容无效: {commit_id:?}"))?;

        let status = self
            .transport
            .send(&self.dispatcher, &Command::Status)
            .await
            .context("无法联系调度器")?;
        if status != RESPONSE_OK {
            return Err(anyhow::anyhow!("调度器状态异常: {status}"));
        }

        let command = Command::Dispatch {
            commit_id: commit_id.clone(),
        };
        let response = self
            .transport
            .send(&self.dispatcher, &command)
            .await
            .context("无法联系调度器")?;
        if response != RESPONSE_OK {
            return Err(anyhow::anyhow!("无法分发提交 {commit_id}: {response}"));
        }

        Ok(Some(commit_id))
    }

    async fn update_repo(&self) -> Result<()> {
        let output = tokio::process::Command::new(&self.config.update_script)
            .arg(&self.repo)
            .output()
            .await
            .with_context(|| {
                format!("无法运行更新脚本: {}", self.config.update_script.display())
            })?;

        if !output.status.success() {
            return Err(anyhow::anyhow!(
                "无法更新并检查仓库 ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(())
    }
}

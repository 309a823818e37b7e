use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ci_core::{
    models::RunnerInfo,
    protocol::{Command, RESPONSE_PONG},
    CoordinatorResult, Transport,
};

use crate::state::SharedState;

/// 执行器存活检测配置
#[derive(Debug, Clone)]
pub struct LivenessMonitorConfig {
    /// 检测间隔
    pub interval: Duration,
    /// 单次 ping 的超时时间
    pub ping_timeout: Duration,
}

impl Default for LivenessMonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            ping_timeout: Duration::from_secs(1),
        }
    }
}

/// 一次被驱逐的执行器及其被回收的提交
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eviction {
    pub runner: RunnerInfo,
    pub recovered_commit: Option<String>,
}

/// 执行器存活检测
///
/// 定期向每个执行器发送 ping，未应答 pong 的执行器被驱逐，
/// 它持有的提交放回待分发，由重新分发循环接手。
pub struct LivenessMonitor {
    state: SharedState,
    transport: Transport,
    config: LivenessMonitorConfig,
}

impl LivenessMonitor {
    pub fn new(state: SharedState, config: LivenessMonitorConfig) -> Self {
        Self {
            state,
            transport: Transport::new(config.ping_timeout),
            config,
        }
    }

    /// 检测循环，直到收到停止信号
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("启动执行器存活检测循环");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("收到停止信号，退出执行器存活检测循环");
                    break;
                }
                _ = tokio::time::sleep(self.config.interval) => {}
            }

            match self.check_once().await {
                Ok(evictions) => {
                    if !evictions.is_empty() {
                        info!("本轮驱逐了 {} 个执行器", evictions.len());
                    }
                }
                Err(e) => {
                    error!("执行器存活检测时出错: {}", e);
                }
            }
        }
    }

    /// 执行一轮检测并处理失效的执行器
    pub async fn check_once(&self) -> CoordinatorResult<Vec<Eviction>> {
        let failed = self.detect_failed_runners().await;
        let mut evictions = Vec::with_capacity(failed.len());

        for runner in failed {
            if let Some(eviction) = self.handle_failed_runner(runner).await? {
                evictions.push(eviction);
            }
        }

        Ok(evictions)
    }

    /// 并发 ping 当前所有执行器，返回未通过检测的执行器
    pub async fn detect_failed_runners(&self) -> Vec<RunnerInfo> {
        let runners = self.state.lock().await.runners();
        if runners.is_empty() {
            return Vec::new();
        }

        debug!("开始检测 {} 个执行器", runners.len());

        let probes = runners.iter().map(|runner| async move {
            match self.transport.send(&runner.endpoint, &Command::Ping).await {
                Ok(response) if response == RESPONSE_PONG => true,
                Ok(response) => {
                    warn!(
                        "执行器 {} ({}) 应答异常: {}",
                        runner.id, runner.endpoint, response
                    );
                    false
                }
                Err(e) => {
                    warn!("执行器 {} ({}) 无响应: {}", runner.id, runner.endpoint, e);
                    false
                }
            }
        });
        let alive = join_all(probes).await;

        runners
            .into_iter()
            .zip(alive)
            .filter_map(|(runner, alive)| (!alive).then_some(runner))
            .collect()
    }

    /// 驱逐失效执行器，并回收它持有的提交
    pub async fn handle_failed_runner(&self, runner: RunnerInfo) -> CoordinatorResult<Option<Eviction>> {
        let recovered_commit = {
            let mut state = self.state.lock().await;
            if state.registry.get(runner.id).is_none() {
                debug!("执行器 {} 已不在注册表中", runner.id);
                return Ok(None);
            }
            state.evict_runner(runner.id)?
        };

        metrics::counter!("ci_runner_evictions_total").increment(1);
        match &recovered_commit {
            Some(commit_id) => info!(
                "驱逐执行器 {} ({})，提交 {} 重新进入待分发",
                runner.id, runner.endpoint, commit_id
            ),
            None => info!("驱逐执行器 {} ({})", runner.id, runner.endpoint),
        }

        Ok(Some(Eviction {
            runner,
            recovered_commit,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liveness_monitor_config_default() {
        let config = LivenessMonitorConfig::default();
        assert_eq!(config.interval, Duration::from_secs(1));
        assert_eq!(config.ping_timeout, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_check_once_without_runners() {
        let state = crate::state::CoordinatorState::shared();
        let monitor = LivenessMonitor::new(state, LivenessMonitorConfig::default());
        assert!(monitor.check_once().await.unwrap().is_empty());
    }
}

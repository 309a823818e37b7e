use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("无效的命令: {0}")]
    Protocol(String),

    #[error("无法连接到 {endpoint}: {message}")]
    Connection { endpoint: String, message: String },

    #[error("与 {endpoint} 通信超时")]
    Timeout { endpoint: String },

    #[error("提交未处于已分发状态: {commit_id}")]
    UnknownCommit { commit_id: String },

    #[error("没有已注册的测试执行器")]
    NoRunnersAvailable,

    #[error("测试执行器未找到: {id}")]
    RunnerNotFound { id: u64 },

    #[error("非法的状态转换: {0}")]
    InvalidTransition(String),

    #[error("结果存储错误: {0}")]
    Storage(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type CoordinatorResult<T> = std::result::Result<T, CoordinatorError>;

impl CoordinatorError {
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn connection<E: Into<String>, M: ToString>(endpoint: E, message: M) -> Self {
        Self::Connection {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    pub fn timeout<E: Into<String>>(endpoint: E) -> Self {
        Self::Timeout {
            endpoint: endpoint.into(),
        }
    }

    pub fn unknown_commit<S: Into<String>>(commit_id: S) -> Self {
        Self::UnknownCommit {
            commit_id: commit_id.into(),
        }
    }

    /// 对端不可达：调度时换下一个执行器，存活检测时驱逐
    pub fn is_peer_unreachable(&self) -> bool {
        matches!(
            self,
            CoordinatorError::Connection { .. }
                | CoordinatorError::Timeout { .. }
                | CoordinatorError::Io(_)
        )
    }
}

impl From<anyhow::Error> for CoordinatorError {
    fn from(err: anyhow::Error) -> Self {
        CoordinatorError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_unreachable_classification() {
        assert!(CoordinatorError::connection("127.0.0.1:9000", "refused").is_peer_unreachable());
        assert!(CoordinatorError::timeout("127.0.0.1:9000").is_peer_unreachable());
        assert!(!CoordinatorError::protocol("bad").is_peer_unreachable());
        assert!(!CoordinatorError::unknown_commit("abc").is_peer_unreachable());
    }

    #[test]
    fn test_from_anyhow_is_internal() {
        let err: CoordinatorError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, CoordinatorError::Internal(ref msg) if msg == "boom"));
    }

    #[test]
    fn test_error_display() {
        let err = CoordinatorError::unknown_commit("abc123");
        assert!(err.to_string().contains("abc123"));
    }
}

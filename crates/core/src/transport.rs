//! # 传输层
//!
//! 一次请求/应答：建立连接、写入命令、读取应答、关闭连接。
//! 所有阶段都有超时限制，超时与连接失败一样视为对端不可达。

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

use crate::errors::{CoordinatorError, CoordinatorResult};
use crate::models::RunnerEndpoint;
use crate::protocol::{Command, BUF_SIZE};

/// 传输层客户端
#[derive(Debug, Clone)]
pub struct Transport {
    timeout: Duration,
}

impl Transport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// 向对端发送一条命令并返回应答文本
    pub async fn send(&self, endpoint: &RunnerEndpoint, command: &Command) -> CoordinatorResult<String> {
        self.communicate(&endpoint.host, endpoint.port, &command.encode())
            .await
    }

    /// 发送原始请求字节并读取至多 [`BUF_SIZE`] 字节的应答
    pub async fn communicate(&self, host: &str, port: u16, request: &[u8]) -> CoordinatorResult<String> {
        let endpoint = format!("{host}:{port}");

        match timeout(self.timeout, exchange(host, port, request)).await {
            Ok(Ok(response)) => {
                trace!("{} 应答: {}", endpoint, response);
                Ok(response)
            }
            Ok(Err(e)) => Err(CoordinatorError::connection(endpoint, e)),
            Err(_) => Err(CoordinatorError::timeout(endpoint)),
        }
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

async fn exchange(host: &str, port: u16, request: &[u8]) -> std::io::Result<String> {
    let mut stream = TcpStream::connect((host, port)).await?;
    stream.write_all(request).await?;
    stream.flush().await?;

    // 只读一次：执行器应答 OK 后可能在运行测试期间保持连接
    let mut buf = vec![0u8; BUF_SIZE];
    let n = stream.read(&mut buf).await?;

    let _ = stream.shutdown().await;
    Ok(String::from_utf8_lossy(&buf[..n]).trim().to_string())
}

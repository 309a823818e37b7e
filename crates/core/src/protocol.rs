//! # 协议编解码
//!
//! 调度器与观察者、测试执行器之间使用的文本命令协议。命令以关键字开头，
//! 参数之间以 `:` 分隔：
//!
//! ```text
//! status
//! register:<host>:<port>
//! dispatch:<commit_id>
//! results:<commit_id>:<byte_length>:<payload>
//! ping
//! runtest:<commit_id>
//! ```
//!
//! `results` 的负载长度是显式给出的，负载本身可能包含 `:` 或换行，
//! 并且可能跨越多次读取到达，因此必须按长度精确读取。

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

use crate::errors::{CoordinatorError, CoordinatorResult};

/// 单次读取的缓冲区大小
pub const BUF_SIZE: usize = 1024;

/// results 负载的长度上限
pub const MAX_RESULTS_BYTES: usize = 64 * 1024 * 1024;

pub const RESPONSE_OK: &str = "OK";
pub const RESPONSE_PONG: &str = "pong";
pub const RESPONSE_INVALID_COMMAND: &str = "Invalid command.";
pub const RESPONSE_NO_RUNNERS: &str = "No test runners are registered.";

const RESULTS_PREFIX: &[u8] = b"results:";

/// 协议命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status,
    Register { host: String, port: u16 },
    Dispatch { commit_id: String },
    Results { commit_id: String, payload: Vec<u8> },
    Ping,
    RunTest { commit_id: String },
}

/// 对一段已接收字节的解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// 命令已完整接收
    Complete(Command),
    /// results 头部已完整，负载还差一部分
    NeedPayload {
        commit_id: String,
        length: usize,
        received: Vec<u8>,
    },
    /// results 头部尚未接收完整
    NeedHeader,
}

impl Command {
    pub fn keyword(&self) -> &'static str {
        match self {
            Command::Status => "status",
            Command::Register { .. } => "register",
            Command::Dispatch { .. } => "dispatch",
            Command::Results { .. } => "results",
            Command::Ping => "ping",
            Command::RunTest { .. } => "runtest",
        }
    }

    /// 序列化为线上格式
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Command::Status | Command::Ping => self.keyword().as_bytes().to_vec(),
            Command::Register { host, port } => format!("register:{host}:{port}").into_bytes(),
            Command::Dispatch { commit_id } => format!("dispatch:{commit_id}").into_bytes(),
            Command::RunTest { commit_id } => format!("runtest:{commit_id}").into_bytes(),
            Command::Results { commit_id, payload } => {
                let mut bytes = format!("results:{commit_id}:{}:", payload.len()).into_bytes();
                bytes.extend_from_slice(payload);
                bytes
            }
        }
    }

    /// 解析一条完整的命令
    pub fn decode(bytes: &[u8]) -> CoordinatorResult<Command> {
        match parse_frame(bytes)? {
            Frame::Complete(command) => Ok(command),
            Frame::NeedPayload {
                commit_id,
                length,
                received,
            } => Err(CoordinatorError::protocol(format!(
                "提交 {commit_id} 的结果负载不完整: 期望 {length} 字节，实际 {} 字节",
                received.len()
            ))),
            Frame::NeedHeader => Err(CoordinatorError::protocol("results 命令头部不完整")),
        }
    }
}

/// 校验提交ID。提交ID会被用作结果文件名，因此不允许路径分隔符
pub fn validate_commit_id(commit_id: &str) -> CoordinatorResult<()> {
    if commit_id.is_empty() {
        return Err(CoordinatorError::protocol("提交ID不能为空"));
    }
    if commit_id == "." || commit_id == ".." {
        return Err(CoordinatorError::protocol(format!("无效的提交ID: {commit_id}")));
    }
    if commit_id
        .chars()
        .any(|c| c == '/' || c == '\\' || c == ':' || c.is_whitespace() || c.is_control())
    {
        return Err(CoordinatorError::protocol(format!("无效的提交ID: {commit_id}")));
    }
    Ok(())
}

/// 解析已接收的字节
pub fn parse_frame(bytes: &[u8]) -> CoordinatorResult<Frame> {
    let bytes = trim_ascii_start(bytes);

    if bytes.starts_with(RESULTS_PREFIX) {
        return parse_results(bytes);
    }
    if !bytes.is_empty() && RESULTS_PREFIX.starts_with(bytes) {
        return Ok(Frame::NeedHeader);
    }

    let text = std::str::from_utf8(bytes)
        .map_err(|_| CoordinatorError::protocol("命令不是有效的UTF-8文本"))?
        .trim();

    let (keyword, rest) = match text.split_once(':') {
        Some((keyword, rest)) => (keyword, Some(rest)),
        None => (text, None),
    };

    let command = match (keyword, rest) {
        ("status", None) => Command::Status,
        ("ping", None) => Command::Ping,
        ("register", Some(address)) => {
            let (host, port) = address
                .rsplit_once(':')
                .ok_or_else(|| CoordinatorError::protocol(format!("无效的执行器地址: {address}")))?;
            if host.is_empty() {
                return Err(CoordinatorError::protocol("执行器主机名不能为空"));
            }
            if host.starts_with(':') || host.ends_with(':') {
                return Err(CoordinatorError::protocol(format!("无效的执行器主机名: {host}")));
            }
            let port = port
                .parse::<u16>()
                .map_err(|_| CoordinatorError::protocol(format!("无效的执行器端口: {port}")))?;
            Command::Register {
                host: host.to_string(),
                port,
            }
        }
        ("dispatch", Some(commit_id)) => {
            validate_commit_id(commit_id)?;
            Command::Dispatch {
                commit_id: commit_id.to_string(),
            }
        }
        ("runtest", Some(commit_id)) => {
            validate_commit_id(commit_id)?;
            Command::RunTest {
                commit_id: commit_id.to_string(),
            }
        }
        _ => return Err(CoordinatorError::protocol(format!("无法识别的命令: {text}"))),
    };

    Ok(Frame::Complete(command))
}

fn parse_results(bytes: &[u8]) -> CoordinatorResult<Frame> {
    let header = &bytes[RESULTS_PREFIX.len()..];

    let Some(id_end) = header.iter().position(|b| *b == b':') else {
        return Ok(Frame::NeedHeader);
    };
    let Some(len_end) = header[id_end + 1..].iter().position(|b| *b == b':') else {
        return Ok(Frame::NeedHeader);
    };
    let len_end = id_end + 1 + len_end;

    let commit_id = std::str::from_utf8(&header[..id_end])
        .map_err(|_| CoordinatorError::protocol("提交ID不是有效的UTF-8文本"))?;
    validate_commit_id(commit_id)?;

    let length = std::str::from_utf8(&header[id_end + 1..len_end])
        .ok()
        .and_then(|s| s.trim().parse::<usize>().ok())
        .ok_or_else(|| CoordinatorError::protocol("无效的结果长度"))?;
    if length > MAX_RESULTS_BYTES {
        return Err(CoordinatorError::protocol(format!(
            "结果负载过大: {length} 字节"
        )));
    }

    let payload = &header[len_end + 1..];
    if payload.len() >= length {
        if payload.len() > length {
            debug!(
                "提交 {} 的结果负载多出 {} 字节，已忽略",
                commit_id,
                payload.len() - length
            );
        }
        return Ok(Frame::Complete(Command::Results {
            commit_id: commit_id.to_string(),
            payload: payload[..length].to_vec(),
        }));
    }

    Ok(Frame::NeedPayload {
        commit_id: commit_id.to_string(),
        length,
        received: payload.to_vec(),
    })
}

/// 从连接中读取一条命令
///
/// 先读取至多 [`BUF_SIZE`] 字节；如果是 `results` 命令，会继续读取直到头部完整，
/// 然后按声明的长度精确读取剩余负载，不假设一次读取即可收齐。
pub async fn read_command<R>(reader: &mut R) -> CoordinatorResult<Command>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; BUF_SIZE];
    let mut filled = reader.read(&mut buf).await?;
    if filled == 0 {
        return Err(CoordinatorError::protocol("连接在发送命令前关闭"));
    }

    loop {
        match parse_frame(&buf[..filled])? {
            Frame::Complete(command) => return Ok(command),
            Frame::NeedHeader => {
                if filled == buf.len() {
                    return Err(CoordinatorError::protocol("results 命令头部过长"));
                }
                let n = reader.read(&mut buf[filled..]).await?;
                if n == 0 {
                    return Err(CoordinatorError::protocol("results 命令头部不完整"));
                }
                filled += n;
            }
            Frame::NeedPayload {
                commit_id,
                length,
                mut received,
            } => {
                let already = received.len();
                received.resize(length, 0);
                if let Err(e) = reader.read_exact(&mut received[already..]).await {
                    warn!(
                        "读取提交 {} 的结果负载失败: 期望 {} 字节，已收到 {} 字节",
                        commit_id, length, already
                    );
                    return Err(e.into());
                }
                return Ok(Command::Results {
                    commit_id,
                    payload: received,
                });
            }
        }
    }
}

fn trim_ascii_start(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    &bytes[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_simple_commands() {
        assert_eq!(Command::decode(b"status").unwrap(), Command::Status);
        assert_eq!(Command::decode(b"ping\n").unwrap(), Command::Ping);
        assert_eq!(
            Command::decode(b"register:localhost:9001").unwrap(),
            Command::Register {
                host: "localhost".to_string(),
                port: 9001
            }
        );
        assert_eq!(
            Command::decode(b"dispatch:abc123\n").unwrap(),
            Command::Dispatch {
                commit_id: "abc123".to_string()
            }
        );
        assert_eq!(
            Command::decode(b"runtest:abc123").unwrap(),
            Command::RunTest {
                commit_id: "abc123".to_string()
            }
        );
    }

    #[test]
    fn test_decode_rejects_malformed_commands() {
        for input in [
            &b""[..],
            b"hello",
            b"STATUS",
            b"status:extra",
            b"register:localhost",
            b"register:localhost:notaport",
            b"register::9001",
            b"dispatch:",
            b"dispatch:../etc",
            b"dispatch:a/b",
            b"results:abc:x:data",
        ] {
            let result = Command::decode(input);
            assert!(
                matches!(result, Err(CoordinatorError::Protocol(_))),
                "输入 {:?} 应该被拒绝",
                String::from_utf8_lossy(input)
            );
        }
    }

    #[test]
    fn test_results_payload_may_contain_delimiters() {
        let command = Command::decode(b"results:abc123:11:hello:\nworl").unwrap();
        assert_eq!(
            command,
            Command::Results {
                commit_id: "abc123".to_string(),
                payload: b"hello:\nworl".to_vec()
            }
        );
    }

    #[test]
    fn test_results_extra_bytes_are_ignored() {
        let command = Command::decode(b"results:abc123:5:hello\n").unwrap();
        assert_eq!(
            command,
            Command::Results {
                commit_id: "abc123".to_string(),
                payload: b"hello".to_vec()
            }
        );
    }

    #[test]
    fn test_parse_frame_partial_results() {
        assert_eq!(parse_frame(b"resu").unwrap(), Frame::NeedHeader);
        assert_eq!(parse_frame(b"results:abc").unwrap(), Frame::NeedHeader);
        assert_eq!(
            parse_frame(b"results:abc:10:hello").unwrap(),
            Frame::NeedPayload {
                commit_id: "abc".to_string(),
                length: 10,
                received: b"hello".to_vec()
            }
        );
    }

    #[test]
    fn test_encode_results_header() {
        let command = Command::Results {
            commit_id: "abc123".to_string(),
            payload: b"hello world".to_vec(),
        };
        assert_eq!(command.encode(), b"results:abc123:11:hello world".to_vec());
        assert_eq!(Command::Ping.encode(), b"ping".to_vec());
        assert_eq!(
            Command::RunTest {
                commit_id: "abc".to_string()
            }
            .encode(),
            b"runtest:abc".to_vec()
        );
    }

    #[tokio::test]
    async fn test_read_command_across_many_reads() {
        let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let mut wire = format!("results:deadbeef:{}:", payload.len()).into_bytes();
        wire.extend_from_slice(&payload);

        let mut reader = tokio_test_reader(&wire, 100);
        let command = read_command(&mut reader).await.unwrap();
        assert_eq!(
            command,
            Command::Results {
                commit_id: "deadbeef".to_string(),
                payload
            }
        );
    }

    #[tokio::test]
    async fn test_read_command_header_split() {
        let mut reader = tokio_test_reader(b"results:abc123:11:hello world", 4);
        let command = read_command(&mut reader).await.unwrap();
        assert_eq!(
            command,
            Command::Results {
                commit_id: "abc123".to_string(),
                payload: b"hello world".to_vec()
            }
        );
    }

    #[tokio::test]
    async fn test_read_command_truncated_payload() {
        let mut reader = tokio_test_reader(b"results:abc123:50:short", 1024);
        let result = read_command(&mut reader).await;
        assert!(matches!(result, Err(CoordinatorError::Io(_))));
    }

    /// 通过双工管道按固定块大小写入数据，模拟分段到达
    fn tokio_test_reader(data: &[u8], chunk: usize) -> tokio::io::DuplexStream {
        let (mut writer, reader) = tokio::io::duplex(chunk);
        let data = data.to_vec();
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            for piece in data.chunks(chunk) {
                if writer.write_all(piece).await.is_err() {
                    return;
                }
                tokio::task::yield_now().await;
            }
        });
        reader
    }
}

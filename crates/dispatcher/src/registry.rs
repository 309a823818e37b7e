use tracing::debug;

use ci_core::{
    models::{RunnerEndpoint, RunnerId, RunnerInfo, RunnerSlot},
    CoordinatorError, CoordinatorResult,
};

/// 测试执行器注册表
///
/// 注册只追加不去重：同一地址重复注册会得到两个独立的槽位。
/// 被驱逐的执行器直接移除，重新注册会得到新的 [`RunnerId`]。
#[derive(Debug, Default)]
pub struct RunnerRegistry {
    runners: Vec<RunnerInfo>,
    next_id: u64,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册执行器，返回新分配的槽位ID
    pub fn register(&mut self, endpoint: RunnerEndpoint) -> RunnerId {
        self.next_id += 1;
        let id = RunnerId(self.next_id);
        debug!("注册执行器 {} ({})", id, endpoint);
        self.runners.push(RunnerInfo::new(id, endpoint));
        id
    }

    /// 当前执行器快照
    pub fn list(&self) -> Vec<RunnerInfo> {
        self.runners.clone()
    }

    /// 空闲执行器快照，按注册顺序
    pub fn idle(&self) -> Vec<RunnerInfo> {
        self.runners.iter().filter(|r| r.is_idle()).cloned().collect()
    }

    pub fn get(&self, id: RunnerId) -> Option<&RunnerInfo> {
        self.runners.iter().find(|r| r.id == id)
    }

    fn get_mut(&mut self, id: RunnerId) -> Option<&mut RunnerInfo> {
        self.runners.iter_mut().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.runners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }

    /// 为即将发送的 runtest 预留空闲执行器，执行器不空闲时返回 false
    pub fn reserve(&mut self, id: RunnerId, commit_id: &str) -> bool {
        match self.get_mut(id) {
            Some(runner) if runner.is_idle() => {
                runner.slot = RunnerSlot::Reserved(commit_id.to_string());
                true
            }
            _ => false,
        }
    }

    /// 撤销预留
    pub fn release(&mut self, id: RunnerId, commit_id: &str) -> bool {
        match self.get_mut(id) {
            Some(runner) if runner.slot == RunnerSlot::Reserved(commit_id.to_string()) => {
                runner.slot = RunnerSlot::Idle;
                true
            }
            _ => false,
        }
    }

    /// 检查执行器当前是否为该提交预留
    pub fn is_reserved_for(&self, id: RunnerId, commit_id: &str) -> CoordinatorResult<bool> {
        let runner = self
            .get(id)
            .ok_or(CoordinatorError::RunnerNotFound { id: id.0 })?;
        Ok(matches!(&runner.slot, RunnerSlot::Reserved(c) if c == commit_id))
    }

    /// 执行器接受了提交：预留转为执行中
    pub fn assign(&mut self, id: RunnerId, commit_id: &str) -> CoordinatorResult<()> {
        let runner = self
            .get_mut(id)
            .ok_or(CoordinatorError::RunnerNotFound { id: id.0 })?;

        if !matches!(&runner.slot, RunnerSlot::Reserved(c) if c == commit_id) {
            return Err(CoordinatorError::InvalidTransition(format!(
                "执行器 {id} 处于 {:?}，不能分配提交 {commit_id}",
                runner.slot
            )));
        }
        runner.slot = RunnerSlot::Busy(commit_id.to_string());
        Ok(())
    }

    /// 执行器完成提交后恢复空闲
    pub fn finish(&mut self, id: RunnerId, commit_id: &str) -> bool {
        match self.get_mut(id) {
            Some(runner) if runner.current_commit() == Some(commit_id) => {
                runner.slot = RunnerSlot::Idle;
                true
            }
            _ => false,
        }
    }

    /// 驱逐执行器，返回它正在执行的提交（如果有）
    pub fn evict(&mut self, id: RunnerId) -> CoordinatorResult<Option<String>> {
        let index = self
            .runners
            .iter()
            .position(|r| r.id == id)
            .ok_or(CoordinatorError::RunnerNotFound { id: id.0 })?;
        let runner = self.runners.remove(index);
        debug!("驱逐执行器 {} ({})", runner.id, runner.endpoint);
        Ok(runner.current_commit().map(str::to_string))
    }
}

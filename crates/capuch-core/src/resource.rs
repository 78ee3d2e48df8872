//! 资源槽与工作者私有持有集合。
//!
//! 资源只有身份没有负载：`id` 在池初始化时分配，`batch_tag` 记录其被填满时所属的刷盘批次。
//! 任一时刻一个资源只存在于一个容器中（池空闲链表、某个工作者的 free/ready/active），
//! 所有转移都以 move 完成，类型上不实现 `Clone` 以防复制。

use std::collections::VecDeque;

/// 池中的一个资源槽。
#[derive(Debug, PartialEq, Eq)]
pub struct Resource {
    pub id: u32,
    pub batch_tag: u64,
}

impl Resource {
    pub(crate) fn new(id: u32) -> Self {
        Self { id, batch_tag: 0 }
    }
}

/// 工作者私有的三类容器。
///
/// # 契约说明（What）
/// - `ready` 按 `batch_tag` 非递减排列，回收时只从队首摘取连续前缀；
/// - `nbufs()` 为三者之和，是与池配额比较的唯一口径。
#[derive(Debug, Default)]
pub struct Holdings {
    pub(crate) free: VecDeque<Resource>,
    pub(crate) ready: VecDeque<Resource>,
    pub(crate) active: Option<Resource>,
}

impl Holdings {
    pub fn nbufs(&self) -> usize {
        self.free.len() + self.ready.len() + usize::from(self.active.is_some())
    }

    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub fn active_id(&self) -> Option<u32> {
        self.active.as_ref().map(|rsc| rsc.id)
    }

    /// 可以归还给池的资源数量（`active` 不参与归还）。
    pub fn returnable(&self) -> usize {
        self.free.len() + self.ready.len()
    }

    /// 按归还顺序弹出一个资源：先 free，后 ready 队首。
    pub(crate) fn pop_returnable(&mut self) -> Option<Resource> {
        self.free.pop_front().or_else(|| self.ready.pop_front())
    }

    /// 依次列出当前持有的全部资源 id，仅供诊断与测试。
    pub fn resource_ids(&self) -> Vec<u32> {
        self.free
            .iter()
            .chain(self.ready.iter())
            .chain(self.active.iter())
            .map(|rsc| rsc.id)
            .collect()
    }

    /// `ready` 中各资源的批次标签，按队列顺序。
    pub fn ready_tags(&self) -> Vec<u64> {
        self.ready.iter().map(|rsc| rsc.batch_tag).collect()
    }
}

use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use crate::core::{FileGroup, GroupKey};

/// 带到期时间的文件组
#[derive(Clone, Debug)]
pub struct DelayedFileGroup {
    pub group: FileGroup,
    pub expires_at: Instant,
}

impl DelayedFileGroup {
    pub fn new(group: FileGroup, delay: Duration) -> Self {
        Self {
            group,
            expires_at: Instant::now() + delay,
        }
    }
}

#[derive(Default)]
struct QueueState {
    /// (到期时间, 入队序号) → 组；序号保证同一时刻到期的组按入队顺序交付
    by_deadline: BTreeMap<(Instant, u64), FileGroup>,
    by_key: HashMap<GroupKey, (Instant, u64)>,
    seq: u64,
    closed: bool,
}

/// debounce 延迟队列：同一 (目录, 基名) 至多一个待交付条目
///
/// `update` 合并扩展名并重新计时；`take` 阻塞直到最早的条目到期或队列关闭。
pub struct DelayQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl Default for DelayQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DelayQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            ready: Condvar::new(),
        }
    }

    /// 插入或刷新：已有同键条目时并集扩展名，到期时间取新值
    pub fn update(&self, item: DelayedFileGroup) {
        let mut st = self.state.lock();
        if st.closed {
            return;
        }
        let DelayedFileGroup {
            mut group,
            expires_at,
        } = item;

        if let Some(old_key) = st.by_key.remove(group.key()) {
            if let Some(old) = st.by_deadline.remove(&old_key) {
                group.merge(&old);
            }
        }

        st.seq += 1;
        let slot = (expires_at, st.seq);
        st.by_key.insert(group.key().clone(), slot);
        st.by_deadline.insert(slot, group);
        drop(st);
        // 新条目可能比当前等待的更早到期
        self.ready.notify_all();
    }

    /// 阻塞取出下一个到期的组；队列关闭后返回 None
    pub fn take(&self) -> Option<FileGroup> {
        let mut st = self.state.lock();
        loop {
            if st.closed {
                return None;
            }
            let now = Instant::now();
            match st.by_deadline.keys().next().copied() {
                Some(slot) if slot.0 <= now => return Self::pop(&mut st, slot),
                Some((deadline, _)) => {
                    self.ready.wait_until(&mut st, deadline);
                }
                None => self.ready.wait(&mut st),
            }
        }
    }

    fn pop(st: &mut QueueState, slot: (Instant, u64)) -> Option<FileGroup> {
        let group = st.by_deadline.remove(&slot)?;
        st.by_key.remove(group.key());
        Some(group)
    }

    pub fn len(&self) -> usize {
        self.state.lock().by_deadline.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 关闭后丢弃所有待交付条目，唤醒所有等待者
    pub fn close(&self) {
        let mut st = self.state.lock();
        st.closed = true;
        st.by_deadline.clear();
        st.by_key.clear();
        drop(st);
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

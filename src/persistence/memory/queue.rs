use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::{sync::Arc, time::Duration};
use tokio::sync::Notify;
use tokio::time::Instant;

use super::MemoryPersistence;
use crate::common::error::{Result, SchedulerError};
use crate::common::model::ObjectKey;
use crate::persistence::traits::WorkQueue;

/// 队列内部状态
///
/// 全部放在一把锁里，保证 dirty / processing / ready 三者的转换是原子的。
#[derive(Debug, Default)]
pub(crate) struct QueueState {
    /// 【就绪队列】FIFO，其中的 Key 一定在 dirty 里、一定不在 processing 里
    ready: VecDeque<ObjectKey>,

    /// 待处理集合 (去重)
    dirty: HashSet<ObjectKey>,

    /// 处理中集合
    processing: HashSet<ObjectKey>,

    /// 【延时索引】(到期时间, Key)
    /// - BTreeSet 天然按时间排序，头部即最早到期
    waiting: BTreeSet<(Instant, ObjectKey)>,

    /// Key -> 当前生效的到期时间
    waiting_at: HashMap<ObjectKey, Instant>,

    shutting_down: bool,
}

impl QueueState {
    /// 标记为待处理。返回 true 表示需要唤醒拉取协程
    fn mark_dirty(&mut self, key: ObjectKey, capacity: usize) -> Result<bool> {
        if self.dirty.contains(&key) {
            return Ok(false);
        }
        if self.dirty.len() >= capacity {
            return Err(SchedulerError::QueueFull(capacity));
        }
        self.dirty.insert(key.clone());
        // 处理中的 Key 推迟到 release 再进就绪队列
        if self.processing.contains(&key) {
            return Ok(false);
        }
        self.ready.push_back(key);
        Ok(true)
    }

    /// 把到期的延时 Key 提升为就绪
    fn promote_due(&mut self, now: Instant, capacity: usize) {
        while let Some((at, _)) = self.waiting.first() {
            if *at > now {
                break;
            }
            let Some((_, key)) = self.waiting.pop_first() else {
                break;
            };
            self.waiting_at.remove(&key);
            if let Err(e) = self.mark_dirty(key.clone(), capacity) {
                // 放不进去就丢弃，Resync 会兜底
                tracing::warn!("[Queue] Drop delayed key {}: {}", key, e);
            }
        }
    }

    fn schedule_at(&mut self, key: ObjectKey, at: Instant) {
        match self.waiting_at.get(&key) {
            // 已有更早的到期时间，保留它
            Some(existing) if *existing <= at => {}
            Some(existing) => {
                self.waiting.remove(&(*existing, key.clone()));
                self.waiting.insert((at, key.clone()));
                self.waiting_at.insert(key, at);
            }
            None => {
                self.waiting.insert((at, key.clone()));
                self.waiting_at.insert(key, at);
            }
        }
    }
}

#[async_trait]
impl WorkQueue for MemoryPersistence {
    async fn add(&self, key: ObjectKey) -> Result<()> {
        let wake = {
            let mut q = self.queue.lock();
            if q.shutting_down {
                return Err(SchedulerError::SchedulerShutdown);
            }
            q.mark_dirty(key, self.capacity)?
        };
        if wake {
            self.notify.notify_one();
        }
        Ok(())
    }

    async fn add_after(&self, key: ObjectKey, delay: Duration) -> Result<()> {
        if delay.is_zero() {
            return self.add(key).await;
        }
        {
            let mut q = self.queue.lock();
            if q.shutting_down {
                return Err(SchedulerError::SchedulerShutdown);
            }
            q.schedule_at(key, Instant::now() + delay);
        }
        // 唤醒 Pacemaker 重新计算睡眠时长
        self.notify.notify_one();
        Ok(())
    }

    async fn acquire(&self, batch_size: usize) -> Result<Vec<ObjectKey>> {
        let mut q = self.queue.lock();
        if q.shutting_down {
            return Ok(Vec::new());
        }
        q.promote_due(Instant::now(), self.capacity);

        let mut items = Vec::with_capacity(batch_size);
        while items.len() < batch_size {
            let Some(key) = q.ready.pop_front() else {
                break;
            };
            q.dirty.remove(&key);
            q.processing.insert(key.clone());
            items.push(key);
        }
        Ok(items)
    }

    async fn release(&self, key: &ObjectKey) -> Result<()> {
        let wake = {
            let mut q = self.queue.lock();
            q.processing.remove(key);
            // 处理期间又被投递过
            if q.dirty.contains(key) && !q.shutting_down {
                q.ready.push_back(key.clone());
                true
            } else {
                false
            }
        };
        if wake {
            self.notify.notify_one();
        }
        Ok(())
    }

    fn next_due(&self) -> Option<Instant> {
        self.queue.lock().waiting.first().map(|(at, _)| *at)
    }

    fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    fn len(&self) -> usize {
        let q = self.queue.lock();
        q.ready.len() + q.waiting.len()
    }

    fn shutdown(&self) {
        self.queue.lock().shutting_down = true;
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::SchedulerConfig;

    fn queue(capacity: usize) -> MemoryPersistence {
        let mut cfg = SchedulerConfig::new_dev();
        cfg.worker.queue_capacity = capacity;
        MemoryPersistence::new(&cfg)
    }

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new("default", name)
    }

    #[tokio::test]
    async fn pending_keys_are_deduplicated() {
        let q = queue(16);
        q.add(key("a")).await.unwrap();
        q.add(key("a")).await.unwrap();
        q.add(key("b")).await.unwrap();

        let got = q.acquire(10).await.unwrap();
        assert_eq!(got, vec![key("a"), key("b")]);
    }

    #[tokio::test]
    async fn key_in_flight_is_not_handed_out_twice() {
        let q = queue(16);
        q.add(key("a")).await.unwrap();
        let first = q.acquire(1).await.unwrap();
        assert_eq!(first, vec![key("a")]);

        // 处理中再次投递: 不可被取出
        q.add(key("a")).await.unwrap();
        assert!(q.acquire(10).await.unwrap().is_empty());

        // 归还后重新就绪
        q.release(&key("a")).await.unwrap();
        assert_eq!(q.acquire(10).await.unwrap(), vec![key("a")]);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_key_becomes_ready_at_deadline() {
        let q = queue(16);
        q.add_after(key("a"), Duration::from_secs(30)).await.unwrap();
        assert!(q.acquire(10).await.unwrap().is_empty());
        assert!(q.next_due().is_some());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(q.acquire(10).await.unwrap(), vec![key("a")]);
        assert!(q.next_due().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn earliest_delay_wins() {
        let q = queue(16);
        q.add_after(key("a"), Duration::from_secs(60)).await.unwrap();
        q.add_after(key("a"), Duration::from_secs(5)).await.unwrap();
        q.add_after(key("a"), Duration::from_secs(90)).await.unwrap();
        assert_eq!(q.len(), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(q.acquire(10).await.unwrap(), vec![key("a")]);
    }

    #[tokio::test]
    async fn full_queue_applies_backpressure() {
        let q = queue(1);
        q.add(key("a")).await.unwrap();
        let err = q.add(key("b")).await.unwrap_err();
        assert!(matches!(err, SchedulerError::QueueFull(1)));
    }

    #[tokio::test]
    async fn shutdown_rejects_new_work() {
        let q = queue(4);
        q.add(key("a")).await.unwrap();
        q.shutdown();
        assert!(q.acquire(10).await.unwrap().is_empty());
        assert!(matches!(
            q.add(key("b")).await,
            Err(SchedulerError::SchedulerShutdown)
        ));
    }
}

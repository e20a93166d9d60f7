use crossbeam::queue::ArrayQueue;

/// 固定容量的帧队列
///
/// - 生产端（引擎回调线程，可能有多个）从不阻塞：满了直接拒绝
/// - 消费端非阻塞弹出
/// - `size()` 只用于仪表，和 push/pop 之间的竞争是可接受的
pub struct FrameBuffer<T> {
    queue: ArrayQueue<T>,
}

impl<T> FrameBuffer<T> {
    /// 创建指定容量的队列（容量至少为 1）
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
        }
    }

    /// 尝试入队；队列满时把样本原样退回，由调用方释放
    pub fn try_push(&self, sample: T) -> Result<(), T> {
        self.queue.push(sample)
    }

    /// 取出最早的样本
    pub fn try_pop(&self) -> Option<T> {
        self.queue.pop()
    }

    pub fn size(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// 填充比例（0.0 - 1.0），用于背压仪表
    pub fn fill_ratio(&self) -> f64 {
        self.size() as f64 / self.capacity() as f64
    }

    /// 清空队列并释放所有样本，返回丢弃数量
    pub fn drain(&self) -> usize {
        let mut count = 0;
        while let Some(sample) = self.queue.pop() {
            drop(sample);
            count += 1;
        }
        count
    }
}

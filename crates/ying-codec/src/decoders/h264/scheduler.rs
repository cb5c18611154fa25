//! 切片任务调度.
//!
//! 16 个任务槽位以 `busy` / `pending` / `ready` 三个 16 位掩码跟踪状态, 每个任务
//! 带一个 32 位的帧槽位依赖掩码. 依赖的帧全部完成 (`next_deblock_addr == i32::MAX`)
//! 且同一图像中更早的任务都已结束时任务就绪, 工作线程总是取编号最小的就绪任务.
//!
//! `n_threads == 0` 时不启动工作线程, 提交任务的调用方线程直接执行.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

use log::{debug, error, trace, warn};
use ying_core::{YingError, YingResult};

use super::deblock::deblock_picture;
use super::dpb::MAX_SLOTS;
use super::picture::Picture;
use super::recovery::recover_frame;
use super::slice_data::{SliceOutcome, SliceTask, decode_slice};

/// 任务槽位数
pub(crate) const MAX_TASKS: usize = 16;

/// 整帧完成的水位线
pub(crate) const FRAME_DONE: i32 = i32::MAX;

/// 自动线程数的上限
const MAX_AUTO_THREADS: usize = 16;

/// 每个帧槽位的解码进度
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct FrameProgress {
    /// 尚未被任何切片写入的宏块数
    pub(crate) remaining_mbs: u32,
    /// 已完成去块的宏块地址, FRAME_DONE 表示整帧完成
    pub(crate) next_deblock_addr: i32,
    /// 已提交但未结束的任务数
    pub(crate) in_flight: u32,
    /// 图像不会再收到新切片
    pub(crate) closed: bool,
    finalizing: bool,
    /// 有切片出错或宏块被修复
    pub(crate) error: bool,
}

impl FrameProgress {
    fn done(&self) -> bool {
        self.next_deblock_addr == FRAME_DONE
    }

    fn should_finalize(&self) -> bool {
        !self.done()
            && !self.finalizing
            && self.in_flight == 0
            && (self.remaining_mbs == 0 || self.closed)
    }
}

struct TaskEntry {
    task: Arc<SliceTask>,
    target: usize,
    deps: u32,
    seq: u64,
}

/// 受互斥锁保护的调度状态
pub(crate) struct SchedState {
    tasks: Vec<Option<TaskEntry>>,
    busy: u16,
    pending: u16,
    ready: u16,
    frames: [FrameProgress; MAX_SLOTS],
    pictures: Vec<Option<Arc<Picture>>>,
    /// 已借给调用方的帧槽位
    borrowed: u32,
    /// 每结束一个任务或完成一帧加一, 用于等待状态变化
    generation: u64,
    seq: u64,
    shutdown: bool,
}

impl SchedState {
    fn new() -> Self {
        Self {
            tasks: (0..MAX_TASKS).map(|_| None).collect(),
            busy: 0,
            pending: 0,
            ready: 0,
            frames: [FrameProgress::default(); MAX_SLOTS],
            pictures: vec![None; MAX_SLOTS],
            borrowed: 0,
            generation: 0,
            seq: 0,
            shutdown: false,
        }
    }

    /// 重新计算就绪掩码
    fn recompute_ready(&mut self) {
        let mut ready = 0u16;
        for i in (0..MAX_TASKS).filter(|&i| self.pending & (1 << i) != 0) {
            let Some(entry) = &self.tasks[i] else {
                continue;
            };
            let deps_done = (0..MAX_SLOTS)
                .filter(|&s| entry.deps & (1 << s) != 0)
                .all(|s| self.frames[s].done());
            let earlier_busy = (0..MAX_TASKS).any(|j| {
                j != i
                    && self.busy & (1 << j) != 0
                    && self.tasks[j]
                        .as_ref()
                        .is_some_and(|e| e.target == entry.target && e.seq < entry.seq)
            });
            if deps_done && !earlier_busy {
                ready |= 1 << i;
            }
        }
        self.ready = ready;
    }

    /// 取出编号最小的就绪任务
    fn take_ready(&mut self) -> Option<(usize, Arc<SliceTask>)> {
        if self.ready == 0 {
            return None;
        }
        let idx = self.ready.trailing_zeros() as usize;
        self.ready &= !(1 << idx);
        self.pending &= !(1 << idx);
        let task = Arc::clone(&self.tasks[idx].as_ref()?.task);
        Some((idx, task))
    }
}

/// 调度器与工作线程共享的部分
pub(crate) struct Shared {
    state: Mutex<SchedState>,
    task_ready: Condvar,
    task_progress: Condvar,
    task_complete: Condvar,
}

impl Shared {
    fn lock(&self) -> YingResult<MutexGuard<'_, SchedState>> {
        self.state
            .lock()
            .map_err(|_| YingError::Internal("H264: 调度状态锁已中毒".into()))
    }

    /// 归还借出的帧槽位
    pub(crate) fn release_borrow(&self, slot: usize) {
        match self.lock() {
            Ok(mut st) => {
                st.borrowed &= !(1 << slot);
                st.generation += 1;
                self.task_complete.notify_all();
            }
            Err(e) => error!("{e}"),
        }
    }

    /// 任务结束后的记账; 帧的最后一个任务结束时执行整帧收尾
    ///
    /// 返回切片自身的错误. 只有调度状态本身损坏时才返回 Err.
    fn complete(
        &self,
        idx: usize,
        outcome: YingResult<SliceOutcome>,
    ) -> YingResult<Option<YingError>> {
        let (fresh, slice_error) = match outcome {
            Ok(o) => (o.fresh, o.error),
            Err(e) => {
                error!("H264: 切片任务失败: {e}");
                (0, Some(e))
            }
        };
        let (target, finalize) = {
            let mut st = self.lock()?;
            let entry = st.tasks[idx].take();
            st.busy &= !(1 << idx);
            st.generation += 1;
            let Some(entry) = entry else {
                return Err(YingError::Internal(format!("H264: 任务槽位 {idx} 为空")));
            };
            let f = &mut st.frames[entry.target];
            f.in_flight = f.in_flight.saturating_sub(1);
            f.remaining_mbs = f.remaining_mbs.saturating_sub(fresh);
            f.error |= slice_error.is_some();
            let finalize = f.should_finalize();
            if finalize {
                f.finalizing = true;
            }
            st.recompute_ready();
            self.task_ready.notify_all();
            self.task_complete.notify_all();
            (entry.target, finalize)
        };
        if finalize {
            self.finalize(target)?;
        }
        Ok(slice_error)
    }

    /// 修复缺失宏块、整帧去块, 然后把水位线推到 FRAME_DONE
    fn finalize(&self, slot: usize) -> YingResult<()> {
        let pic = self.lock()?.pictures[slot].clone();
        let mut concealed = false;
        if let Some(pic) = pic {
            let mut data = pic.write()?;
            recover_frame(&mut data);
            deblock_picture(&mut data);
            concealed = data.concealed;
        }
        let mut st = self.lock()?;
        let f = &mut st.frames[slot];
        f.finalizing = false;
        f.next_deblock_addr = FRAME_DONE;
        f.error |= concealed;
        st.generation += 1;
        st.recompute_ready();
        trace!("H264: 帧槽位 {slot} 完成");
        self.task_progress.notify_all();
        self.task_ready.notify_all();
        self.task_complete.notify_all();
        Ok(())
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let next = {
            let Ok(mut st) = shared.lock() else {
                return;
            };
            loop {
                if st.shutdown {
                    return;
                }
                if let Some(next) = st.take_ready() {
                    break next;
                }
                st = match shared.task_ready.wait(st) {
                    Ok(st) => st,
                    Err(_) => return,
                };
            }
        };
        let (idx, task) = next;
        let outcome = decode_slice(&task);
        drop(task);
        if let Err(e) = shared.complete(idx, outcome) {
            error!("H264: 工作线程退出: {e}");
            return;
        }
    }
}

/// 帧槽位占用情况
#[derive(Debug, Clone, Copy)]
pub(crate) struct Occupancy {
    /// 已借给调用方
    pub(crate) borrowed: u32,
    /// 被进行中的任务引用或尚未完成
    pub(crate) busy: u32,
    /// 调度状态代数, 配合 [`Scheduler::wait_change`] 使用
    pub(crate) generation: u64,
}

/// 任务调度器
pub(crate) struct Scheduler {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

/// 解析线程数配置: 0 为同步模式, 负数为逻辑 CPU 数 (不超过 16)
pub(crate) fn resolve_threads(n_threads: i32) -> usize {
    match n_threads {
        0 => 0,
        n if n < 0 => std::thread::available_parallelism()
            .map_or(1, |n| n.get())
            .min(MAX_AUTO_THREADS),
        n => n as usize,
    }
}

impl Scheduler {
    pub(crate) fn new(n_threads: i32) -> YingResult<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(SchedState::new()),
            task_ready: Condvar::new(),
            task_progress: Condvar::new(),
            task_complete: Condvar::new(),
        });
        let count = resolve_threads(n_threads);
        let mut workers = Vec::with_capacity(count);
        for i in 0..count {
            let shared = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name(format!("ying-h264-{i}"))
                .spawn(move || worker_loop(shared))
                .map_err(|e| YingError::OutOfMemory(format!("H264: 无法创建工作线程: {e}")))?;
            workers.push(handle);
        }
        debug!("H264: 调度器启动, 工作线程 {count} 个");
        Ok(Self { shared, workers })
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    fn synchronous(&self) -> bool {
        self.workers.is_empty()
    }

    /// 占用一个空闲任务槽位
    ///
    /// 槽位全部占用时, 非阻塞模式返回 WouldBlock, 否则等待 `task_complete`.
    pub(crate) fn reserve(&self, non_blocking: bool) -> YingResult<usize> {
        let mut st = self.shared.lock()?;
        loop {
            if st.busy != u16::MAX {
                let idx = (!st.busy).trailing_zeros() as usize;
                st.busy |= 1 << idx;
                return Ok(idx);
            }
            if non_blocking || self.synchronous() {
                return Err(YingError::WouldBlock);
            }
            st = self
                .shared
                .task_complete
                .wait(st)
                .map_err(|_| YingError::Internal("H264: 调度状态锁已中毒".into()))?;
        }
    }

    /// 归还未提交的任务槽位
    pub(crate) fn cancel(&self, idx: usize) -> YingResult<()> {
        let mut st = self.shared.lock()?;
        st.busy &= !(1 << idx);
        st.generation += 1;
        self.shared.task_complete.notify_all();
        Ok(())
    }

    /// 提交已占用槽位 `idx` 上的任务
    ///
    /// 同步模式下任务立即在当前线程执行, 切片错误通过返回值报告; 多线程模式下
    /// 切片错误只体现在输出帧的错误标记上.
    pub(crate) fn submit(
        &self,
        idx: usize,
        task: SliceTask,
        target: usize,
        deps: u32,
    ) -> YingResult<Option<YingError>> {
        {
            let mut st = self.shared.lock()?;
            let f = &mut st.frames[target];
            if f.done() || f.finalizing {
                warn!("H264: 帧槽位 {target} 已完成, 丢弃迟到的切片");
                st.busy &= !(1 << idx);
                self.shared.task_complete.notify_all();
                return Ok(None);
            }
            f.in_flight += 1;
            st.seq += 1;
            let seq = st.seq;
            st.tasks[idx] = Some(TaskEntry {
                task: Arc::new(task),
                target,
                deps,
                seq,
            });
            st.pending |= 1 << idx;
            st.recompute_ready();
            self.shared.task_ready.notify_all();
        }
        if self.synchronous() {
            return self.run_inline(idx);
        }
        Ok(None)
    }

    /// 在当前线程执行所有就绪任务, 返回任务 `idx` 的切片错误
    fn run_inline(&self, idx: usize) -> YingResult<Option<YingError>> {
        let mut slice_error = None;
        loop {
            let Some((i, task)) = self.shared.lock()?.take_ready() else {
                break;
            };
            let outcome = decode_slice(&task);
            drop(task);
            let err = self.shared.complete(i, outcome)?;
            if i == idx {
                slice_error = err;
            }
        }
        Ok(slice_error)
    }

    /// 新图像开始解码
    pub(crate) fn begin_frame(&self, slot: usize, pic: Arc<Picture>, mb_count: u32) -> YingResult<()> {
        let mut st = self.shared.lock()?;
        st.frames[slot] = FrameProgress {
            remaining_mbs: mb_count,
            ..FrameProgress::default()
        };
        st.pictures[slot] = Some(pic);
        Ok(())
    }

    /// 图像不会再有新切片; 没有进行中的任务时立即收尾
    pub(crate) fn close_frame(&self, slot: usize) -> YingResult<()> {
        let finalize = {
            let mut st = self.shared.lock()?;
            let f = &mut st.frames[slot];
            f.closed = true;
            let finalize = f.should_finalize();
            if finalize {
                f.finalizing = true;
            }
            finalize
        };
        if finalize {
            self.shared.finalize(slot)?;
        }
        Ok(())
    }

    /// 直接把帧标记为完成 (frame_num 间隔补出的帧)
    pub(crate) fn mark_done(&self, slot: usize, pic: Arc<Picture>) -> YingResult<()> {
        let mut st = self.shared.lock()?;
        st.frames[slot] = FrameProgress {
            next_deblock_addr: FRAME_DONE,
            closed: true,
            ..FrameProgress::default()
        };
        st.pictures[slot] = Some(pic);
        st.generation += 1;
        st.recompute_ready();
        self.shared.task_progress.notify_all();
        Ok(())
    }

    /// 等待帧完成, 返回帧错误标记
    ///
    /// 非阻塞模式 (或没有工作线程) 下帧未完成时返回 WouldBlock.
    pub(crate) fn wait_frame(&self, slot: usize, non_blocking: bool) -> YingResult<bool> {
        let mut st = self.shared.lock()?;
        while !st.frames[slot].done() {
            if non_blocking || self.synchronous() {
                return Err(YingError::WouldBlock);
            }
            st = self
                .shared
                .task_progress
                .wait(st)
                .map_err(|_| YingError::Internal("H264: 调度状态锁已中毒".into()))?;
        }
        Ok(st.frames[slot].error)
    }

    /// 当前的帧槽位占用情况
    pub(crate) fn occupancy(&self) -> YingResult<Occupancy> {
        let st = self.shared.lock()?;
        let mut busy = 0;
        for entry in st.tasks.iter().flatten() {
            busy |= entry.deps | (1 << entry.target);
        }
        for (s, f) in st.frames.iter().enumerate() {
            if st.pictures[s].is_some() && !f.done() {
                busy |= 1 << s;
            }
        }
        Ok(Occupancy {
            borrowed: st.borrowed,
            busy,
            generation: st.generation,
        })
    }

    /// 等待调度状态在 `generation` 之后发生变化
    pub(crate) fn wait_change(&self, generation: u64) -> YingResult<()> {
        let mut st = self.shared.lock()?;
        while st.generation == generation && !st.shutdown {
            st = self
                .shared
                .task_complete
                .wait(st)
                .map_err(|_| YingError::Internal("H264: 调度状态锁已中毒".into()))?;
        }
        Ok(())
    }

    /// 等待全部任务结束
    pub(crate) fn wait_idle(&self) -> YingResult<()> {
        let mut st = self.shared.lock()?;
        while st.busy != 0 {
            st = self
                .shared
                .task_complete
                .wait(st)
                .map_err(|_| YingError::Internal("H264: 调度状态锁已中毒".into()))?;
        }
        Ok(())
    }

    /// 把帧槽位借给调用方
    pub(crate) fn borrow(&self, slot: usize) -> YingResult<()> {
        self.shared.lock()?.borrowed |= 1 << slot;
        Ok(())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Ok(mut st) = self.shared.state.lock() {
            st.shutdown = true;
        }
        self.shared.task_ready.notify_all();
        self.shared.task_complete.notify_all();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("H264: 工作线程异常退出");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::h264::tests::helpers::blank_task;

    #[test]
    fn test_resolve_threads() {
        assert_eq!(resolve_threads(0), 0);
        assert_eq!(resolve_threads(3), 3);
        let auto = resolve_threads(-1);
        assert!((1..=MAX_AUTO_THREADS).contains(&auto));
    }

    #[test]
    fn test_seventeenth_reservation_would_block() {
        for threads in [0, 2] {
            let sched = Scheduler::new(threads).unwrap();
            let slots: Vec<usize> = (0..MAX_TASKS)
                .map(|_| sched.reserve(true).unwrap())
                .collect();
            assert_eq!(slots, (0..MAX_TASKS).collect::<Vec<_>>());
            assert!(matches!(sched.reserve(true), Err(YingError::WouldBlock)));
            sched.cancel(5).unwrap();
            assert_eq!(sched.reserve(true).unwrap(), 5);
        }
    }

    #[test]
    fn test_close_empty_frame_conceals_and_completes() {
        let sched = Scheduler::new(0).unwrap();
        let pic = Arc::new(Picture::new(1, 1));
        sched.begin_frame(3, Arc::clone(&pic), 1).unwrap();
        assert_ne!(sched.occupancy().unwrap().busy & (1 << 3), 0);
        assert!(matches!(sched.wait_frame(3, false), Err(YingError::WouldBlock)));
        sched.close_frame(3).unwrap();
        assert!(sched.wait_frame(3, false).unwrap());
        assert_eq!(sched.occupancy().unwrap().busy & (1 << 3), 0);
        assert_eq!(pic.read().unwrap().mbs[0].error, 100);
    }

    #[test]
    fn test_wait_frame_non_blocking_with_workers() {
        let sched = Scheduler::new(2).unwrap();
        let pic = Arc::new(Picture::new(1, 1));
        sched.begin_frame(4, Arc::clone(&pic), 1).unwrap();
        assert!(matches!(sched.wait_frame(4, true), Err(YingError::WouldBlock)));
        sched.close_frame(4).unwrap();
        assert!(sched.wait_frame(4, true).unwrap());
    }

    #[test]
    fn test_ready_waits_for_dependencies_and_order() {
        let mut st = SchedState::new();
        st.pictures[0] = Some(Arc::new(Picture::new(1, 1)));
        st.frames[1].next_deblock_addr = FRAME_DONE;
        let dummy = |target: usize, deps: u32, seq: u64| TaskEntry {
            task: Arc::new(blank_task()),
            target,
            deps,
            seq,
        };
        // 任务 0: 帧 2, 依赖已完成的帧 1; 任务 1: 帧 2 的后续切片; 任务 2: 依赖未完成的帧 0
        st.tasks[0] = Some(dummy(2, 1 << 1, 1));
        st.tasks[1] = Some(dummy(2, 1 << 1, 2));
        st.tasks[2] = Some(dummy(4, 1 << 0, 3));
        st.busy = 0b111;
        st.pending = 0b111;
        st.recompute_ready();
        assert_eq!(st.ready, 0b001);
        let (idx, _) = st.take_ready().unwrap();
        assert_eq!(idx, 0);
        // 任务 0 结束后同图像的任务 1 就绪
        st.tasks[0] = None;
        st.busy &= !1;
        st.recompute_ready();
        assert_eq!(st.ready, 0b010);
        st.frames[0].next_deblock_addr = FRAME_DONE;
        st.recompute_ready();
        assert_eq!(st.ready, 0b110);
    }
}

//! 活跃任务登记表（供 stop 终止进程使用）
//!
//! 登记表只引用进程句柄（pid），进程本身由各自的 worker 持有。
//! 条目存在 ⇔ 进程仍在运行；所有操作只在单次增删期间持锁，不跨阻塞 I/O。
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

/// 可被请求终止的进程
pub trait Terminable: Send + Sync {
    fn pid(&self) -> u32;
    /// 发送终止请求（不等待退出，不升级为强杀）
    fn terminate(&self) -> io::Result<()>;
}

/// 以 pid 引用的外部进程
#[derive(Debug, Clone, Copy)]
pub struct ProcessHandle {
    pid: u32,
}

impl ProcessHandle {
    pub fn new(pid: u32) -> Self {
        Self { pid }
    }
}

impl Terminable for ProcessHandle {
    fn pid(&self) -> u32 {
        self.pid
    }

    #[cfg(unix)]
    fn terminate(&self) -> io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        kill(Pid::from_raw(self.pid as i32), Signal::SIGTERM).map_err(io::Error::from)
    }

    #[cfg(not(unix))]
    fn terminate(&self) -> io::Result<()> {
        std::process::Command::new("taskkill")
            .args(["/PID", &self.pid.to_string()])
            .status()
            .map(|_| ())
    }
}

#[derive(Default)]
struct Inner {
    jobs: BTreeMap<usize, Arc<dyn Terminable>>,
    /// 实际收到过终止请求的任务
    signalled: BTreeSet<usize>,
    cancelled: bool,
}

/// 活跃任务登记表（按 job id 排序）
#[derive(Default)]
pub struct ActiveJobs {
    inner: Mutex<Inner>,
}

impl ActiveJobs {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 登记进程。若本轮已被取消，立即发送终止请求且不登记；返回是否已登记
    pub fn register(&self, job_id: usize, handle: Arc<dyn Terminable>) -> bool {
        let mut inner = self.lock();
        if inner.cancelled {
            debug!(job_id, pid = handle.pid(), "registered after stop, terminating");
            send_terminate(job_id, handle.as_ref());
            inner.signalled.insert(job_id);
            return false;
        }
        inner.jobs.insert(job_id, handle);
        true
    }

    pub fn deregister(&self, job_id: usize) -> Option<Arc<dyn Terminable>> {
        self.lock().jobs.remove(&job_id)
    }

    /// 在锁内向所有已登记进程发送终止请求，然后清空登记表；返回被请求终止的数量
    pub fn terminate_all(&self) -> usize {
        let mut inner = self.lock();
        inner.cancelled = true;
        let jobs = std::mem::take(&mut inner.jobs);
        for (job_id, handle) in &jobs {
            send_terminate(*job_id, handle.as_ref());
        }
        inner.signalled.extend(jobs.keys().copied());
        jobs.len()
    }

    /// 该任务的进程是否被 stop 请求过终止（已自行退出的进程不算）
    pub fn was_signalled(&self, job_id: usize) -> bool {
        self.lock().signalled.contains(&job_id)
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn job_ids(&self) -> Vec<usize> {
        self.lock().jobs.keys().copied().collect()
    }
}

fn send_terminate(job_id: usize, handle: &dyn Terminable) {
    if let Err(e) = handle.terminate() {
        // 进程可能已自行退出
        warn!(job_id, pid = handle.pid(), error = %e, "termination request failed");
    }
}

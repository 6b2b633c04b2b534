//! 扫描会话：生成候选 → 分块 → 并发启动 worker；提供 stop/wait 与事件流
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, warn};

use crate::error::ScanError;
use crate::names::expand;
use crate::options::{JobStatus, RunSummary, ScanOptions, ScanRequest, SessionStatus};
use crate::partition::partition;
use crate::proxy::ProxyPool;
use crate::registry::ActiveJobs;
use crate::results::{ResultLine, ResultLog};
use crate::worker::{ScanWorker, WorkerContext};

/// 推送给实时视图的事件
#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// 简短状态信息（包括错误）
    Status(String),
    Line { chunk_id: usize, line: ResultLine },
    WorkerFinished { chunk_id: usize, status: JobStatus },
    SessionFinished(SessionStatus),
}

/// 事件出口：至多一个订阅者；无人订阅或订阅者已断开时事件直接丢弃，会话本身不缓存事件
#[derive(Clone, Default)]
pub(crate) struct EventSink {
    subscriber: Arc<Mutex<Option<Sender<ScanEvent>>>>,
}

impl EventSink {
    fn lock(&self) -> MutexGuard<'_, Option<Sender<ScanEvent>>> {
        self.subscriber.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 新订阅替换旧订阅（旧接收端随之断开）
    pub(crate) fn subscribe(&self) -> Receiver<ScanEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        *self.lock() = Some(tx);
        rx
    }

    pub(crate) fn send(&self, event: ScanEvent) {
        let mut subscriber = self.lock();
        if let Some(tx) = subscriber.as_ref() {
            if tx.send(event).is_err() {
                debug!("event receiver dropped, detaching");
                *subscriber = None;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn is_subscribed(&self) -> bool {
        self.lock().is_some()
    }
}

#[derive(Debug)]
struct Progress {
    status: SessionStatus,
    completed: usize,
    failed: usize,
    terminated: usize,
    settled: usize,
}

/// 单次 start 的运行状态；各 worker 持有 Arc 引用
pub(crate) struct RunState {
    total: usize,
    pub(crate) registry: ActiveJobs,
    progress: Mutex<Progress>,
    all_settled: Condvar,
}

impl RunState {
    pub(crate) fn new(total: usize) -> Self {
        Self {
            total,
            registry: ActiveJobs::new(),
            progress: Mutex::new(Progress {
                status: SessionStatus::Running,
                completed: 0,
                failed: 0,
                terminated: 0,
                settled: 0,
            }),
            all_settled: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.registry.is_cancelled()
    }

    pub(crate) fn status(&self) -> SessionStatus {
        self.lock().status
    }

    /// 记录一个 worker 结束；若会话因此进入终态则返回新状态
    pub(crate) fn settle(&self, job: JobStatus) -> Option<SessionStatus> {
        let mut p = self.lock();
        match job {
            JobStatus::Completed => p.completed += 1,
            JobStatus::Terminated => p.terminated += 1,
            _ => p.failed += 1,
        }
        p.settled += 1;

        let mut finished = None;
        if p.status == SessionStatus::Running {
            if p.completed == self.total {
                p.status = SessionStatus::Completed;
                finished = Some(SessionStatus::Completed);
            } else if p.settled == self.total {
                p.status = SessionStatus::Failed;
                finished = Some(SessionStatus::Failed);
            }
        }
        if p.settled >= self.total {
            self.all_settled.notify_all();
        }
        finished
    }

    /// 请求终止全部已登记进程；返回 (请求终止数, 是否由 Running 转为 Stopped)
    pub(crate) fn stop(&self) -> (usize, bool) {
        let signalled = self.registry.terminate_all();
        let mut p = self.lock();
        let transitioned = p.status == SessionStatus::Running;
        if transitioned {
            p.status = SessionStatus::Stopped;
        }
        (signalled, transitioned)
    }

    pub(crate) fn wait(&self) -> RunSummary {
        let mut p = self.lock();
        while p.settled < self.total {
            p = self.all_settled.wait(p).unwrap_or_else(PoisonError::into_inner);
        }
        drop(p);
        self.summary()
    }

    pub(crate) fn summary(&self) -> RunSummary {
        let p = self.lock();
        RunSummary {
            status: Some(p.status),
            jobs_total: self.total,
            completed: p.completed,
            failed: p.failed,
            terminated: p.terminated,
            lines: 0,
        }
    }
}

/// 扫描控制器
pub struct ScanSession {
    opts: ScanOptions,
    log: Arc<ResultLog>,
    events: EventSink,
    current: Mutex<Option<Arc<RunState>>>,
    pool: Mutex<Option<rayon::ThreadPool>>,
}

impl ScanSession {
    pub fn new(opts: ScanOptions) -> Self {
        Self {
            opts,
            log: Arc::new(ResultLog::new()),
            events: EventSink::default(),
            current: Mutex::new(None),
            pool: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &ScanOptions {
        &self.opts
    }

    /// 订阅事件流；只收到订阅之后的事件，再次调用会替换之前的订阅
    pub fn events(&self) -> Receiver<ScanEvent> {
        self.events.subscribe()
    }

    pub fn results(&self) -> Arc<ResultLog> {
        Arc::clone(&self.log)
    }

    fn current(&self) -> Option<Arc<RunState>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.current().map_or(SessionStatus::Idle, |run| run.status())
    }

    /// 当前仍登记在案的任务编号
    pub fn active_jobs(&self) -> Vec<usize> {
        self.current().map(|run| run.registry.job_ids()).unwrap_or_default()
    }

    fn status_message(&self, msg: String) {
        info!("{msg}");
        self.events.send(ScanEvent::Status(msg));
    }

    /// 校验输入并启动全部 worker，立即返回启动的任务数（不阻塞）
    pub fn start(&self, req: &ScanRequest) -> Result<usize, ScanError> {
        let provider = match req.validate(&self.opts) {
            Ok(p) => p,
            Err(e) => {
                self.status_message(format!("Error: {e}"));
                return Err(e);
            }
        };
        let names = expand(&req.prefixes, &req.suffixes, &self.opts.delimiters, req.use_suffixes)?;

        let proxies = ProxyPool::load(req.proxy_file.as_deref());
        if !proxies.is_empty() {
            self.status_message(format!("Loaded {} proxies.", proxies.len()));
        }

        let chunks = partition(&names, req.threads);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(chunks.len())
            .thread_name(|i| format!("scan-worker-{i}"))
            .build()?;

        self.status_message(format!(
            "Generated {} bucket names. Starting scan with provider: {provider}...",
            names.len()
        ));

        let run = Arc::new(RunState::new(chunks.len()));
        {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(prev) = current.as_ref() {
                if prev.status() == SessionStatus::Running {
                    warn!("previous scan still running, its workers are left to finish on their own");
                }
            }
            *current = Some(Arc::clone(&run));
        }

        let ctx = Arc::new(WorkerContext {
            tool: self.opts.tool.clone(),
            tool_args: self.opts.tool_args.clone(),
            provider,
            artifact_dir: self.opts.artifact_dir(),
            proxies: Arc::new(proxies),
            run,
            log: Arc::clone(&self.log),
            events: self.events.clone(),
        });

        let jobs = chunks.len();
        info!(jobs, names = names.len(), %provider, "scan started");
        for (id, chunk) in chunks.into_iter().enumerate() {
            let worker = ScanWorker::new(id, chunk, Arc::clone(&ctx));
            pool.spawn(move || {
                worker.run();
            });
        }
        *self.pool.lock().unwrap_or_else(PoisonError::into_inner) = Some(pool);
        Ok(jobs)
    }

    /// 请求终止当前运行的全部进程；不等待退出，返回被请求终止的进程数
    pub fn stop(&self) -> usize {
        let Some(run) = self.current() else {
            self.status_message("Scan stopped.".into());
            return 0;
        };
        let (signalled, transitioned) = run.stop();
        info!(signalled, "stop requested");
        self.status_message("Scan stopped.".into());
        if transitioned {
            self.events.send(ScanEvent::SessionFinished(SessionStatus::Stopped));
        }
        signalled
    }

    /// 阻塞直到当前运行的全部 worker 结束
    pub fn wait(&self) -> RunSummary {
        match self.current() {
            Some(run) => {
                let mut summary = run.wait();
                summary.lines = self.log.len();
                summary
            }
            None => RunSummary { status: Some(SessionStatus::Idle), ..RunSummary::default() },
        }
    }

    pub fn clear_results(&self) {
        self.log.clear();
        self.status_message("Results cleared.".into());
    }

    pub fn sort_results(&self) {
        self.log.sort_by_objects();
        self.status_message("Results sorted.".into());
    }
}

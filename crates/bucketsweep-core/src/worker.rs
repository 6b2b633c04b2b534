//! 单个外部进程的完整生命周期：写输入文件 → 启动 → 流式读取 → 回收 → 清理
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;

use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

use crate::error::ScanError;
use crate::options::{JobStatus, Provider, SessionStatus};
use crate::proxy::ProxyPool;
use crate::registry::{ActiveJobs, ProcessHandle};
use crate::results::ResultLog;
use crate::session::{EventSink, RunState, ScanEvent};

/// 单个扫描任务
#[derive(Debug, Clone)]
pub struct ScanJob {
    pub id: usize,
    pub chunk: Vec<String>,
    pub proxy: Option<String>,
    pub pid: Option<u32>,
    pub status: JobStatus,
}

impl ScanJob {
    pub fn new(id: usize, chunk: Vec<String>) -> Self {
        Self { id, chunk, proxy: None, pid: None, status: JobStatus::Created }
    }
}

/// 临时输入文件：每行一个桶名，随本对象释放而删除
#[derive(Debug)]
pub struct InputArtifact {
    file: NamedTempFile,
}

impl InputArtifact {
    pub fn create(dir: &Path, chunk_id: usize, names: &[String]) -> io::Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix(&format!("buckets_{chunk_id}_"))
            .suffix(".txt")
            .tempfile_in(dir)?;
        file.write_all(names.join("\n").as_bytes())?;
        file.flush()?;
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// 显式删除（失败时返回错误）；未调用时由 Drop 兜底
    pub fn remove(self) -> io::Result<()> {
        self.file.close()
    }
}

/// 所有 worker 共享的只读上下文
pub(crate) struct WorkerContext {
    pub(crate) tool: PathBuf,
    pub(crate) tool_args: Vec<String>,
    pub(crate) provider: Provider,
    pub(crate) artifact_dir: PathBuf,
    pub(crate) proxies: Arc<ProxyPool>,
    pub(crate) run: Arc<RunState>,
    pub(crate) log: Arc<ResultLog>,
    pub(crate) events: EventSink,
}

/// 组装外部工具命令行：`<tool> [tool_args..] -bucket-file <path> -enumerate -provider <id>`
/// 有代理时同时设置 HTTP_PROXY 与 HTTPS_PROXY（仅作用于本进程）
pub(crate) fn scanner_command(
    tool: &Path,
    tool_args: &[String],
    artifact: &Path,
    provider: Provider,
    proxy: Option<&str>,
) -> Command {
    let mut cmd = Command::new(tool);
    cmd.args(tool_args)
        .arg("-bucket-file")
        .arg(artifact)
        .arg("-enumerate")
        .arg("-provider")
        .arg(provider.as_str())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(proxy) = proxy {
        cmd.env("HTTP_PROXY", proxy).env("HTTPS_PROXY", proxy);
    }
    cmd
}

pub(crate) struct ScanWorker {
    job: ScanJob,
    ctx: Arc<WorkerContext>,
}

impl ScanWorker {
    pub(crate) fn new(id: usize, chunk: Vec<String>, ctx: Arc<WorkerContext>) -> Self {
        Self { job: ScanJob::new(id, chunk), ctx }
    }

    /// 运行到结束（正常完成、被终止或失败），并向会话登记结果
    pub(crate) fn run(mut self) -> ScanJob {
        let id = self.job.id;
        self.job.status = match self.supervise() {
            Ok(status) => status,
            Err(e) => {
                error!(chunk_id = id, error = %e, "worker failed");
                self.ctx
                    .events
                    .send(ScanEvent::Status(format!("Error running scanner in worker {id}: {e}")));
                JobStatus::Failed
            }
        };

        self.ctx.events.send(ScanEvent::WorkerFinished { chunk_id: id, status: self.job.status });
        if let Some(finished) = self.ctx.run.settle(self.job.status) {
            self.ctx.announce_finished(finished);
        }
        self.job
    }

    fn supervise(&mut self) -> Result<JobStatus, ScanError> {
        let id = self.job.id;
        let ctx = Arc::clone(&self.ctx);
        if ctx.run.is_cancelled() {
            debug!(chunk_id = id, "run already stopped, not launching");
            return Ok(JobStatus::Terminated);
        }

        let artifact = InputArtifact::create(&ctx.artifact_dir, id, &self.job.chunk)
            .map_err(|source| ScanError::Artifact { chunk_id: id, source })?;
        let result = self.run_process(&ctx, &artifact);
        let path = artifact.path().to_path_buf();
        if let Err(e) = artifact.remove() {
            warn!(chunk_id = id, path = %path.display(), error = %e, "failed to remove bucket list");
        }
        result
    }

    fn run_process(&mut self, ctx: &WorkerContext, artifact: &InputArtifact) -> Result<JobStatus, ScanError> {
        let id = self.job.id;
        self.job.proxy = ctx.proxies.draw().map(str::to_string);

        let mut cmd = scanner_command(&ctx.tool, &ctx.tool_args, artifact.path(), ctx.provider, self.job.proxy.as_deref());
        let mut child = cmd.spawn().map_err(|source| ScanError::Spawn {
            chunk_id: id,
            tool: ctx.tool.display().to_string(),
            source,
        })?;
        let pid = child.id();
        self.job.pid = Some(pid);
        self.job.status = JobStatus::Running;
        info!(chunk_id = id, pid, names = self.job.chunk.len(), proxy = ?self.job.proxy, "scanner started");

        ctx.run.registry.register(id, Arc::new(ProcessHandle::new(pid)));

        let stderr = child.stderr.take().map(|s| drain_stderr(id, s));
        let streamed = match child.stdout.take() {
            Some(stdout) => self.stream_stdout(ctx, stdout),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdout not captured")),
        };

        let lines = match streamed {
            Ok(lines) => lines,
            Err(source) => {
                ctx.run.registry.deregister(id);
                return Err(ScanError::Stream { chunk_id: id, source });
            }
        };

        // stdout 关闭不代表进程结束：进程退出前登记项一直保留，stop 仍可终止它
        let exit = reap_and_deregister(&mut child, &ctx.run.registry, id)
            .map_err(|source| ScanError::Stream { chunk_id: id, source })?;
        if let Some(handle) = stderr {
            let _ = handle.join();
        }

        let status = if ctx.run.registry.was_signalled(id) { JobStatus::Terminated } else { JobStatus::Completed };
        info!(chunk_id = id, pid, lines, exit = ?exit.code(), ?status, "scanner exited");
        Ok(status)
    }

    /// 逐行读取 stdout 并立即转发（非空行）
    fn stream_stdout(&self, ctx: &WorkerContext, stdout: ChildStdout) -> io::Result<usize> {
        let mut forwarded = 0;
        for line in BufReader::new(stdout).lines() {
            let line = line?;
            if let Some(line) = ctx.log.append(&line) {
                forwarded += 1;
                ctx.events.send(ScanEvent::Line { chunk_id: self.job.id, line });
            }
        }
        Ok(forwarded)
    }
}

impl WorkerContext {
    pub(crate) fn announce_finished(&self, status: SessionStatus) {
        if status == SessionStatus::Completed {
            self.events.send(ScanEvent::Status("Scan complete.".into()));
        }
        self.events.send(ScanEvent::SessionFinished(status));
    }
}

/// 等待进程退出、注销、再回收。
/// 注销先于回收：僵尸进程占着 pid，并发的 stop 不会误伤被复用的 pid
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
fn reap_and_deregister(child: &mut Child, registry: &ActiveJobs, job_id: usize) -> io::Result<ExitStatus> {
    use nix::errno::Errno;
    use nix::sys::wait::{waitid, Id, WaitPidFlag};
    use nix::unistd::Pid;

    let pid = Pid::from_raw(child.id() as i32);
    loop {
        match waitid(Id::Pid(pid), WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT) {
            Ok(_) => break,
            Err(Errno::EINTR) => continue,
            Err(e) => {
                warn!(job_id, %pid, error = %e, "waitid failed, reaping directly");
                break;
            }
        }
    }
    registry.deregister(job_id);
    child.wait()
}

/// 无法只等待不回收的平台：回收后立即注销
#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
fn reap_and_deregister(child: &mut Child, registry: &ActiveJobs, job_id: usize) -> io::Result<ExitStatus> {
    let exit = child.wait();
    registry.deregister(job_id);
    exit
}

/// stderr 只记录到日志，不进入结果
fn drain_stderr(chunk_id: usize, stderr: ChildStderr) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for line in BufReader::new(stderr).lines().map_while(Result::ok) {
            if !line.trim().is_empty() {
                debug!(chunk_id, stderr = %line, "scanner stderr");
            }
        }
    })
}

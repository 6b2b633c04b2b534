//! 以桩脚本代替外部枚举工具，验证会话的完整生命周期
#![cfg(unix)]

use std::path::PathBuf;
use std::time::{Duration, Instant};

use bucketsweep_core::{
    expand, JobStatus, Provider, ScanEvent, ScanOptions, ScanRequest, ScanSession, SessionStatus,
};
use crossbeam_channel::Receiver;
use tempfile::TempDir;

/// 参数：$1=-bucket-file $2=<path> $3=-enumerate $4=-provider $5=<provider>
const ECHO_STUB: &str = r#"
echo "artifact $2"
while IFS= read -r name || [ -n "$name" ]; do
  echo "$name | exists | 3 objects | $5"
done < "$2"
echo ""
echo "proxy ${HTTP_PROXY:-none} ${HTTPS_PROXY:-none}"
echo "stub diagnostics" >&2
"#;

const FAILING_STUB: &str = r#"
echo "artifact $2"
echo "boom" >&2
exit 3
"#;

const SLOW_STUB: &str = r#"
echo "artifact $2"
exec sleep 30
"#;

/// 输出一行后关闭 stdout，但进程继续运行
const SILENT_SLEEPER_STUB: &str = r#"
echo "artifact $2"
exec >&-
exec sleep 30
"#;

struct Fixture {
    dir: TempDir,
    artifacts: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = dir.path().join("artifacts");
        std::fs::create_dir(&artifacts).unwrap();
        Self { dir, artifacts }
    }

    /// 以 /bin/sh 运行桩脚本，避免直接执行刚写入的文件
    fn session(&self, script: &str) -> ScanSession {
        let path = self.dir.path().join("stub.sh");
        std::fs::write(&path, script).unwrap();
        ScanSession::new(ScanOptions {
            tool: PathBuf::from("/bin/sh"),
            tool_args: vec![path.display().to_string()],
            artifact_dir: Some(self.artifacts.clone()),
            ..ScanOptions::default()
        })
    }

    fn leftover_artifacts(&self) -> usize {
        std::fs::read_dir(&self.artifacts).unwrap().count()
    }
}

fn artifact_paths(session: &ScanSession) -> Vec<PathBuf> {
    session
        .results()
        .snapshot()
        .iter()
        .filter_map(|l| l.raw.strip_prefix("artifact ").map(PathBuf::from))
        .collect()
}

fn drain_until_finished(rx: &Receiver<ScanEvent>) -> Vec<ScanEvent> {
    let mut events = Vec::new();
    loop {
        let ev = rx.recv_timeout(Duration::from_secs(20)).expect("session did not finish");
        let done = matches!(ev, ScanEvent::SessionFinished(_));
        events.push(ev);
        if done {
            return events;
        }
    }
}

#[test]
fn single_worker_scans_one_name_and_removes_artifact() {
    let fx = Fixture::new();
    let session = fx.session(ECHO_STUB);
    let rx = session.events();

    let req = ScanRequest::from_text("test", "", false).with_provider(Provider::Aws);
    assert_eq!(session.start(&req).unwrap(), 1);

    let events = drain_until_finished(&rx);
    assert!(matches!(events.last(), Some(ScanEvent::SessionFinished(SessionStatus::Completed))));
    let summary = session.wait();
    assert_eq!(summary.status, Some(SessionStatus::Completed));
    assert_eq!(summary.completed, 1);

    let lines = session.results().snapshot();
    let raws: Vec<&str> = lines.iter().map(|l| l.raw.as_str()).collect();
    assert!(raws.contains(&"test | exists | 3 objects | aws"));
    assert!(raws.contains(&"proxy none none"));
    assert!(!raws.iter().any(|r| r.contains("stub diagnostics")));
    assert!(!raws.iter().any(|r| r.is_empty()));

    let artifacts = artifact_paths(&session);
    assert_eq!(artifacts.len(), 1);
    assert!(artifacts[0].starts_with(&fx.artifacts));
    assert!(!artifacts[0].exists());
    assert_eq!(fx.leftover_artifacts(), 0);
    assert!(session.active_jobs().is_empty());
}

#[test]
fn nonzero_exit_still_completes_and_cleans_up() {
    let fx = Fixture::new();
    let session = fx.session(FAILING_STUB);
    let req = ScanRequest::from_text("test", "", false).with_provider(Provider::Aws);
    session.start(&req).unwrap();

    let summary = session.wait();
    assert_eq!(summary.status, Some(SessionStatus::Completed));
    assert_eq!(artifact_paths(&session).len(), 1);
    assert_eq!(fx.leftover_artifacts(), 0);
}

#[test]
fn every_candidate_is_scanned_exactly_once_across_workers() {
    let fx = Fixture::new();
    let session = fx.session(ECHO_STUB);
    let rx = session.events();
    let req = ScanRequest::from_text("acme,globex,initech", "dev,prod,backup", true)
        .with_provider(Provider::Gcp)
        .with_threads(4);
    let jobs = session.start(&req).unwrap();
    assert_eq!(jobs, 4);

    let events = drain_until_finished(&rx);
    let finished: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            ScanEvent::WorkerFinished { chunk_id, status: JobStatus::Completed } => Some(*chunk_id),
            _ => None,
        })
        .collect();
    assert_eq!(finished.len(), 4);

    let mut scanned: Vec<String> = session
        .results()
        .snapshot()
        .iter()
        .filter(|l| l.raw.ends_with("| gcp"))
        .map(|l| l.raw.split(" | ").next().unwrap().to_string())
        .collect();
    let mut expected = expand(
        &["acme".into(), "globex".into(), "initech".into()],
        &["dev".into(), "prod".into(), "backup".into()],
        &["".into(), ".".into(), "-".into()],
        true,
    )
    .unwrap();
    assert_eq!(expected.len(), 27);
    scanned.sort();
    expected.sort();
    assert_eq!(scanned, expected);
    assert_eq!(fx.leftover_artifacts(), 0);
}

#[test]
fn proxy_is_exported_to_the_tool() {
    let fx = Fixture::new();
    let proxies = fx.dir.path().join("proxies.txt");
    std::fs::write(&proxies, "\n10.0.0.1:8080\n\n").unwrap();
    let session = fx.session(ECHO_STUB);
    let rx = session.events();
    let req = ScanRequest::from_text("test", "", false)
        .with_provider(Provider::Aws)
        .with_proxy_file(&proxies);
    session.start(&req).unwrap();
    let events = drain_until_finished(&rx);

    assert!(events
        .iter()
        .any(|e| matches!(e, ScanEvent::Status(m) if m == "Loaded 1 proxies.")));
    let raws = session.results().to_text();
    assert!(raws.contains("proxy http://10.0.0.1:8080 http://10.0.0.1:8080"));
}

#[test]
fn missing_tool_fails_only_the_affected_workers() {
    let fx = Fixture::new();
    let session = ScanSession::new(ScanOptions {
        tool: fx.dir.path().join("no-such-scanner"),
        artifact_dir: Some(fx.artifacts.clone()),
        ..ScanOptions::default()
    });
    let rx = session.events();
    let req = ScanRequest::from_text("a,b", "", false).with_provider(Provider::Linode).with_threads(2);
    session.start(&req).unwrap();

    let events = drain_until_finished(&rx);
    assert!(matches!(events.last(), Some(ScanEvent::SessionFinished(SessionStatus::Failed))));
    let errors = events
        .iter()
        .filter(|e| matches!(e, ScanEvent::Status(m) if m.starts_with("Error running scanner in worker")))
        .count();
    assert_eq!(errors, 2);
    assert_eq!(session.wait().failed, 2);
    assert_eq!(fx.leftover_artifacts(), 0);
}

#[test]
fn stop_terminates_running_scanners() {
    let fx = Fixture::new();
    let session = fx.session(SLOW_STUB);
    let rx = session.events();
    let req = ScanRequest::from_text("a,b", "", false).with_provider(Provider::Aws).with_threads(2);
    session.start(&req).unwrap();

    // 等两个进程都已输出（即已启动并登记）
    let mut started = 0;
    while started < 2 {
        match rx.recv_timeout(Duration::from_secs(20)).expect("scanners did not start") {
            ScanEvent::Line { line, .. } if line.raw.starts_with("artifact ") => started += 1,
            _ => {}
        }
    }
    wait_for(|| session.active_jobs().len() == 2);

    assert_eq!(session.stop(), 2);
    assert!(session.active_jobs().is_empty());
    assert_eq!(session.status(), SessionStatus::Stopped);

    let summary = session.wait();
    assert_eq!(summary.status, Some(SessionStatus::Stopped));
    assert_eq!(summary.terminated, 2);
    assert_eq!(summary.completed, 0);
    assert_eq!(fx.leftover_artifacts(), 0);
    assert_eq!(session.stop(), 0);
}

#[test]
fn sort_and_clear_act_on_accumulated_results() {
    let fx = Fixture::new();
    let script = r#"
echo "small | 2 objects"
echo "none"
echo "big | 40 objects"
"#;
    let session = fx.session(script);
    let req = ScanRequest::from_text("x", "", false).with_provider(Provider::Scaleway);
    session.start(&req).unwrap();
    session.wait();

    // 无人订阅期间的事件不会积压
    let rx = session.events();
    assert!(rx.is_empty());

    session.sort_results();
    assert_eq!(session.results().to_text(), "big | 40 objects\nsmall | 2 objects\nnone");
    session.clear_results();
    assert!(session.results().is_empty());
    assert_eq!(rx.len(), 2);
}

#[test]
fn scanner_that_closed_stdout_stays_registered_until_it_exits() {
    let fx = Fixture::new();
    let session = fx.session(SILENT_SLEEPER_STUB);
    let rx = session.events();
    let req = ScanRequest::from_text("quiet", "", false).with_provider(Provider::Aws);
    session.start(&req).unwrap();

    loop {
        match rx.recv_timeout(Duration::from_secs(20)).expect("scanner did not start") {
            ScanEvent::Line { line, .. } if line.raw.starts_with("artifact ") => break,
            _ => {}
        }
    }
    // 给 worker 时间读到 EOF
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(session.active_jobs(), vec![0]);

    let stopped_at = Instant::now();
    assert_eq!(session.stop(), 1);
    let summary = session.wait();
    assert!(stopped_at.elapsed() < Duration::from_secs(10));
    assert_eq!(summary.status, Some(SessionStatus::Stopped));
    assert_eq!(summary.terminated, 1);
    assert_eq!(summary.completed, 0);
    assert!(session.active_jobs().is_empty());
    assert_eq!(fx.leftover_artifacts(), 0);
}

fn wait_for(cond: impl Fn() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    panic!("condition not reached");
}

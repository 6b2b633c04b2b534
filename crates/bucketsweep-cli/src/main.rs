use anyhow::{Context, Result};
use bucketsweep_core::{
    expand, load_profile, partition, rank_text, write_json, Provider, ResultLine, ScanEvent, ScanOptions,
    ScanRequest, ScanSession, SessionStatus,
};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// 命令行入口（基于 clap）
#[derive(Parser, Debug)]
#[command(name = "bucketsweep", version, about = "Concurrent bucket name enumeration driver")]
struct Cli {
    /// 配置文件路径（TOML），默认 ./bucketsweep.toml（可不存在）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 生成候选桶名并分派给外部枚举工具
    Scan {
        /// 前缀（逗号分隔）
        #[arg(long)]
        prefixes: String,

        /// 后缀（逗号分隔，仅在 --use-suffixes 时生效）
        #[arg(long)]
        suffixes: Option<String>,

        /// 启用后缀/分隔符扩展
        #[arg(long)]
        use_suffixes: bool,

        /// 服务商：aws / digitalocean / gcp / linode / scaleway / dreamhost
        #[arg(long, value_parser = ["aws", "digitalocean", "gcp", "linode", "scaleway", "dreamhost"])]
        provider: Option<String>,

        /// 代理文件（每行一个）
        #[arg(long)]
        proxy_file: Option<PathBuf>,

        /// worker 数（1-20）
        #[arg(long)]
        threads: Option<usize>,

        /// 结束后按对象数排序输出
        #[arg(long)]
        sort: bool,

        /// 结果写入 JSON 文件
        #[arg(long)]
        output: Option<PathBuf>,

        /// 只打印候选与分块，不启动外部工具
        #[arg(long)]
        dry_run: bool,
    },
    /// 对已保存的结果文本按对象数排序
    Rank {
        /// 输入文件（每行一条结果）
        #[arg(long)]
        input: PathBuf,

        /// 输出 JSON 文件；缺省时打印到标准输出
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    // 初始化日志（支持通过 RUST_LOG 控制等级，例如 info、debug）
    init_tracing();
    let cli = Cli::parse();
    let profile = load_profile(cli.config.as_deref()).context("load profile")?;

    match cli.command {
        Commands::Scan { prefixes, suffixes, use_suffixes, provider, proxy_file, threads, sort, output, dry_run } => {
            let defaults = &profile.defaults;

            // 命令行优先，其次配置文件
            let suffixes = suffixes.or_else(|| defaults.suffixes.clone()).unwrap_or_default();
            let mut req = ScanRequest::from_text(&prefixes, &suffixes, use_suffixes || defaults.use_suffixes.unwrap_or(false));
            req.provider = match provider {
                Some(p) => Some(p.parse::<Provider>()?),
                None => defaults.provider,
            };
            req.proxy_file = proxy_file.or_else(|| defaults.proxy_file.clone());
            req.threads = threads.or(defaults.threads).unwrap_or(1);

            if dry_run {
                return print_plan(&req, &profile.options);
            }

            let session = Arc::new(ScanSession::new(profile.options));
            {
                let session = Arc::clone(&session);
                ctrlc::set_handler(move || {
                    info!("Received Ctrl+C, stopping scan...");
                    session.stop();
                })
                .context("install Ctrl+C handler")?;
            }

            let events = session.events();
            let jobs = session.start(&req).context("start scan")?;
            info!(jobs, "workers launched");

            // 实时输出：结果行打印到 stdout，状态信息走日志
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            while let Ok(event) = events.recv() {
                match event {
                    ScanEvent::Line { line, .. } => {
                        if !sort {
                            writeln!(out, "{}", line.raw)?;
                        }
                    }
                    ScanEvent::Status(msg) if msg.starts_with("Error") => error!("{msg}"),
                    ScanEvent::Status(msg) => info!("{msg}"),
                    ScanEvent::WorkerFinished { chunk_id, status } => info!(chunk_id, ?status, "worker finished"),
                    ScanEvent::SessionFinished(_) => break,
                }
            }
            drop(out);

            let summary = session.wait();
            info!(
                status = ?summary.status,
                completed = summary.completed,
                failed = summary.failed,
                terminated = summary.terminated,
                lines = summary.lines,
                "scan finished"
            );

            if sort {
                session.sort_results();
            }
            let lines = session.results().snapshot();
            if sort {
                print_lines(&lines)?;
            }
            if let Some(path) = output {
                write_output(&path, &lines)?;
            }
            if summary.status == Some(SessionStatus::Failed) {
                warn!("some workers failed; results are incomplete");
            }
        }
        Commands::Rank { input, output } => {
            let txt = std::fs::read_to_string(&input).with_context(|| format!("read {}", input.display()))?;
            let ranked = rank_text(&txt);
            info!(lines = ranked.len(), "results sorted");
            match output {
                Some(path) => write_output(&path, &ranked)?,
                None => print_lines(&ranked)?,
            }
        }
    }

    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    // 日志写到 stderr，stdout 只留给结果行
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// 打印候选与分块计划（与 scan 相同的校验）
fn print_plan(req: &ScanRequest, opts: &ScanOptions) -> Result<()> {
    req.validate(opts)?;
    let names = expand(&req.prefixes, &req.suffixes, &opts.delimiters, req.use_suffixes)?;
    let chunks = partition(&names, req.threads);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "# {} candidates in {} chunk(s)", names.len(), chunks.len())?;
    for (i, chunk) in chunks.iter().enumerate() {
        writeln!(out, "# chunk {i}: {} names", chunk.len())?;
        for name in chunk {
            writeln!(out, "{name}")?;
        }
    }
    Ok(())
}

fn print_lines(lines: &[ResultLine]) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for line in lines {
        writeln!(out, "{}", line.raw)?;
    }
    Ok(())
}

fn write_output(path: &Path, lines: &[ResultLine]) -> Result<()> {
    // 以缓冲方式打开输出文件
    let mut out = BufWriter::new(File::create(path).context("create output file")?);
    write_json(&mut out, lines).context("write results")?;
    out.flush().context("flush output")?;
    info!(path = %path.display(), lines = lines.len(), "results written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dry_run_rejects_what_scan_rejects() {
        let opts = ScanOptions::default();
        let req = ScanRequest::from_text("acme", "", false).with_provider(Provider::Aws);
        assert!(print_plan(&req.clone().with_threads(0), &opts).is_err());
        assert!(print_plan(&req.clone().with_threads(21), &opts).is_err());
        assert!(print_plan(&ScanRequest::from_text("acme", "", false), &opts).is_err());
        assert!(print_plan(&req.with_threads(2), &opts).is_ok());
    }

    #[test]
    fn output_file_holds_complete_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        write_output(&path, &rank_text("a 1 objects\nb 5 objects")).unwrap();
        let txt = std::fs::read_to_string(&path).unwrap();
        assert!(txt.trim_end().ends_with(']'));
        assert!(txt.find("b 5 objects").unwrap() < txt.find("a 1 objects").unwrap());
    }

    /// 小输出全在缓冲区里，写入失败只会在 flush 时暴露
    #[cfg(target_os = "linux")]
    #[test]
    fn failed_flush_is_reported() {
        let lines = rank_text("a 1 objects");
        assert!(write_output(Path::new("/dev/full"), &lines).is_err());
    }
}

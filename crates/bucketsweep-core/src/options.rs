//! 扫描选项、请求参数与状态枚举（模块）
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ScanError;
use crate::names::parse_list;

/// 默认外部枚举工具
pub const DEFAULT_TOOL: &str = "s3scanner";
/// 工作线程数上限（与原界面滑块一致）
pub const MAX_WORKERS: usize = 20;

/// 存储服务商（外部工具 `-provider` 参数的固定取值）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Aws,
    Digitalocean,
    Gcp,
    Linode,
    Scaleway,
    Dreamhost,
}

impl Provider {
    pub const ALL: [Provider; 6] = [
        Provider::Aws,
        Provider::Digitalocean,
        Provider::Gcp,
        Provider::Linode,
        Provider::Scaleway,
        Provider::Dreamhost,
    ];

    /// 传给外部工具的标识符
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Aws => "aws",
            Provider::Digitalocean => "digitalocean",
            Provider::Gcp => "gcp",
            Provider::Linode => "linode",
            Provider::Scaleway => "scaleway",
            Provider::Dreamhost => "dreamhost",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Provider::ALL
            .iter()
            .copied()
            .find(|p| p.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ScanError::UnknownProvider(wanted.to_string()))
    }
}

/// 扫描选项（会话级，跨多次 start 复用）
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// 外部枚举工具（可执行文件名或路径）
    pub tool: PathBuf,
    /// 置于固定参数之前的额外参数（例如经由包装脚本或容器调用工具）
    pub tool_args: Vec<String>,
    /// 启用后缀扩展时使用的分隔符，顺序即枚举顺序
    pub delimiters: Vec<String>,
    /// 允许的最大工作线程数
    pub max_workers: usize,
    /// 临时输入文件所在目录；None 表示系统临时目录
    pub artifact_dir: Option<PathBuf>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            tool: PathBuf::from(DEFAULT_TOOL),
            tool_args: Vec::new(),
            delimiters: vec![String::new(), ".".to_string(), "-".to_string()],
            max_workers: MAX_WORKERS,
            artifact_dir: None,
        }
    }
}

impl ScanOptions {
    pub(crate) fn artifact_dir(&self) -> PathBuf {
        self.artifact_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// 单次扫描请求（对应界面上的输入项）
#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    pub prefixes: Vec<String>,
    pub suffixes: Vec<String>,
    /// 是否启用后缀/分隔符扩展；关闭时忽略 suffixes
    pub use_suffixes: bool,
    pub provider: Option<Provider>,
    pub proxy_file: Option<PathBuf>,
    pub threads: usize,
}

impl ScanRequest {
    /// 由逗号分隔的原始文本构造请求
    pub fn from_text(prefixes: &str, suffixes: &str, use_suffixes: bool) -> Self {
        Self {
            prefixes: parse_list(prefixes),
            suffixes: parse_list(suffixes),
            use_suffixes,
            provider: None,
            proxy_file: None,
            threads: 1,
        }
    }

    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_proxy_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.proxy_file = Some(path.into());
        self
    }

    /// 校验请求；失败时不会启动任何 worker
    pub fn validate(&self, opts: &ScanOptions) -> Result<Provider, ScanError> {
        if self.prefixes.is_empty() {
            return Err(ScanError::Validation("prefixes cannot be empty".into()));
        }
        let provider = self
            .provider
            .ok_or_else(|| ScanError::Validation("please select a provider".into()))?;
        if self.use_suffixes && self.suffixes.is_empty() {
            return Err(ScanError::Validation(
                "suffix expansion is enabled but no suffixes were given".into(),
            ));
        }
        let max = opts.max_workers.max(1);
        if self.threads == 0 || self.threads > max {
            return Err(ScanError::Validation(format!(
                "worker count must be between 1 and {max}, got {}",
                self.threads
            )));
        }
        Ok(provider)
    }
}

/// 单个任务的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobStatus {
    Created,
    Running,
    Completed,
    Terminated,
    Failed,
}

/// 会话状态
/// - Failed：所有 worker 均已结束，但并非全部正常完成，且未被 stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionStatus {
    Idle,
    Running,
    Completed,
    Stopped,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Stopped | SessionStatus::Failed)
    }
}

/// 一次运行结束后的汇总（便于 CLI 打印）
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub status: Option<SessionStatus>,
    pub jobs_total: usize,
    pub completed: usize,
    pub failed: usize,
    pub terminated: usize,
    pub lines: usize,
}

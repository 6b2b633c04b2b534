//! 错误类型
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// 扫描编排层的错误分类
/// - Validation / UnknownProvider / Pool：整个 start 请求失败，不启动 worker
/// - Spawn / Stream / Artifact：仅影响单个 worker
/// - ProxyFile：记录后按“无代理”处理，不向上传播
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("invalid scan request: {0}")]
    Validation(String),

    #[error("unknown provider `{0}`")]
    UnknownProvider(String),

    #[error("worker {chunk_id}: failed to launch `{tool}`: {source}")]
    Spawn {
        chunk_id: usize,
        tool: String,
        #[source]
        source: io::Error,
    },

    #[error("worker {chunk_id}: failed reading scanner output: {source}")]
    Stream {
        chunk_id: usize,
        #[source]
        source: io::Error,
    },

    #[error("worker {chunk_id}: failed writing bucket list: {source}")]
    Artifact {
        chunk_id: usize,
        #[source]
        source: io::Error,
    },

    #[error("cannot read proxy file {path:?}: {source}")]
    ProxyFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

impl ScanError {
    /// 出错的 worker 编号（仅 worker 级错误有）
    pub fn chunk_id(&self) -> Option<usize> {
        match self {
            ScanError::Spawn { chunk_id, .. }
            | ScanError::Stream { chunk_id, .. }
            | ScanError::Artifact { chunk_id, .. } => Some(*chunk_id),
            _ => None,
        }
    }
}

//! 代理池：从文件加载，按任务随机抽取（有放回）
use std::path::Path;

use rand::seq::IndexedRandom;
use tracing::{info, warn};

use crate::error::ScanError;

const SCHEMES: [&str; 2] = ["http://", "socks5://"];

#[derive(Debug, Clone, Default)]
pub struct ProxyPool {
    entries: Vec<String>,
}

impl ProxyPool {
    /// 从可选路径加载；文件缺失或不可读时视为“无代理”
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else { return Self::default() };
        match Self::from_file(path) {
            Ok(pool) => {
                info!(path = %path.display(), proxies = pool.len(), "proxy pool loaded");
                pool
            }
            Err(e) => {
                warn!(error = %e, "continuing without proxies");
                Self::default()
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ScanError> {
        let txt = std::fs::read_to_string(path).map_err(|source| ScanError::ProxyFile {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_entries(txt.lines()))
    }

    /// 逐行去空白、丢弃空行；无协议前缀的补 `http://`
    pub fn from_entries<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = lines
            .into_iter()
            .filter_map(|line| {
                let line = line.as_ref().trim();
                if line.is_empty() {
                    None
                } else if SCHEMES.iter().any(|s| line.starts_with(s)) {
                    Some(line.to_string())
                } else {
                    Some(format!("http://{line}"))
                }
            })
            .collect();
        Self { entries }
    }

    /// 均匀随机抽取一个代理；池为空时返回 None
    pub fn draw(&self) -> Option<&str> {
        self.entries.choose(&mut rand::rng()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }
}

//! 扫描配置文件加载（TOML）
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::options::{Provider, ScanOptions};

/// 默认配置文件路径（不存在时使用内置默认值）
pub const DEFAULT_PROFILE: &str = "./bucketsweep.toml";

/// `[scanner]` 段：外部工具与分块相关
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ScannerSection {
    tool: Option<PathBuf>,
    tool_args: Option<Vec<String>>,
    delimiters: Option<Vec<String>>,
    max_workers: Option<usize>,
    artifact_dir: Option<PathBuf>,
}

/// `[defaults]` 段：命令行未给出时使用的请求参数
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RequestDefaults {
    pub provider: Option<Provider>,
    pub threads: Option<usize>,
    pub proxy_file: Option<PathBuf>,
    pub use_suffixes: Option<bool>,
    pub suffixes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ProfileFile {
    scanner: ScannerSection,
    defaults: RequestDefaults,
}

/// 归一化后的配置
#[derive(Debug, Clone, Default)]
pub struct Profile {
    pub options: ScanOptions,
    pub defaults: RequestDefaults,
}

/// 解析 TOML 文本；未给出的项保留默认值
pub fn parse_profile(txt: &str) -> Result<Profile> {
    let parsed: ProfileFile = toml::from_str(txt)?;
    let mut options = ScanOptions::default();
    let s = parsed.scanner;
    if let Some(tool) = s.tool {
        options.tool = tool;
    }
    if let Some(args) = s.tool_args {
        options.tool_args = args;
    }
    if let Some(delimiters) = s.delimiters {
        if delimiters.is_empty() {
            anyhow::bail!("scanner.delimiters must not be empty");
        }
        options.delimiters = delimiters;
    }
    if let Some(max) = s.max_workers {
        if max == 0 {
            anyhow::bail!("scanner.max_workers must be at least 1");
        }
        options.max_workers = max;
    }
    options.artifact_dir = s.artifact_dir;
    Ok(Profile { options, defaults: parsed.defaults })
}

/// 加载配置文件
/// - 显式指定的路径必须存在
/// - 未指定时尝试默认路径，不存在则返回内置默认值
pub fn load_profile(path: Option<&Path>) -> Result<Profile> {
    let (path, required) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_PROFILE), false),
    };
    if !required && !path.exists() {
        return Ok(Profile::default());
    }
    let txt = std::fs::read_to_string(&path).with_context(|| format!("read profile {}", path.display()))?;
    parse_profile(&txt).with_context(|| format!("parse profile {}", path.display()))
}

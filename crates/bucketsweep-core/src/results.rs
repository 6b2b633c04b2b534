//! 结果汇总与排序
//!
//! 多个 worker 并发追加结果行；每次追加在锁内完成，全局顺序即到达顺序（仅保证单个 worker 内有序）。
//! 排序为按需的纯变换：按行内 “<N> objects” 的 N 降序，未匹配的行按 0 处理。
use std::num::IntErrorKind;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use regex::Regex;
use serde::Serialize;

/// 单条结果行
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultLine {
    pub raw: String,
    /// 从行内提取的对象数（若存在）
    pub objects: Option<u64>,
}

impl ResultLine {
    /// 去除首尾空白；空行返回 None
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        Some(Self { raw: raw.to_string(), objects: extract_objects(raw) })
    }

    /// 排序键：未匹配视为 0
    pub fn rank_key(&self) -> u64 {
        self.objects.unwrap_or(0)
    }
}

fn objects_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([0-9]+)\s+objects").expect("valid objects regex"))
}

/// 提取行内第一个 “<N> objects” 的 N（仅 ASCII 数字）；超出 u64 时取 u64::MAX
pub fn extract_objects(line: &str) -> Option<u64> {
    let caps = objects_regex().captures(line)?;
    let digits = caps.get(1)?.as_str();
    match digits.parse::<u64>() {
        Ok(n) => Some(n),
        Err(e) if *e.kind() == IntErrorKind::PosOverflow => Some(u64::MAX),
        Err(_) => None,
    }
}

/// 按对象数降序排序（稳定：同键保持到达顺序）
pub fn rank_lines(lines: &[ResultLine]) -> Vec<ResultLine> {
    let mut out = lines.to_vec();
    out.sort_by(|a, b| b.rank_key().cmp(&a.rank_key()));
    out
}

/// 对一段原始文本排序（逐行，空行丢弃）
pub fn rank_text(text: &str) -> Vec<ResultLine> {
    let lines: Vec<ResultLine> = text.lines().filter_map(ResultLine::parse).collect();
    rank_lines(&lines)
}

/// 只追加的结果日志（可跨线程共享）
#[derive(Debug, Default)]
pub struct ResultLog {
    lines: Mutex<Vec<ResultLine>>,
}

impl ResultLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ResultLine>> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 追加一行；空行忽略
    pub fn append(&self, raw: &str) -> Option<ResultLine> {
        let line = ResultLine::parse(raw)?;
        self.lock().push(line.clone());
        Some(line)
    }

    pub fn snapshot(&self) -> Vec<ResultLine> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// 返回排序后的副本，不修改日志
    pub fn ranked(&self) -> Vec<ResultLine> {
        rank_lines(&self.snapshot())
    }

    /// 以排序结果替换日志内容
    pub fn sort_by_objects(&self) {
        let mut guard = self.lock();
        let sorted = rank_lines(&guard);
        *guard = sorted;
    }

    /// 以换行拼接的文本形式导出
    pub fn to_text(&self) -> String {
        self.lock().iter().map(|l| l.raw.as_str()).collect::<Vec<_>>().join("\n")
    }
}

//! 公共类型（对外暴露）
use serde::Serialize;

use crate::results::ResultLine;

/// 输出项结构（对应结果 JSON 的单个元素）
#[derive(Debug, Clone, Serialize)]
pub struct OutputItem<'a> {
    pub line: &'a str,
    pub objects: Option<u64>,
}

impl<'a> From<&'a ResultLine> for OutputItem<'a> {
    fn from(line: &'a ResultLine) -> Self {
        Self { line: &line.raw, objects: line.objects }
    }
}

/// 将结果行以 JSON 数组写出
pub fn write_json(out: &mut dyn std::io::Write, lines: &[ResultLine]) -> serde_json::Result<()> {
    let items: Vec<OutputItem<'_>> = lines.iter().map(OutputItem::from).collect();
    serde_json::to_writer_pretty(out, &items)
}

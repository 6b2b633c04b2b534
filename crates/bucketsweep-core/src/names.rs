//! 候选桶名生成
use crate::error::ScanError;

/// 解析逗号分隔的输入：逐项去空白，丢弃空项
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// 生成 `prefix + delimiter + suffix` 的全组合
/// - 嵌套顺序：prefix → suffix → delimiter，各层保持输入顺序
/// - 不去重：重复输入会产生重复候选
pub fn generate_candidates(
    prefixes: &[String],
    suffixes: &[String],
    delimiters: &[String],
) -> Result<Vec<String>, ScanError> {
    if prefixes.is_empty() {
        return Err(ScanError::Validation("prefixes cannot be empty".into()));
    }
    let mut out = Vec::with_capacity(prefixes.len() * suffixes.len() * delimiters.len());
    for prefix in prefixes {
        for suffix in suffixes {
            for delimiter in delimiters {
                out.push(format!("{prefix}{delimiter}{suffix}"));
            }
        }
    }
    Ok(out)
}

/// 按开关展开候选：关闭后缀扩展时等价于 suffixes=[""]、delimiters=[""]
pub fn expand(
    prefixes: &[String],
    suffixes: &[String],
    delimiters: &[String],
    use_suffixes: bool,
) -> Result<Vec<String>, ScanError> {
    if use_suffixes {
        generate_candidates(prefixes, suffixes, delimiters)
    } else {
        let empty = [String::new()];
        generate_candidates(prefixes, &empty, &empty)
    }
}

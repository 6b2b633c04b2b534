//! 候选列表分块（每个 worker 一块）

/// 计算分块大小：max(1, ceil(N / T))
pub fn chunk_size(total: usize, workers: usize) -> usize {
    total.div_ceil(workers.max(1)).max(1)
}

/// 将候选列表切成连续的块
/// - 块数 ≤ workers；N < T 时块数 = N，多出的 worker 不启动
/// - 最后一块可能更短；按顺序拼接可还原原列表
pub fn partition(names: &[String], workers: usize) -> Vec<Vec<String>> {
    if names.is_empty() {
        return Vec::new();
    }
    names
        .chunks(chunk_size(names.len(), workers))
        .map(<[String]>::to_vec)
        .collect()
}

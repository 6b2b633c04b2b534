//! 存储桶枚举的扫描编排层
//!
//! 设计要点：
//! - 由前缀/后缀/分隔符生成候选桶名，按 worker 数切成连续分块。
//! - 每个分块由独立线程驱动一个外部枚举进程（可选随机代理），stdout 逐行流式汇总。
//! - 活跃进程登记表与完成计数各自加锁，锁只覆盖单次增删/比较，不跨阻塞 I/O。
//! - stop 为协作式、尽力而为：只发送终止请求，不等待、不强杀。
//! - 结果排序是对汇总日志的纯变换（按 “<N> objects” 降序）。

mod config;
mod error;
mod names;
mod options;
mod partition;
mod proxy;
mod registry;
mod results;
mod session;
mod types;
mod worker;

pub use config::{load_profile, parse_profile, Profile, RequestDefaults, DEFAULT_PROFILE};
pub use error::ScanError;
pub use names::{expand, generate_candidates, parse_list};
pub use options::{
    JobStatus, Provider, RunSummary, ScanOptions, ScanRequest, SessionStatus, DEFAULT_TOOL, MAX_WORKERS,
};
pub use partition::{chunk_size, partition};
pub use proxy::ProxyPool;
pub use registry::{ActiveJobs, ProcessHandle, Terminable};
pub use results::{extract_objects, rank_lines, rank_text, ResultLine, ResultLog};
pub use session::{ScanEvent, ScanSession};
pub use types::{write_json, OutputItem};
pub use worker::{InputArtifact, ScanJob};

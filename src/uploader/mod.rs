// 上传引擎模块
//
// 任务流水线：
// 切分 (chunk) -> 双指纹 (fingerprint) -> 注册 (registry) -> 分组传输 (scheduler)
// 传输经由注入的 transport 接口，便于测试与策略叠加

pub mod chunk;
pub mod fingerprint;
pub mod job;
pub mod registry;
pub mod scheduler;
pub mod transport;

pub use chunk::{split_chunks, FileChunk, DEFAULT_CHUNK_SIZE, SAMPLE_SPAN};
pub use fingerprint::{FileFingerprint, FingerprintEngine};
pub use job::{UploadJob, UploadJobStatus, UploadOptions, DEFAULT_MAX_CONCURRENCY};
pub use registry::{JobRegistry, RegisterOutcome};
pub use scheduler::{make_groups, GroupScheduler, DEFAULT_GROUP_TIMEOUT_SECS};
pub use transport::{ChunkPayload, ChunkTransport, HttpChunkTransport};

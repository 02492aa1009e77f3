pub mod flusher;
pub mod log_buffer;
pub mod models;
pub mod pipeline;
pub mod reporter;
pub mod runner;
pub mod sampler;

pub use flusher::{FlushSummary, Flusher, FlusherHandle};
pub use log_buffer::LogBuffer;
pub use models::{
    DiskUsageRecord, InputFile, JobPayload, JobResponse, LogEntry, LogPayload, StatusTarget,
};
pub use pipeline::{CommandHandler, JobHandler};
pub use reporter::{MemoryStatusSink, ReporterError, StatusReporter, StatusSink};
pub use runner::{read_payload, run_job};
pub use sampler::{
    ResourceSampler, SamplerHandle, SamplingConfig, parse_disk_usage, parse_memory_total,
};

//! The running message log.
//!
//! ```text
//! log() ──> RecordStore::save ──> TaskQueue ──> Timestamper ──> TSA
//!                                    │  ▲            │
//!                                    │  └── result ──┘
//!                                    └──> maintenance: LogArchiver, LogCleaner
//! ```
//!
//! [`LogManager`] wires the pieces together. The task queue is the only
//! component attaching timestamps; archiving and cleaning run one at a time on
//! the maintenance worker.

mod archiver;
mod breaker;
mod cleaner;
pub mod config;
mod maintenance;
mod manager;
mod memory_store;
mod scheduler;
mod store;
mod task_queue;
mod timestamper;

pub use archiver::{ArchiveSummary, LogArchiver};
pub use breaker::{BreakerStatus, FailureBreaker};
pub use cleaner::LogCleaner;
pub use config::{HaltPolicy, LogConfig};
pub use manager::{LogComponents, LogManager, LogStatus};
pub use memory_store::MemoryRecordStore;
pub use store::{RecordStore, Task};
pub use timestamper::{TimestampSucceeded, Timestamper, TsaStatus, TsaStatusRegistry};

//! Crawl orchestration.
//!
//! The engine owns the control loop: it gates runs on the weekly
//! schedule, walks the file tree through a [`FileProvider`], tags each
//! asset with access rights resolved through a [`DirectoryService`],
//! short-circuits unchanged items against the dedup cache, and drives
//! uploads through the client crate. One worker performs the entire
//! crawl-and-wait cycle; a shared stop flag is observed at cooperative
//! checkpoints between files, between directories, and inside every wait
//! and retry sleep.

mod error;
pub mod mime;
pub mod orchestrator;
pub mod resolver;
pub mod schedule;
pub mod walker;

pub use error::{EngineError, EngineResult};
pub use mime::{file_extension, MimePolicy, StandardMimePolicy};
pub use orchestrator::{CrawlOrchestrator, CrawlState, OrchestratorConfig};
pub use resolver::{
    convert_acls, resolve_groups, well_known_groups, AceAccess, AceType, AccessControlEntry,
    DirectoryGroup, DirectoryService, DirectoryUser,
};
pub use walker::{FileEntry, FileProvider, LocalFileProvider};

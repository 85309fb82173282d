// Legislature Scraper - Core Library
// Fetch → parse → reconcile → export pipeline for legislative bills and members

pub mod config;
pub mod error;
pub mod model;
pub mod text;
pub mod fetcher;
pub mod parser;
pub mod reconciliation;
pub mod db;
pub mod batch;
pub mod export;

// Re-export commonly used types
pub use config::{init_tracing, Config};
pub use error::{FetchError, FailureKind, ItemError, ParseError, RunAborted, StorageError};
pub use model::{
    BillKey, BillRecord, BillType, BillVersion, CommitteeAssignment, CommitteeReport,
    MeasureRef, MemberRecord, MemberTerm, StatusUpdate, Target,
};
pub use fetcher::{
    HttpFetcher, PageFetcher, RateLimiter, RetryMachine, RetryPolicy, SourceSite, FetchState,
};
pub use parser::{get_parser, parse, PageKind, PageParser, ParsedRecord};
pub use reconciliation::{merge_status_history, StatusMerge, StoredStatus};
pub use db::{
    BillRow, Event, MemberRow, RecentStatus, Repository, Snapshot, TableCounts, UpsertOutcome,
};
pub use batch::{
    read_failures_csv, Checkpoint, ItemOutcome, Orchestrator, RunOptions, RunReport, Selector,
    StopSignal, WorkItem, WorkPlan,
};
pub use export::{ExportSet, Exporter};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

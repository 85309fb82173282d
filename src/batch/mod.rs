// 🚜 Batch Orchestrator - Drive fetch → parse → upsert across a range of targets
//
// The only component with a notion of "run". Per-item errors land in the
// run report; only losing the store aborts.

mod plan;
mod report;

pub use plan::{
    limited_sample, Checkpoint, LaneProgress, Selector, WorkItem, WorkPlan, BILL_LANE_MISS_LIMIT,
    MAX_BILL_NUMBER, MAX_MEMBER_ID,
};
pub use report::{read_failures_csv, FailedItem, ItemOutcome, RunReport};

use crate::config::Config;
use crate::db::Repository;
use crate::error::{ItemError, RunAborted, StorageError};
use crate::fetcher::{PageFetcher, SourceSite};
use crate::model::{BillType, Target};
use crate::parser::{self, PageKind, ParsedRecord};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

// ============================================================================
// OPTIONS
// ============================================================================

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Items in flight at once. The fetcher's rate gate still bounds the request rate.
    pub concurrency: usize,

    /// Name under which checkpoints are kept. None = no checkpointing.
    pub run_name: Option<String>,

    /// Pick up from the saved checkpoint for `run_name`
    pub resume: bool,

    pub progress_every: usize,
    pub checkpoint_every: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            concurrency: 2,
            run_name: None,
            resume: false,
            progress_every: 50,
            checkpoint_every: 50,
        }
    }
}

impl RunOptions {
    pub fn from_config(config: &Config) -> Self {
        RunOptions {
            concurrency: config.concurrency,
            ..RunOptions::default()
        }
    }

    /// Checkpoint under `name` and resume from it if one exists
    pub fn resumable(mut self, name: impl Into<String>) -> Self {
        self.run_name = Some(name.into());
        self.resume = true;
        self
    }
}

// ============================================================================
// STOP SIGNAL
// ============================================================================

/// Cooperative stop: no new items are issued, in-flight items finish and persist
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

pub struct Orchestrator {
    fetcher: Arc<dyn PageFetcher>,
    repo: Arc<Repository>,
    site: Arc<SourceSite>,
    stop: StopSignal,
}

impl Orchestrator {
    pub fn new(fetcher: Arc<dyn PageFetcher>, repo: Arc<Repository>, site: SourceSite) -> Self {
        Orchestrator {
            fetcher,
            repo,
            site: Arc::new(site),
            stop: StopSignal::default(),
        }
    }

    /// Handle for stopping the run from elsewhere (e.g. a ctrl-c handler)
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub async fn run_full(&self, year: i32, options: &RunOptions) -> Result<RunReport, RunAborted> {
        self.run_historical(year, year, options).await
    }

    /// Full scrape of every year in `first_year..=last_year`, bills first
    pub async fn run_historical(
        &self,
        first_year: i32,
        last_year: i32,
        options: &RunOptions,
    ) -> Result<RunReport, RunAborted> {
        self.run(Selector::FullYears { first_year, last_year }, options).await
    }

    /// Refresh the previous and the current session
    pub async fn run_recent(&self, current_year: i32, options: &RunOptions) -> Result<RunReport, RunAborted> {
        self.run_historical(current_year - 1, current_year, options).await
    }

    pub async fn run_range_members(
        &self,
        first: i64,
        last: i64,
        years: Vec<i32>,
        options: &RunOptions,
    ) -> Result<RunReport, RunAborted> {
        self.run(Selector::MemberRange { first, last, years }, options).await
    }

    pub async fn run_range_bills(
        &self,
        first: u32,
        last: u32,
        types: Vec<BillType>,
        years: Vec<i32>,
        options: &RunOptions,
    ) -> Result<RunReport, RunAborted> {
        self.run(Selector::BillRange { first, last, types, years }, options).await
    }

    pub async fn run_targets(&self, targets: Vec<Target>, options: &RunOptions) -> Result<RunReport, RunAborted> {
        self.run(Selector::Targets { targets }, options).await
    }

    pub async fn run_limited(&self, options: &RunOptions) -> Result<RunReport, RunAborted> {
        self.run(Selector::Limited, options).await
    }

    /// Run one selector to completion (or stop, or abort)
    pub async fn run(&self, selector: Selector, options: &RunOptions) -> Result<RunReport, RunAborted> {
        let started = Instant::now();
        let mut report = RunReport::new(options.run_name.clone());

        if let Err(cause) = self.ping().await {
            return Err(abort(report, started, cause));
        }

        let mut plan = match self.initial_plan(selector, options).await {
            Ok(plan) => plan,
            Err(cause) => return Err(abort(report, started, cause)),
        };

        info!(
            run_id = %report.run_id,
            run = %plan.selector().run_name(),
            upper_bound = plan.remaining_hint(),
            concurrency = options.concurrency,
            fetcher = self.fetcher.name(),
            "Run started"
        );

        let concurrency = options.concurrency.max(1);
        let mut tasks: JoinSet<(WorkItem, Result<(), ItemError>)> = JoinSet::new();
        let mut fatal: Option<StorageError> = None;

        loop {
            while fatal.is_none() && !self.stop.is_stopped() && tasks.len() < concurrency {
                let Some(item) = plan.next_item() else { break };
                let worker = Worker {
                    fetcher: Arc::clone(&self.fetcher),
                    repo: Arc::clone(&self.repo),
                    site: Arc::clone(&self.site),
                };
                tasks.spawn(async move {
                    // Inner task so a panic comes back as this item's failure
                    let result = match tokio::spawn(async move { worker.process(item.target).await }).await {
                        Ok(result) => result,
                        Err(e) => Err(ItemError::Crashed(e.to_string())),
                    };
                    (item, result)
                });
            }

            let Some(joined) = tasks.join_next().await else { break };
            let (item, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    // The item stays in flight in the plan, so a resume re-issues it
                    error!(error = %e, "Work item task lost");
                    continue;
                }
            };

            let outcome = match &result {
                Ok(()) => ItemOutcome::Success,
                Err(e) => ItemOutcome::from_error(e),
            };

            if let Err(ItemError::Storage(cause)) = result {
                if fatal.is_none() {
                    fatal = self.escalate(cause).await;
                }
            }

            match &outcome {
                ItemOutcome::Success => debug!(item = %item.target, "Stored"),
                ItemOutcome::NotFound => debug!(item = %item.target, "Not found"),
                ItemOutcome::ParseError { message } => {
                    warn!(item = %item.target, error = %message, "Parse error")
                }
                ItemOutcome::Failed { kind, message } => {
                    warn!(item = %item.target, kind = kind.as_str(), error = %message, "Item failed")
                }
            }

            plan.complete(&item, outcome.found());
            report.record(item.target, &outcome);

            if options.progress_every > 0 && report.attempted % options.progress_every == 0 {
                info!(
                    attempted = report.attempted,
                    succeeded = report.succeeded,
                    last = %item.target,
                    "Progress"
                );
            }

            if fatal.is_none()
                && options.checkpoint_every > 0
                && report.attempted % options.checkpoint_every == 0
            {
                if let Err(cause) = self.save_checkpoint(&plan, options).await {
                    fatal = self.escalate(cause).await;
                }
            }
        }

        if let Some(cause) = fatal {
            error!(run_id = %report.run_id, error = %cause, "Run aborted: storage lost");
            return Err(abort(report, started, cause));
        }

        report.stopped_early = self.stop.is_stopped() && plan.remaining_hint() > 0;
        report.elapsed = started.elapsed();

        if let Err(cause) = self.save_checkpoint(&plan, options).await {
            if let Some(cause) = self.escalate(cause).await {
                return Err(abort(report, started, cause));
            }
        }

        let repo = Arc::clone(&self.repo);
        let finished = report.clone();
        let recorded = blocking(move || {
            repo.record_run(&finished.run_id, finished.run_name.as_deref(), &finished)
        })
        .await;
        if let Err(e) = recorded {
            warn!(run_id = %report.run_id, error = %e, "Could not record run report");
        }

        info!(run_id = %report.run_id, stopped_early = report.stopped_early, "{}", report.summary());
        Ok(report)
    }

    async fn initial_plan(&self, selector: Selector, options: &RunOptions) -> Result<WorkPlan, StorageError> {
        let Some(name) = options.run_name.clone().filter(|_| options.resume) else {
            return Ok(WorkPlan::new(selector));
        };

        let repo = Arc::clone(&self.repo);
        let lookup = name.clone();
        match blocking(move || repo.load_checkpoint::<Checkpoint>(&lookup)).await? {
            Some(checkpoint) => {
                info!(run = %name, "Resuming from checkpoint");
                Ok(WorkPlan::resume(selector, &checkpoint))
            }
            None => Ok(WorkPlan::new(selector)),
        }
    }

    async fn save_checkpoint(&self, plan: &WorkPlan, options: &RunOptions) -> Result<(), StorageError> {
        let Some(name) = options.run_name.clone() else {
            return Ok(());
        };
        let repo = Arc::clone(&self.repo);
        let checkpoint = plan.checkpoint();
        blocking(move || repo.save_checkpoint(&name, &checkpoint)).await
    }

    async fn ping(&self) -> Result<(), StorageError> {
        let repo = Arc::clone(&self.repo);
        blocking(move || repo.ping()).await
    }

    /// Decide whether a storage failure ends the run. A single failed
    /// transaction is survivable as long as the store still answers.
    async fn escalate(&self, cause: StorageError) -> Option<StorageError> {
        if cause.is_fatal() {
            return Some(cause);
        }
        match self.ping().await {
            Ok(()) => None,
            Err(unreachable) => Some(unreachable),
        }
    }
}

/// Repository calls hold a blocking lock; keep them off the async workers
async fn blocking<T, F>(f: F) -> Result<T, StorageError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Unavailable(format!("storage task failed: {}", e)))?
}

fn abort(mut report: RunReport, started: Instant, cause: StorageError) -> RunAborted {
    report.elapsed = started.elapsed();
    RunAborted {
        report: Box::new(report),
        cause,
    }
}

// ============================================================================
// WORKER
// ============================================================================

struct Worker {
    fetcher: Arc<dyn PageFetcher>,
    repo: Arc<Repository>,
    site: Arc<SourceSite>,
}

impl Worker {
    async fn process(&self, target: Target) -> Result<(), ItemError> {
        let url = self.site.target_url(&target);
        let body = self.fetcher.fetch(&url).await?;

        // Parsing is synchronous; the document never crosses an await
        let record = parser::parse(&body, PageKind::of(&target), &target, &self.site)?;

        let repo = Arc::clone(&self.repo);
        let stored = blocking(move || match record {
            ParsedRecord::Bill(bill) => repo.upsert_bill(&bill),
            ParsedRecord::Member(member) => repo.upsert_member(&member),
        })
        .await?;

        debug!(item = %target, created = stored.created, appended = stored.appended, "Upserted");
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FailureKind, FetchError};
    use crate::model::BillKey;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::{Mutex, OnceLock};
    use std::time::Duration;

    const BILL_PAGE: &str = include_str!("../../fixtures/bill_sb1300_2025.html");
    const MEMBER_PAGE: &str = include_str!("../../fixtures/member_253_2025.html");
    const EMPTY_SHELL: &str = include_str!("../../fixtures/empty_shell.html");
    const CHANGED_MARKUP: &str = include_str!("../../fixtures/bill_changed_markup.html");

    /// Serves canned responses per URL; anything unscripted is not found
    #[derive(Default)]
    struct ScriptedFetcher {
        pages: Mutex<HashMap<String, Result<String, FetchError>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedFetcher {
        fn serve(&self, url: String, response: Result<&str, FetchError>) {
            self.pages
                .lock()
                .unwrap()
                .insert(url, response.map(str::to_string));
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageFetcher for ScriptedFetcher {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            self.calls.lock().unwrap().push(url.to_string());
            self.pages
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .unwrap_or_else(|| Err(FetchError::NotFound { url: url.to_string() }))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn site() -> SourceSite {
        SourceSite::new(SourceSite::DEFAULT_BASE).unwrap()
    }

    fn bill_url(bill_type: BillType, number: u32) -> String {
        site().bill_url(&BillKey::new(bill_type, number, 2025))
    }

    fn setup() -> (Arc<ScriptedFetcher>, Arc<Repository>, Orchestrator) {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let repo = Arc::new(Repository::open_in_memory().unwrap());
        let orchestrator = Orchestrator::new(fetcher.clone(), repo.clone(), site());
        (fetcher, repo, orchestrator)
    }

    #[tokio::test]
    async fn test_limited_run_records_every_outcome() {
        let (fetcher, repo, orchestrator) = setup();
        fetcher.serve(bill_url(BillType::SB, 1), Ok(BILL_PAGE));
        fetcher.serve(bill_url(BillType::SB, 2), Ok(EMPTY_SHELL));
        fetcher.serve(bill_url(BillType::SB, 3), Ok(CHANGED_MARKUP));
        fetcher.serve(
            bill_url(BillType::HB, 1),
            Err(FetchError::Blocked {
                url: bill_url(BillType::HB, 1),
                attempts: 3,
            }),
        );
        fetcher.serve(site().member_url(253, 2025), Ok(MEMBER_PAGE));

        let report = orchestrator.run_limited(&RunOptions::default()).await.unwrap();

        assert_eq!(report.attempted, 20);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.parse_errors, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.not_found, 16);
        assert_eq!(report.failures.len(), 2);
        assert!(report
            .failures
            .iter()
            .any(|f| f.kind == FailureKind::Blocked && f.target == Target::Bill(BillKey::new(BillType::HB, 1, 2025))));

        let counts = repo.table_counts().unwrap();
        assert_eq!(counts.bills, 1);
        assert_eq!(counts.members, 1);
        assert_eq!(fetcher.calls().len(), 20);

        println!("✅ {}", report.summary());
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let (fetcher, repo, orchestrator) = setup();
        fetcher.serve(bill_url(BillType::SB, 1), Ok(BILL_PAGE));
        fetcher.serve(site().member_url(253, 2025), Ok(MEMBER_PAGE));

        orchestrator.run_limited(&RunOptions::default()).await.unwrap();
        let before = repo.table_counts().unwrap();
        orchestrator.run_limited(&RunOptions::default()).await.unwrap();
        assert_eq!(repo.table_counts().unwrap(), before);
    }

    #[tokio::test]
    async fn test_full_year_lanes_stop_after_misses() {
        let (fetcher, repo, orchestrator) = setup();
        fetcher.serve(bill_url(BillType::SB, 1), Ok(BILL_PAGE));
        fetcher.serve(bill_url(BillType::SB, 3), Ok(BILL_PAGE));

        // Sequential so the miss counter sees outcomes in issue order
        let options = RunOptions {
            concurrency: 1,
            ..RunOptions::default()
        };
        let report = orchestrator.run_full(2025, &options).await.unwrap();

        let sb_calls = fetcher
            .calls()
            .iter()
            .filter(|u| u.contains("billtype=SB"))
            .count();
        // SB1 hit, SB2 miss, SB3 hit, SB4 + SB5 miss
        assert_eq!(sb_calls, 5);
        // Every other bill type: two misses each
        let other_bills = fetcher
            .calls()
            .iter()
            .filter(|u| u.contains("billtype=") && !u.contains("billtype=SB"))
            .count();
        assert_eq!(other_bills, 12);
        assert_eq!(report.succeeded, 2);
        assert_eq!(repo.table_counts().unwrap().bills, 2);
        assert_eq!(report.attempted, 5 + 12 + MAX_MEMBER_ID as usize);
    }

    /// Raises the stop signal on every call, then takes a while to answer
    struct StoppingFetcher {
        stop: OnceLock<StopSignal>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PageFetcher for StoppingFetcher {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            self.calls.lock().unwrap().push(url.to_string());
            if let Some(stop) = self.stop.get() {
                stop.stop();
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(BILL_PAGE.to_string())
        }

        fn name(&self) -> &str {
            "stopping"
        }
    }

    #[tokio::test]
    async fn test_stop_signal_before_run_issues_nothing() {
        let (fetcher, repo, orchestrator) = setup();
        fetcher.serve(bill_url(BillType::SB, 1), Ok(BILL_PAGE));

        orchestrator.stop_signal().stop();
        let report = orchestrator.run_limited(&RunOptions::default()).await.unwrap();

        assert_eq!(report.attempted, 0);
        assert!(report.stopped_early);
        assert_eq!(repo.table_counts().unwrap().bills, 0);
    }

    #[tokio::test]
    async fn test_stop_signal_finishes_in_flight_items() {
        let fetcher = Arc::new(StoppingFetcher {
            stop: OnceLock::new(),
            calls: Mutex::new(Vec::new()),
        });
        let repo = Arc::new(Repository::open_in_memory().unwrap());
        let orchestrator = Orchestrator::new(fetcher.clone(), repo.clone(), site());
        fetcher.stop.set(orchestrator.stop_signal()).unwrap();

        let options = RunOptions {
            concurrency: 3,
            ..RunOptions::default()
        };
        let report = orchestrator
            .run_range_bills(1, 50, vec![BillType::SB], vec![2025], &options)
            .await
            .unwrap();

        // The three items issued before the stop all land; nothing new starts
        assert_eq!(fetcher.calls.lock().unwrap().len(), 3);
        assert_eq!(report.attempted, 3);
        assert_eq!(report.succeeded, 3);
        assert!(report.stopped_early);
        assert_eq!(repo.table_counts().unwrap().bills, 3);
    }

    /// Panics on one URL, serves the bill page for everything else
    struct PanickingFetcher {
        poisoned: String,
    }

    #[async_trait]
    impl PageFetcher for PanickingFetcher {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            if url == self.poisoned {
                panic!("malformed response");
            }
            Ok(BILL_PAGE.to_string())
        }

        fn name(&self) -> &str {
            "panicking"
        }
    }

    #[tokio::test]
    async fn test_crashed_worker_is_reported() {
        let fetcher = Arc::new(PanickingFetcher {
            poisoned: bill_url(BillType::SB, 2),
        });
        let repo = Arc::new(Repository::open_in_memory().unwrap());
        let orchestrator = Orchestrator::new(fetcher, repo.clone(), site());

        let report = orchestrator
            .run_range_bills(1, 3, vec![BillType::SB], vec![2025], &RunOptions::default())
            .await
            .unwrap();

        assert_eq!(report.attempted, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, FailureKind::Crashed);
        assert_eq!(
            report.failures[0].target,
            Target::Bill(BillKey::new(BillType::SB, 2, 2025))
        );
        assert_eq!(repo.table_counts().unwrap().bills, 2);
    }

    #[tokio::test]
    async fn test_targets_run_retries_only_listed_items() {
        let (fetcher, repo, orchestrator) = setup();
        fetcher.serve(bill_url(BillType::HB, 7), Ok(BILL_PAGE));
        fetcher.serve(site().member_url(253, 2025), Ok(MEMBER_PAGE));

        let targets = vec![
            Target::Bill(BillKey::new(BillType::HB, 7, 2025)),
            Target::Member { member_id: 253, year: 2025 },
        ];
        let report = orchestrator
            .run_targets(targets, &RunOptions::default())
            .await
            .unwrap();

        assert_eq!(report.attempted, 2);
        assert_eq!(report.succeeded, 2);
        assert_eq!(fetcher.calls().len(), 2);
        let counts = repo.table_counts().unwrap();
        assert_eq!(counts.bills, 1);
        assert_eq!(counts.members, 1);
    }

    #[tokio::test]
    async fn test_checkpoint_saved_and_resumed() {
        let (fetcher, repo, orchestrator) = setup();
        fetcher.serve(bill_url(BillType::SB, 1), Ok(BILL_PAGE));

        let options = RunOptions {
            concurrency: 1,
            checkpoint_every: 5,
            ..RunOptions::default()
        }
        .resumable("smoke");

        let first = orchestrator.run_limited(&options).await.unwrap();
        assert_eq!(first.attempted, 20);

        let saved: Checkpoint = repo.load_checkpoint("smoke").unwrap().unwrap();
        assert_eq!(saved.selector, Selector::Limited);
        assert_eq!(saved.lanes[0].resume_at, 20);

        // Everything was done, so a resumed run has nothing left to issue
        let second = orchestrator.run_limited(&options).await.unwrap();
        assert_eq!(second.attempted, 0);
        assert!(second.is_clean());
    }

    #[tokio::test]
    async fn test_storage_escalation() {
        let (_, _, orchestrator) = setup();

        let invariant = StorageError::Invariant("duplicate status dedup key".into());
        assert!(orchestrator.escalate(invariant).await.is_some());

        // One failed transaction against a healthy store is survivable
        let single = StorageError::Transaction {
            key: "SB1-2025".into(),
            source: rusqlite::Error::QueryReturnedNoRows,
        };
        assert!(orchestrator.escalate(single).await.is_none());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_store_calls_leave_runtime_free() {
        let (_, repo, orchestrator) = setup();

        // Another thread sits on the connection lock for a while
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            repo.snapshot(|_| {
                locked_tx.send(()).unwrap();
                std::thread::sleep(Duration::from_millis(200));
                Ok::<_, StorageError>(())
            })
        });
        locked_rx.recv().unwrap();

        let ticker = tokio::spawn(async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Instant::now()
        });
        orchestrator.ping().await.unwrap();
        let pinged = Instant::now();

        // The timer fired while the ping was still waiting on the lock
        assert!(ticker.await.unwrap() < pinged);
        holder.join().unwrap().unwrap();
    }

    #[test]
    fn test_aborted_run_carries_partial_report() {
        let mut report = RunReport::new(Some("full-2025".to_string()));
        report.record(Target::Member { member_id: 1, year: 2025 }, &ItemOutcome::Success);

        let aborted = abort(report, Instant::now(), StorageError::Unavailable("disk I/O error".into()));
        assert_eq!(aborted.report.succeeded, 1);
        assert!(aborted.to_string().contains("aborted"));
        assert!(aborted.cause.is_fatal());
    }
}

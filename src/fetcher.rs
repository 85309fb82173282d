// 🌐 Rate-Limited Fetcher - Polite, persistent, bot-wall aware
//
// Every outbound request (including retries and challenge warm-ups) passes
// through one shared RateLimiter, so the configured delay is an aggregate
// floor across all workers of a run.
//
// Per-fetch control flow is an explicit state machine:
//   Pending → Retrying(n) → Succeeded | Failed
// with backoff a pure function of the attempt count.

use crate::config::Config;
use crate::error::FetchError;
use crate::model::{BillKey, Target};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

/// Firefox on Windows, matching what a regular visitor sends
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:128.0) Gecko/20100101 Firefox/128.0";

/// Markers of anti-automation interstitials (Cloudflare, Incapsula)
const CHALLENGE_MARKERS: [&str; 7] = [
    "cf-browser-verification",
    "challenge-platform",
    "cf_chl_",
    "Just a moment...",
    "Attention Required! | Cloudflare",
    "_Incapsula_Resource",
    "Request unsuccessful. Incapsula",
];

/// Paths the source redirects to when an identifier does not exist
const NOT_FOUND_PATHS: [&str; 3] = ["/404", "error.aspx", "pagenotfound"];

// ============================================================================
// SOURCE SITE
// ============================================================================

/// Where the documents live and how their URLs are built
#[derive(Debug, Clone)]
pub struct SourceSite {
    base: Url,
    root: String,
}

impl SourceSite {
    pub const DEFAULT_BASE: &'static str = "https://www.capitol.hawaii.gov";

    pub fn new(base: &str) -> Result<Self, url::ParseError> {
        let parsed = Url::parse(base)?;
        Ok(SourceSite {
            root: base.trim_end_matches('/').to_string(),
            base: parsed,
        })
    }

    /// Site root, no trailing slash
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn bill_url(&self, key: &BillKey) -> String {
        format!(
            "{}/session/measure_indiv.aspx?billtype={}&billnumber={}&year={}",
            self.root, key.bill_type, key.number, key.year
        )
    }

    pub fn member_url(&self, member_id: i64, year: i32) -> String {
        format!(
            "{}/legislature/memberpage.aspx?member={}&year={}",
            self.root, member_id, year
        )
    }

    pub fn target_url(&self, target: &Target) -> String {
        match target {
            Target::Bill(key) => self.bill_url(key),
            Target::Member { member_id, year } => self.member_url(*member_id, *year),
        }
    }

    /// Resolve a link found in a document against the site root
    pub fn resolve(&self, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() || href.starts_with("javascript:") || href.starts_with('#') {
            return None;
        }
        self.base.join(href).ok().map(String::from)
    }
}

// ============================================================================
// RATE LIMITER
// ============================================================================

/// Shared clock gate: hands out request slots at least `min_interval` apart,
/// no matter how many workers ask concurrently.
pub struct RateLimiter {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        RateLimiter {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait for the next free slot. The slot is reserved under the lock and
    /// the sleep happens outside it, so waiters queue up one interval apart.
    pub async fn acquire(&self) {
        let wait = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(reserved) if reserved > now => reserved,
                _ => now,
            };
            *next = Some(slot + self.min_interval);
            slot - now
        };

        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

// ============================================================================
// RETRY POLICY + STATE MACHINE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts allowed for transient failures (first try included)
    pub max_attempts: u32,

    /// Challenge-path attempts allowed after a soft-block
    pub max_challenge_attempts: u32,

    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 4,
            max_challenge_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `n` (1-based): base * 2^(n-1), capped at max_delay
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Where a single fetch currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Pending,
    /// Number of attempts made so far
    Retrying(u32),
    Succeeded,
    Failed,
}

/// Classified result of one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    Body(String),
    NotFound,
    Challenge,
    Transient(String),
}

/// What the fetch loop should do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Done(String),
    NotFound,
    RetryAfter(Duration),
    SolveChallenge,
    Exhausted(Exhausted),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exhausted {
    Blocked { attempts: u32 },
    Transient { attempts: u32, message: String },
}

impl Exhausted {
    pub fn into_error(self, url: &str) -> FetchError {
        match self {
            Exhausted::Blocked { attempts } => FetchError::Blocked {
                url: url.to_string(),
                attempts,
            },
            Exhausted::Transient { attempts, message } => FetchError::Transient {
                url: url.to_string(),
                attempts,
                message,
            },
        }
    }
}

/// Pure retry bookkeeping for one fetch. No I/O, no clock.
#[derive(Debug, Clone)]
pub struct RetryMachine {
    policy: RetryPolicy,
    state: FetchState,
    attempts: u32,
    transient_failures: u32,
    challenges: u32,
}

impl RetryMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        RetryMachine {
            policy,
            state: FetchState::Pending,
            attempts: 0,
            transient_failures: 0,
            challenges: 0,
        }
    }

    pub fn state(&self) -> FetchState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Feed the outcome of one attempt
    pub fn advance(&mut self, attempt: Attempt) -> Step {
        self.attempts += 1;

        match attempt {
            Attempt::Body(body) => {
                self.state = FetchState::Succeeded;
                Step::Done(body)
            }
            Attempt::NotFound => {
                self.state = FetchState::Failed;
                Step::NotFound
            }
            Attempt::Transient(message) => {
                self.transient_failures += 1;
                if self.transient_failures >= self.policy.max_attempts {
                    self.state = FetchState::Failed;
                    Step::Exhausted(Exhausted::Transient {
                        attempts: self.attempts,
                        message,
                    })
                } else {
                    self.state = FetchState::Retrying(self.attempts);
                    Step::RetryAfter(self.policy.backoff(self.transient_failures))
                }
            }
            Attempt::Challenge => {
                self.challenges += 1;
                if self.challenges > self.policy.max_challenge_attempts {
                    self.state = FetchState::Failed;
                    Step::Exhausted(Exhausted::Blocked {
                        attempts: self.attempts,
                    })
                } else {
                    self.state = FetchState::Retrying(self.attempts);
                    Step::SolveChallenge
                }
            }
        }
    }
}

// ============================================================================
// RESPONSE CLASSIFICATION
// ============================================================================

pub fn is_challenge(body: &str) -> bool {
    CHALLENGE_MARKERS.iter().any(|marker| body.contains(marker))
}

/// Map (status, final URL, body) onto the fetch taxonomy
pub fn classify_response(status: u16, final_url: &str, body: String) -> Attempt {
    match status {
        404 | 410 => Attempt::NotFound,
        200..=299 => {
            let path = final_url.to_lowercase();
            if is_challenge(&body) {
                Attempt::Challenge
            } else if NOT_FOUND_PATHS.iter().any(|p| path.contains(p)) {
                Attempt::NotFound
            } else {
                Attempt::Body(body)
            }
        }
        403 => Attempt::Challenge,
        503 if is_challenge(&body) => Attempt::Challenge,
        _ => Attempt::Transient(format!("HTTP {}", status)),
    }
}

fn describe_request_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("timeout: {}", err)
    } else if err.is_connect() {
        format!("connection error: {}", err)
    } else {
        err.to_string()
    }
}

async fn get_page(client: &reqwest::Client, url: &str) -> Attempt {
    match client.get(url).send().await {
        Ok(resp) => {
            let status = resp.status().as_u16();
            let final_url = resp.url().to_string();
            match resp.text().await {
                Ok(body) => classify_response(status, &final_url, body),
                Err(e) => Attempt::Transient(describe_request_error(&e)),
            }
        }
        Err(e) => Attempt::Transient(describe_request_error(&e)),
    }
}

// ============================================================================
// PAGE FETCHER TRAIT
// ============================================================================

/// `fetch(url) -> body | error`. Implementations own retry and backoff.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;

    fn name(&self) -> &str;
}

// ============================================================================
// CHALLENGE PATH
// ============================================================================

/// How a soft-blocked request gets a second chance.
///
/// Without a solver: visit the site root so the cookie store picks up the
/// clearance cookies, let the interstitial settle, then retry directly.
/// With a solver: ask a headless-browser rendering service for the document.
pub struct ChallengeSolver {
    site_root: String,
    solver_url: Option<String>,
    settle: Duration,
}

impl ChallengeSolver {
    pub fn new(site_root: &str, solver_url: Option<String>) -> Self {
        ChallengeSolver {
            site_root: site_root.to_string(),
            solver_url: solver_url.map(|u| u.trim_end_matches('/').to_string()),
            settle: Duration::from_secs(1),
        }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    async fn solve(&self, client: &reqwest::Client, limiter: &RateLimiter, url: &str) -> Attempt {
        match &self.solver_url {
            Some(endpoint) => self.render(client, endpoint, url).await,
            None => {
                if let Err(e) = client.get(&self.site_root).send().await {
                    debug!(url, error = %e, "Session warm-up request failed");
                }
                tokio::time::sleep(self.settle).await;
                limiter.acquire().await;
                get_page(client, url).await
            }
        }
    }

    async fn render(&self, client: &reqwest::Client, endpoint: &str, url: &str) -> Attempt {
        let body = serde_json::json!({ "url": url });
        let resp = match client
            .post(format!("{}/content", endpoint))
            .json(&body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return Attempt::Transient(describe_request_error(&e)),
        };

        let status = resp.status();
        if !status.is_success() {
            return Attempt::Transient(format!("challenge solver returned HTTP {}", status.as_u16()));
        }

        match resp.text().await {
            Ok(html) => classify_response(200, url, html),
            Err(e) => Attempt::Transient(describe_request_error(&e)),
        }
    }
}

// ============================================================================
// HTTP FETCHER
// ============================================================================

pub struct HttpFetcher {
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    challenge: ChallengeSolver,
}

impl HttpFetcher {
    pub fn new(
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
        timeout: Duration,
        challenge: ChallengeSolver,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .cookie_store(true)
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(HttpFetcher {
            client,
            limiter,
            policy,
            challenge,
        })
    }

    /// Build from environment configuration with its own rate gate
    pub fn from_config(config: &Config) -> Result<Self> {
        let limiter = Arc::new(RateLimiter::new(config.min_delay));
        let challenge = ChallengeSolver::new(&config.source_base_url, config.challenge_solver_url.clone());
        info!(
            min_delay_ms = config.min_delay.as_millis() as u64,
            max_attempts = config.max_attempts,
            solver = config.challenge_solver_url.is_some(),
            "HTTP fetcher ready"
        );
        HttpFetcher::new(limiter, config.retry_policy(), config.request_timeout, challenge)
    }

    pub fn limiter(&self) -> Arc<RateLimiter> {
        Arc::clone(&self.limiter)
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let mut machine = RetryMachine::new(self.policy.clone());
        let mut challenged = false;

        loop {
            self.limiter.acquire().await;

            let attempt = if challenged {
                self.challenge.solve(&self.client, &self.limiter, url).await
            } else {
                get_page(&self.client, url).await
            };

            match machine.advance(attempt) {
                Step::Done(body) => {
                    debug!(url, attempts = machine.attempts(), "Fetched");
                    return Ok(body);
                }
                Step::NotFound => {
                    debug!(url, "Not found upstream");
                    return Err(FetchError::NotFound {
                        url: url.to_string(),
                    });
                }
                Step::RetryAfter(delay) => {
                    warn!(
                        url,
                        attempt = machine.attempts(),
                        backoff_ms = delay.as_millis() as u64,
                        "Transient failure, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
                Step::SolveChallenge => {
                    warn!(url, attempt = machine.attempts(), "Soft-blocked, taking challenge path");
                    challenged = true;
                }
                Step::Exhausted(exhausted) => {
                    let err = exhausted.into_error(url);
                    warn!(url, error = %err, "Giving up");
                    return Err(err);
                }
            }
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BillType;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            max_challenge_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    fn test_fetcher(server: &MockServer, solver: Option<String>) -> HttpFetcher {
        let challenge =
            ChallengeSolver::new(&server.uri(), solver).with_settle(Duration::from_millis(1));
        HttpFetcher::new(
            Arc::new(RateLimiter::new(Duration::ZERO)),
            fast_policy(4),
            Duration::from_secs(5),
            challenge,
        )
        .unwrap()
    }

    fn drive(policy: RetryPolicy, script: Vec<Attempt>) -> (FetchState, Option<Step>) {
        let mut machine = RetryMachine::new(policy);
        let mut last = None;
        for attempt in script {
            let step = machine.advance(attempt);
            let terminal = matches!(step, Step::Done(_) | Step::NotFound | Step::Exhausted(_));
            last = Some(step);
            if terminal {
                break;
            }
        }
        (machine.state(), last)
    }

    #[test]
    fn test_source_site_urls() {
        let site = SourceSite::new("https://www.capitol.hawaii.gov/").unwrap();
        assert_eq!(
            site.bill_url(&BillKey::new(BillType::SB, 1300, 2025)),
            "https://www.capitol.hawaii.gov/session/measure_indiv.aspx?billtype=SB&billnumber=1300&year=2025"
        );
        assert_eq!(
            site.member_url(253, 2025),
            "https://www.capitol.hawaii.gov/legislature/memberpage.aspx?member=253&year=2025"
        );
        assert_eq!(
            site.resolve("/sessions/session2025/bills/SB1300_CD1_.pdf").as_deref(),
            Some("https://www.capitol.hawaii.gov/sessions/session2025/bills/SB1300_CD1_.pdf")
        );
        assert_eq!(site.resolve("javascript:void(0)"), None);
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(6), Duration::from_secs(30));
        assert_eq!(policy.backoff(200), Duration::from_secs(30));
    }

    #[test]
    fn test_three_failures_then_success_succeeds() {
        let script = vec![
            Attempt::Transient("HTTP 503".into()),
            Attempt::Transient("timeout".into()),
            Attempt::Transient("HTTP 502".into()),
            Attempt::Body("<html/>".into()),
        ];
        let (state, last) = drive(RetryPolicy::default(), script);
        assert_eq!(state, FetchState::Succeeded);
        assert_eq!(last, Some(Step::Done("<html/>".into())));
    }

    #[test]
    fn test_five_failures_exhaust_cap_of_four() {
        let mut script: Vec<Attempt> = (0..5).map(|_| Attempt::Transient("HTTP 500".into())).collect();
        script.push(Attempt::Body("<html/>".into()));

        let (state, last) = drive(RetryPolicy::default(), script);
        assert_eq!(state, FetchState::Failed);
        assert!(matches!(
            last,
            Some(Step::Exhausted(Exhausted::Transient { attempts: 4, .. }))
        ));
    }

    #[test]
    fn test_not_found_is_terminal() {
        let (state, last) = drive(
            RetryPolicy::default(),
            vec![Attempt::NotFound, Attempt::Body("never".into())],
        );
        assert_eq!(state, FetchState::Failed);
        assert_eq!(last, Some(Step::NotFound));
    }

    #[test]
    fn test_challenges_bounded() {
        let policy = fast_policy(4);
        let mut machine = RetryMachine::new(policy);
        assert_eq!(machine.state(), FetchState::Pending);
        assert_eq!(machine.advance(Attempt::Challenge), Step::SolveChallenge);
        assert_eq!(machine.state(), FetchState::Retrying(1));
        assert_eq!(machine.advance(Attempt::Challenge), Step::SolveChallenge);
        assert_eq!(
            machine.advance(Attempt::Challenge),
            Step::Exhausted(Exhausted::Blocked { attempts: 3 })
        );
        assert_eq!(machine.state(), FetchState::Failed);
    }

    #[test]
    fn test_classify_response() {
        assert_eq!(classify_response(404, "x", String::new()), Attempt::NotFound);
        assert_eq!(
            classify_response(200, "https://site/error.aspx?code=1", "<html/>".into()),
            Attempt::NotFound
        );
        assert_eq!(
            classify_response(503, "x", "<title>Just a moment...</title>".into()),
            Attempt::Challenge
        );
        assert_eq!(classify_response(403, "x", String::new()), Attempt::Challenge);
        assert_eq!(
            classify_response(503, "x", "down for maintenance".into()),
            Attempt::Transient("HTTP 503".into())
        );
        assert_eq!(
            classify_response(429, "x", String::new()),
            Attempt::Transient("HTTP 429".into())
        );
        assert_eq!(
            classify_response(200, "https://site/page", "<html>ok</html>".into()),
            Attempt::Body("<html>ok</html>".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_enforces_aggregate_floor() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_secs(1)));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now()
            }));
        }

        let mut granted = Vec::new();
        for handle in handles {
            granted.push(handle.await.unwrap());
        }
        granted.sort();

        for pair in granted.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(1));
        }
        assert!(Instant::now() - start >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_fetch_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/session/measure_indiv.aspx"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = test_fetcher(&server, None);
        let site = SourceSite::new(&server.uri()).unwrap();
        let url = site.bill_url(&BillKey::new(BillType::HB, 9999, 2025));

        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_fetch_retries_transient_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/session/measure_indiv.aspx"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(3)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/session/measure_indiv.aspx"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>bill</html>"))
            .with_priority(2)
            .mount(&server)
            .await;

        let fetcher = test_fetcher(&server, None);
        let site = SourceSite::new(&server.uri()).unwrap();
        let body = fetcher
            .fetch(&site.bill_url(&BillKey::new(BillType::SB, 1, 2025)))
            .await
            .unwrap();
        assert_eq!(body, "<html>bill</html>");
    }

    #[tokio::test]
    async fn test_fetch_gives_up_after_transient_budget() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/session/measure_indiv.aspx"))
            .respond_with(ResponseTemplate::new(502))
            .expect(4)
            .mount(&server)
            .await;

        let fetcher = test_fetcher(&server, None);
        let site = SourceSite::new(&server.uri()).unwrap();
        let err = fetcher
            .fetch(&site.bill_url(&BillKey::new(BillType::SB, 1, 2025)))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Transient { attempts: 4, .. }));
    }

    #[tokio::test]
    async fn test_fetch_challenge_cleared_by_session_warmup() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("home"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/legislature/memberpage.aspx"))
            .respond_with(ResponseTemplate::new(503).set_body_string("<title>Just a moment...</title>"))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/legislature/memberpage.aspx"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>member</html>"))
            .with_priority(2)
            .mount(&server)
            .await;

        let fetcher = test_fetcher(&server, None);
        let site = SourceSite::new(&server.uri()).unwrap();
        let body = fetcher.fetch(&site.member_url(253, 2025)).await.unwrap();
        assert_eq!(body, "<html>member</html>");
    }

    #[tokio::test]
    async fn test_fetch_persistent_challenge_is_blocked() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/legislature/memberpage.aspx"))
            .respond_with(ResponseTemplate::new(403).set_body_string("cf-browser-verification"))
            .mount(&server)
            .await;

        let fetcher = test_fetcher(&server, None);
        let site = SourceSite::new(&server.uri()).unwrap();
        let err = fetcher.fetch(&site.member_url(1, 2025)).await.unwrap_err();
        assert!(matches!(err, FetchError::Blocked { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_fetch_challenge_rendered_by_solver() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/session/measure_indiv.aspx"))
            .respond_with(ResponseTemplate::new(503).set_body_string("challenge-platform"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/content"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>rendered</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = test_fetcher(&server, Some(server.uri()));
        let site = SourceSite::new(&server.uri()).unwrap();
        let body = fetcher
            .fetch(&site.bill_url(&BillKey::new(BillType::SB, 1300, 2025)))
            .await
            .unwrap();
        assert_eq!(body, "<html>rendered</html>");
    }
}

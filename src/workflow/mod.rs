pub mod browser;
pub mod cancel;
pub mod download;
pub mod log;
pub mod session;

use crate::config::Credentials;
use crate::models::Period;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub use cancel::RunContext;
pub use log::{trace_line, LogLevel, LogSink, TracingSink};
pub use session::{BrowserSession, ClearMode, Locator, SessionFactory};

/// Code the portal's report picker expects for the request report.
pub const REPORT_CODE: &str = "455";

const LOGIN_FIELDS: [&str; 4] = ["f1", "f2", "f3", "f4"];
const LOGIN_SUBMIT: Locator = Locator::Id("5");
const MENU_READY: Locator = Locator::Name("f2");
const REPORT_PICKER: Locator = Locator::Name("f3");
const START_DATE: Locator = Locator::Id("11");
const END_DATE: Locator = Locator::Id("12");
const FORM_SUBMIT: Locator = Locator::Id("40");
const RESULTS_TABLE: Locator = Locator::Id("tblsr");
const REFRESH: Locator = Locator::Id("2");
/// Keystroke that accepts the prompt shown after the form is submitted.
const CONFIRM_KEY: &str = "1";

/// Fixed filters of the request form, in entry order.
const FORM_FILTERS: [(Locator, &str, ClearMode); 5] = [
    (Locator::Name("f21"), "t", ClearMode::Native),
    (Locator::Name("f35"), "e", ClearMode::Native),
    (Locator::Name("f37"), "b", ClearMode::Script),
    (Locator::Name("f38"), "g", ClearMode::Keep),
    (Locator::Name("f39"), "h", ClearMode::Keep),
];

/// Portal endpoint and where the browser drops downloads.
#[derive(Debug, Clone)]
pub struct PortalSettings {
    pub url: String,
    pub credentials: Credentials,
    pub download_dir: PathBuf,
}

/// Every wait and settle delay of the workflow.
#[derive(Debug, Clone)]
pub struct WorkflowTimings {
    pub login_form_timeout: Duration,
    pub login_settle: Duration,
    pub menu_timeout: Duration,
    pub report_window_delay: Duration,
    pub date_input_timeout: Duration,
    pub end_date_timeout: Duration,
    pub field_pause: Duration,
    pub start_date_settle: Duration,
    pub prompt_delay: Duration,
    pub submit_settle: Duration,
    pub results_window_settle: Duration,
    pub results_timeout: Duration,
    /// Time the portal gets to generate the report before the refresh.
    pub grace_period: Duration,
    pub refresh_timeout: Duration,
    pub refresh_settle: Duration,
    /// Time the browser gets to finish writing the file.
    pub download_settle: Duration,
}

impl Default for WorkflowTimings {
    fn default() -> Self {
        Self {
            login_form_timeout: Duration::from_secs(10),
            login_settle: Duration::from_secs(5),
            menu_timeout: Duration::from_secs(10),
            report_window_delay: Duration::from_secs(1),
            date_input_timeout: Duration::from_secs(25),
            end_date_timeout: Duration::from_secs(10),
            field_pause: Duration::from_millis(300),
            start_date_settle: Duration::from_secs(3),
            prompt_delay: Duration::from_millis(800),
            submit_settle: Duration::from_secs(5),
            results_window_settle: Duration::from_secs(2),
            results_timeout: Duration::from_secs(10),
            grace_period: Duration::from_secs(150),
            refresh_timeout: Duration::from_secs(10),
            refresh_settle: Duration::from_secs(5),
            download_settle: Duration::from_secs(20),
        }
    }
}

impl WorkflowTimings {
    /// No delays at all; waits still go through the session with zero timeouts.
    pub fn immediate() -> Self {
        Self {
            login_form_timeout: Duration::ZERO,
            login_settle: Duration::ZERO,
            menu_timeout: Duration::ZERO,
            report_window_delay: Duration::ZERO,
            date_input_timeout: Duration::ZERO,
            end_date_timeout: Duration::ZERO,
            field_pause: Duration::ZERO,
            start_date_settle: Duration::ZERO,
            prompt_delay: Duration::ZERO,
            submit_settle: Duration::ZERO,
            results_window_settle: Duration::ZERO,
            results_timeout: Duration::ZERO,
            grace_period: Duration::ZERO,
            refresh_timeout: Duration::ZERO,
            refresh_settle: Duration::ZERO,
            download_settle: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Browser,
    Login,
    FormFill,
    CaptureRequest,
    Download,
    Rename,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Browser => "browser start",
            Stage::Login => "login",
            Stage::FormFill => "form fill",
            Stage::CaptureRequest => "request capture",
            Stage::Download => "download",
            Stage::Rename => "rename",
        };
        f.write_str(name)
    }
}

/// Why a stage stopped early.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// The run was stopped by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("run cancelled")]
pub struct Cancelled;

#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowOutcome {
    /// Report downloaded and renamed to its final path.
    Downloaded(PathBuf),
    /// The results table had no request to follow.
    NoRequest,
    /// After the grace period no row matched the captured request.
    NotReady { request: String },
    Failed { stage: Stage, reason: String },
}

impl WorkflowOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, WorkflowOutcome::Downloaded(_))
    }
}

impl fmt::Display for WorkflowOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowOutcome::Downloaded(path) => write!(f, "saved as {}", path.display()),
            WorkflowOutcome::NoRequest => write!(f, "no request found"),
            WorkflowOutcome::NotReady { request } => write!(f, "request {} not ready", request),
            WorkflowOutcome::Failed { stage, reason } => write!(f, "{} failed: {}", stage, reason),
        }
    }
}

/// Login, request, wait, download and rename for one period.
pub struct ReportWorkflow {
    settings: PortalSettings,
    timings: WorkflowTimings,
}

impl ReportWorkflow {
    pub fn new(settings: PortalSettings, timings: WorkflowTimings) -> Self {
        Self { settings, timings }
    }

    /// Run every stage for `period`.
    ///
    /// Stage failures are logged and returned as [`WorkflowOutcome::Failed`];
    /// only cancellation escapes as an error.
    pub async fn run(
        &self,
        session: &dyn BrowserSession,
        period: &Period,
        ctx: &RunContext,
    ) -> Result<WorkflowOutcome, Cancelled> {
        match self.run_stages(session, period, ctx).await {
            Ok(outcome) => Ok(outcome),
            Err((_, StageError::Cancelled)) => Err(Cancelled),
            Err((stage, StageError::Failed(e))) => {
                let reason = format!("{:#}", e);
                ctx.sink().error(format!("❌ {} failed for {}: {}", stage, period, reason));
                Ok(WorkflowOutcome::Failed { stage, reason })
            }
        }
    }

    async fn run_stages(
        &self,
        session: &dyn BrowserSession,
        period: &Period,
        ctx: &RunContext,
    ) -> Result<WorkflowOutcome, (Stage, StageError)> {
        let tag = |stage: Stage| move |e: StageError| (stage, e);

        self.login(session, ctx).await.map_err(tag(Stage::Login))?;
        self.fill_form(session, period, ctx).await.map_err(tag(Stage::FormFill))?;

        let request = self.capture_request(session, ctx).await.map_err(tag(Stage::CaptureRequest))?;
        let Some(request) = request else {
            return Ok(WorkflowOutcome::NoRequest);
        };

        let started = self
            .poll_and_download(session, &request, ctx)
            .await
            .map_err(tag(Stage::Download))?;
        if !started {
            return Ok(WorkflowOutcome::NotReady { request });
        }

        let path = self
            .finish_download(&period.file_base_name(), ctx)
            .await
            .map_err(tag(Stage::Rename))?;
        Ok(WorkflowOutcome::Downloaded(path))
    }

    async fn login(&self, session: &dyn BrowserSession, ctx: &RunContext) -> Result<(), StageError> {
        ctx.checkpoint()?;
        ctx.sink().info("🔐 Logging in to the portal...".to_string());

        session.navigate(&self.settings.url).await?;
        session
            .wait_for_element(&Locator::Name(LOGIN_FIELDS[0]), self.timings.login_form_timeout)
            .await?;

        let creds = &self.settings.credentials;
        let values = [&creds.company, &creds.tax_id, &creds.username, &creds.password];
        for (field, value) in LOGIN_FIELDS.iter().zip(values) {
            session.fill(&Locator::Name(*field), value, ClearMode::Keep).await?;
        }
        session.click(&LOGIN_SUBMIT).await?;

        ctx.pause(self.timings.login_settle).await
    }

    async fn fill_form(
        &self,
        session: &dyn BrowserSession,
        period: &Period,
        ctx: &RunContext,
    ) -> Result<(), StageError> {
        ctx.checkpoint()?;
        let t = &self.timings;
        ctx.sink().info(format!("📝 Requesting report {} for {}", REPORT_CODE, period));

        session.wait_for_element(&MENU_READY, t.menu_timeout).await?;
        session.fill(&REPORT_PICKER, REPORT_CODE, ClearMode::Keep).await?;
        ctx.pause(t.report_window_delay).await?;
        session.switch_to_latest_window().await?;

        session.wait_for_element(&START_DATE, t.date_input_timeout).await?;
        ctx.pause(t.report_window_delay).await?;
        session.fill(&START_DATE, &period.start_date(), ClearMode::Native).await?;
        ctx.pause(t.start_date_settle).await?;

        session.wait_for_clickable(&END_DATE, t.end_date_timeout).await?;
        session.fill(&END_DATE, &period.end_date(), ClearMode::Script).await?;
        ctx.pause(t.report_window_delay).await?;

        for (field, value, clear) in &FORM_FILTERS {
            session.fill(field, value, *clear).await?;
            ctx.pause(t.field_pause).await?;
        }

        session.click(&FORM_SUBMIT).await?;
        ctx.pause(t.prompt_delay).await?;
        session.send_keystroke(CONFIRM_KEY).await?;
        ctx.pause(t.submit_settle).await?;

        // Submitting may open yet another tab with the results.
        session.switch_to_latest_window().await?;
        ctx.pause(t.results_window_settle).await
    }

    /// First request id in the results table, if there is one.
    async fn capture_request(
        &self,
        session: &dyn BrowserSession,
        ctx: &RunContext,
    ) -> Result<Option<String>, StageError> {
        ctx.checkpoint()?;

        let rows = match session.wait_for_element(&RESULTS_TABLE, self.timings.results_timeout).await {
            Ok(()) => session.table_first_cells(&RESULTS_TABLE).await,
            Err(e) => Err(e),
        };

        match rows {
            Ok(rows) => match rows.into_iter().next().filter(|id| !id.is_empty()) {
                Some(id) => {
                    ctx.sink().info(format!("🔎 Request sequence: {}", id));
                    Ok(Some(id))
                }
                None => {
                    ctx.sink().warn("No request rows in the results table".to_string());
                    Ok(None)
                }
            },
            Err(e) => {
                ctx.sink().warn(format!("Could not read the results table: {:#}", e));
                Ok(None)
            }
        }
    }

    /// Wait out the grace period, refresh once and click the matching row.
    ///
    /// `Ok(false)` means the row was not there; no second refresh is attempted.
    async fn poll_and_download(
        &self,
        session: &dyn BrowserSession,
        request: &str,
        ctx: &RunContext,
    ) -> Result<bool, StageError> {
        ctx.checkpoint()?;
        ctx.sink().info(format!(
            "⏳ Waiting {}s for the portal to generate the report...",
            self.timings.grace_period.as_secs()
        ));
        ctx.pause(self.timings.grace_period).await?;

        session.wait_for_clickable(&REFRESH, self.timings.refresh_timeout).await?;
        session.click(&REFRESH).await?;
        ctx.pause(self.timings.refresh_settle).await?;

        let rows = session.table_first_cells(&RESULTS_TABLE).await?;
        match rows.iter().position(|id| id == request) {
            Some(row) => {
                session.click_row_link(&RESULTS_TABLE, row).await?;
                ctx.sink().info(format!("⬇️ Download started for request {}", request));
                Ok(true)
            }
            None => {
                ctx.sink().warn(format!("No row matching request {} after the refresh", request));
                Ok(false)
            }
        }
    }

    async fn finish_download(&self, base_name: &str, ctx: &RunContext) -> Result<PathBuf, StageError> {
        ctx.sink().info(format!(
            "Waiting {}s for the download to complete...",
            self.timings.download_settle.as_secs()
        ));
        ctx.pause(self.timings.download_settle).await?;

        let dir = &self.settings.download_dir;
        match download::rename_latest_download(dir, base_name)? {
            Some(path) => {
                ctx.sink().success(format!("✅ Report saved as {}", path.display()));
                Ok(path)
            }
            None => Err(StageError::Failed(anyhow::anyhow!(
                "no downloaded file in {}",
                dir.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::log::testing::MemorySink;
    use super::session::testing::{FakePortal, FakeSession};
    use super::*;
    use chrono::NaiveDate;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn period() -> Period {
        Period::months_back(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(), 0)
    }

    fn workflow(dir: &std::path::Path) -> ReportWorkflow {
        ReportWorkflow::new(
            PortalSettings {
                url: "https://portal.test/login".to_string(),
                credentials: Credentials {
                    company: "ACME".to_string(),
                    tax_id: "123".to_string(),
                    username: "ops".to_string(),
                    password: "secret".to_string(),
                },
                download_dir: dir.to_path_buf(),
            },
            WorkflowTimings::immediate(),
        )
    }

    fn context() -> (CancellationToken, RunContext, Arc<MemorySink>) {
        let token = CancellationToken::new();
        let sink = Arc::new(MemorySink::default());
        let ctx = RunContext::new(token.clone(), sink.clone());
        (token, ctx, sink)
    }

    #[tokio::test]
    async fn test_full_run_downloads_and_renames() {
        let dir = tempfile::tempdir().unwrap();
        let portal = FakePortal::with_tables(vec![vec!["881"], vec!["882", "881"]]);
        *portal.download.lock().unwrap() = Some((dir.path().to_path_buf(), "ssw455.csv".to_string()));
        let (_token, ctx, _sink) = context();

        let outcome = workflow(dir.path())
            .run(&FakeSession(portal.clone()), &period(), &ctx)
            .await
            .unwrap();

        assert_eq!(outcome, WorkflowOutcome::Downloaded(dir.path().join("MAR2024.csv")));
        assert!(dir.path().join("MAR2024.csv").exists());

        let calls = portal.calls();
        assert_eq!(calls[0], "navigate https://portal.test/login");
        assert!(calls.contains(&"fill [name=f1] ACME".to_string()));
        assert!(calls.contains(&"fill [name=f4] secret".to_string()));
        assert!(calls.contains(&"fill #11 010324".to_string()));
        assert!(calls.contains(&"fill #12 310324".to_string()));
        assert!(calls.contains(&"keys 1".to_string()));
        // The matching request moved to the second row after the refresh.
        assert!(calls.contains(&"download #tblsr 1".to_string()));
    }

    #[tokio::test]
    async fn test_cancelled_token_starts_no_stage() {
        let dir = tempfile::tempdir().unwrap();
        let portal = FakePortal::with_tables(vec![vec!["881"]]);
        let (token, ctx, _sink) = context();
        token.cancel();

        let result = workflow(dir.path()).run(&FakeSession(portal.clone()), &period(), &ctx).await;

        assert_eq!(result, Err(Cancelled));
        assert!(portal.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_login_skips_later_stages() {
        let dir = tempfile::tempdir().unwrap();
        let portal = FakePortal::with_tables(vec![vec!["881"]]);
        let (token, ctx, _sink) = context();
        *portal.cancel_on.lock().unwrap() = Some(("click #5".to_string(), token.clone()));

        let result = workflow(dir.path()).run(&FakeSession(portal.clone()), &period(), &ctx).await;

        assert_eq!(result, Err(Cancelled));
        assert_eq!(portal.calls().last().unwrap(), "click #5");
        assert!(!portal.called("wait [name=f2]"));
    }

    #[tokio::test]
    async fn test_cancel_during_grace_period_returns_promptly() {
        let dir = tempfile::tempdir().unwrap();
        let portal = FakePortal::with_tables(vec![vec!["881"]]);
        let (token, ctx, _sink) = context();
        let mut timings = WorkflowTimings::immediate();
        timings.grace_period = Duration::from_secs(600);
        let workflow = ReportWorkflow::new(workflow(dir.path()).settings.clone(), timings);

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            workflow.run(&FakeSession(portal.clone()), &period(), &ctx),
        )
        .await
        .expect("cancellation should interrupt the grace period");

        assert_eq!(result, Err(Cancelled));
        assert!(!portal.called("clickable #2"));
    }

    #[tokio::test]
    async fn test_unmatched_request_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let portal = FakePortal::with_tables(vec![vec!["881"], vec!["990", "991"]]);
        let (_token, ctx, _sink) = context();

        let outcome = workflow(dir.path())
            .run(&FakeSession(portal.clone()), &period(), &ctx)
            .await
            .unwrap();

        assert_eq!(outcome, WorkflowOutcome::NotReady { request: "881".to_string() });
        let refreshes = portal.calls().iter().filter(|c| *c == "click #2").count();
        assert_eq!(refreshes, 1);
        assert!(!portal.called("download"));
    }

    #[tokio::test]
    async fn test_empty_results_table_means_nothing_to_download() {
        let dir = tempfile::tempdir().unwrap();
        let portal = FakePortal::with_tables(vec![vec![]]);
        let (_token, ctx, sink) = context();

        let outcome = workflow(dir.path())
            .run(&FakeSession(portal.clone()), &period(), &ctx)
            .await
            .unwrap();

        assert_eq!(outcome, WorkflowOutcome::NoRequest);
        assert!(!portal.called("clickable #2"));
        assert!(sink.contains("No request rows"));
    }

    #[tokio::test]
    async fn test_missing_results_table_means_nothing_to_download() {
        let dir = tempfile::tempdir().unwrap();
        let portal = FakePortal::with_tables(vec![vec!["881"]]);
        portal.missing.lock().unwrap().insert(RESULTS_TABLE);
        let (_token, ctx, _sink) = context();

        let outcome = workflow(dir.path())
            .run(&FakeSession(portal.clone()), &period(), &ctx)
            .await
            .unwrap();

        assert_eq!(outcome, WorkflowOutcome::NoRequest);
    }

    #[tokio::test]
    async fn test_missing_login_form_fails_login_stage() {
        let dir = tempfile::tempdir().unwrap();
        let portal = FakePortal::with_tables(vec![vec!["881"]]);
        portal.missing.lock().unwrap().insert(Locator::Name("f1"));
        let (_token, ctx, sink) = context();

        let outcome = workflow(dir.path())
            .run(&FakeSession(portal.clone()), &period(), &ctx)
            .await
            .unwrap();

        assert!(matches!(outcome, WorkflowOutcome::Failed { stage: Stage::Login, .. }));
        assert!(!portal.called("fill"));
        assert!(sink.contains("login failed"));
    }

    #[tokio::test]
    async fn test_missing_download_is_a_rename_failure() {
        let dir = tempfile::tempdir().unwrap();
        let portal = FakePortal::with_tables(vec![vec!["881"]]);
        let (_token, ctx, _sink) = context();

        let outcome = workflow(dir.path())
            .run(&FakeSession(portal.clone()), &period(), &ctx)
            .await
            .unwrap();

        assert!(matches!(outcome, WorkflowOutcome::Failed { stage: Stage::Rename, .. }));
    }
}

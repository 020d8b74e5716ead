//! End-to-end enrichment run: schema → rows → discover → gate → fetch →
//! classify → aggregate → score → write.

use std::sync::Arc;

use chrono::{Datelike, Utc};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use linkintel_discovery::{DiscoveryOptions, discover_row, retain_domains, select_columns};
use linkintel_sheet::{MemorySheet, RowUpdate, SheetTransport};
use linkintel_shared::{EnrichConfig, LinkIntelError, Result, RowKey, RunStatus, RunSummary};

use crate::aggregate::{ReportInput, build_report, render_summary_cell, skipped_report};
use crate::context::RunContext;
use crate::row_key::resolve_row_key;
use crate::schema::{ColumnLayout, ManagedColumns, ensure_schema};
use crate::score::score;
use crate::writer::{RowCells, RowWriter};

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when a row is handed to a worker.
    fn row_started(&self, sheet_row: usize, current: usize, total: usize);
    /// Called when a row reaches its final status.
    fn row_finished(&self, sheet_row: usize, status: RunStatus);
    /// Called when the run completes.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn row_started(&self, _sheet_row: usize, _current: usize, _total: usize) {}
    fn row_finished(&self, _sheet_row: usize, _status: RunStatus) {}
    fn done(&self, _summary: &RunSummary) {}
}

/// Result of [`run_enrichment`].
#[derive(Debug, Clone)]
pub struct RunReport {
    pub summary: RunSummary,
    pub layout: ColumnLayout,
    /// Updates computed in dry-run mode. Empty otherwise.
    pub planned: Vec<RowUpdate>,
}

/// Inputs a row worker needs, shared across all rows of a run.
struct RowInputs {
    ctx: Arc<RunContext>,
    config: EnrichConfig,
    header: Vec<String>,
    columns: Vec<usize>,
    reference_year: i32,
}

/// Enrich every selected row of `transport`.
///
/// The schema is reconciled once up front; a failure there aborts the run.
/// Rows are then processed (concurrently when `row_concurrency > 1`) and
/// written through a single [`RowWriter`]. Shutdown or the deadline stop new
/// rows from starting; rows already running finish and are written.
#[instrument(skip_all, fields(slots = config.link_slots, dry_run = config.dry_run))]
pub async fn run_enrichment(
    transport: Arc<dyn SheetTransport>,
    ctx: Arc<RunContext>,
    config: &EnrichConfig,
    progress: &dyn ProgressReporter,
    mut shutdown: watch::Receiver<bool>,
) -> Result<RunReport> {
    config.validate()?;
    let started = Utc::now();
    let deadline = config.deadline.map(|d| Instant::now() + d);

    let transport: Arc<dyn SheetTransport> = if config.dry_run {
        info!("dry run: working on an in-memory copy of the sheet");
        Arc::new(MemorySheet::new(transport.read_rows().await?))
    } else {
        transport
    };

    progress.phase("Reconciling columns");
    let managed = ManagedColumns::new(&config.namespace, config.link_slots);
    let layout = ensure_schema(transport.as_ref(), &managed).await?;

    progress.phase("Reading rows");
    let sheet = transport.read_rows().await?;
    let columns = select_columns(&sheet.header, &sheet.rows, &DiscoveryOptions::from(config));

    let mut summary = RunSummary::default();
    let mut queue: Vec<(usize, RowKey)> = Vec::new();
    for (index, row) in sheet.rows.iter().enumerate() {
        if config.rows.is_some_and(|range| !range.contains_data_index(index)) {
            continue;
        }
        if config.only_unprocessed && !sheet.cell(index, layout.combined_report).trim().is_empty() {
            summary.skipped_existing += 1;
            continue;
        }
        let key = resolve_row_key(&sheet.header, row, index, &config.namespace);
        if key.is_positional() {
            warn!(row = index + 2, "no identifying fields, falling back to positional key");
            summary.positional_keys += 1;
        }
        queue.push((index, key));
    }
    info!(
        rows = queue.len(),
        skipped_existing = summary.skipped_existing,
        url_columns = columns.len(),
        "rows selected"
    );

    let writer = Arc::new(RowWriter::new(transport.clone(), layout.clone(), config));
    let inputs = Arc::new(RowInputs {
        ctx,
        config: config.clone(),
        header: sheet.header.clone(),
        columns,
        reference_year: started.year(),
    });
    let semaphore = Arc::new(Semaphore::new(config.row_concurrency.max(1)));
    let mut workers: JoinSet<Result<(usize, RunStatus)>> = JoinSet::new();

    progress.phase("Enriching rows");
    let total = queue.len();
    for (position, (index, key)) in queue.into_iter().enumerate() {
        if *shutdown.borrow() || deadline.is_some_and(|d| Instant::now() >= d) {
            summary.cancelled = total - position;
            break;
        }
        let permit = tokio::select! {
            permit = semaphore.clone().acquire_owned() => permit.ok(),
            _ = shutdown_requested(&mut shutdown) => None,
            _ = deadline_reached(deadline) => None,
        };
        let Some(permit) = permit else {
            summary.cancelled = total - position;
            break;
        };

        let Some(row) = sheet.rows.get(index).cloned() else {
            continue;
        };
        progress.row_started(index + 2, position + 1, total);

        let inputs = inputs.clone();
        let writer = writer.clone();
        workers.spawn(async move {
            let _permit = permit;
            let task = {
                let key = key.clone();
                tokio::spawn(async move { process_row(&inputs, index, &row, &key).await })
            };
            let cells = match task.await {
                Ok(Ok(cells)) => cells,
                Ok(Err(e)) => {
                    warn!(row = index + 2, error = %e, "row failed");
                    RowCells::failed(&key, e.to_string())
                }
                Err(e) => {
                    warn!(row = index + 2, error = %e, "row worker panicked");
                    RowCells::failed(&key, format!("internal error: {e}"))
                }
            };
            let status = cells.status;
            let update = writer.build_update(index, &cells, Utc::now());
            writer.submit(update, status).await?;
            Ok((index, status))
        });

        while let Some(joined) = workers.try_join_next() {
            settle(joined, &mut summary, progress)?;
        }
    }

    if summary.cancelled > 0 {
        warn!(cancelled = summary.cancelled, "run stopped before all rows started");
    }

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = settle(joined, &mut summary, progress) {
            workers.shutdown().await;
            return Err(e);
        }
    }

    let report = writer.finish().await?;
    summary.written = report.stats.written;
    summary.unchanged = report.stats.unchanged;
    for status in report.stats.lost.iter().chain(&report.stats.failed) {
        demote_to_error(&mut summary, *status);
    }

    info!(
        ok = summary.ok,
        skipped_tos = summary.skipped_tos,
        no_links = summary.no_links,
        errors = summary.errors,
        unchanged = summary.unchanged,
        written = summary.written,
        positional_keys = summary.positional_keys,
        cancelled = summary.cancelled,
        "run complete"
    );
    progress.done(&summary);

    Ok(RunReport {
        summary,
        layout,
        planned: report.planned,
    })
}

/// Compute the managed cells for one row. Fetch, policy and classification
/// problems are folded into the row status rather than returned.
#[instrument(skip_all, fields(row = index + 2, key = %key))]
async fn process_row(
    inputs: &RowInputs,
    index: usize,
    row: &[String],
    key: &RowKey,
) -> Result<RowCells> {
    let RowInputs {
        ctx,
        config,
        header,
        columns,
        reference_year,
    } = inputs;

    let mut candidates = discover_row(header, row, columns);
    retain_domains(&mut candidates, &config.only_domains);
    if candidates.is_empty() {
        info!(status = %RunStatus::NoLinks, "row processed");
        return Ok(RowCells::empty(key, RunStatus::NoLinks));
    }

    let mut allowed = Vec::new();
    let mut skipped = 0usize;
    for candidate in &candidates {
        let decision = ctx.policy().check(&candidate.url).await;
        if decision.is_allowed() {
            allowed.push(candidate.url.clone());
        } else {
            skipped += 1;
            debug!(url = %candidate.url, reason = decision.reason().unwrap_or_default(), "skipped by policy");
        }
    }

    if allowed.is_empty() {
        info!(status = %RunStatus::SkippedTos, skipped, "row processed");
        let mut cells = RowCells::empty(key, RunStatus::SkippedTos);
        cells.report = skipped_report(skipped);
        return Ok(cells);
    }

    let mut summaries = Vec::new();
    let mut failures: Vec<String> = Vec::new();
    let attempted = allowed.len().min(config.link_slots);
    for url in allowed.iter().take(config.link_slots) {
        let fetched = ctx.engine().fetch(url).await;
        if !fetched.status.has_content() {
            let reason = fetched
                .error
                .clone()
                .unwrap_or_else(|| fetched.status.as_str().to_string());
            failures.push(format!("{url}: {reason}"));
            continue;
        }
        match ctx.classifier().classify(url, &fetched) {
            Ok(summary) => summaries.push(summary),
            Err(e) => {
                debug!(%url, error = %e, "classification failed");
                failures.push(format!("{url}: {e}"));
            }
        }
    }

    if summaries.is_empty() {
        info!(status = %RunStatus::Error, failed = failures.len(), "row processed");
        return Err(LinkIntelError::Network(format!(
            "all {} fetched link(s) failed: {}",
            failures.len(),
            failures.join("; ")
        )));
    }

    let cells: Vec<String> = summaries
        .iter()
        .map(|s| render_summary_cell(s, config.max_summary_chars))
        .collect();
    let report = build_report(
        &ReportInput {
            summaries: &summaries,
            total_links: allowed.len(),
            link_slots: config.link_slots,
            skipped,
            failed: failures.len(),
        },
        config.max_report_chars,
    );
    let score = score(&summaries, attempted, *reference_year);

    info!(
        status = %RunStatus::Ok,
        summaries = summaries.len(),
        skipped,
        failed = failures.len(),
        score = score.value,
        "row processed"
    );

    Ok(RowCells {
        key: key.value.clone(),
        status: RunStatus::Ok,
        summaries: cells,
        report,
        score: Some(score),
        error: None,
    })
}

impl RowCells {
    fn empty(key: &RowKey, status: RunStatus) -> Self {
        Self {
            key: key.value.clone(),
            status,
            summaries: Vec::new(),
            report: String::new(),
            score: None,
            error: None,
        }
    }

    fn failed(key: &RowKey, message: String) -> Self {
        Self {
            error: Some(message),
            ..Self::empty(key, RunStatus::Error)
        }
    }
}

fn settle(
    joined: std::result::Result<Result<(usize, RunStatus)>, tokio::task::JoinError>,
    summary: &mut RunSummary,
    progress: &dyn ProgressReporter,
) -> Result<()> {
    match joined {
        Ok(Ok((index, status))) => {
            summary.record(status);
            progress.row_finished(index + 2, status);
            Ok(())
        }
        Ok(Err(e)) => Err(e),
        Err(e) => {
            warn!(error = %e, "row worker panicked");
            summary.errors += 1;
            Ok(())
        }
    }
}

/// A row computed as `status` was never written; count it as an error instead.
fn demote_to_error(summary: &mut RunSummary, status: RunStatus) {
    let counter = match status {
        RunStatus::Ok => &mut summary.ok,
        RunStatus::SkippedTos => &mut summary.skipped_tos,
        RunStatus::NoLinks => &mut summary.no_links,
        RunStatus::Error => return,
    };
    *counter = counter.saturating_sub(1);
    summary.errors += 1;
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    while shutdown.changed().await.is_ok() {
        if *shutdown.borrow() {
            return;
        }
    }
    std::future::pending::<()>().await
}

async fn deadline_reached(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkintel_crawler::{Classifier, ClassifierRegistry};
    use linkintel_shared::{FetchResult, LinkSummary, RowRange};
    use std::time::Duration;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SITE_HTML: &str = r#"<html><head><title>Acme Analytics</title>
        <meta name="description" content="Cloud data automation platform with an open API"></head>
        <body><h2>Pricing plans</h2><p>We are hiring engineers. Updated 2025.</p></body></html>"#;

    const REPO_HTML: &str = r#"<html><head><title>acme/sdk</title></head>
        <body><p>Rust 92.1%</p><p>2.4k stars</p><p>Latest commits</p></body></html>"#;

    /// Serves `/<host>/<path>` from the mock server but classifies it as
    /// `https://<host>/<path>`, so platform selection sees public hosts.
    struct Rehost(ClassifierRegistry);

    impl Classifier for Rehost {
        fn classify(&self, url: &Url, fetched: &FetchResult) -> Result<LinkSummary> {
            let public = Url::parse(&format!("https:/{}", url.path())).unwrap();
            let mut fetched = fetched.clone();
            fetched.domain = public.host_str().unwrap().to_string();
            self.0.classify(&public, &fetched)
        }
    }

    fn test_config() -> EnrichConfig {
        EnrichConfig {
            per_domain_rps: 1000.0,
            timeout: Duration::from_secs(2),
            max_retries: 0,
            backoff_base: Duration::from_millis(10),
            backoff_max: Duration::from_millis(40),
            use_cache: false,
            ..EnrichConfig::default()
        }
    }

    fn context(config: &EnrichConfig) -> Arc<RunContext> {
        Arc::new(
            RunContext::new(config, None)
                .unwrap()
                .allow_localhost()
                .with_classifier(Arc::new(Rehost(ClassifierRegistry::new()))),
        )
    }

    async fn run(sheet: &MemorySheet, config: &EnrichConfig) -> RunReport {
        let (_tx, rx) = watch::channel(false);
        run_enrichment(
            Arc::new(sheet.clone()),
            context(config),
            config,
            &SilentProgress,
            rx,
        )
        .await
        .unwrap()
    }

    async fn mock_sites() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/acme.io"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SITE_HTML))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/github.com/acme/sdk"))
            .respond_with(ResponseTemplate::new(200).set_body_string(REPO_HTML))
            .mount(&server)
            .await;
        server
    }

    fn lead_sheet(server: &MockServer) -> MemorySheet {
        let site = format!("{}/acme.io/", server.uri());
        let repo = format!("{}/github.com/acme/sdk", server.uri());
        MemorySheet::from_rows(
            &["name", "company", "email", "website", "github"],
            vec![vec!["Jane Doe", "Acme", "jane@acme.io", site.as_str(), repo.as_str()]],
        )
    }

    #[tokio::test]
    async fn website_and_code_host_row_is_enriched() {
        let server = mock_sites().await;
        let sheet = lead_sheet(&server);
        let config = test_config();

        let report = run(&sheet, &config).await;
        let layout = &report.layout;
        let data = sheet.snapshot().await;

        assert_eq!(report.summary.ok, 1);
        assert_eq!(report.summary.written, 1);
        assert_eq!(data.cell(0, layout.status), "OK");
        assert_eq!(data.cell(0, layout.row_key), "email:jane@acme.io");
        assert!(data.cell(0, layout.link_summaries[0]).starts_with("Source: Website (acme.io)"));
        assert!(data.cell(0, layout.link_summaries[1]).starts_with("Source: Code Host (github.com)"));
        assert_eq!(data.cell(0, layout.link_summaries[2]), "");

        let combined = data.cell(0, layout.combined_report);
        assert!(combined.contains("Data Sources:\nacme.io, github.com"));
        assert!(combined.contains("Reference their open-source projects"));

        let score: u8 = data.cell(0, layout.lead_score).parse().unwrap();
        assert!(score <= 100);
        assert!(!data.cell(0, layout.lead_score_notes).is_empty());
        assert_eq!(data.cell(0, layout.error), "");
        assert!(!data.cell(0, layout.last_run).is_empty());
    }

    #[tokio::test]
    async fn second_run_is_byte_identical() {
        let server = mock_sites().await;
        let sheet = lead_sheet(&server);
        let config = test_config();

        run(&sheet, &config).await;
        let first = sheet.snapshot().await;

        let report = run(&sheet, &config).await;
        assert_eq!(report.summary.ok, 1);
        assert_eq!(report.summary.unchanged, 1);
        assert_eq!(report.summary.written, 0);
        assert_eq!(sheet.snapshot().await, first);
    }

    #[tokio::test]
    async fn deny_listed_profile_only_is_skipped() {
        let sheet = MemorySheet::from_rows(
            &["name", "linkedin"],
            vec![vec!["Jane Doe", "https://www.linkedin.com/in/jane"]],
        );
        let config = test_config();

        let report = run(&sheet, &config).await;
        let layout = &report.layout;
        let data = sheet.snapshot().await;

        assert_eq!(report.summary.skipped_tos, 1);
        assert_eq!(data.cell(0, layout.status), "SKIPPED_TOS");
        assert_eq!(data.cell(0, layout.combined_report), "Skipped (policy): 1");
        assert_eq!(data.cell(0, layout.lead_score), "0");
        assert_eq!(data.cell(0, layout.lead_score_notes), "All links skipped by policy");
        assert!(layout.link_summaries.iter().all(|c| data.cell(0, *c).is_empty()));
    }

    #[tokio::test]
    async fn row_without_urls_is_no_links() {
        let sheet = MemorySheet::from_rows(&["name", "website"], vec![vec!["Jane Doe", ""]]);
        let config = test_config();

        let report = run(&sheet, &config).await;
        let layout = &report.layout;
        let data = sheet.snapshot().await;

        assert_eq!(report.summary.no_links, 1);
        assert_eq!(data.cell(0, layout.status), "NO_LINKS");
        assert_eq!(data.cell(0, layout.combined_report), "");
        assert_eq!(data.cell(0, layout.lead_score), "");
        assert!(layout.link_summaries.iter().all(|c| data.cell(0, *c).is_empty()));
    }

    #[tokio::test]
    async fn failing_links_mark_row_as_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/acme.io"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let site = format!("{}/acme.io", server.uri());
        let sheet = MemorySheet::from_rows(&["email", "website"], vec![vec!["jane@acme.io", site.as_str()]]);
        let config = test_config();

        let report = run(&sheet, &config).await;
        let layout = &report.layout;
        let data = sheet.snapshot().await;

        assert_eq!(report.summary.errors, 1);
        assert_eq!(data.cell(0, layout.status), "ERROR");
        assert!(data.cell(0, layout.error).contains("HTTP 404"));
        assert_eq!(data.cell(0, layout.combined_report), "");
    }

    #[tokio::test]
    async fn only_unprocessed_skips_rows_with_a_report() {
        let sheet = MemorySheet::from_rows(
            &["email", "website", "ENRICH_COMBINED_REPORT", "ENRICH_STATUS"],
            vec![
                vec!["a@x.io", "", "Data Sources:\nx.io", "OK"],
                vec!["b@x.io", "", "", "ERROR"],
                vec!["c@x.io", ""],
            ],
        );
        let config = EnrichConfig {
            only_unprocessed: true,
            ..test_config()
        };

        let report = run(&sheet, &config).await;
        let data = sheet.snapshot().await;
        let status = report.layout.status;

        assert_eq!(report.summary.skipped_existing, 1);
        assert_eq!(report.summary.no_links, 2);
        assert_eq!(
            (0..3).map(|i| data.cell(i, status)).collect::<Vec<_>>(),
            vec!["OK", "NO_LINKS", "NO_LINKS"]
        );
    }

    #[tokio::test]
    async fn failed_row_does_not_stop_later_rows() {
        let server = mock_sites().await;
        Mock::given(method("GET"))
            .and(path("/down.io"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let down = format!("{}/down.io", server.uri());
        let site = format!("{}/acme.io", server.uri());
        let sheet = MemorySheet::from_rows(
            &["email", "website"],
            vec![
                vec!["a@down.io", down.as_str()],
                vec!["b@acme.io", site.as_str()],
                vec!["c@acme.io", ""],
            ],
        );
        let config = test_config();

        let report = run(&sheet, &config).await;
        let data = sheet.snapshot().await;
        let status = report.layout.status;

        assert_eq!(report.summary.errors, 1);
        assert_eq!(report.summary.ok, 1);
        assert_eq!(report.summary.no_links, 1);
        assert_eq!(
            (0..3).map(|i| data.cell(i, status)).collect::<Vec<_>>(),
            vec!["ERROR", "OK", "NO_LINKS"]
        );
        assert!(data.cell(0, report.layout.error).contains("HTTP 404"));
    }

    /// Panics on one host, delegates everything else.
    struct PanicsOn(&'static str, Rehost);

    impl Classifier for PanicsOn {
        fn classify(&self, url: &Url, fetched: &FetchResult) -> Result<LinkSummary> {
            if url.path().starts_with(self.0) {
                panic!("classifier bug");
            }
            self.1.classify(url, fetched)
        }
    }

    #[tokio::test]
    async fn panicking_row_is_written_as_error() {
        let server = mock_sites().await;
        Mock::given(method("GET"))
            .and(path("/boom.io"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SITE_HTML))
            .mount(&server)
            .await;
        let boom = format!("{}/boom.io", server.uri());
        let site = format!("{}/acme.io", server.uri());
        let sheet = MemorySheet::from_rows(
            &["email", "website"],
            vec![vec!["a@boom.io", boom.as_str()], vec!["b@acme.io", site.as_str()]],
        );
        let config = test_config();
        let ctx = RunContext::new(&config, None)
            .unwrap()
            .allow_localhost()
            .with_classifier(Arc::new(PanicsOn("/boom.io", Rehost(ClassifierRegistry::new()))));
        let (_tx, rx) = watch::channel(false);

        let report = run_enrichment(Arc::new(sheet.clone()), Arc::new(ctx), &config, &SilentProgress, rx)
            .await
            .unwrap();
        let data = sheet.snapshot().await;
        let layout = &report.layout;

        assert_eq!(report.summary.errors, 1);
        assert_eq!(report.summary.ok, 1);
        assert_eq!(data.cell(0, layout.status), "ERROR");
        assert!(data.cell(0, layout.error).contains("panicked"));
        assert_eq!(data.cell(0, layout.row_key), "email:a@boom.io");
        assert_eq!(data.cell(1, layout.status), "OK");
    }

    #[tokio::test]
    async fn row_range_limits_processing() {
        let sheet = MemorySheet::from_rows(&["website"], vec![vec![""], vec![""], vec![""]]);
        let config = EnrichConfig {
            rows: Some("3-3".parse::<RowRange>().unwrap()),
            ..test_config()
        };

        let report = run(&sheet, &config).await;
        let data = sheet.snapshot().await;
        let status = report.layout.status;

        assert_eq!(report.summary.processed(), 1);
        assert_eq!(report.summary.positional_keys, 1);
        assert_eq!(
            (0..3).map(|i| data.cell(i, status)).collect::<Vec<_>>(),
            vec!["", "NO_LINKS", ""]
        );
    }

    #[tokio::test]
    async fn dry_run_leaves_sheet_untouched() {
        let sheet = MemorySheet::from_rows(&["name", "website"], vec![vec!["Jane Doe", ""]]);
        let before = sheet.snapshot().await;
        let config = EnrichConfig {
            dry_run: true,
            ..test_config()
        };

        let report = run(&sheet, &config).await;

        assert_eq!(sheet.snapshot().await, before);
        assert_eq!(report.planned.len(), 1);
        assert_eq!(report.summary.no_links, 1);
        assert_eq!(report.summary.written, 0);
    }

    #[tokio::test]
    async fn concurrent_rows_all_complete() {
        let server = mock_sites().await;
        let site = format!("{}/acme.io", server.uri());
        let sheet = MemorySheet::from_rows(
            &["email", "website"],
            vec![
                vec!["a@acme.io", site.as_str()],
                vec!["b@acme.io", ""],
                vec!["c@acme.io", site.as_str()],
                vec!["d@acme.io", ""],
            ],
        );
        let config = EnrichConfig {
            row_concurrency: 3,
            write_batch_size: 2,
            ..test_config()
        };

        let report = run(&sheet, &config).await;
        let data = sheet.snapshot().await;

        assert_eq!(report.summary.ok, 2);
        assert_eq!(report.summary.no_links, 2);
        assert_eq!(data.cell(0, report.layout.row_key), "email:a@acme.io");
        assert_eq!(data.cell(3, report.layout.status), "NO_LINKS");
    }

    #[tokio::test]
    async fn shutdown_before_start_cancels_all_rows() {
        let sheet = MemorySheet::from_rows(&["website"], vec![vec![""], vec![""]]);
        let config = test_config();
        let (_tx, rx) = watch::channel(true);

        let report = run_enrichment(
            Arc::new(sheet.clone()),
            context(&config),
            &config,
            &SilentProgress,
            rx,
        )
        .await
        .unwrap();

        assert_eq!(report.summary.cancelled, 2);
        assert_eq!(report.summary.processed(), 0);
    }

    /// Sheet whose `read_rows` starts failing after `reads` successful calls.
    struct ReadsThenFails {
        inner: MemorySheet,
        reads: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl SheetTransport for ReadsThenFails {
        async fn read_header(&self) -> Result<Vec<String>> {
            self.inner.read_header().await
        }

        async fn read_rows(&self) -> Result<linkintel_sheet::SheetData> {
            use std::sync::atomic::Ordering;
            let left = self.reads.load(Ordering::SeqCst);
            if left == 0 {
                return Err(LinkIntelError::Sheet("transient read failure".into()));
            }
            self.reads.store(left - 1, Ordering::SeqCst);
            self.inner.read_rows().await
        }

        async fn insert_columns(&self, at: usize, names: &[String]) -> Result<()> {
            self.inner.insert_columns(at, names).await
        }

        async fn write_row(&self, update: &RowUpdate) -> Result<()> {
            self.inner.write_row(update).await
        }
    }

    #[tokio::test]
    async fn failed_sheet_reread_demotes_rows_instead_of_aborting() {
        let sheet = MemorySheet::from_rows(&["email", "website"], vec![vec!["a@x.io", ""], vec!["b@x.io", ""]]);
        let config = EnrichConfig {
            write_batch_size: 1,
            ..test_config()
        };
        let flaky = Arc::new(ReadsThenFails {
            inner: sheet.clone(),
            reads: std::sync::atomic::AtomicUsize::new(1),
        });
        let (_tx, rx) = watch::channel(false);

        let report = run_enrichment(flaky, context(&config), &config, &SilentProgress, rx)
            .await
            .unwrap();

        assert_eq!(report.summary.no_links, 0);
        assert_eq!(report.summary.errors, 2);
        assert_eq!(report.summary.written, 0);
        assert_eq!(sheet.snapshot().await.cell(0, report.layout.status), "");
    }
}

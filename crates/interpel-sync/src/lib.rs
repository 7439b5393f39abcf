//! Sync pipeline: fetch, diff against the previous snapshot, persist, notify.

pub mod config;
pub mod diff;
pub mod digest;

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use interpel_adapters::{InquirySource, RepresentativeLookup, SejmApiSource, SejmDirectory};
use interpel_core::{InquiryKey, NewAnswer, SnapshotStats};
use interpel_notify::{ConsoleNotifier, Notifier, WebhookNotifier};
use interpel_storage::{HttpClientConfig, HttpFetcher, SnapshotStore};
use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub use config::{AppConfig, ConfigFile, RepresentativeEntry};
pub use diff::{DiffConfig, DiffEngine, DiffOutcome, ReplyCountAnomaly};
pub use digest::{compose_digest, MentionBook};

pub const CRATE_NAME: &str = "interpel-sync";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum RepresentativeStatus {
    Completed,
    /// Upstream fetch failed; previous snapshot left untouched.
    FetchFailed(String),
    /// Upstream answered with no records; previous snapshot left untouched.
    NoRecords,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct RepresentativeReport {
    pub rep_id: String,
    pub status: RepresentativeStatus,
    pub fetched: usize,
    pub first_run: bool,
    pub new_answers: usize,
    pub anomalies: Vec<ReplyCountAnomaly>,
    pub stats: Option<SnapshotStats>,
    pub snapshot_path: Option<String>,
    /// `None` when there was nothing to deliver or the run was dry.
    pub delivered: Option<bool>,
    /// A digest was printed instead of posted.
    pub printed: bool,
}

impl RepresentativeReport {
    fn new(rep_id: &str, status: RepresentativeStatus) -> Self {
        Self {
            rep_id: rep_id.to_string(),
            status,
            fetched: 0,
            first_run: false,
            new_answers: 0,
            anomalies: Vec::new(),
            stats: None,
            snapshot_path: None,
            delivered: None,
            printed: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub term: String,
    pub configured: usize,
    pub skipped: usize,
    pub new_answers: usize,
    pub digests_delivered: usize,
    pub digests_failed: usize,
    pub digests_printed: usize,
    pub reports: Vec<RepresentativeReport>,
}

pub struct SyncPipeline {
    config: AppConfig,
    store: SnapshotStore,
    source: Box<dyn InquirySource>,
    directory: Box<dyn RepresentativeLookup>,
    notifier: Box<dyn Notifier>,
    diff: DiffEngine,
    mentions: MentionBook,
    dry_run: bool,
}

impl SyncPipeline {
    pub fn new(config: AppConfig) -> Result<Self> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })?;
        let source = SejmApiSource::new(http.clone(), config.api_base_url.clone());
        let directory = SejmDirectory::new(http, config.api_base_url.clone());
        let notifier = WebhookNotifier::new(config.webhook_url.clone())
            .with_identity(config.bot_username.clone(), config.bot_icon.clone());

        Ok(Self {
            store: SnapshotStore::new(config.data_dir.clone()),
            source: Box::new(source),
            directory: Box::new(directory),
            notifier: Box::new(notifier),
            diff: DiffEngine::new(config.diff),
            mentions: MentionBook::from_entries(&config.representatives),
            config,
            dry_run: false,
        })
    }

    pub fn with_source(mut self, source: Box<dyn InquirySource>) -> Self {
        self.source = source;
        self
    }

    pub fn with_directory(mut self, directory: Box<dyn RepresentativeLookup>) -> Self {
        self.directory = directory;
        self
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Print digests instead of posting them and leave snapshots untouched.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        if dry_run {
            self.notifier = Box::new(ConsoleNotifier);
        }
        self.dry_run = dry_run;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn run_once(&self) -> Result<SyncRunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "sync_run",
            %run_id,
            term = %self.config.term,
            dry_run = self.dry_run
        );

        async move {
            let configured = self.config.representatives.len();
            if configured == 0 {
                warn!("no representatives configured; nothing to do");
            } else {
                info!(
                    representatives = configured,
                    source = self.source.source_id(),
                    data_dir = %self.store.root().display(),
                    "starting sync run"
                );
            }

            let mut announced: HashSet<InquiryKey> = HashSet::new();
            let mut reports = Vec::new();
            let mut skipped = 0usize;

            for entry in &self.config.representatives {
                let Some(rep_id) = entry.rep_id() else {
                    warn!("skipping representative entry without id");
                    skipped += 1;
                    continue;
                };

                let report = match self
                    .process_representative(rep_id, &mut announced)
                    .instrument(info_span!("representative", rep_id))
                    .await
                {
                    Ok(report) => report,
                    Err(err) => {
                        let detail = format!("{err:#}");
                        error!(rep_id, error = %detail, "representative processing failed");
                        RepresentativeReport::new(rep_id, RepresentativeStatus::Failed(detail))
                    }
                };
                reports.push(report);
            }

            let new_answers: usize = reports.iter().map(|r| r.new_answers).sum();
            let digests_delivered = reports.iter().filter(|r| r.delivered == Some(true)).count();
            let digests_failed = reports.iter().filter(|r| r.delivered == Some(false)).count();
            let digests_printed = reports.iter().filter(|r| r.printed).count();
            info!(
                processed = reports.len(),
                skipped,
                new_answers,
                digests_delivered,
                digests_failed,
                digests_printed,
                "sync run finished"
            );

            Ok::<_, anyhow::Error>(SyncRunSummary {
                run_id,
                started_at,
                finished_at: Utc::now(),
                term: self.config.term.clone(),
                configured,
                skipped,
                new_answers,
                digests_delivered,
                digests_failed,
                digests_printed,
                reports,
            })
        }
        .instrument(span)
        .await
    }

    /// One full load/fetch/diff/save/notify cycle. `announced` carries the
    /// keys already reported earlier in this run so co-submitted inquiries
    /// are announced once.
    pub async fn process_representative(
        &self,
        rep_id: &str,
        announced: &mut HashSet<InquiryKey>,
    ) -> Result<RepresentativeReport> {
        let previous = match self.store.load(rep_id).await {
            Ok(previous) => previous,
            Err(err) => {
                warn!(error = %err, "unreadable previous snapshot; treating as first run");
                Vec::new()
            }
        };

        let current = match self.source.fetch_inquiries(&self.config.term, rep_id).await {
            Ok(current) => current,
            Err(err) => {
                warn!(error = %err, "fetching inquiries failed; keeping previous snapshot");
                return Ok(RepresentativeReport::new(
                    rep_id,
                    RepresentativeStatus::FetchFailed(err.to_string()),
                ));
            }
        };
        if current.is_empty() {
            warn!("upstream returned no inquiries; keeping previous snapshot");
            return Ok(RepresentativeReport::new(rep_id, RepresentativeStatus::NoRecords));
        }
        info!(
            fetched = current.len(),
            previous = previous.len(),
            "comparing with previous snapshot"
        );

        let outcome = self.diff.diff(&current, &previous);
        if outcome.first_run {
            info!("first run for this representative; nothing to compare against");
        }

        let mut report = RepresentativeReport::new(rep_id, RepresentativeStatus::Completed);
        report.fetched = current.len();
        report.first_run = outcome.first_run;
        report.anomalies = outcome.anomalies;

        let stats = SnapshotStats::from_records(&current);
        let answered_pct = stats
            .answered_percentage()
            .map(|p| format!("{p:.1}"))
            .unwrap_or_default();
        report.stats = Some(stats);
        if self.dry_run {
            info!("dry run; snapshot not written");
        } else {
            let saved = self
                .store
                .save(rep_id, &current)
                .await
                .with_context(|| format!("saving snapshot for representative {rep_id}"))?;
            info!(
                path = %saved.path.display(),
                total = stats.total,
                answered = stats.answered,
                unanswered = stats.unanswered,
                answered_pct = %answered_pct,
                "snapshot saved"
            );
            report.snapshot_path = Some(saved.path.display().to_string());
        }

        let mut events: Vec<NewAnswer> = outcome
            .events
            .into_iter()
            .filter(|event| announced.insert(event.key.clone()))
            .collect();
        report.new_answers = events.len();
        if events.is_empty() {
            info!("no new answers");
            return Ok(report);
        }

        let ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
        info!(count = events.len(), ids = %ids.join(", "), "new answers detected");

        self.resolve_submitter_names(&mut events).await;
        let mention = self.mentions.for_events(&events);
        if let Some(digest) = compose_digest(&events, Some(mention.as_str())) {
            let delivered = self.notifier.deliver(&digest).await;
            if self.dry_run {
                report.printed = delivered;
            } else {
                report.delivered = Some(delivered);
            }
        }
        Ok(report)
    }

    async fn resolve_submitter_names(&self, events: &mut [NewAnswer]) {
        for event in events.iter_mut() {
            if event.submitter_ids.is_empty() {
                continue;
            }
            event.submitters = self
                .directory
                .display_names(&self.config.term, &event.submitter_ids)
                .await;
        }
    }
}

/// Build the default pipeline from `config` and run it once.
pub async fn run_sync_once(config: AppConfig, dry_run: bool) -> Result<SyncRunSummary> {
    config.validate()?;
    let pipeline = SyncPipeline::new(config)?.with_dry_run(dry_run);
    pipeline.run_once().await
}

/// Markdown overview of the stored snapshot of every configured representative.
pub async fn snapshot_report_markdown(config: &AppConfig) -> Result<String> {
    let store = SnapshotStore::new(config.data_dir.clone());
    let mut lines = vec![
        "# Interpel snapshot summary".to_string(),
        String::new(),
        format!("- term: {}", config.term),
        format!("- data dir: `{}`", store.root().display()),
        String::new(),
    ];

    for entry in &config.representatives {
        let Some(rep_id) = entry.rep_id() else {
            continue;
        };
        lines.push(format!("## Representative {rep_id}"));
        let path = store.snapshot_path(rep_id);
        match store.load(rep_id).await {
            Ok(records) if records.is_empty() => {
                lines.push(format!("- no snapshot at `{}`", path.display()));
            }
            Ok(records) => {
                let stats = SnapshotStats::from_records(&records);
                lines.push(format!("- snapshot: `{}`", path.display()));
                lines.push(format!("- inquiries: {}", stats.total));
                lines.push(format!("- answered: {}", stats.answered));
                lines.push(format!("- unanswered: {}", stats.unanswered));
                if let Some(pct) = stats.answered_percentage() {
                    lines.push(format!("- answered share: {pct:.1}%"));
                }
            }
            Err(err) => lines.push(format!("- unreadable snapshot: {err}")),
        }
        lines.push(String::new());
    }

    Ok(lines.join("\n"))
}

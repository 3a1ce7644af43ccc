use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::ai::{CommentGenerator, CommentRequest};
use crate::grades;
use crate::models::{Mark, Student, TeacherAllocation, Term};
use crate::store::{decode_rows, Filter, Gateway, Order};

/// First-time saves carry one assessment per allocation.
const DEFAULT_ASSESSMENT: &str = "EOT";
/// Used when the current term cannot be resolved; the save still goes
/// through and the row gets repaired when the office fixes the term.
const FALLBACK_TERM_REF: &str = "term-unresolved";

const COMMENT_WEAKEST_PLACEHOLDER: &str = "History";
const COMMENT_TREND_PLACEHOLDER: &str = "improving";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EnginePhase {
    Idle,
    LoadingRoster,
    Ready,
    Saving,
    Error,
}

/// Per-cell save state. `Failed` keeps the entered score on screen and
/// lets the chrome offer retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CellState {
    Clean,
    Dirty,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterRow {
    pub student_id: String,
    pub student_no: String,
    pub full_name: String,
    pub score: Option<f64>,
    pub mark_id: Option<String>,
    pub cell: CellState,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterSnapshot {
    pub phase: EnginePhase,
    pub allocation_id: Option<String>,
    pub rows: Vec<RosterRow>,
    pub grades: Vec<&'static str>,
    pub comment: Option<String>,
    /// Completed roster loads since startup; lets callers detect that a
    /// realtime-triggered refetch has landed.
    pub loads: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOutcome {
    pub student_id: String,
    pub ok: bool,
    pub inserted: bool,
    pub mark_id: Option<String>,
}

#[derive(Debug)]
pub enum CommentOutcome {
    Suggestion(String),
    /// A newer request was issued while this one was in flight.
    Superseded,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("score {0} is outside 0-100")]
    ScoreOutOfRange(f64),
    #[error("student {0} is not on the current roster")]
    UnknownStudent(String),
    #[error("no allocation selected")]
    NoAllocation,
}

struct EngineInner {
    phase: EnginePhase,
    allocation: Option<TeacherAllocation>,
    term_id: Option<String>,
    roster: Vec<RosterRow>,
    comment: Option<String>,
    loads: u64,
    pump: Option<JoinHandle<()>>,
}

/// The marks-entry synchronization engine. One selected allocation at a
/// time; a local edit buffer reconciled against the store by full
/// refetch on every change notification. Reloads are tagged with a
/// sequence number so an older fetch landing late can never clobber a
/// newer one.
pub struct MarksEngine {
    store: Arc<dyn Gateway>,
    generator: Arc<dyn CommentGenerator>,
    inner: Arc<Mutex<EngineInner>>,
    load_seq: Arc<AtomicU64>,
    comment_seq: Arc<AtomicU64>,
    phase_tx: Arc<watch::Sender<EnginePhase>>,
    phase_rx: watch::Receiver<EnginePhase>,
}

impl Clone for MarksEngine {
    fn clone(&self) -> Self {
        MarksEngine {
            store: Arc::clone(&self.store),
            generator: Arc::clone(&self.generator),
            inner: Arc::clone(&self.inner),
            load_seq: Arc::clone(&self.load_seq),
            comment_seq: Arc::clone(&self.comment_seq),
            phase_tx: Arc::clone(&self.phase_tx),
            phase_rx: self.phase_rx.clone(),
        }
    }
}

struct SaveRow {
    student_id: String,
    score: f64,
    mark_id: Option<String>,
}

impl MarksEngine {
    pub fn new(store: Arc<dyn Gateway>, generator: Arc<dyn CommentGenerator>) -> Self {
        let (phase_tx, phase_rx) = watch::channel(EnginePhase::Idle);
        MarksEngine {
            store,
            generator,
            inner: Arc::new(Mutex::new(EngineInner {
                phase: EnginePhase::Idle,
                allocation: None,
                term_id: None,
                roster: Vec::new(),
                comment: None,
                loads: 0,
                pump: None,
            })),
            load_seq: Arc::new(AtomicU64::new(0)),
            comment_seq: Arc::new(AtomicU64::new(0)),
            phase_tx: Arc::new(phase_tx),
            phase_rx,
        }
    }

    fn set_phase(&self, inner: &mut EngineInner, phase: EnginePhase) {
        inner.phase = phase;
        let _ = self.phase_tx.send(phase);
    }

    /// Switch the engine to an allocation: tear down the old change
    /// subscription, clear the edit buffer before anything can observe
    /// it, resolve the current term, and start a guarded roster load.
    pub async fn select_allocation(&self, allocation: TeacherAllocation) {
        let term_id = self.resolve_current_term().await;
        {
            let mut inner = self.inner.lock().await;
            if let Some(pump) = inner.pump.take() {
                pump.abort();
            }
            inner.roster.clear();
            inner.comment = None;
            inner.term_id = term_id;
            inner.allocation = Some(allocation.clone());
            self.set_phase(&mut inner, EnginePhase::LoadingRoster);

            let subscription = self.store.subscribe(
                "marks",
                Some(Filter::eq("teacher_allocation_id", allocation.id.clone())),
            );
            let engine = self.clone();
            inner.pump = Some(tokio::spawn(async move {
                let mut subscription = subscription;
                while let Some(ev) = subscription.next().await {
                    debug!(op = ?ev.op, row = ?ev.row_id(), "marks changed, refetching roster");
                    engine.spawn_reload();
                }
            }));
        }
        self.spawn_reload();
    }

    async fn resolve_current_term(&self) -> Option<String> {
        match self
            .store
            .select("terms", &[Filter::eq("is_current", true)], None, Some(1))
            .await
        {
            Ok(rows) => decode_rows::<Term>("terms", rows)
                .into_iter()
                .next()
                .map(|t| t.id),
            Err(e) => {
                warn!(error = %e, "could not resolve current term");
                None
            }
        }
    }

    fn spawn_reload(&self) {
        let seq = self.load_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let engine = self.clone();
        tokio::spawn(async move { engine.run_reload(seq).await });
    }

    async fn run_reload(&self, seq: u64) {
        let allocation = {
            let mut inner = self.inner.lock().await;
            if seq != self.load_seq.load(Ordering::SeqCst) {
                return;
            }
            let Some(alloc) = inner.allocation.clone() else {
                return;
            };
            self.set_phase(&mut inner, EnginePhase::LoadingRoster);
            alloc
        };

        let students_filters = [
            Filter::eq("current_stream_id", allocation.stream_id.clone()),
            Filter::eq("is_active", true),
        ];
        let students_order = Order::asc("full_name");
        let students_read = self.store.select(
            "students",
            &students_filters,
            Some(&students_order),
            None,
        );
        let marks_filters = [Filter::eq("teacher_allocation_id", allocation.id.clone())];
        let marks_read = self.store.select(
            "marks",
            &marks_filters,
            None,
            None,
        );
        let (students, marks) = tokio::join!(students_read, marks_read);

        // Either read failing degrades to an empty list; the grid still
        // renders and the next notification retries the fetch.
        let students: Vec<Student> = match students {
            Ok(rows) => decode_rows("students", rows),
            Err(e) => {
                warn!(error = %e, "roster fetch failed");
                Vec::new()
            }
        };
        let marks: Vec<Mark> = match marks {
            Ok(rows) => decode_rows("marks", rows),
            Err(e) => {
                warn!(error = %e, "marks fetch failed");
                Vec::new()
            }
        };

        let rows: Vec<RosterRow> = students
            .into_iter()
            .map(|s| {
                let existing = marks.iter().find(|m| m.student_id == s.id);
                RosterRow {
                    student_id: s.id,
                    student_no: s.student_id_human,
                    full_name: s.full_name,
                    score: existing.map(|m| m.score),
                    mark_id: existing.map(|m| m.id.clone()),
                    cell: CellState::Clean,
                }
            })
            .collect();

        let mut inner = self.inner.lock().await;
        if seq != self.load_seq.load(Ordering::SeqCst) {
            debug!(seq, "dropping stale roster load");
            return;
        }
        if inner.allocation.as_ref().map(|a| a.id.as_str()) != Some(allocation.id.as_str()) {
            return;
        }
        inner.roster = rows;
        inner.loads += 1;
        self.set_phase(&mut inner, EnginePhase::Ready);
    }

    /// Buffer-only edit; nothing is persisted until blur or Save All.
    pub async fn enter_score(&self, student_id: &str, score: f64) -> Result<(), EngineError> {
        if !(0.0..=100.0).contains(&score) {
            return Err(EngineError::ScoreOutOfRange(score));
        }
        let mut inner = self.inner.lock().await;
        if inner.allocation.is_none() {
            return Err(EngineError::NoAllocation);
        }
        let row = inner
            .roster
            .iter_mut()
            .find(|r| r.student_id == student_id)
            .ok_or_else(|| EngineError::UnknownStudent(student_id.to_string()))?;
        row.score = Some(score);
        row.cell = CellState::Dirty;
        Ok(())
    }

    /// Persist one student's buffered score (cell blur). Saving a cell
    /// that has no score is a no-op.
    pub async fn save_student(
        &self,
        student_id: &str,
    ) -> Result<Option<SaveOutcome>, EngineError> {
        let (rows, allocation_id, term_id) = {
            let inner = self.inner.lock().await;
            let allocation = inner.allocation.as_ref().ok_or(EngineError::NoAllocation)?;
            let row = inner
                .roster
                .iter()
                .find(|r| r.student_id == student_id)
                .ok_or_else(|| EngineError::UnknownStudent(student_id.to_string()))?;
            let Some(score) = row.score else {
                return Ok(None);
            };
            (
                vec![SaveRow {
                    student_id: row.student_id.clone(),
                    score,
                    mark_id: row.mark_id.clone(),
                }],
                allocation.id.clone(),
                inner.term_id.clone(),
            )
        };
        let mut outcomes = self.persist(rows, allocation_id, term_id).await;
        Ok(Some(outcomes.remove(0)))
    }

    /// Persist every edited row concurrently; rows settle independently
    /// and one failure never aborts the rest.
    pub async fn save_all(&self) -> Result<Vec<SaveOutcome>, EngineError> {
        let (rows, allocation_id, term_id) = {
            let inner = self.inner.lock().await;
            let allocation = inner.allocation.as_ref().ok_or(EngineError::NoAllocation)?;
            let rows: Vec<SaveRow> = inner
                .roster
                .iter()
                .filter(|r| r.cell != CellState::Clean)
                .filter_map(|r| {
                    r.score.map(|score| SaveRow {
                        student_id: r.student_id.clone(),
                        score,
                        mark_id: r.mark_id.clone(),
                    })
                })
                .collect();
            (rows, allocation.id.clone(), inner.term_id.clone())
        };
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.persist(rows, allocation_id, term_id).await)
    }

    async fn persist(
        &self,
        rows: Vec<SaveRow>,
        allocation_id: String,
        term_id: Option<String>,
    ) -> Vec<SaveOutcome> {
        {
            let mut inner = self.inner.lock().await;
            self.set_phase(&mut inner, EnginePhase::Saving);
        }

        let term_ref = term_id.unwrap_or_else(|| FALLBACK_TERM_REF.to_string());
        let saves = rows.iter().map(|row| {
            let store = Arc::clone(&self.store);
            let allocation_id = allocation_id.clone();
            let term_ref = term_ref.clone();
            async move {
                match &row.mark_id {
                    Some(mark_id) => {
                        let patch = json!({
                            "score": row.score,
                            "updated_at": Utc::now().to_rfc3339(),
                        });
                        match store.update("marks", mark_id, patch).await {
                            Ok(()) => SaveOutcome {
                                student_id: row.student_id.clone(),
                                ok: true,
                                inserted: false,
                                mark_id: Some(mark_id.clone()),
                            },
                            Err(e) => {
                                warn!(student = %row.student_id, error = %e, "mark update failed");
                                SaveOutcome {
                                    student_id: row.student_id.clone(),
                                    ok: false,
                                    inserted: false,
                                    mark_id: Some(mark_id.clone()),
                                }
                            }
                        }
                    }
                    None => {
                        let record = json!({
                            "student_id": row.student_id,
                            "teacher_allocation_id": allocation_id,
                            "term_id": term_ref,
                            "assessment_type": DEFAULT_ASSESSMENT,
                            "score": row.score,
                            "updated_at": Utc::now().to_rfc3339(),
                        });
                        match store.insert("marks", record).await {
                            Ok(stored) => SaveOutcome {
                                student_id: row.student_id.clone(),
                                ok: true,
                                inserted: true,
                                mark_id: stored
                                    .get("id")
                                    .and_then(|v| v.as_str())
                                    .map(str::to_string),
                            },
                            Err(e) => {
                                warn!(student = %row.student_id, error = %e, "mark insert failed");
                                SaveOutcome {
                                    student_id: row.student_id.clone(),
                                    ok: false,
                                    inserted: false,
                                    mark_id: None,
                                }
                            }
                        }
                    }
                }
            }
        });
        let outcomes = futures::future::join_all(saves).await;

        let mut inner = self.inner.lock().await;
        for outcome in &outcomes {
            if let Some(row) = inner
                .roster
                .iter_mut()
                .find(|r| r.student_id == outcome.student_id)
            {
                if outcome.ok {
                    // Cache the identifier so the next save updates
                    // instead of inserting a duplicate.
                    if row.mark_id.is_none() {
                        row.mark_id = outcome.mark_id.clone();
                    }
                    row.cell = CellState::Clean;
                } else {
                    // Optimistic buffer: the entered score stays.
                    row.cell = CellState::Failed;
                }
            }
        }
        self.set_phase(&mut inner, EnginePhase::Ready);
        outcomes
    }

    /// Ask the comment gateway for a report-card suggestion. Latest
    /// request wins: a response is retained only if no newer request
    /// was issued while it was in flight.
    pub async fn request_comment(&self, student_id: &str) -> Result<CommentOutcome, EngineError> {
        let request = {
            let inner = self.inner.lock().await;
            let allocation = inner.allocation.as_ref().ok_or(EngineError::NoAllocation)?;
            let row = inner
                .roster
                .iter()
                .find(|r| r.student_id == student_id)
                .ok_or_else(|| EngineError::UnknownStudent(student_id.to_string()))?;
            CommentRequest {
                student_name: row.full_name.clone(),
                average_score: row.score.unwrap_or(0.0),
                best_subject: allocation
                    .subject_name
                    .clone()
                    .unwrap_or_else(|| "this subject".to_string()),
                weakest_subject: COMMENT_WEAKEST_PLACEHOLDER.to_string(),
                trend: COMMENT_TREND_PLACEHOLDER.to_string(),
            }
        };

        let seq = self.comment_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let text = self.generator.generate(&request).await;

        let mut inner = self.inner.lock().await;
        if seq != self.comment_seq.load(Ordering::SeqCst) {
            debug!(seq, "discarding superseded comment suggestion");
            return Ok(CommentOutcome::Superseded);
        }
        inner.comment = Some(text.clone());
        Ok(CommentOutcome::Suggestion(text))
    }

    pub async fn dismiss_comment(&self) {
        let mut inner = self.inner.lock().await;
        inner.comment = None;
    }

    pub async fn snapshot(&self) -> RosterSnapshot {
        let inner = self.inner.lock().await;
        RosterSnapshot {
            phase: inner.phase,
            allocation_id: inner.allocation.as_ref().map(|a| a.id.clone()),
            grades: inner
                .roster
                .iter()
                .map(|r| grades::grade_label(r.score))
                .collect(),
            rows: inner.roster.clone(),
            comment: inner.comment.clone(),
            loads: inner.loads,
        }
    }

    /// Wait until the current load settles. Returns false on timeout;
    /// callers then report the in-flight snapshot as-is.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let mut rx = self.phase_rx.clone();
        tokio::time::timeout(timeout, async move {
            loop {
                if *rx.borrow() == EnginePhase::Ready {
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        })
        .await
        .is_ok()
    }
}

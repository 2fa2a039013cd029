//! Job-level behaviour of the coordinator, driven through fake renderer and
//! model collaborators. No pdfium library or network access is needed.
//!
//! Run with:
//!   cargo test --test coordinator

mod common;

use common::*;
use edgequake_pdf2table::{
    Credentials, ExtractError, ExtractionJob, HistorySink, JobOutcome, ProgressEvent,
};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

const ROWS: &str = r#"[{"sku": "A-1", "qty": 2}]"#;

fn job(docs: &[&str], credentials: (&str, &str)) -> ExtractionJob {
    ExtractionJob::new(
        docs.iter().map(|d| pdf(d)).collect(),
        "One row per line item: sku, qty",
        Credentials::new(credentials.0, credentials.1),
    )
}

async fn run(h: &Harness, job: ExtractionJob) -> JobOutcome {
    assert_ok!(h.coordinator.run(job).await)
}

fn global_percents(outcome: &JobOutcome) -> Vec<f64> {
    outcome
        .events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::GlobalProgress {
                percent_complete, ..
            } => Some(*percent_complete),
            _ => None,
        })
        .collect()
}

// ── Progress ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn global_progress_is_weighted_by_pages() {
    let h = Harness::new(
        FakeRenderer::new().with("a.pdf", 3).with("b.pdf", 5),
        ScriptedModel::answering(ROWS),
    );
    let outcome = run(&h, job(&["a.pdf", "b.pdf"], ALICE)).await;

    let percents = global_percents(&outcome);
    assert_eq!(percents.len(), 8);
    assert_eq!(percents[0], 12.5);
    assert_eq!(outcome.final_global_percent(), 100.0);
    assert!(percents.windows(2).all(|w| w[0] < w[1]));

    let doc_progress = outcome
        .events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::DocumentProgress { .. }))
        .count();
    assert_eq!(doc_progress, 8);
}

#[tokio::test]
async fn per_document_pages_arrive_in_order() {
    let h = Harness::new(
        FakeRenderer::new().with("a.pdf", 4).with("b.pdf", 2),
        ScriptedModel::answering(ROWS),
    );
    let outcome = run(&h, job(&["a.pdf", "b.pdf"], ALICE)).await;

    for name in ["a.pdf", "b.pdf"] {
        let pages: Vec<usize> = outcome
            .events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::DocumentProgress {
                    document_name,
                    page_number,
                    ..
                } if document_name == name => Some(*page_number),
                _ => None,
            })
            .collect();
        let expected: Vec<usize> = (1..=pages.len()).collect();
        assert_eq!(pages, expected, "{name}");
    }
}

#[tokio::test]
async fn job_completed_is_last_and_links_an_existing_file() {
    let h = Harness::new(
        FakeRenderer::new().with("a.pdf", 3).with("b.pdf", 5),
        ScriptedModel::answering(ROWS),
    );
    let outcome = run(&h, job(&["a.pdf", "b.pdf"], ALICE)).await;

    assert!(matches!(
        outcome.events.last(),
        Some(ProgressEvent::JobCompleted(_))
    ));
    let summary = outcome.summary.expect("job completed");
    assert_eq!(summary.total_rows, 8);
    assert_eq!(summary.documents_completed, 2);
    assert_eq!(summary.documents_failed, 0);

    let link = summary.download_link.expect("rows were exported");
    assert!(link.starts_with("/download?filename=output_data_"));
    let file = h.exporter.dir().join(filename_of(&link));
    assert!(file.exists());

    let csv = assert_ok!(h.exporter.fetch(filename_of(&link)).await);
    let csv = String::from_utf8(csv).unwrap();
    let lines: Vec<&str> = csv.split("\r\n").filter(|l| !l.is_empty()).collect();
    assert_eq!(lines[0], "document_name,page_number,sku,qty");
    assert_eq!(lines.len(), 9);
    // Submission order: every a.pdf row before any b.pdf row.
    assert!(lines[1..4].iter().all(|l| l.starts_with("a.pdf,")));
    assert!(lines[4..].iter().all(|l| l.starts_with("b.pdf,")));
}

#[tokio::test]
async fn zero_rows_completes_without_a_file() {
    let h = Harness::new(
        FakeRenderer::new().with("empty.pdf", 2),
        ScriptedModel::answering("[]"),
    );
    let outcome = run(&h, job(&["empty.pdf"], ALICE)).await;

    let summary = outcome.summary.expect("job completed");
    assert_eq!(summary.total_rows, 0);
    assert_eq!(summary.avg_seconds_per_row, 0.0);
    assert!(summary.download_link.is_none());
    assert_eq!(std::fs::read_dir(h.exporter.dir()).unwrap().count(), 0);
}

#[tokio::test]
async fn heterogeneous_schemas_share_a_union_header() {
    let h = Harness::new(
        FakeRenderer::new().with("a.pdf", 1).with("b.pdf", 1),
        ScriptedModel::answering("[]")
            .page("a.pdf", 1, vec![Ok(r#"[{"invoice": "7", "total": 10}]"#.into())])
            .page("b.pdf", 1, vec![Ok(r#"[{"total": 3, "vendor": "Acme, Inc."}]"#.into())]),
    );
    let outcome = run(&h, job(&["a.pdf", "b.pdf"], ALICE)).await;

    let link = outcome.summary.unwrap().download_link.unwrap();
    let csv = String::from_utf8(h.exporter.fetch(filename_of(&link)).await.unwrap()).unwrap();
    assert_eq!(
        csv,
        "document_name,page_number,invoice,total,vendor\r\n\
         a.pdf,1,7,10,\r\n\
         b.pdf,1,,3,\"Acme, Inc.\"\r\n"
    );
}

// ── Validation & authentication ──────────────────────────────────────────────

#[tokio::test]
async fn bad_credentials_fail_before_rendering() {
    let h = Harness::new(
        FakeRenderer::new().with("a.pdf", 2),
        ScriptedModel::answering(ROWS),
    );
    let err = assert_err!(h.coordinator.run(job(&["a.pdf"], ("alice", "nope"))).await);
    assert!(matches!(err, ExtractError::AuthenticationFailed { .. }));
    assert_eq!(h.renderer.render_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.model.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn email_login_is_recorded_under_the_username() {
    let h = Harness::new(FakeRenderer::new(), ScriptedModel::answering(ROWS));
    run(&h, job(&["a.pdf"], ("alice@example.com", ALICE.1))).await;

    let runs = h.history.runs().await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].username, "alice");
}

#[tokio::test]
async fn empty_job_and_blank_prompt_are_rejected() {
    let h = Harness::new(FakeRenderer::new(), ScriptedModel::answering(ROWS));

    let err = assert_err!(h.coordinator.run(job(&[], ALICE)).await);
    assert!(matches!(err, ExtractError::NoDocuments));

    let blank = ExtractionJob::new(vec![pdf("a.pdf")], "  \n", Credentials::new(ALICE.0, ALICE.1));
    let err = assert_err!(h.coordinator.run(blank).await);
    assert!(matches!(err, ExtractError::EmptyPrompt));

    assert_eq!(h.renderer.render_calls.load(Ordering::SeqCst), 0);
}

// ── Failure isolation ────────────────────────────────────────────────────────

#[tokio::test]
async fn render_failure_does_not_stop_siblings() {
    let h = Harness::new(
        FakeRenderer::new()
            .with("good.pdf", 2)
            .unrenderable("bad.pdf", 3),
        ScriptedModel::answering(ROWS),
    );
    let outcome = run(&h, job(&["good.pdf", "bad.pdf"], ALICE)).await;

    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].document_name.as_deref(), Some("bad.pdf"));
    assert!(outcome.failures[0].error.contains("corrupt"));

    let summary = outcome.summary.as_ref().expect("sibling completed");
    assert_eq!(summary.documents_completed, 1);
    assert_eq!(summary.documents_failed, 1);
    assert_eq!(summary.total_rows, 2);

    // bad.pdf counted 3 pages it never attempted.
    assert_eq!(outcome.final_global_percent(), 40.0);
}

#[tokio::test]
async fn count_failure_is_reported_first_and_excluded_from_the_total() {
    let h = Harness::new(
        FakeRenderer::new().with("ok.pdf", 2).uncountable("broken.pdf"),
        ScriptedModel::answering(ROWS),
    );
    let outcome = run(&h, job(&["broken.pdf", "ok.pdf"], ALICE)).await;

    match &outcome.events[0] {
        ProgressEvent::JobFailed { document_name, .. } => {
            assert_eq!(document_name.as_deref(), Some("broken.pdf"));
        }
        other => panic!("expected a leading JobFailed, got {other:?}"),
    }
    assert_eq!(global_percents(&outcome), vec![50.0, 100.0]);
    assert_eq!(h.renderer.render_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn all_documents_failing_ends_without_job_completed() {
    let h = Harness::new(
        FakeRenderer::new().unrenderable("x.pdf", 1).unrenderable("y.pdf", 1),
        ScriptedModel::answering(ROWS),
    );
    let outcome = run(&h, job(&["x.pdf", "y.pdf"], ALICE)).await;

    assert_eq!(outcome.failures.len(), 2);
    assert!(outcome.summary.is_none());
    assert!(outcome
        .events
        .iter()
        .all(|e| matches!(e, ProgressEvent::JobFailed { .. })));
    assert!(h.history.runs().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rate_limited_page_is_skipped_after_the_budget() {
    let h = Harness::new(
        FakeRenderer::new().with("slow.pdf", 2),
        ScriptedModel::answering(ROWS).page("slow.pdf", 2, vec![rate_limited(); 20]),
    );
    let outcome = run(&h, job(&["slow.pdf"], ALICE)).await;

    assert_eq!(outcome.documents.len(), 1);
    let doc = &outcome.documents[0];
    assert_eq!(doc.row_count, 1);
    assert_eq!(doc.skipped_pages, vec![2]);
    // Calls at 0, 2, 6 and 14 s; the 30 s budget stops the fifth.
    assert_eq!(h.model.calls.load(Ordering::SeqCst), 1 + 4);
    assert!(doc.elapsed_seconds >= 30.0);

    let summary = outcome.summary.unwrap();
    assert_eq!(summary.total_rows, 1);
    assert!(summary.download_link.is_some());
}

// ── Concurrency ──────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn documents_wait_out_their_budgets_side_by_side() {
    let h = Harness::new(
        FakeRenderer::new().with("x.pdf", 1).with("y.pdf", 1),
        ScriptedModel::answering(ROWS)
            .page("x.pdf", 1, vec![rate_limited(); 20])
            .page("y.pdf", 1, vec![rate_limited(); 20]),
    );

    let started = Instant::now();
    let outcome = run(&h, job(&["x.pdf", "y.pdf"], ALICE)).await;
    let wall = started.elapsed();

    // One 30 s page budget in total, not one after the other.
    assert!(wall >= Duration::from_secs(30), "{wall:?}");
    assert!(wall < Duration::from_secs(45), "{wall:?}");
    assert_eq!(outcome.documents.len(), 2);
    assert!(outcome.documents.iter().all(|d| d.skipped_pages == vec![1]));
}

#[tokio::test(start_paused = true)]
async fn progress_of_different_documents_interleaves() {
    // a.pdf: page 1 waits out one 2 s backoff, page 2 answers at once.
    // b.pdf: page 1 answers at once, page 2 waits 2 + 4 + 8 s.
    let h = Harness::new(
        FakeRenderer::new().with("a.pdf", 2).with("b.pdf", 2),
        ScriptedModel::answering(ROWS)
            .page("a.pdf", 1, vec![rate_limited()])
            .page("b.pdf", 2, vec![rate_limited(), rate_limited(), rate_limited()]),
    );
    let outcome = run(&h, job(&["a.pdf", "b.pdf"], ALICE)).await;

    let order: Vec<String> = outcome
        .events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::DocumentProgress {
                document_name,
                page_number,
                ..
            } => Some(format!("{document_name}#{page_number}")),
            _ => None,
        })
        .collect();
    assert_eq!(order, vec!["b.pdf#1", "a.pdf#1", "a.pdf#2", "b.pdf#2"]);
    assert_eq!(outcome.summary.unwrap().total_rows, 4);
}

// ── History ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn history_is_recorded_once_per_completed_document() {
    let h = Harness::new(
        FakeRenderer::new()
            .with("a.pdf", 2)
            .with("b.pdf", 1)
            .unrenderable("c.pdf", 1),
        ScriptedModel::answering(ROWS),
    );
    run(&h, job(&["a.pdf", "b.pdf", "c.pdf"], ALICE)).await;

    let mut runs = h.history.runs().await.unwrap();
    runs.sort_by(|x, y| x.document_name.cmp(&y.document_name));
    let names: Vec<&str> = runs.iter().map(|r| r.document_name.as_str()).collect();
    assert_eq!(names, vec!["a.pdf", "b.pdf"]);
    assert_eq!(runs[0].total_rows, 2);
    assert_eq!(runs[1].total_rows, 1);
    assert!(runs.iter().all(|r| r.username == "alice"));
}

#[tokio::test]
async fn duplicate_names_are_disambiguated() {
    let h = Harness::new(FakeRenderer::new(), ScriptedModel::answering(ROWS));
    let outcome = run(&h, job(&["same.pdf", "same.pdf"], ALICE)).await;

    let mut names: Vec<&str> = outcome
        .documents
        .iter()
        .map(|d| d.document_name.as_str())
        .collect();
    names.sort();
    assert_eq!(names, vec!["same (2).pdf", "same.pdf"]);
}

mod common;

use common::*;
use pdf_squeeze::config::OriginalDisposition;
use pdf_squeeze::control::RunControl;
use pdf_squeeze::error::{TransportErrorKind, TransportOp};
use pdf_squeeze::path_matcher::LogicalFolder;
use pdf_squeeze::pipeline::RunRequest;
use pdf_squeeze::storage::{MemoryStorage, RemoteEntry};
use std::sync::Arc;

fn request(settings: &pdf_squeeze::Settings) -> RunRequest {
    RunRequest::from_settings(settings)
}

fn storage_with(files: &[(&str, Vec<u8>)]) -> Arc<MemoryStorage> {
    let storage = Arc::new(MemoryStorage::new());
    for (path, bytes) in files {
        storage.insert(path, bytes.clone());
    }
    storage
}

#[tokio::test]
async fn test_compressible_file_is_replaced_and_backed_up() {
    let original = pdf_bytes(1, 200_000);
    let small = pdf_bytes(1, 10_000);
    let storage = storage_with(&[("/pdf/Input/report.pdf", original.clone())]);
    let gs = ScriptedStrategy::new("ghostscript", Script::Emit(small.clone()));
    let qpdf = ScriptedStrategy::new("qpdf", Script::Emit(small.clone()));
    let settings = test_settings();

    let stats = test_pipeline(&storage, settings.clone(), &[gs.clone(), qpdf.clone()])
        .run(&request(&settings))
        .await
        .unwrap();

    assert_eq!(stats.processed, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.files[0].outcome, "compressed");
    assert_eq!(stats.files[0].strategy.as_deref(), Some("ghostscript"));
    assert_eq!(storage.get("/pdf/Compressed/report.pdf"), Some(small.clone()));
    assert_eq!(storage.get("/pdf/Backup/report.pdf"), Some(original.clone()));
    assert!(!storage.contains("/pdf/Input/report.pdf"));
    assert_eq!(stats.bytes_before, original.len() as u64);
    assert_eq!(stats.bytes_after, small.len() as u64);

    // The first passing backend ends the search.
    assert_eq!(gs.calls(), 1);
    assert_eq!(qpdf.calls(), 0);
}

#[tokio::test]
async fn test_insufficient_saving_leaves_original_untouched() {
    let original = pdf_bytes(1, 200_000);
    let barely_smaller = pdf_bytes(1, 196_000);
    let storage = storage_with(&[("/pdf/Input/report.pdf", original.clone())]);
    let gs = ScriptedStrategy::new("ghostscript", Script::Emit(barely_smaller.clone()));
    let qpdf = ScriptedStrategy::new("qpdf", Script::Emit(barely_smaller));
    let settings = test_settings();

    let stats = test_pipeline(&storage, settings.clone(), &[gs.clone(), qpdf.clone()])
        .run(&request(&settings))
        .await
        .unwrap();

    assert_eq!(stats.skipped_no_improvement, 1);
    assert_eq!(stats.processed, 0);
    assert!(!stats.has_failures());
    assert_eq!(storage.get("/pdf/Input/report.pdf"), Some(original));
    assert!(!storage.contains("/pdf/Compressed/report.pdf"));
    assert!(!storage.contains("/pdf/Backup/report.pdf"));
    assert_eq!(gs.calls(), 1);
    assert_eq!(qpdf.calls(), 1);
    assert_eq!(stats.files[0].attempts.len(), 2);
}

#[tokio::test]
async fn test_skip_pattern_keeps_file_out_of_candidates() {
    let storage = storage_with(&[
        ("/pdf/Input/report_compressed.pdf", pdf_bytes(1, 200_000)),
        ("/pdf/Input/other.pdf", pdf_bytes(1, 200_000)),
    ]);
    let gs = ScriptedStrategy::new("ghostscript", Script::Emit(pdf_bytes(1, 1_000)));
    let settings = test_settings();
    let pipeline = test_pipeline(&storage, settings.clone(), &[gs]);

    let set = pipeline.scan(10).await.unwrap();
    assert_eq!(set.candidates.len(), 1);
    assert_eq!(set.candidates[0].path, "/pdf/Input/other.pdf");
    assert!(set
        .ineligible
        .iter()
        .any(|(entry, _)| entry.path.ends_with("report_compressed.pdf")));

    let stats = pipeline.run(&request(&settings)).await.unwrap();
    assert_eq!(stats.skipped_ineligible, 1);
    assert_eq!(stats.processed, 1);
    assert!(storage.contains("/pdf/Input/report_compressed.pdf"));
}

#[tokio::test]
async fn test_failed_upload_rolls_back_and_keeps_original() {
    let original = pdf_bytes(1, 200_000);
    let storage = storage_with(&[("/pdf/Input/report.pdf", original.clone())]);
    storage.fail(
        TransportOp::Upload,
        Some("/pdf/Compressed"),
        TransportErrorKind::QuotaExceeded,
    );
    let gs = ScriptedStrategy::new("ghostscript", Script::Emit(pdf_bytes(1, 10_000)));
    let settings = test_settings();

    let stats = test_pipeline(&storage, settings.clone(), &[gs])
        .run(&request(&settings))
        .await
        .unwrap();

    assert_eq!(stats.failed, 1);
    assert_eq!(stats.rolled_back, 1);
    assert!(stats.has_failures());
    assert_eq!(stats.files[0].rolled_back, Some(true));
    assert_eq!(storage.get("/pdf/Input/report.pdf"), Some(original));
    assert!(!storage.contains("/pdf/Compressed/report.pdf"));
}

#[tokio::test]
async fn test_partial_upload_leaves_existing_output_alone() {
    let original = pdf_bytes(1, 200_000);
    let earlier = pdf_bytes(1, 5_000);
    let storage = storage_with(&[
        ("/pdf/Input/report.pdf", original.clone()),
        ("/pdf/Compressed/report.pdf", earlier.clone()),
    ]);
    storage.fail_upload_partially("/pdf/Compressed/", 100);
    let gs = ScriptedStrategy::new("ghostscript", Script::Emit(pdf_bytes(1, 10_000)));
    let settings = test_settings();

    let stats = test_pipeline(&storage, settings.clone(), &[gs])
        .run(&request(&settings))
        .await
        .unwrap();

    assert_eq!(stats.failed, 1);
    assert_eq!(stats.files[0].rolled_back, Some(true));
    assert_eq!(storage.get("/pdf/Compressed/report.pdf"), Some(earlier));
    assert_eq!(storage.get("/pdf/Input/report.pdf"), Some(original));
    assert!(!storage.contains("/pdf/Compressed/report.pdf.partial"));
}

#[tokio::test]
async fn test_failed_backup_uploads_nothing() {
    let original = pdf_bytes(1, 200_000);
    let storage = storage_with(&[("/pdf/Input/report.pdf", original.clone())]);
    storage.fail(
        TransportOp::Upload,
        Some("/pdf/Backup"),
        TransportErrorKind::QuotaExceeded,
    );
    let gs = ScriptedStrategy::new("ghostscript", Script::Emit(pdf_bytes(1, 10_000)));
    let settings = test_settings();

    let stats = test_pipeline(&storage, settings.clone(), &[gs])
        .run(&request(&settings))
        .await
        .unwrap();

    assert_eq!(stats.failed, 1);
    assert_eq!(stats.files[0].rolled_back, Some(true));
    assert_eq!(storage.paths(), vec!["/pdf/Input/report.pdf".to_string()]);
    assert_eq!(storage.get("/pdf/Input/report.pdf"), Some(original));
    assert!(!storage
        .operations()
        .iter()
        .any(|op| op.op == TransportOp::Upload && op.path.starts_with("/pdf/Compressed")));
}

#[tokio::test]
async fn test_archive_disposition_moves_original() {
    let original = pdf_bytes(1, 200_000);
    let small = pdf_bytes(1, 10_000);
    let storage = storage_with(&[("/pdf/Input/report.pdf", original.clone())]);
    let gs = ScriptedStrategy::new("ghostscript", Script::Emit(small.clone()));
    let mut settings = test_settings();
    settings.folders.archive = Some(LogicalFolder::new("/pdf/Processed"));
    settings.safety.original_disposition = OriginalDisposition::Archive;

    let stats = test_pipeline(&storage, settings.clone(), &[gs])
        .run(&request(&settings))
        .await
        .unwrap();

    assert_eq!(stats.processed, 1);
    assert_eq!(
        storage.paths(),
        vec![
            "/pdf/Backup/report.pdf".to_string(),
            "/pdf/Compressed/report.pdf".to_string(),
            "/pdf/Processed/report.pdf".to_string(),
        ]
    );
    assert_eq!(storage.get("/pdf/Processed/report.pdf"), Some(original));
    assert_eq!(storage.get("/pdf/Compressed/report.pdf"), Some(small));
}

#[tokio::test]
async fn test_failed_archive_move_keeps_both_copies() {
    let original = pdf_bytes(1, 200_000);
    let small = pdf_bytes(1, 10_000);
    let storage = storage_with(&[("/pdf/Input/report.pdf", original.clone())]);
    storage.fail(TransportOp::Move, Some("/pdf/Input"), TransportErrorKind::Transient);
    let gs = ScriptedStrategy::new("ghostscript", Script::Emit(small.clone()));
    let mut settings = test_settings();
    settings.folders.archive = Some(LogicalFolder::new("/pdf/Processed"));
    settings.safety.original_disposition = OriginalDisposition::Archive;

    let stats = test_pipeline(&storage, settings.clone(), &[gs])
        .run(&request(&settings))
        .await
        .unwrap();

    assert_eq!(stats.failed, 1);
    assert_eq!(stats.rolled_back, 0);
    assert_eq!(stats.files[0].rolled_back, Some(false));
    assert_eq!(storage.get("/pdf/Input/report.pdf"), Some(original));
    assert_eq!(storage.get("/pdf/Compressed/report.pdf"), Some(small));
    assert!(!storage.contains("/pdf/Processed/report.pdf"));
}

#[tokio::test]
async fn test_crashed_worker_still_records_its_file() {
    let original = pdf_bytes(1, 200_000);
    let storage = storage_with(&[("/pdf/Input/report.pdf", original.clone())]);
    let gs = ScriptedStrategy::new("ghostscript", Script::Panic);
    let settings = test_settings();

    let stats = test_pipeline(&storage, settings.clone(), &[gs])
        .run(&request(&settings))
        .await
        .unwrap();

    assert_eq!(stats.failed, 1);
    assert_eq!(stats.files.len(), 1);
    assert_eq!(stats.files[0].path, "/pdf/Input/report.pdf");
    assert_eq!(stats.files[0].outcome, "failed");
    assert_eq!(stats.files[0].rolled_back, Some(false));
    assert!(!stats.errors.is_empty());
    assert_eq!(storage.get("/pdf/Input/report.pdf"), Some(original));
}

#[tokio::test]
async fn test_failed_delete_keeps_both_copies() {
    let original = pdf_bytes(1, 200_000);
    let small = pdf_bytes(1, 10_000);
    let storage = storage_with(&[("/pdf/Input/report.pdf", original.clone())]);
    storage.fail(TransportOp::Delete, Some("/pdf/Input"), TransportErrorKind::Transient);
    let gs = ScriptedStrategy::new("ghostscript", Script::Emit(small.clone()));
    let settings = test_settings();

    let stats = test_pipeline(&storage, settings.clone(), &[gs])
        .run(&request(&settings))
        .await
        .unwrap();

    assert_eq!(stats.failed, 1);
    assert_eq!(stats.rolled_back, 0);
    assert_eq!(storage.get("/pdf/Input/report.pdf"), Some(original));
    assert_eq!(storage.get("/pdf/Compressed/report.pdf"), Some(small));
}

#[tokio::test]
async fn test_partial_in_place_upload_restores_original() {
    let original = pdf_bytes(1, 200_000);
    let storage = storage_with(&[("/pdf/Input/report.pdf", original.clone())]);
    storage.fail_upload_partially("/pdf/Input/report.pdf", 100);
    let gs = ScriptedStrategy::new("ghostscript", Script::Emit(pdf_bytes(1, 10_000)));
    let mut settings = test_settings();
    settings.folders.output = LogicalFolder::new("/pdf/Input");

    let stats = test_pipeline(&storage, settings.clone(), &[gs])
        .run(&request(&settings))
        .await
        .unwrap();

    assert_eq!(stats.failed, 1);
    assert_eq!(stats.rolled_back, 1);
    assert_eq!(storage.get("/pdf/Input/report.pdf"), Some(original.clone()));
    assert_eq!(storage.get("/pdf/Backup/report.pdf"), Some(original));
}

#[tokio::test]
async fn test_second_run_over_outputs_is_a_no_op() {
    let storage = storage_with(&[
        ("/pdf/Input/a.pdf", pdf_bytes(1, 150_000)),
        ("/pdf/Input/b.pdf", pdf_bytes(2, 180_000)),
    ]);
    let one_page = ScriptedStrategy::new("lopdf", Script::Emit(pdf_bytes(1, 5_000)));
    let two_pages = ScriptedStrategy::new("qpdf", Script::Emit(pdf_bytes(2, 5_000)));
    let mut settings = test_settings();
    settings.folders.output = LogicalFolder::new("/pdf/Input");
    settings.filters.output_suffix = "_compressed".to_string();
    let pipeline = test_pipeline(&storage, settings.clone(), &[one_page, two_pages]);

    let first = pipeline.run(&request(&settings)).await.unwrap();
    assert_eq!(first.processed, 2, "{:?}", first.files);
    assert!(storage.contains("/pdf/Input/a_compressed.pdf"));
    assert!(storage.contains("/pdf/Input/b_compressed.pdf"));

    let second = pipeline.run(&request(&settings)).await.unwrap();
    assert_eq!(second.processed, 0);
    assert_eq!(second.candidates, 0);
    assert_eq!(second.skipped_ineligible, 2);
    assert!(!second.has_failures());
}

#[tokio::test]
async fn test_duplicate_listing_entries_dispatch_once() {
    let storage = storage_with(&[("/pdf/Input/report.pdf", pdf_bytes(1, 200_000))]);
    let size = storage.get("/pdf/Input/report.pdf").unwrap().len() as u64;
    storage.add_listing_entry(RemoteEntry::file("/PDF/input//Report.pdf", size));
    let gs = ScriptedStrategy::new("ghostscript", Script::Emit(pdf_bytes(1, 10_000)));
    let settings = test_settings();

    let stats = test_pipeline(&storage, settings.clone(), &[gs.clone()])
        .run(&request(&settings))
        .await
        .unwrap();

    assert_eq!(gs.calls(), 1);
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.candidates, 1);
}

#[tokio::test]
async fn test_stop_request_skips_in_flight_and_queued_files() {
    let storage = storage_with(&[
        ("/pdf/Input/a.pdf", pdf_bytes(1, 100_000)),
        ("/pdf/Input/b.pdf", pdf_bytes(1, 200_000)),
    ]);
    let control = RunControl::new(Some(RUN_TIMEOUT));
    let gs = ScriptedStrategy::new(
        "ghostscript",
        Script::EmitAndStop(pdf_bytes(1, 1_000), control.clone()),
    );
    let mut settings = test_settings();
    settings.limits.workers = 1;

    let stats = test_pipeline(&storage, settings.clone(), &[gs.clone()])
        .run_with_control(&request(&settings), control)
        .await
        .unwrap();

    assert_eq!(stats.skipped_timeout, 2);
    assert_eq!(stats.processed, 0);
    assert_eq!(gs.calls(), 1);
    assert!(storage
        .operations()
        .iter()
        .all(|op| op.op != TransportOp::Upload && op.op != TransportOp::Delete));
    assert!(storage.contains("/pdf/Input/a.pdf"));
    assert!(storage.contains("/pdf/Input/b.pdf"));
}

#[tokio::test]
async fn test_dry_run_changes_nothing() {
    let original = pdf_bytes(1, 200_000);
    let storage = storage_with(&[("/pdf/Input/report.pdf", original.clone())]);
    let gs = ScriptedStrategy::new("ghostscript", Script::Emit(pdf_bytes(1, 10_000)));
    let settings = test_settings();
    let mut dry = request(&settings);
    dry.dry_run = true;

    let stats = test_pipeline(&storage, settings.clone(), &[gs])
        .run(&dry)
        .await
        .unwrap();

    assert!(stats.dry_run);
    assert_eq!(stats.would_compress, 1);
    assert_eq!(stats.processed, 0);
    assert!(stats.bytes_saved() > 0);
    assert_eq!(storage.paths(), vec!["/pdf/Input/report.pdf".to_string()]);
    assert!(storage
        .operations()
        .iter()
        .all(|op| matches!(op.op, TransportOp::List | TransportOp::Download)));
}

#[tokio::test]
async fn test_file_cap_defers_largest_files() {
    let storage = storage_with(&[
        ("/pdf/Input/large.pdf", pdf_bytes(1, 300_000)),
        ("/pdf/Input/medium.pdf", pdf_bytes(1, 200_000)),
        ("/pdf/Input/small.pdf", pdf_bytes(1, 100_000)),
    ]);
    let gs = ScriptedStrategy::new("ghostscript", Script::Emit(pdf_bytes(1, 1_000)));
    let mut settings = test_settings();
    settings.limits.max_files_per_run = 2;

    let stats = test_pipeline(&storage, settings.clone(), &[gs.clone()])
        .run(&request(&settings))
        .await
        .unwrap();

    assert_eq!(stats.candidates, 3);
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.deferred, 1);
    assert_eq!(gs.calls(), 2);
    assert!(storage.contains("/pdf/Input/large.pdf"));
    assert!(stats
        .files
        .iter()
        .any(|f| f.path == "/pdf/Input/large.pdf" && f.outcome == "deferred"));
}

#[tokio::test]
async fn test_broken_backends_fall_through_to_working_one() {
    let storage = storage_with(&[("/pdf/Input/report.pdf", pdf_bytes(3, 200_000))]);
    let broken = ScriptedStrategy::new("ghostscript", Script::Fail);
    let missing = ScriptedStrategy::new("qpdf", Script::Unavailable);
    let wrong_pages = ScriptedStrategy::new("pages", Script::Emit(pdf_bytes(1, 1_000)));
    let good = ScriptedStrategy::new("lopdf", Script::Emit(pdf_bytes(3, 1_000)));
    let settings = test_settings();

    let stats = test_pipeline(
        &storage,
        settings.clone(),
        &[broken.clone(), missing.clone(), wrong_pages.clone(), good.clone()],
    )
    .run(&request(&settings))
    .await
    .unwrap();

    assert_eq!(stats.processed, 1);
    assert_eq!(stats.files[0].strategy.as_deref(), Some("lopdf"));
    assert_eq!(stats.files[0].attempts.len(), 4);
    assert_eq!(broken.calls(), 1);
    assert_eq!(missing.calls(), 0);
    assert_eq!(wrong_pages.calls(), 1);
}

#[tokio::test]
async fn test_listing_failure_aborts_run() {
    let storage = storage_with(&[("/pdf/Input/report.pdf", pdf_bytes(1, 200_000))]);
    storage.fail(TransportOp::List, None, TransportErrorKind::AuthExpired);
    let gs = ScriptedStrategy::new("ghostscript", Script::Emit(pdf_bytes(1, 1_000)));
    let settings = test_settings();

    let result = test_pipeline(&storage, settings.clone(), &[gs])
        .run(&request(&settings))
        .await;
    assert!(matches!(result, Err(pdf_squeeze::SqueezeError::Listing(_))));
}

#[tokio::test]
async fn test_stats_json_round_trips() {
    let storage = storage_with(&[("/pdf/Input/report.pdf", pdf_bytes(1, 200_000))]);
    let gs = ScriptedStrategy::new("ghostscript", Script::Emit(pdf_bytes(1, 10_000)));
    let settings = test_settings();
    let stats = test_pipeline(&storage, settings.clone(), &[gs])
        .run(&request(&settings))
        .await
        .unwrap();

    let dir = create_temp_directory();
    let path = dir.path().join("out").join("stats.json");
    stats.write_json(&path).unwrap();

    let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(value["processed"], 1);
    assert_eq!(value["level"], "medium");
    assert_eq!(value["files"][0]["outcome"], "compressed");
}

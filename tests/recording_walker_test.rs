mod common;

use common::{group, init_logger, leaf, leaf_without_menu, EchoModel, FakePage, FakeRow, Log};
use std::collections::HashSet;
use std::path::Path;

use engagement_harvester::recordings::{LeafOutcome, RecordingWalker};
use engagement_harvester::{AutomationError, DownloadRecord, RecordingNode, Result};

struct Visit {
    names: Vec<String>,
    skipped: Vec<String>,
}

async fn walk(
    rows: Vec<FakeRow>,
    downloaded: &[&str],
    dir: &Path,
) -> (Result<Vec<DownloadRecord>>, Visit, Log) {
    walk_model(|m| m, rows, downloaded, dir).await
}

async fn walk_model(
    configure: impl FnOnce(EchoModel) -> EchoModel,
    rows: Vec<FakeRow>,
    downloaded: &[&str],
    dir: &Path,
) -> (Result<Vec<DownloadRecord>>, Visit, Log) {
    let log = Log::default();
    let model = configure(EchoModel::new(rows, log.clone()));
    let page = FakePage::new(model, log.clone());
    let known: HashSet<String> = downloaded.iter().map(|s| s.to_string()).collect();
    let mut visit = Visit {
        names: Vec::new(),
        skipped: Vec::new(),
    };

    let result = {
        let walker = RecordingWalker::new(&page, dir);
        let mut on_leaf = |node: &RecordingNode, outcome: &LeafOutcome| {
            visit.names.push(node.name.clone());
            if *outcome == LeafOutcome::AlreadyDownloaded {
                visit.skipped.push(node.name.clone());
            }
        };
        walker
            .walk(&|name: &str| known.contains(name), &mut on_leaf)
            .await
    };
    (result, visit, log)
}

#[tokio::test(start_paused = true)]
async fn leaves_are_visited_in_display_order() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let rows = vec![
        leaf("Lecture 1"),
        group("Week 2", &["Lecture 2a", "Lecture 2b"]),
        leaf("Lecture 3"),
    ];

    let (result, visit, log) = walk(rows, &["Lecture 1"], dir.path()).await;
    let records = result.unwrap();

    assert_eq!(
        visit.names,
        vec!["Lecture 1", "Lecture 2a", "Lecture 2b", "Lecture 3"]
    );
    assert_eq!(visit.skipped, vec!["Lecture 1"]);
    assert_eq!(
        records,
        vec![
            DownloadRecord {
                name: "Lecture 2a".into(),
                path: dir.path().join("Lecture 2a.csv"),
            },
            DownloadRecord {
                name: "Lecture 2b".into(),
                path: dir.path().join("Lecture 2b.csv"),
            },
            DownloadRecord {
                name: "Lecture 3".into(),
                path: dir.path().join("Lecture 3.csv"),
            },
        ]
    );
    assert!(records.iter().all(|r| r.path.exists()));
    assert_eq!(
        log.with_prefix("download "),
        vec![
            "download Lecture 2a.csv",
            "download Lecture 2b.csv",
            "download Lecture 3.csv"
        ]
    );
    assert_eq!(log.count("reload"), 3);
}

#[tokio::test(start_paused = true)]
async fn already_downloaded_leaf_is_not_touched() {
    let dir = tempfile::tempdir().unwrap();
    let (result, _visit, log) = walk(
        vec![leaf("Lecture 1"), leaf("Lecture 2")],
        &["Lecture 1"],
        dir.path(),
    )
    .await;

    assert_eq!(result.unwrap().len(), 1);
    assert_eq!(log.count("menu Lecture 1"), 0);
    assert_eq!(log.count("menu Lecture 2"), 1);
}

#[tokio::test(start_paused = true)]
async fn duplicate_titles_download_once() {
    let dir = tempfile::tempdir().unwrap();
    let rows = vec![leaf("Lecture 1"), group("Repeats", &["Lecture 1"])];

    let (result, visit, log) = walk(rows, &[], dir.path()).await;

    assert_eq!(result.unwrap().len(), 1);
    assert_eq!(visit.names, vec!["Lecture 1", "Lecture 1"]);
    assert_eq!(visit.skipped, vec!["Lecture 1"]);
    assert_eq!(log.count("menu Lecture 1"), 1);
}

#[tokio::test(start_paused = true)]
async fn groups_are_expanded_again_after_each_reload() {
    let dir = tempfile::tempdir().unwrap();
    let rows = vec![
        group("Week 1", &["1a", "1b"]),
        group("Empty week", &[]),
        leaf("Lecture 3"),
    ];

    let (result, visit, log) = walk(rows, &[], dir.path()).await;

    assert_eq!(result.unwrap().len(), 3);
    assert_eq!(visit.names, vec!["1a", "1b", "Lecture 3"]);
    // Once per pass: 1a, 1b, then the drained check after the second reload.
    assert_eq!(log.count("expand Week 1"), 3);
    assert_eq!(log.count("expand Empty week"), 1);
}

#[tokio::test(start_paused = true)]
async fn missing_media_menu_aborts_the_walk() {
    let dir = tempfile::tempdir().unwrap();
    let rows = vec![leaf("Lecture 1"), leaf_without_menu("Broken"), leaf("Lecture 3")];

    let (result, visit, log) = walk(rows, &[], dir.path()).await;

    assert!(matches!(result, Err(AutomationError::ElementMissing { .. })));
    assert_eq!(visit.names, vec!["Lecture 1"]);
    assert_eq!(log.count("menu Lecture 3"), 0);
}

#[tokio::test(start_paused = true)]
async fn rows_added_after_a_reload_are_still_visited() {
    let dir = tempfile::tempdir().unwrap();
    let rows = vec![leaf("Lecture 1"), group("Week 2", &["2a"])];

    let (result, visit, log) = walk_model(
        |m| m.with_late_rows(vec![leaf("Lecture 3")]).with_late_child(1, "2b"),
        rows,
        &[],
        dir.path(),
    )
    .await;

    assert_eq!(result.unwrap().len(), 4);
    assert_eq!(visit.names, vec!["Lecture 1", "2a", "2b", "Lecture 3"]);
    assert_eq!(log.count("expand Week 2"), 3);
    assert_eq!(log.count("menu Lecture 3"), 1);
}

#[tokio::test(start_paused = true)]
async fn hidden_children_do_not_count_as_expanded() {
    let dir = tempfile::tempdir().unwrap();
    let rows = vec![group("Week 1", &["1a", "1b"])];

    let (result, visit, log) =
        walk_model(EchoModel::hidden_when_collapsed, rows, &[], dir.path()).await;

    assert_eq!(result.unwrap().len(), 2);
    assert_eq!(visit.names, vec!["1a", "1b"]);
    assert_eq!(log.count("expand Week 1"), 3);
}

#[tokio::test(start_paused = true)]
async fn stalled_reload_fails_the_walk() {
    let dir = tempfile::tempdir().unwrap();
    let rows = vec![leaf("Lecture 1"), leaf("Lecture 2")];

    let (result, visit, log) =
        walk_model(EchoModel::stall_reloads, rows, &[], dir.path()).await;

    match result {
        Err(AutomationError::PageLoadFailure { url, reason }) => {
            assert!(url.contains("external_tools"));
            assert!(reason.contains("DOMContentLoaded"));
        }
        other => panic!("expected a page load failure, got {other:?}"),
    }
    assert!(dir.path().join("Lecture 1.csv").exists());
    assert!(visit.names.is_empty());
    assert_eq!(log.count("menu Lecture 2"), 0);
}

mod common;
use common::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failing_source_does_not_affect_others() {
    let engine = MemoryEngine::new()
        .with_source("good0", ScriptedSource::new(["n"]).counting_rows(5))
        .with_source("down", ScriptedSource::new(["n"]).fail_open("connection refused"))
        .with_source("good1", ScriptedSource::new(["n"]).counting_rows(5));

    for schedule in [Schedule::Sequential, Schedule::Concurrent] {
        let (report, buf) = run_sources(
            &engine,
            &["good0", "down", "good1"],
            0,
            schedule,
            OutputFormat::Csv,
        )
        .await;
        assert!(!report.is_success());
        let failed: Vec<SourceId> = report.failures().map(|(id, _)| *id).collect();
        assert_eq!(failed, vec![SourceId(1)]);
        assert!(matches!(
            report.outcomes[1].1,
            ExecutionOutcome::Failed(SourceError::Connection(_))
        ));

        let (headers, rows) = split_header(csv_rows(&buf));
        assert_eq!(headers.len(), 1);
        assert_eq!(rows.len(), 10);
        assert!(rows.iter().all(|r| r[0] != "source_1"));
    }
}

#[tokio::test]
async fn test_all_sources_failing_writes_nothing() {
    let engine = MemoryEngine::new()
        .with_source("a", ScriptedSource::new(["n"]).fail_ping("no route"))
        .with_source("b", ScriptedSource::new(["n"]).fail_query("syntax error"));
    let (report, buf) = run_sources(&engine, &["a", "b"], 0, Schedule::Sequential, OutputFormat::Table).await;
    assert!(!report.is_success());
    assert_eq!(report.failures().count(), 2);
    assert!(!report.write.header_written);
    assert_eq!(buf.contents(), "");
}

#[tokio::test]
async fn test_no_sources_is_success_with_empty_output() {
    let engine = MemoryEngine::new();
    let (report, buf) = run_sources(&engine, &[], 0, Schedule::Concurrent, OutputFormat::Csv).await;
    assert!(report.is_success());
    assert_eq!(buf.contents(), "");
}

#[tokio::test]
async fn test_first_header_wins_with_mixed_schemas() {
    let engine = MemoryEngine::new()
        .with_source("a", ScriptedSource::new(["id", "name"]).row(["1", "x"]))
        .with_source("b", ScriptedSource::new(["other"]).row(["2"]));
    let (report, buf) = run_sources(&engine, &["a", "b"], 0, Schedule::Sequential, OutputFormat::Csv).await;
    assert!(report.is_success());
    let (headers, rows) = split_header(csv_rows(&buf));
    assert_eq!(headers, vec![vec!["DB_№", "id", "name"]]);
    // Rows are never reshaped to fit the header.
    assert_eq!(rows[1], vec!["source_1", "2"]);
}

#[tokio::test]
async fn test_mid_stream_failure_keeps_emitted_rows() {
    let engine = MemoryEngine::new().with_source(
        "a",
        ScriptedSource::new(["n"])
            .counting_rows(6)
            .fail_at_row(4, RowFailure::Fetch("connection reset".into())),
    );
    let (report, buf) = run_sources(&engine, &["a"], 0, Schedule::Sequential, OutputFormat::Csv).await;
    assert!(matches!(
        report.outcomes[0].1,
        ExecutionOutcome::Failed(SourceError::Iteration(_))
    ));
    let (_, rows) = split_header(csv_rows(&buf));
    assert_eq!(rows.len(), 4);
}

#[tokio::test]
async fn test_decode_failure_is_a_scan_error() {
    let engine = MemoryEngine::new().with_source(
        "a",
        ScriptedSource::new(["n"])
            .counting_rows(3)
            .fail_at_row(1, RowFailure::Decode("bad bytes".into())),
    );
    let (report, buf) = run_sources(&engine, &["a"], 0, Schedule::Sequential, OutputFormat::Csv).await;
    assert!(matches!(
        report.outcomes[0].1,
        ExecutionOutcome::Failed(SourceError::Scan(_))
    ));
    let (_, rows) = split_header(csv_rows(&buf));
    assert_eq!(rows, vec![vec!["source_0", "0"]]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_connection_and_cursor_is_released() {
    let engine = MemoryEngine::new()
        .with_source("a", ScriptedSource::new(["n"]).counting_rows(10))
        .with_source("b", ScriptedSource::new(["n"]).counting_rows(3))
        .with_source(
            "c",
            ScriptedSource::new(["n"])
                .counting_rows(3)
                .fail_at_row(2, RowFailure::Decode("bad".into())),
        )
        .with_source("d", ScriptedSource::new(["n"]).fail_query("denied"));
    let stats = engine.stats();
    let (report, _) = run_sources(&engine, &["a", "b", "c", "d"], 5, Schedule::Concurrent, OutputFormat::Csv).await;
    assert_eq!(report.failures().count(), 3);
    assert_eq!(MemoryStats::get(&stats.connections_opened), 4);
    assert_eq!(MemoryStats::get(&stats.connections_closed), 4);
    assert_eq!(MemoryStats::get(&stats.cursors_opened), 3);
    assert_eq!(MemoryStats::get(&stats.cursors_released), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_panicking_source_is_isolated() {
    let engine = MemoryEngine::new()
        .with_source("good0", ScriptedSource::new(["n"]).counting_rows(3))
        .with_source("buggy", ScriptedSource::new(["n"]).panic_on_query("driver bug"))
        .with_source("good1", ScriptedSource::new(["n"]).counting_rows(3));
    let stats = engine.stats();

    for schedule in [Schedule::Sequential, Schedule::Concurrent] {
        let (report, buf) = run_sources(
            &engine,
            &["good0", "buggy", "good1"],
            0,
            schedule,
            OutputFormat::Csv,
        )
        .await;
        assert!(!report.is_success());
        match &report.outcomes[1].1 {
            ExecutionOutcome::Failed(SourceError::Panicked(msg)) => {
                assert!(msg.contains("driver bug"), "{:?}", schedule)
            }
            other => panic!("{:?}: unexpected outcome {:?}", schedule, other),
        }
        assert!(report.outcomes[0].1.is_completed());
        assert!(report.outcomes[2].1.is_completed());

        let (headers, rows) = split_header(csv_rows(&buf));
        assert_eq!(headers.len(), 1);
        assert_eq!(rows.len(), 6);
    }
    // Unwinding still released the panicking worker's connection.
    assert_eq!(
        MemoryStats::get(&stats.connections_opened),
        MemoryStats::get(&stats.connections_closed)
    );
}

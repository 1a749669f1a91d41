mod common;

use common::{at, node, scratch_writer, snapshot};

const DAY: i64 = 86_400;

#[tokio::test]
async fn trim_drops_old_data_from_both_forms() {
    let (_tmp, mut writer) = scratch_writer().await;
    writer
        .save(&snapshot(vec![("!aaaa0001", node("Alpha", 90, 3.9, 1.0))]), at(0))
        .await
        .unwrap();
    writer
        .save(&snapshot(vec![("!aaaa0001", node("Alpha", 80, 3.8, 2.0))]), at(10 * DAY))
        .await
        .unwrap();
    writer
        .save(&snapshot(vec![("!aaaa0001", node("Alpha", 70, 3.7, 3.0))]), at(40 * DAY))
        .await
        .unwrap();
    let store = writer.store().clone();

    let report = store.trim_at(30, at(40 * DAY)).await.unwrap();
    assert_eq!(report.rows_removed, 1);
    assert_eq!(report.records_removed, 1);
    assert_eq!(report.rows_kept, 2);
    assert_eq!(report.records_kept, 2);

    let cutoff = at(10 * DAY);
    let rows = store.history_at(f64::INFINITY, None, at(40 * DAY)).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.timestamp >= cutoff));

    let table = std::fs::read_to_string(store.table_path()).unwrap();
    assert!(table.starts_with("timestamp,node_id,"));

    let stream = std::fs::read_to_string(store.stream_path()).unwrap();
    assert_eq!(stream.lines().count(), 2);
    for line in stream.lines() {
        let record: meshviewer::storage::BatchRecord = serde_json::from_str(line).unwrap();
        assert!(record.timestamp >= cutoff.timestamp());
    }
}

#[tokio::test]
async fn trim_keeps_rows_exactly_at_cutoff_and_is_idempotent() {
    let (_tmp, mut writer) = scratch_writer().await;
    writer
        .save(&snapshot(vec![("!aaaa0001", node("Alpha", 90, 3.9, 1.0))]), at(0))
        .await
        .unwrap();
    let store = writer.store().clone();

    let report = store.trim_at(30, at(30 * DAY)).await.unwrap();
    assert!(!report.changed());
    assert_eq!(report.rows_kept, 1);

    let report = store.trim_at(30, at(30 * DAY + 1)).await.unwrap();
    assert_eq!(report.rows_removed, 1);
    assert_eq!(report.records_removed, 1);

    let again = store.trim_at(30, at(30 * DAY + 1)).await.unwrap();
    assert!(!again.changed());
    assert!(store.latest().await.unwrap().is_none());
    assert_eq!(store.summary_at(24.0, at(30 * DAY)).await.unwrap().record_count, 0);
}

#[tokio::test]
async fn writer_keeps_working_after_trim() {
    let (_tmp, mut writer) = scratch_writer().await;
    writer
        .save(&snapshot(vec![("!aaaa0001", node("Alpha", 90, 3.9, 1.0))]), at(0))
        .await
        .unwrap();
    let store = writer.store().clone();
    store.trim_at(1, at(2 * DAY)).await.unwrap();

    let r = writer
        .save(&snapshot(vec![("!aaaa0001", node("Alpha", 88, 3.88, 49.0))]), at(2 * DAY))
        .await
        .unwrap();
    assert_eq!(r.written, 1);
    let rows = store.history_at(24.0, None, at(2 * DAY)).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].uptime_hours, 49.0);
}

#[tokio::test]
async fn trim_drops_malformed_entries() {
    let (_tmp, mut writer) = scratch_writer().await;
    writer
        .save(&snapshot(vec![("!aaaa0001", node("Alpha", 90, 3.9, 1.0))]), at(0))
        .await
        .unwrap();
    let store = writer.store().clone();

    let mut table = std::fs::read_to_string(store.table_path()).unwrap();
    table.push_str("garbage,row\n");
    std::fs::write(store.table_path(), table).unwrap();

    let report = store.trim_at(30, at(60)).await.unwrap();
    assert_eq!(report.malformed_dropped, 1);
    assert_eq!(report.rows_kept, 1);
    let table = std::fs::read_to_string(store.table_path()).unwrap();
    assert!(!table.contains("garbage"));
}

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use finportal::{BusinessUnit, Credentials, FinancialSubmission, StorageBackend};
use finportal::error::PortalError;
use finportal::Portal;
use finportal_memory::{InMemoryStorage, MemoryConnector};
use finportal_sqlite::SqliteConnector;
use time::OffsetDateTime;

fn setup() -> (Portal, Arc<MemoryConnector>, Arc<InMemoryStorage>) {
    setup_with_ttl(Duration::from_secs(30))
}

fn setup_with_ttl(ttl: Duration) -> (Portal, Arc<MemoryConnector>, Arc<InMemoryStorage>) {
    let storage = Arc::new(InMemoryStorage::new());
    let connector = Arc::new(MemoryConnector::new(storage.clone()));
    let portal = Portal::with_settings(connector.clone(), Credentials::new("memory", "", ""), ttl, 100);
    (portal, connector, storage)
}

fn is_valid_id(id: &str) -> bool {
    id.len() == 12
        && id.starts_with("sub_")
        && id[4..].chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

fn external_row(id: &str) -> FinancialSubmission {
    let now = OffsetDateTime::now_utc();
    FinancialSubmission {
        submission_id: Arc::from(id),
        business_unit: BusinessUnit::Operations,
        submission_date: now,
        revenue: 10.0,
        expenses: 1.0,
        profit_margin: 90.0,
        submitted_by: Arc::from("elsewhere"),
        created_at: now,
    }
}

#[test]
fn test_submit_and_fetch_recent() {
    let (portal, _, _) = setup();
    let receipt = portal.submit("Sales", 100_000.0, 75_000.0, "Alice").unwrap();
    assert!(is_valid_id(&receipt.submission_id), "bad id {}", receipt.submission_id);

    let rows = portal.fetch_recent().unwrap();
    let row = rows
        .iter()
        .find(|r| r.submission_id == receipt.submission_id)
        .expect("submitted row missing");
    assert_eq!(row.business_unit, BusinessUnit::Sales);
    assert_eq!(row.revenue, 100_000.0);
    assert_eq!(row.expenses, 75_000.0);
    assert!((row.profit_margin - 25.0).abs() < 1e-9);
    assert_eq!(row.submitted_by.as_ref(), "Alice");
    assert_eq!(row.submission_date, row.created_at);
}

#[test]
fn test_zero_revenue_has_zero_margin() {
    let (portal, _, _) = setup();
    let receipt = portal.submit("HR", 0.0, 500.0, "Bob").unwrap();
    assert_eq!(receipt.profit_margin, 0.0);
    assert_eq!(portal.fetch_recent().unwrap()[0].profit_margin, 0.0);
}

#[test]
fn test_negative_revenue_rejected_without_side_effects() {
    let (portal, connector, storage) = setup();
    portal.submit("Sales", 10.0, 1.0, "seed").unwrap();
    portal.fetch_recent().unwrap();
    portal.fetch_summary().unwrap();
    let queries = storage.query_count();

    let err = portal.submit("Sales", -10.0, 0.0, "Mallory").unwrap_err();
    assert!(matches!(err, PortalError::Validation(_)), "got {:?}", err);
    assert_eq!(storage.row_count(), 1);
    assert_eq!(portal.cache().is_fresh(), (true, true));

    portal.fetch_recent().unwrap();
    assert_eq!(storage.query_count(), queries);
    assert_eq!(connector.connect_count(), 1);
}

#[test]
fn test_unknown_unit_rejected_before_connecting() {
    let (portal, connector, storage) = setup();
    let err = portal.submit("Legal", 10.0, 1.0, "x").unwrap_err();
    assert!(matches!(err, PortalError::Validation(_)));
    let err = portal.submit("Sales", 10.0, -1.0, "x").unwrap_err();
    assert!(matches!(err, PortalError::Validation(_)));
    assert_eq!(connector.connect_count(), 0);
    assert_eq!(storage.row_count(), 0);
}

#[test]
fn test_summary_orders_units_by_revenue() {
    let (portal, _, _) = setup();
    portal.submit("Marketing", 5_000.0, 1_000.0, "a").unwrap();
    portal.submit("Engineering", 20_000.0, 15_000.0, "b").unwrap();

    let summary = portal.fetch_summary().unwrap();
    assert_eq!(summary.len(), 2);
    assert_eq!(summary[0].business_unit, BusinessUnit::Engineering);
    assert_eq!(summary[1].business_unit, BusinessUnit::Marketing);
    assert!(summary[0].total_revenue >= summary[1].total_revenue);
}

#[test]
fn test_recent_is_capped_but_summary_sees_everything() {
    let (portal, _, _) = setup();
    let mut revenue = 0.0;
    let mut expenses = 0.0;
    for i in 0..150 {
        let unit = BusinessUnit::ALL[i % BusinessUnit::ALL.len()];
        let (r, e) = (1_000.0 + i as f64, 400.0 + (i % 7) as f64);
        revenue += r;
        expenses += e;
        portal.submit(unit.as_str(), r, e, "bulk").unwrap();
    }

    let recent = portal.fetch_recent().unwrap();
    assert_eq!(recent.len(), 100);
    assert!(recent.windows(2).all(|w| w[0].submission_date >= w[1].submission_date));

    let summary = portal.fetch_summary().unwrap();
    assert_eq!(summary.len(), BusinessUnit::ALL.len());
    assert_eq!(summary.iter().map(|s| s.submission_count).sum::<u64>(), 150);
    let total_revenue: f64 = summary.iter().map(|s| s.total_revenue).sum();
    let total_expenses: f64 = summary.iter().map(|s| s.total_expenses).sum();
    assert!((total_revenue - revenue).abs() < 1e-6);
    assert!((total_expenses - expenses).abs() < 1e-6);
}

#[test]
fn test_reads_are_cached_within_ttl() {
    let (portal, _, storage) = setup();
    portal.submit("Finance", 100.0, 10.0, "a").unwrap();

    let first = portal.fetch_recent().unwrap();
    // a write from outside this process is not visible until the cache lapses
    storage.insert_submission(&external_row("sub_ffffffff")).unwrap();
    let second = portal.fetch_recent().unwrap();
    assert_eq!(first, second);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(storage.query_count(), 1);
}

#[test]
fn test_reads_refresh_after_ttl() {
    let (portal, _, storage) = setup_with_ttl(Duration::from_millis(50));
    portal.fetch_recent().unwrap();
    storage.insert_submission(&external_row("sub_ffffffff")).unwrap();
    assert!(portal.fetch_recent().unwrap().is_empty());

    thread::sleep(Duration::from_millis(80));
    assert_eq!(portal.fetch_recent().unwrap().len(), 1);
}

#[test]
fn test_submit_invalidates_both_paths() {
    let (portal, _, _) = setup();
    portal.submit("Sales", 10.0, 5.0, "a").unwrap();
    assert_eq!(portal.fetch_recent().unwrap().len(), 1);
    assert_eq!(portal.fetch_summary().unwrap()[0].submission_count, 1);

    portal.submit("Sales", 30.0, 5.0, "b").unwrap();
    assert_eq!(portal.cache().is_fresh(), (false, false));
    assert_eq!(portal.fetch_recent().unwrap().len(), 2);
    assert_eq!(portal.fetch_summary().unwrap()[0].submission_count, 2);
}

#[test]
fn test_manual_invalidate() {
    let (portal, _, storage) = setup();
    portal.fetch_summary().unwrap();
    storage.insert_submission(&external_row("sub_0badf00d")).unwrap();
    assert!(portal.fetch_summary().unwrap().is_empty());

    portal.invalidate();
    assert_eq!(portal.fetch_summary().unwrap().len(), 1);
}

#[test]
fn test_query_failure_is_not_cached() {
    let (portal, _, storage) = setup();
    storage.fail_next_queries(1);
    let err = portal.fetch_recent().unwrap_err();
    assert!(matches!(err, PortalError::Query(_)), "got {:?}", err);
    assert!(portal.fetch_recent().is_ok());
}

#[test]
fn test_concurrent_misses_share_one_query() {
    let (portal, _, storage) = setup();
    portal.submit("Operations", 1.0, 0.0, "a").unwrap();
    storage.set_query_delay(Duration::from_millis(50));
    let portal = Arc::new(portal);

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let portal = portal.clone();
            thread::spawn(move || portal.fetch_summary().unwrap())
        })
        .collect();
    let results: Vec<_> = readers.into_iter().map(|r| r.join().unwrap()).collect();

    assert_eq!(storage.query_count(), 1);
    assert!(results.iter().all(|r| r == &results[0]));
}

#[test]
fn test_concurrent_submissions() {
    let (portal, connector, storage) = setup();
    let portal = Arc::new(portal);

    let writers: Vec<_> = (0..8)
        .map(|t| {
            let portal = portal.clone();
            thread::spawn(move || {
                (0..25)
                    .map(|i| portal.submit("Sales", (t * 100 + i) as f64, 1.0, "w").unwrap().submission_id)
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let ids: std::collections::HashSet<_> = writers.into_iter().flat_map(|w| w.join().unwrap()).collect();

    assert_eq!(ids.len(), 200);
    assert_eq!(storage.row_count(), 200);
    assert_eq!(connector.connect_count(), 1);
}

#[test]
fn test_connection_failure_skips_insert() {
    let (portal, connector, storage) = setup();
    connector.refuse_next(1);
    let err = portal.submit("Sales", 1.0, 1.0, "a").unwrap_err();
    assert!(matches!(err, PortalError::Connection(_)), "got {:?}", err);
    assert_eq!(storage.row_count(), 0);

    // not cached, so the next call connects
    portal.submit("Sales", 1.0, 1.0, "a").unwrap();
    assert_eq!(storage.row_count(), 1);
}

#[test]
fn test_read_connection_failure_is_connection_error() {
    let (portal, connector, storage) = setup();
    storage.insert_submission(&external_row("sub_0000abcd")).unwrap();
    connector.refuse_next(2);

    let err = portal.fetch_summary().unwrap_err();
    assert!(matches!(err, PortalError::Connection(_)), "got {:?}", err);
    let err = portal.fetch_recent().unwrap_err();
    assert!(matches!(err, PortalError::Connection(_)), "got {:?}", err);
    assert_eq!(storage.query_count(), 0);
    assert_eq!(portal.cache().is_fresh(), (false, false));

    assert_eq!(portal.fetch_summary().unwrap()[0].submission_count, 1);
    assert_eq!(portal.fetch_recent().unwrap().len(), 1);
    assert_eq!(connector.connect_count(), 1);
}

#[test]
fn test_overflowing_margin_is_rejected() {
    let (portal, _, storage) = setup();
    let err = portal.submit("Finance", 1e-320, 1e10, "a").unwrap_err();
    assert!(matches!(err, PortalError::Validation(_)), "got {:?}", err);
    assert_eq!(storage.row_count(), 0);
    assert!(portal.fetch_summary().unwrap().is_empty());
}

#[test]
fn test_insert_failure_is_write_error() {
    let (portal, _, storage) = setup();
    portal.fetch_recent().unwrap();
    storage.fail_next_inserts(1);
    let err = portal.submit("Sales", 1.0, 1.0, "a").unwrap_err();
    assert!(matches!(err, PortalError::Write(_)), "got {:?}", err);
    assert_eq!(storage.row_count(), 0);
    assert!(portal.cache().is_fresh().0);
}

#[test]
fn test_forced_collision_regenerates_id() {
    let storage = Arc::new(InMemoryStorage::new());
    let ids = Arc::new(Mutex::new(vec![
        "sub_00000002".to_string(),
        "sub_00000001".to_string(),
        "sub_00000001".to_string(),
    ]));
    let source = ids.clone();
    let portal = Portal::new(
        Arc::new(MemoryConnector::new(storage.clone())),
        Credentials::new("memory", "", ""),
    )
    .with_id_generator(Arc::new(move || source.lock().unwrap().pop().unwrap_or_default()));

    let first = portal.submit("Sales", 1.0, 0.0, "a").unwrap();
    let second = portal.submit("Sales", 2.0, 0.0, "b").unwrap();
    assert_eq!(first.submission_id.as_ref(), "sub_00000001");
    assert_eq!(second.submission_id.as_ref(), "sub_00000002");
    assert_eq!(storage.row_count(), 2);
}

#[test]
fn test_persistent_collision_fails_cleanly() {
    let storage = Arc::new(InMemoryStorage::new());
    let portal = Portal::new(
        Arc::new(MemoryConnector::new(storage.clone())),
        Credentials::new("memory", "", ""),
    )
    .with_id_generator(Arc::new(|| "sub_aaaaaaaa".to_string()));

    portal.submit("Sales", 1.0, 0.0, "a").unwrap();
    let err = portal.submit("Sales", 2.0, 0.0, "b").unwrap_err();
    assert!(matches!(err, PortalError::Write(_)), "got {:?}", err);
    assert_eq!(storage.row_count(), 1);
    assert_eq!(portal.fetch_recent().unwrap()[0].revenue, 1.0);
}

#[test]
fn test_stale_connection_recovers_on_next_call() {
    let (portal, connector, _) = setup();
    portal.submit("Sales", 1.0, 0.0, "a").unwrap();

    connector.drop_sessions();
    portal.invalidate();
    let err = portal.fetch_recent().unwrap_err();
    assert!(matches!(err, PortalError::Query(_)), "got {:?}", err);
    assert!(!portal.connections().is_connected());

    assert_eq!(portal.fetch_recent().unwrap().len(), 1);
    assert_eq!(connector.connect_count(), 2);
}

#[test]
fn test_stale_connection_on_write() {
    let (portal, connector, storage) = setup();
    portal.connections().init().unwrap();
    connector.drop_sessions();

    let err = portal.submit("Sales", 1.0, 0.0, "a").unwrap_err();
    assert!(matches!(err, PortalError::Write(_)), "got {:?}", err);
    portal.submit("Sales", 1.0, 0.0, "a").unwrap();
    assert_eq!(storage.row_count(), 1);
}

#[test]
fn test_kpis_over_recent_rows() {
    let (portal, _, _) = setup();
    portal.submit("Sales", 100.0, 75.0, "a").unwrap();
    portal.submit("HR", 200.0, 100.0, "b").unwrap();
    let kpis = portal.fetch_kpis().unwrap();
    assert_eq!(kpis.submission_count, 2);
    assert_eq!(kpis.total_revenue, 300.0);
    assert_eq!(kpis.total_expenses, 175.0);
    assert!((kpis.avg_profit_margin - 37.5).abs() < 1e-9);
}

#[test]
fn test_close_then_reuse() {
    let (portal, connector, _) = setup();
    portal.submit("Sales", 1.0, 0.0, "a").unwrap();
    portal.close();
    assert!(!portal.connections().is_connected());
    assert_eq!(portal.fetch_recent().unwrap().len(), 1);
    assert_eq!(connector.connect_count(), 2);
}

#[test]
fn test_sqlite_end_to_end() {
    let portal = Portal::new(Arc::new(SqliteConnector), Credentials::new("", ":memory:", ""));
    let receipt = portal.submit("Sales", 100_000.0, 75_000.0, "Alice").unwrap();
    portal.submit("Finance", 50.0, 10.0, "Bob").unwrap();

    let recent = portal.fetch_recent().unwrap();
    assert_eq!(recent.len(), 2);
    let sales = recent.iter().find(|r| r.submission_id == receipt.submission_id).unwrap();
    assert!((sales.profit_margin - 25.0).abs() < 1e-9);

    let summary = portal.fetch_summary().unwrap();
    assert_eq!(summary[0].business_unit, BusinessUnit::Sales);
    assert_eq!(summary[1].business_unit, BusinessUnit::Finance);
}

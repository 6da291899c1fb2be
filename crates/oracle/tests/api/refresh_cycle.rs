use crate::helpers::{
    assert_alerted_once, build_updater, expect_one_alert, GatedFetcher, MockAlerts, MockFetcher,
    MockStore, ScratchDir, REFERENCE_OFFSET,
};
use rate_oracle::{alerts, db, fetcher, CycleOutcome, Database, RateSample, RateStore, Resolution};
use std::sync::Arc;
use time::{macros::datetime, OffsetDateTime};
use uuid::Uuid;

const NOW: OffsetDateTime = datetime!(2025-03-10 14:00 -4);

#[tokio::test]
async fn stored_sample_for_today_short_circuits_fetch() {
    let mut store = MockStore::new();
    store
        .expect_sample_for_day()
        .withf(|day| day.contains(NOW) && day.start == datetime!(2025-03-10 00:00 -4))
        .times(1)
        .returning(|_| Ok(Some(RateSample::new(36.5, datetime!(2025-03-10 06:30 -4)))));
    store.expect_save().never();
    store.expect_latest_sample().never();

    let mut fetcher = MockFetcher::new();
    fetcher.expect_fetch().never();
    let mut alerts = MockAlerts::new();
    alerts.expect_notify().never();

    let updater = build_updater(Arc::new(store), Arc::new(fetcher), Arc::new(alerts));
    let outcome = updater.run_cycle_at(NOW).await;

    assert_eq!(outcome, CycleOutcome::Resolved(Resolution::Today(36.5)));
    assert_eq!(updater.cache().get(), 36.5);
}

#[tokio::test]
async fn fetched_value_is_saved_and_published() {
    let mut store = MockStore::new();
    store.expect_sample_for_day().times(1).returning(|_| Ok(None));
    store
        .expect_save()
        .withf(|sample| sample.value == 123.45 && sample.timestamp == NOW)
        .times(1)
        .returning(|_| Ok(()));
    store.expect_latest_sample().never();

    let mut fetcher = MockFetcher::new();
    fetcher
        .expect_fetch()
        .times(1)
        .returning(|| Ok(RateSample::new(123.45, OffsetDateTime::now_utc())));
    let mut alerts = MockAlerts::new();
    alerts.expect_notify().never();

    let updater = build_updater(Arc::new(store), Arc::new(fetcher), Arc::new(alerts));
    let outcome = updater.run_cycle_at(NOW).await;

    assert_eq!(outcome, CycleOutcome::Resolved(Resolution::Fetched(123.45)));
    assert_eq!(updater.cache().get(), 123.45);
}

#[tokio::test]
async fn fetch_failure_falls_back_to_latest_known_and_alerts_once() {
    let mut store = MockStore::new();
    store.expect_sample_for_day().times(1).returning(|_| Ok(None));
    store.expect_save().never();
    store
        .expect_latest_sample()
        .times(1)
        .returning(|| Ok(Some(RateSample::new(100.00, datetime!(2025-03-07 06:30 -4)))));

    let mut fetcher = MockFetcher::new();
    fetcher
        .expect_fetch()
        .times(1)
        .returning(|| Err(fetcher::Error::MissingField("dolar".to_string())));
    let mut alerts = MockAlerts::new();
    let alerted = expect_one_alert(&mut alerts);

    let updater = build_updater(Arc::new(store), Arc::new(fetcher), Arc::new(alerts));
    let outcome = updater.run_cycle_at(NOW).await;

    assert_eq!(outcome, CycleOutcome::Resolved(Resolution::LatestKnown(100.00)));
    assert_eq!(updater.cache().get(), 100.00);

    let message = assert_alerted_once(alerted).await;
    assert!(message.contains("dolar"));
}

#[tokio::test]
async fn fetch_failure_without_history_resolves_unknown() {
    let mut store = MockStore::new();
    store.expect_sample_for_day().times(1).returning(|_| Ok(None));
    store.expect_save().never();
    store.expect_latest_sample().times(1).returning(|| Ok(None));

    let mut fetcher = MockFetcher::new();
    fetcher
        .expect_fetch()
        .times(1)
        .returning(|| Err(fetcher::Error::Status(503)));
    let mut alerts = MockAlerts::new();
    let alerted = expect_one_alert(&mut alerts);

    let updater = build_updater(Arc::new(store), Arc::new(fetcher), Arc::new(alerts));
    let outcome = updater.run_cycle_at(NOW).await;

    assert_eq!(outcome, CycleOutcome::Resolved(Resolution::Unknown));
    assert_eq!(updater.cache().get(), 0.0);
    assert_alerted_once(alerted).await;
}

#[tokio::test]
async fn non_positive_fetch_counts_as_failure() {
    let mut store = MockStore::new();
    store.expect_sample_for_day().times(1).returning(|_| Ok(None));
    store.expect_save().never();
    store
        .expect_latest_sample()
        .times(1)
        .returning(|| Ok(Some(RateSample::new(35.9, datetime!(2025-03-09 06:30 -4)))));

    let mut fetcher = MockFetcher::new();
    fetcher
        .expect_fetch()
        .times(1)
        .returning(|| Ok(RateSample::new(0.0, OffsetDateTime::now_utc())));
    let mut alerts = MockAlerts::new();
    let alerted = expect_one_alert(&mut alerts);

    let updater = build_updater(Arc::new(store), Arc::new(fetcher), Arc::new(alerts));
    let outcome = updater.run_cycle_at(NOW).await;

    assert_eq!(outcome, CycleOutcome::Resolved(Resolution::LatestKnown(35.9)));
    assert_alerted_once(alerted).await;
}

#[tokio::test]
async fn repeated_cycles_with_todays_sample_do_not_fetch_again() {
    let mut store = MockStore::new();
    store
        .expect_sample_for_day()
        .times(2)
        .returning(|_| Ok(Some(RateSample::new(36.2626, datetime!(2025-03-10 06:30 -4)))));
    store.expect_save().never();

    let mut fetcher = MockFetcher::new();
    fetcher.expect_fetch().never();
    let mut alerts = MockAlerts::new();
    alerts.expect_notify().never();

    let updater = build_updater(Arc::new(store), Arc::new(fetcher), Arc::new(alerts));
    let first = updater.run_cycle_at(NOW).await;
    let second = updater.run_cycle_at(NOW).await;

    assert_eq!(first, second);
    assert_eq!(first, CycleOutcome::Resolved(Resolution::Today(36.2626)));
}

#[tokio::test]
async fn store_failures_are_treated_as_absence() {
    let mut store = MockStore::new();
    store
        .expect_sample_for_day()
        .times(1)
        .returning(|_| Err(db::Error::Writer("connection refused".to_string())));
    store
        .expect_save()
        .times(1)
        .returning(|_| Err(db::Error::Writer("disk full".to_string())));

    let mut fetcher = MockFetcher::new();
    fetcher
        .expect_fetch()
        .times(1)
        .returning(|| Ok(RateSample::new(36.4, OffsetDateTime::now_utc())));
    let mut alerts = MockAlerts::new();
    alerts.expect_notify().never();

    let updater = build_updater(Arc::new(store), Arc::new(fetcher), Arc::new(alerts));
    let outcome = updater.run_cycle_at(NOW).await;

    // durability loss does not cancel the resolution
    assert_eq!(outcome, CycleOutcome::Resolved(Resolution::Fetched(36.4)));
    assert_eq!(updater.cache().get(), 36.4);
}

#[tokio::test]
async fn failing_alert_sink_does_not_affect_cycle() {
    let mut store = MockStore::new();
    store.expect_sample_for_day().returning(|_| Ok(None));
    store
        .expect_latest_sample()
        .returning(|| Err(db::Error::Writer("timeout".to_string())));

    let mut fetcher = MockFetcher::new();
    fetcher
        .expect_fetch()
        .returning(|| Err(fetcher::Error::InvalidValue("N/A".to_string())));
    let mut alerts = MockAlerts::new();
    alerts
        .expect_notify()
        .returning(|_| {
            Err(alerts::Error::Status {
                code: 500,
                body: "gateway down".to_string(),
            })
        });

    let updater = build_updater(Arc::new(store), Arc::new(fetcher), Arc::new(alerts));
    updater.cache().set(12.0);
    let outcome = updater.run_cycle_at(NOW).await;

    assert_eq!(outcome, CycleOutcome::Resolved(Resolution::Unknown));
    assert_eq!(updater.cache().get(), 0.0);
}

#[tokio::test]
async fn overlapping_trigger_is_skipped() {
    let mut store = MockStore::new();
    store.expect_sample_for_day().times(1).returning(|_| Ok(None));
    store.expect_save().times(1).returning(|_| Ok(()));

    let fetcher = GatedFetcher::new(37.0);
    let (started, release) = (fetcher.started.clone(), fetcher.release.clone());
    let mut alerts = MockAlerts::new();
    alerts.expect_notify().never();

    let updater = build_updater(Arc::new(store), Arc::new(fetcher), Arc::new(alerts));

    let running = {
        let updater = updater.clone();
        tokio::spawn(async move { updater.run_cycle_at(NOW).await })
    };
    started.notified().await;

    assert_eq!(updater.run_cycle_at(NOW).await, CycleOutcome::Skipped);
    assert_eq!(updater.cache().get(), 0.0);

    release.notify_one();
    let finished = running.await.unwrap();
    assert_eq!(finished, CycleOutcome::Resolved(Resolution::Fetched(37.0)));
    assert_eq!(updater.cache().get(), 37.0);
}

async fn scratch_db() -> (Arc<Database>, ScratchDir) {
    let dir = std::env::temp_dir().join(format!("rate-oracle-cycle-{}", Uuid::now_v7()));
    let db = Database::new(dir.to_str().unwrap()).await.unwrap();
    (Arc::new(db), ScratchDir(dir))
}

#[tokio::test]
async fn sample_from_last_instant_of_yesterday_is_not_today() {
    let (db, _dir) = scratch_db().await;
    db.save(RateSample::new(35.0, datetime!(2025-03-09 23:59:59 -4)))
        .await
        .unwrap();

    let mut fetcher = MockFetcher::new();
    fetcher
        .expect_fetch()
        .times(1)
        .returning(|| Ok(RateSample::new(36.0, OffsetDateTime::now_utc())));
    let mut alerts = MockAlerts::new();
    alerts.expect_notify().never();

    let updater = build_updater(db.clone(), Arc::new(fetcher), Arc::new(alerts));
    let outcome = updater.run_cycle_at(NOW).await;

    assert_eq!(outcome, CycleOutcome::Resolved(Resolution::Fetched(36.0)));
    let latest = db.latest_sample().await.unwrap().unwrap();
    assert_eq!(latest.value, 36.0);
    assert_eq!(latest.timestamp, NOW);
}

#[tokio::test]
async fn sample_from_first_instant_of_today_is_today() {
    let (db, _dir) = scratch_db().await;
    db.save(RateSample::new(36.1, datetime!(2025-03-10 00:00 -4)))
        .await
        .unwrap();

    let mut fetcher = MockFetcher::new();
    fetcher.expect_fetch().never();
    let mut alerts = MockAlerts::new();
    alerts.expect_notify().never();

    let updater = build_updater(db, Arc::new(fetcher), Arc::new(alerts));
    let outcome = updater.run_cycle_at(NOW).await;

    assert_eq!(outcome, CycleOutcome::Resolved(Resolution::Today(36.1)));
}

#[tokio::test]
async fn today_is_decided_in_reference_offset() {
    // 01:00 UTC on the 11th is still the 10th at the reference offset
    let late_evening = datetime!(2025-03-11 01:00 UTC);
    assert_eq!(late_evening.to_offset(REFERENCE_OFFSET).day(), 10);

    let (db, _dir) = scratch_db().await;
    db.save(RateSample::new(36.7, datetime!(2025-03-10 06:30 -4)))
        .await
        .unwrap();

    let mut fetcher = MockFetcher::new();
    fetcher.expect_fetch().never();
    let mut alerts = MockAlerts::new();
    alerts.expect_notify().never();

    let updater = build_updater(db, Arc::new(fetcher), Arc::new(alerts));
    let outcome = updater.run_cycle_at(late_evening).await;

    assert_eq!(outcome, CycleOutcome::Resolved(Resolution::Today(36.7)));
}

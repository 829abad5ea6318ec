mod common;

use chrono::Duration;
use common::Harness;
use steritrack::models::{
    IndicatorResult, SterilizationRecord, SterilizationStatus, WorkOrderStatus, Zone,
};
use steritrack::{EngineError, Session};

async fn pending_release(h: &Harness) -> (i64, SterilizationRecord) {
    let (order, record, _) = h.run_to_sterilized(&h.admin).await;
    h.orders
        .mark_pending_release(&h.admin, order.id)
        .await
        .unwrap();
    let record = h
        .indicators
        .check_ci(&h.admin, record.id, IndicatorResult::Pass, "")
        .await
        .unwrap();
    let record = h
        .indicators
        .start_bi_incubation(&h.admin, record.id, "LOT-1")
        .await
        .unwrap();
    let record = h
        .indicators
        .read_bi_result(&h.admin, record.id, IndicatorResult::Pass, "")
        .await
        .unwrap();
    (order.id, record)
}

/// Release needs the explicit grant, not just a role.
#[tokio::test]
async fn release_requires_the_release_grant() {
    let h = Harness::new().await;
    let (_, record) = pending_release(&h).await;

    let ungranted: Session = h.operator_in("OP-NOREL", Zone::Sterile, false).await;
    let err = h
        .release
        .release(&ungranted, record.id, "")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Unauthorized { .. }));

    let granted = h.operator_in("OP-REL", Zone::Sterile, true).await;
    let record = h.release.release(&granted, record.id, "").await.unwrap();
    assert_eq!(record.status, SterilizationStatus::Released);
}

/// Release cascades the work order and leaves a complete trail.
#[tokio::test]
async fn release_cascades_and_logs() {
    let h = Harness::new().await;
    let (order_id, record) = pending_release(&h).await;

    assert!(h.release.release_blocker(record.id).await.unwrap().is_none());
    let record = h.release.release(&h.admin, record.id, "all checks ok").await.unwrap();
    assert!(record.released_at.is_some());

    let order = h.orders.get(order_id).await.unwrap();
    assert_eq!(order.status, WorkOrderStatus::Released);

    let log = h.release.release_log(record.id).await.unwrap();
    assert!(log.iter().any(|e| e.action == "RELEASE"));

    // no second release, and the refusal leaves the record untouched
    let err = h.release.release(&h.admin, record.id, "").await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }));
    let unchanged = h.records.get(record.id).await.unwrap();
    assert_eq!(unchanged.status, SterilizationStatus::Released);
    assert_eq!(unchanged.released_at, record.released_at);
    assert_eq!(unchanged.version, record.version);
}

/// The release gate refuses records that are not at PENDING_RELEASE with
/// both indicators passed.
#[tokio::test]
async fn release_gate_blocks_unfinished_records() {
    let h = Harness::new().await;
    let (_, record, _) = h.run_to_sterilized(&h.admin).await;

    // CI not yet read
    assert!(h.release.release_blocker(record.id).await.unwrap().is_some());
    let err = h.release.release(&h.admin, record.id, "").await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }));

    // CI passed, BI still pending
    let record = h
        .indicators
        .check_ci(&h.admin, record.id, IndicatorResult::Pass, "")
        .await
        .unwrap();
    let err = h.release.release(&h.admin, record.id, "").await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }));
}

/// Supervisor rejection settles the record and the order together.
#[tokio::test]
async fn rejection_requires_reason_and_cascades() {
    let h = Harness::new().await;
    let (order_id, record) = pending_release(&h).await;

    let err = h.release.reject(&h.admin, record.id, "").await.unwrap_err();
    assert!(matches!(err, EngineError::Validation { .. }));

    let record = h
        .release
        .reject(&h.admin, record.id, "wet pack")
        .await
        .unwrap();
    assert_eq!(record.status, SterilizationStatus::Rejected);
    assert_eq!(record.rejection_reason, "wet pack");

    let order = h.orders.get(order_id).await.unwrap();
    assert_eq!(order.status, WorkOrderStatus::Rejected);
}

/// Recall settles the record but does not move the work order by itself;
/// pulling the item back is a separate, explicit action.
#[tokio::test]
async fn recall_is_record_level_until_the_item_is_pulled() {
    let h = Harness::new().await;
    let (order_id, record) = pending_release(&h).await;
    let record = h.release.release(&h.admin, record.id, "").await.unwrap();

    let record = h
        .release
        .recall(&h.admin, record.id, "load 42 BI retest failed")
        .await
        .unwrap();
    assert_eq!(record.status, SterilizationStatus::Recalled);

    let order = h.orders.get(order_id).await.unwrap();
    assert_eq!(order.status, WorkOrderStatus::Released);

    let order = h
        .orders
        .mark_recalled(&h.admin, order_id, "load 42 BI retest failed")
        .await
        .unwrap();
    assert_eq!(order.status, WorkOrderStatus::Recalled);

    let order = h
        .orders
        .send_to_reprocessing(&h.admin, order_id, "recalled load")
        .await
        .unwrap();
    assert_eq!(order.status, WorkOrderStatus::Reprocessing);
    assert_eq!(order.current_zone, Zone::Dirty);
}

/// Only released stock can be recalled or used.
#[tokio::test]
async fn recall_and_use_need_released_stock() {
    let h = Harness::new().await;
    let (_, record) = pending_release(&h).await;

    let err = h.release.recall(&h.admin, record.id, "x").await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }));
    let err = h.release.mark_used(&h.admin, record.id, "").await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }));

    let record = h.release.release(&h.admin, record.id, "").await.unwrap();
    let record = h.release.mark_used(&h.admin, record.id, "theatre 1").await.unwrap();
    assert_eq!(record.status, SterilizationStatus::Used);

    // used stock can still be recalled (patient-safety trace)
    let record = h.release.recall(&h.admin, record.id, "lookback").await.unwrap();
    assert_eq!(record.status, SterilizationStatus::Recalled);
}

/// The expiry date is fixed when the record is opened: load time plus the
/// method's validity window. STEAM gets 30 days.
#[tokio::test]
async fn expiry_is_fixed_at_record_creation() {
    let h = Harness::new().await;
    let (_, record) = pending_release(&h).await;

    assert_eq!(record.expiry_date, record.load_time + Duration::days(30));

    let released = h.release.release(&h.admin, record.id, "").await.unwrap();
    assert_eq!(released.expiry_date, record.expiry_date);

    let expiring = h.records.expiring_within(31).await.unwrap();
    assert!(expiring.iter().any(|r| r.id == record.id));
    let expiring = h.records.expiring_within(7).await.unwrap();
    assert!(expiring.iter().all(|r| r.id != record.id));
}

/// One open record per work order.
#[tokio::test]
async fn one_open_record_per_order() {
    let h = Harness::new().await;
    let (order, record, cycle) = h.run_to_sterilized(&h.admin).await;
    let _ = record;

    let err = h
        .records
        .create_record(&h.admin, order.id, cycle.id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict { .. }));
}

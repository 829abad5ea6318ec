mod common;

use common::Harness;
use steritrack::models::{IndicatorResult, MachineCategory, MachineStatus, WorkOrderStatus, Zone};
use steritrack::EngineError;

/// An item cannot sit in two open loads at once.
#[tokio::test]
async fn double_loading_is_a_conflict() {
    let h = Harness::new().await;
    let order = h.intake(&h.admin).await;
    let washer = h.washer().await;
    let cycle = h
        .machines
        .start_cycle(&h.admin, washer.id, None, "")
        .await
        .unwrap();
    h.orders
        .start_washing(&h.admin, order.id, cycle.id)
        .await
        .unwrap();

    let second = h.intake(&h.admin).await;
    let err = h
        .orders
        .start_washing(&h.admin, order.id, cycle.id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict { .. }));
    // a different order loads fine
    h.orders
        .start_washing(&h.admin, second.id, cycle.id)
        .await
        .unwrap();

    let contents = h.machines.cycle_contents(cycle.id).await.unwrap();
    assert_eq!(contents, vec![order.id, second.id]);
}

/// Loading requires a RUNNING cycle of the right machine family.
#[tokio::test]
async fn loading_checks_cycle_state_and_machine_family() {
    let h = Harness::new().await;
    let order = h.intake(&h.admin).await;

    // sterilizer cycle for a wash stage
    let sterilizer = h.sterilizer().await;
    let wrong = h
        .machines
        .start_cycle(&h.admin, sterilizer.id, None, "")
        .await
        .unwrap();
    let err = h
        .orders
        .start_washing(&h.admin, order.id, wrong.id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }));

    // completed cycle
    let washer = h.washer().await;
    let done = h
        .machines
        .start_cycle(&h.admin, washer.id, None, "")
        .await
        .unwrap();
    h.machines
        .complete_cycle(&h.admin, done.id, 93.0, 0.0, IndicatorResult::Pending)
        .await
        .unwrap();
    let err = h
        .orders
        .start_washing(&h.admin, order.id, done.id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }));
}

/// A machine runs one cycle at a time and counts completed ones.
#[tokio::test]
async fn machine_runs_one_cycle_at_a_time() {
    let h = Harness::new().await;
    let washer = h.washer().await;

    let cycle = h
        .machines
        .start_cycle(&h.admin, washer.id, None, "")
        .await
        .unwrap();
    let err = h
        .machines
        .start_cycle(&h.admin, washer.id, None, "")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }));

    let machine = h.machines.machine(washer.id).await.unwrap();
    assert_eq!(machine.status, MachineStatus::Running);
    assert_eq!(machine.current_cycle_id, Some(cycle.id));

    h.machines
        .complete_cycle(&h.admin, cycle.id, 93.0, 0.0, IndicatorResult::Pending)
        .await
        .unwrap();
    let machine = h.machines.machine(washer.id).await.unwrap();
    assert_eq!(machine.status, MachineStatus::Idle);
    assert_eq!(machine.current_cycle_id, None);
    assert_eq!(machine.total_cycles, 1);

    let available = h
        .machines
        .available_machines(MachineCategory::Washer)
        .await
        .unwrap();
    assert!(available.iter().any(|m| m.id == washer.id));
}

/// An aborted cycle parks the machine in ERROR until a manual recovery.
#[tokio::test]
async fn abort_parks_machine_until_recovered() {
    let h = Harness::new().await;
    let washer = h.washer().await;
    let cycle = h
        .machines
        .start_cycle(&h.admin, washer.id, None, "")
        .await
        .unwrap();

    let cycle = h
        .machines
        .abort_cycle(&h.admin, cycle.id, "door seal fault")
        .await
        .unwrap();
    assert_eq!(cycle.status, MachineStatus::Error);

    let machine = h.machines.machine(washer.id).await.unwrap();
    assert_eq!(machine.status, MachineStatus::Error);

    let err = h
        .machines
        .start_cycle(&h.admin, washer.id, None, "")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }));

    // an aborted cycle is settled; completing it is refused
    let err = h
        .machines
        .complete_cycle(&h.admin, cycle.id, 93.0, 0.0, IndicatorResult::Pending)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }));

    let machine = h.machines.recover_machine(&h.admin, washer.id).await.unwrap();
    assert_eq!(machine.status, MachineStatus::Idle);
    h.machines
        .start_cycle(&h.admin, washer.id, None, "")
        .await
        .unwrap();
}

/// Zone access: an operator acts only in their own zone; supervisors and
/// admins bypass.
#[tokio::test]
async fn zone_checks_bind_plain_operators_only() {
    let h = Harness::new().await;
    let dirty_op = h.operator_in("OP-DIRTY", Zone::Dirty, false).await;

    // intake in the dirty zone is their job
    let order = h.intake(&dirty_op).await;
    let washer = h.washer().await;
    let cycle = h
        .machines
        .start_cycle(&dirty_op, washer.id, None, "")
        .await
        .unwrap();
    h.orders
        .start_washing(&dirty_op, order.id, cycle.id)
        .await
        .unwrap();
    h.machines
        .complete_cycle(&dirty_op, cycle.id, 93.0, 0.0, IndicatorResult::Pending)
        .await
        .unwrap();
    h.orders.complete_washing(&dirty_op, order.id).await.unwrap();

    // but the hand-off into the clean area is out of their zone
    let err = h
        .orders
        .transfer_to_clean(&dirty_op, order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Unauthorized { .. }));
    let order = h.orders.get(order.id).await.unwrap();
    assert_eq!(order.status, WorkOrderStatus::Washed);

    // admin bypasses the zone check
    h.orders.transfer_to_clean(&h.admin, order.id).await.unwrap();
}

/// Cycle numbers carry the date, the machine and a per-day sequence.
#[tokio::test]
async fn cycle_numbers_are_sequenced_per_machine_and_day() {
    let h = Harness::new().await;
    let washer = h.washer().await;

    let first = h
        .machines
        .start_cycle(&h.admin, washer.id, None, "")
        .await
        .unwrap();
    h.machines
        .complete_cycle(&h.admin, first.id, 93.0, 0.0, IndicatorResult::Pending)
        .await
        .unwrap();
    let second = h
        .machines
        .start_cycle(&h.admin, washer.id, None, "")
        .await
        .unwrap();

    assert!(first.cycle_number.ends_with("001"));
    assert!(second.cycle_number.ends_with("002"));
    assert_ne!(first.cycle_number, second.cycle_number);

    let recent = h.machines.recent_cycles(washer.id, 10).await.unwrap();
    assert_eq!(recent.len(), 2);
}

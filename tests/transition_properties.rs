//! Structural properties of the transition table, checked over every status
//! pair.

use proptest::prelude::*;
use steritrack::models::{WorkOrderStatus, Zone};
use steritrack::workflow::transitions::{is_legal, successors, zone_of};

fn any_status() -> impl Strategy<Value = WorkOrderStatus> {
    (0..WorkOrderStatus::ALL.len()).prop_map(|i| WorkOrderStatus::ALL[i])
}

fn zone_rank(zone: Zone) -> u8 {
    match zone {
        Zone::Dirty => 0,
        Zone::Clean => 1,
        Zone::Sterile => 2,
    }
}

proptest! {
    /// No status transitions to itself.
    #[test]
    fn no_self_loops(status in any_status()) {
        prop_assert!(!is_legal(status, status));
    }

    /// Zones only move forward, except on the explicit rework edges that
    /// re-enter the dirty area.
    #[test]
    fn zones_move_forward_except_rework(from in any_status(), to in any_status()) {
        if is_legal(from, to) {
            let goes_back = zone_rank(zone_of(to)) < zone_rank(zone_of(from));
            if goes_back {
                prop_assert!(matches!(
                    to,
                    WorkOrderStatus::Reprocessing | WorkOrderStatus::Received
                ));
            }
        }
    }

    /// Status round-trips through its storage tag.
    #[test]
    fn status_tags_round_trip(status in any_status()) {
        let tag = status.as_str();
        prop_assert_eq!(tag.parse::<WorkOrderStatus>().unwrap(), status);
    }
}

/// Every status except COMPLETED has a way forward.
#[test]
fn only_completed_is_a_dead_end() {
    for status in WorkOrderStatus::ALL {
        if status == WorkOrderStatus::Completed {
            assert!(successors(status).is_empty());
        } else {
            assert!(!successors(status).is_empty(), "{status} is a dead end");
        }
    }
}

/// Every reachable status is reachable from RECEIVED.
#[test]
fn all_statuses_reachable_from_received() {
    let mut seen = vec![WorkOrderStatus::Received];
    let mut frontier = vec![WorkOrderStatus::Received];
    while let Some(status) = frontier.pop() {
        for &next in successors(status) {
            if !seen.contains(&next) {
                seen.push(next);
                frontier.push(next);
            }
        }
    }
    for status in WorkOrderStatus::ALL {
        assert!(seen.contains(&status), "{status} unreachable");
    }
}

//! The central transition table for work orders.
//!
//! Legal successors and the status -> zone map live here as data so that
//! every gate in the engine checks the same structure instead of scattered
//! conditionals.

use crate::models::{WorkOrderStatus, Zone};

use WorkOrderStatus::*;

/// Legal successor states. Empty slice means terminal.
pub fn successors(status: WorkOrderStatus) -> &'static [WorkOrderStatus] {
    match status {
        Received => &[Washing],
        Washing => &[Washed],
        Washed => &[Inspecting],
        Inspecting => &[InspectionFailed, Packaging],
        InspectionFailed => &[Reprocessing],
        Packaging => &[Packaged],
        Packaged => &[Sterilizing],
        Sterilizing => &[Sterilized, Rejected],
        Sterilized => &[PendingRelease, Rejected],
        PendingRelease => &[Released, Rejected],
        Released => &[Stored, Distributed, Recalled],
        Rejected => &[Reprocessing],
        Stored => &[Distributed, Recalled],
        Distributed => &[Completed, Recalled],
        Reprocessing => &[Received],
        Recalled => &[Reprocessing],
        Completed => &[],
    }
}

pub fn is_legal(from: WorkOrderStatus, to: WorkOrderStatus) -> bool {
    successors(from).contains(&to)
}

/// Each status maps to exactly one canonical zone. REPROCESSING re-enters
/// the dirty area; RECALLED and COMPLETED stay in the sterile-side ledger.
pub fn zone_of(status: WorkOrderStatus) -> Zone {
    match status {
        Received | Washing | Washed | Reprocessing => Zone::Dirty,
        Inspecting | InspectionFailed | Packaging | Packaged => Zone::Clean,
        Sterilizing | Sterilized | PendingRelease | Released | Rejected | Stored
        | Distributed | Recalled | Completed => Zone::Sterile,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_legal_end_to_end() {
        let path = [
            Received,
            Washing,
            Washed,
            Inspecting,
            Packaging,
            Packaged,
            Sterilizing,
            Sterilized,
            PendingRelease,
            Released,
            Stored,
            Distributed,
            Completed,
        ];
        for pair in path.windows(2) {
            assert!(is_legal(pair[0], pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn indicator_failure_rejects_before_release_marking() {
        // a chemical indicator can be read while the load is still in the
        // chamber or at unload, so rejection must be legal from both stages
        assert!(is_legal(Sterilizing, Rejected));
        assert!(is_legal(Sterilized, Rejected));
        assert!(is_legal(PendingRelease, Rejected));
    }

    #[test]
    fn failure_loops_reenter_at_received() {
        for failed in [InspectionFailed, Rejected, Recalled] {
            assert!(is_legal(failed, Reprocessing));
        }
        assert!(is_legal(Reprocessing, Received));
        assert_eq!(zone_of(Reprocessing), Zone::Dirty);
    }

    #[test]
    fn terminal_states_have_no_successors() {
        assert!(successors(Completed).is_empty());
    }

    #[test]
    fn skipping_stages_is_illegal() {
        assert!(!is_legal(Received, Sterilizing));
        assert!(!is_legal(Washed, Packaged));
        assert!(!is_legal(Packaged, Released));
        assert!(!is_legal(Rejected, Released));
    }

    #[test]
    fn zone_table_matches_workflow_areas() {
        assert_eq!(zone_of(Received), Zone::Dirty);
        assert_eq!(zone_of(Washed), Zone::Dirty);
        assert_eq!(zone_of(Inspecting), Zone::Clean);
        assert_eq!(zone_of(Packaged), Zone::Clean);
        assert_eq!(zone_of(Sterilizing), Zone::Sterile);
        assert_eq!(zone_of(Distributed), Zone::Sterile);
    }
}

//! Shared fixture: an in-memory database with seeded operators and machines,
//! plus shortcuts for walking a work order partway through the pipeline.

use steritrack::config::SteriTrackConfig;
use steritrack::models::{
    IndicatorResult, ItemType, Machine, MachineCycle, MachineType, Role, SterilizationRecord,
    WorkOrder, Zone,
};
use steritrack::{
    CycleTracker, Database, IndicatorEngine, ReleaseAuthority, Session, SessionManager,
    SterilizationRecords, WorkOrderEngine,
};

pub struct Harness {
    pub db: Database,
    pub config: SteriTrackConfig,
    pub sessions: SessionManager,
    pub orders: WorkOrderEngine,
    pub machines: CycleTracker,
    pub records: SterilizationRecords,
    pub indicators: IndicatorEngine,
    pub release: ReleaseAuthority,
    pub admin: Session,
}

impl Harness {
    pub async fn new() -> Self {
        let db = Database::in_memory().await.expect("in-memory db");
        let config = SteriTrackConfig::default();
        let sessions = SessionManager::new(db.clone(), config.security.clone());

        sessions
            .bootstrap_admin("ADMIN-1", "Alice Admin", "1234")
            .await
            .expect("bootstrap admin");
        let admin = sessions
            .authenticate_with_pin("ADMIN-1", "1234")
            .await
            .expect("admin login");

        Self {
            orders: WorkOrderEngine::new(db.clone()),
            machines: CycleTracker::new(db.clone()),
            records: SterilizationRecords::new(db.clone(), config.sterilization.clone()),
            indicators: IndicatorEngine::new(db.clone(), config.sterilization.clone()),
            release: ReleaseAuthority::new(db.clone()),
            sessions,
            admin,
            config,
            db,
        }
    }

    /// A plain operator working in one zone, optionally holding the release
    /// grant.
    pub async fn operator_in(&self, badge: &str, zone: Zone, can_release: bool) -> Session {
        self.sessions
            .create_operator(
                &self.admin,
                badge,
                "Test Operator",
                "4321",
                Role::Operator,
                zone,
                false,
                can_release,
            )
            .await
            .expect("create operator");
        self.sessions
            .authenticate_with_pin(badge, "4321")
            .await
            .expect("operator login")
    }

    pub async fn washer(&self) -> Machine {
        self.machines
            .register_machine(
                &self.admin,
                "Washer 1",
                MachineType::WasherDisinfector,
                Zone::Dirty,
                "Getinge",
                "WD86",
                "W-001",
            )
            .await
            .expect("register washer")
    }

    pub async fn sterilizer(&self) -> Machine {
        self.machines
            .register_machine(
                &self.admin,
                "Autoclave 1",
                MachineType::Steam,
                Zone::Sterile,
                "Getinge",
                "GSS67",
                "S-001",
            )
            .await
            .expect("register sterilizer")
    }

    pub async fn intake(&self, session: &Session) -> WorkOrder {
        self.orders
            .create_work_order(
                session,
                ItemType::Set,
                1,
                "Basic surgery set",
                "SET-0001",
                None,
                0,
                "",
            )
            .await
            .expect("create work order")
    }

    /// Intake through packaging, using the given session for every step.
    pub async fn run_to_packaged(&self, session: &Session) -> WorkOrder {
        let order = self.intake(session).await;
        let washer = self.washer().await;
        let wash = self
            .machines
            .start_cycle(session, washer.id, None, "")
            .await
            .expect("start wash cycle");
        self.orders
            .start_washing(session, order.id, wash.id)
            .await
            .expect("start washing");
        self.machines
            .complete_cycle(session, wash.id, 93.0, 0.0, IndicatorResult::Pending)
            .await
            .expect("complete wash cycle");
        self.orders
            .complete_washing(session, order.id)
            .await
            .expect("complete washing");
        self.orders
            .transfer_to_clean(session, order.id)
            .await
            .expect("transfer to clean");
        self.orders
            .pass_inspection(session, order.id, "")
            .await
            .expect("pass inspection");
        self.orders
            .complete_packaging(session, order.id, "wrap")
            .await
            .expect("complete packaging")
    }

    /// Packaging through sterilizer unload: returns the order, the open
    /// sterilization record and the completed cycle.
    pub async fn run_to_sterilized(
        &self,
        session: &Session,
    ) -> (WorkOrder, SterilizationRecord, MachineCycle) {
        let order = self.run_to_packaged(session).await;
        let sterilizer = self.sterilizer().await;
        let cycle = self
            .machines
            .start_cycle(session, sterilizer.id, None, "")
            .await
            .expect("start sterilizer cycle");
        self.orders
            .start_sterilization(session, order.id, cycle.id)
            .await
            .expect("start sterilization");
        let record = self
            .records
            .create_record(session, order.id, cycle.id)
            .await
            .expect("open sterilization record");
        let cycle = self
            .machines
            .complete_cycle(session, cycle.id, 134.0, 2.1, IndicatorResult::Pass)
            .await
            .expect("complete sterilizer cycle");
        let order = self
            .orders
            .unload_from_sterilizer(session, order.id)
            .await
            .expect("unload");
        self.records
            .set_unload_time(session, record.id)
            .await
            .expect("stamp unload");
        (order, record, cycle)
    }
}

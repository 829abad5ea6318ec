use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use steritrack::models::{WorkOrderStatus, Zone};
use steritrack::{
    CycleTracker, Database, IndicatorEngine, SessionManager, SteriTrackConfig,
    SterilizationRecords, WorkOrderEngine,
};

#[derive(Parser)]
#[command(name = "steritrack", about = "Central sterile supply workflow engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database, run migrations and seed the first admin account
    Init {
        #[arg(long)]
        badge: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        pin: String,
    },
    /// Work order counts per status
    Status,
    /// Work orders queued in one zone
    Queue {
        #[arg(value_parser = parse_zone)]
        zone: Zone,
    },
    /// Machines and running cycles
    Machines,
    /// Biological indicators whose incubation window is up
    BiReady,
    /// Released stock expiring within the next N days
    Expiring {
        #[arg(long, default_value_t = 7)]
        days: i64,
    },
    /// Recent audit entries as JSON lines
    Audit {
        #[arg(long, default_value_t = 24)]
        hours: i64,
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },
}

fn parse_zone(s: &str) -> Result<Zone, String> {
    s.to_uppercase().parse().map_err(|e| format!("{e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = SteriTrackConfig::load()?;
    let db = Database::connect(&config.database).await?;

    match cli.command {
        Commands::Init { badge, name, pin } => {
            let sessions = SessionManager::new(db.clone(), config.security.clone());
            let id = sessions.bootstrap_admin(&badge, &name, &pin).await?;
            println!("admin operator #{id} created for badge {badge}");
        }
        Commands::Status => {
            let engine = WorkOrderEngine::new(db.clone());
            for status in WorkOrderStatus::ALL {
                let orders = engine.list_by_status(status).await?;
                if !orders.is_empty() {
                    println!("{:<18} {}", status.to_string(), orders.len());
                }
            }
        }
        Commands::Queue { zone } => {
            let engine = WorkOrderEngine::new(db.clone());
            for order in engine.list_by_zone(zone, None).await? {
                println!(
                    "{:<16} {:<18} {} (priority {})",
                    order.order_number, order.status.to_string(), order.item_name, order.priority
                );
            }
        }
        Commands::Machines => {
            let tracker = CycleTracker::new(db.clone());
            for zone in [Zone::Dirty, Zone::Clean, Zone::Sterile] {
                for machine in tracker.machines_in_zone(zone).await? {
                    println!(
                        "{:<8} {:<24} {:<18} {}",
                        zone.to_string(), machine.name, machine.machine_type.to_string(), machine.status
                    );
                }
            }
            for cycle in tracker.active_cycles().await? {
                println!("running: {} (machine {})", cycle.cycle_number, cycle.machine_id);
            }
        }
        Commands::BiReady => {
            let indicators = IndicatorEngine::new(db.clone(), config.sterilization.clone());
            for record in indicators.ready_to_read().await? {
                println!("{} lot {}", record.record_number, record.bi_lot_number);
            }
        }
        Commands::Expiring { days } => {
            let records = SterilizationRecords::new(db.clone(), config.sterilization.clone());
            for record in records.expiring_within(days).await? {
                println!("{} expires {}", record.record_number, record.expiry_date);
            }
        }
        Commands::Audit { hours, limit } => {
            let audit = steritrack::audit::AuditLog::new(db.clone());
            for entry in audit.recent(hours, limit).await? {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
    }

    db.close().await;
    Ok(())
}

use anyhow::Result;
use pv_plant_sim::{config::Config, controller::PvSystem, telemetry};
use telemetry::init_tracing;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cfg = Config::load()?;

    let system = PvSystem::new(&cfg);
    for i in 0..cfg.simulation.panel_count {
        system
            .add_panel(format!("panel-{}", i + 1), cfg.panel.clone())
            .await?;
    }
    for i in 0..cfg.simulation.cell_count {
        system
            .add_cell(format!("cell-{}", i + 1), cfg.cell.clone())
            .await?;
    }

    system.start().await?;
    info!(
        panels = cfg.simulation.panel_count,
        cells = cfg.simulation.cell_count,
        tick_millis = cfg.simulation.tick_millis,
        "photovoltaic plant simulation running"
    );

    telemetry::shutdown_signal().await;
    system.stop();

    warn!("shutdown complete");
    Ok(())
}

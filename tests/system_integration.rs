//! End-to-end tests of the orchestrator's background tick schedule:
//! startup validation, budget-bounded runs, cooperative stop, concurrent
//! snapshot readers and mid-run reconfiguration.

use std::time::Duration;

use chrono::NaiveDate;
use pv_plant_sim::config::Config;
use pv_plant_sim::controller::PvSystem;
use pv_plant_sim::simulation::CoolingState;

/// Five ticks per simulated day on a fast wall-clock cadence.
fn fast_config() -> Config {
    let mut cfg = Config::default();
    cfg.simulation.tick_millis = 5;
    cfg.simulation.sim_minutes_per_tick = 288;
    cfg.simulation.max_days = 1;
    cfg.simulation.random_seed = Some(42);
    cfg.simulation.start_time = NaiveDate::from_ymd_opt(2024, 5, 21)
        .unwrap()
        .and_hms_opt(6, 0, 0)
        .unwrap();
    cfg
}

async fn wired_system(cfg: &Config) -> PvSystem {
    let system = PvSystem::new(cfg);
    system
        .add_panel("panel-1", cfg.panel.clone())
        .await
        .unwrap();
    system.add_cell("cell-1", cfg.cell.clone()).await.unwrap();
    system
}

async fn wait_until_stopped(system: &PvSystem) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while system.is_active() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("system did not stop within the timeout");
}

#[tokio::test]
async fn run_stops_at_iteration_budget() {
    let cfg = fast_config();
    let system = wired_system(&cfg).await;

    system.start().await.unwrap();
    wait_until_stopped(&system).await;

    let history = system.history().await;
    assert_eq!(history.len(), 5);
    let indices: Vec<u64> = history.iter().map(|r| r.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4]);

    let snapshot = system.snapshot().await;
    assert!(!snapshot.active);
    assert_eq!(snapshot.iterations, 5);
    assert_eq!(snapshot.history_len, 5);
}

#[tokio::test]
async fn concurrent_snapshot_readers_see_consistent_state() {
    let cfg = fast_config();
    let system = wired_system(&cfg).await;
    system.start().await.unwrap();

    let mut readers = Vec::new();
    for _ in 0..4 {
        let system = system.clone();
        readers.push(tokio::spawn(async move {
            for _ in 0..50 {
                let snapshot = system.snapshot().await;
                assert!((0.0..=1.0).contains(&snapshot.storage.state_of_charge));
                assert_eq!(snapshot.history_len as u64, snapshot.iterations);
                assert_eq!(snapshot.panels.panels.len(), snapshot.panel_details.len());

                let history = system.history_since(0).await;
                assert!(history.len() <= snapshot.max_iterations as usize);

                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }));
    }

    for reader in readers {
        reader.await.unwrap();
    }
    wait_until_stopped(&system).await;
}

#[tokio::test]
async fn stop_takes_effect_at_iteration_boundary() {
    let mut cfg = fast_config();
    cfg.simulation.tick_millis = 20;
    cfg.simulation.max_days = 100; // effectively unbounded for this test
    let system = wired_system(&cfg).await;

    system.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(70)).await;
    system.stop();
    wait_until_stopped(&system).await;
    // Let any tick that was already in flight finish.
    tokio::time::sleep(Duration::from_millis(30)).await;

    let len_after_stop = system.history().await.len();
    assert!(len_after_stop >= 1);

    // No further ticks once the loop has observed the stop.
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(system.history().await.len(), len_after_stop);
}

#[tokio::test]
async fn starting_twice_is_rejected() {
    let mut cfg = fast_config();
    cfg.simulation.max_days = 100;
    let system = wired_system(&cfg).await;

    system.start().await.unwrap();
    assert!(system.start().await.is_err());
    system.stop();
    wait_until_stopped(&system).await;
}

#[tokio::test]
async fn budget_can_be_extended_mid_run() {
    let mut cfg = fast_config();
    cfg.simulation.tick_millis = 30;
    let system = wired_system(&cfg).await;

    system.start().await.unwrap();
    // Extend from one simulated day (5 ticks) to two (10 ticks) while
    // the first day is still running.
    system.set_iteration_budget(2).await;
    wait_until_stopped(&system).await;

    assert_eq!(system.history().await.len(), 10);
}

#[tokio::test]
async fn structural_changes_apply_between_ticks() {
    let mut cfg = fast_config();
    cfg.simulation.tick_millis = 20;
    cfg.simulation.max_days = 100;
    let system = wired_system(&cfg).await;

    system.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    system.add_panel("panel-2", cfg.panel.clone()).await.unwrap();
    system.add_cell("cell-2", cfg.cell.clone()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let snapshot = system.snapshot().await;
    assert_eq!(snapshot.panel_details.len(), 2);
    assert_eq!(snapshot.storage.cells.len(), 2);

    // The new panel inherited the running cooling policy.
    let added = system.panel("panel-2").await.unwrap();
    assert_ne!(added.cooling.state, CoolingState::Inactive);

    system.remove_panel("panel-2").await.unwrap();
    let snapshot = system.snapshot().await;
    assert_eq!(snapshot.panel_details.len(), 1);
    assert!(!snapshot.distributor.ledger.contains_key("panel-2"));

    system.stop();
    wait_until_stopped(&system).await;
}

#[tokio::test]
async fn starved_cooling_never_stops_the_run() {
    let mut cfg = fast_config();
    // Panels that generate nothing: storage never charges, so every
    // cooling request is denied once the panel warms up.
    cfg.panel.area_m2 = 0.0;
    cfg.cell.initial_soc = 0.0;
    let system = wired_system(&cfg).await;

    system.start().await.unwrap();
    wait_until_stopped(&system).await;

    // The full budget ran despite starvation along the way.
    assert_eq!(system.history().await.len(), 5);

    let cooling_history = system
        .cooling_history_since("panel-1", 0)
        .await
        .unwrap();
    let starved: Vec<_> = cooling_history
        .iter()
        .filter(|r| r.state == CoolingState::Starved)
        .collect();
    assert!(!starved.is_empty());
    // Denied evaluations force the effect to zero but keep the setpoint.
    for record in starved {
        assert_eq!(record.effect_c, 0.0);
        assert!(record.setpoint_c > 0.0);
    }

    let snapshot = system.snapshot().await;
    assert!(snapshot.distributor.fault);
}

#[tokio::test]
async fn snapshots_serialize_for_the_transport_layer() {
    let cfg = fast_config();
    let system = wired_system(&cfg).await;

    let snapshot = system.snapshot().await;
    let json = serde_json::to_value(snapshot.as_ref()).unwrap();
    assert!(json.get("environment").is_some());
    assert!(json.get("panels").is_some());
    assert!(json.get("storage").is_some());
    assert!(json.get("distributor").is_some());
}

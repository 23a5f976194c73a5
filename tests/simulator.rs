// tests/simulator.rs
use anyhow::Result;
use parkflow::clock::ManualClock;
use parkflow::registry::SlotRegistry;
use parkflow::testing::*;
use parkflow::{Event, Runner, SlotStatus};
use std::collections::HashMap;

#[test]
fn simulated_traffic_ends_in_the_latest_reported_state() -> Result<()> {
    let mut sim = Simulator::new(SlotRegistry::default_lot(), 2024);
    let events = generate(&mut sim, 1_500, 10_000, 1);
    assert_eq!(events.len(), 1_500);

    let runner = Runner::new(test_pipeline_config(3))?.with_clock(ManualClock::at_secs(12_000));
    let sink = RecordingSink::new();
    let report = runner.run(VecSource::from_events(&events), sink.clone())?;
    assert_eq!(report.ingress.routed, 1_500);
    assert_eq!(report.delivery_failures(), 0);

    let mut latest: HashMap<&str, &Event> = HashMap::new();
    for e in &events {
        latest
            .entry(e.slot_id.as_str())
            .and_modify(|cur| {
                if e.logical_timestamp > cur.logical_timestamp {
                    *cur = e;
                }
            })
            .or_insert(e);
    }
    assert_eq!(report.slots(), latest.len());

    let lot = SlotRegistry::default_lot();
    for (slot, e) in latest {
        assert!(lot.slots().iter().any(|s| s == slot));
        let last = sink.records_for(slot).pop().unwrap();
        assert_eq!(last.source_logical_timestamp, e.logical_timestamp);
        assert_eq!(last.status == SlotStatus::Occupied, e.status_code.is_occupying());
        assert_eq!(last.plate_id, e.plate_id);
    }
    Ok(())
}

#[test]
fn simulated_lot_never_exceeds_its_vehicle_cap() {
    let mut sim = Simulator::new(SlotRegistry::default_lot(), 5);
    for t in 0..1_000 {
        assert!(sim.next_event(t, t * 1_000).is_some());
        assert!(sim.active_vehicles() <= 8);
        assert!(sim.registry().occupied_count() <= sim.active_vehicles());
    }
}

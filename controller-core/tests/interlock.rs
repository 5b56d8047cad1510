mod common;

use common::Rig;
use controller_core::commands::CommandSource;
use controller_core::interlock::InterlockEdge;
use controller_core::relays::{HEATER_PSU_RELAYS, RelayId};
use controller_core::telemetry::ControlEvent;

fn heaters_on(rig: &mut Rig) {
    for line in ["r1 on", "r2 on", "r3 on"] {
        rig.host(line);
    }
}

fn heater_writes(rig: &Rig) -> Vec<Vec<bool>> {
    HEATER_PSU_RELAYS
        .iter()
        .map(|relay| rig.relays().writes_to(*relay))
        .collect()
}

#[test]
fn stale_okay_signal_switches_heaters_off_once() {
    let mut rig = Rig::started();
    heaters_on(&mut rig);

    rig.step(2_996);
    assert_eq!(rig.clock.ms(), 2_999);
    assert!(!rig.controller.interlock().is_tripped());

    let summary = rig.step(1);
    assert_eq!(summary.interlock_edge, Some(InterlockEdge::Tripped));
    assert_eq!(summary.relay_writes, 3);
    assert!(
        HEATER_PSU_RELAYS
            .iter()
            .all(|relay| !rig.controller.state().relays.is_on(*relay))
    );

    rig.run_for(2_000, 10);
    assert_eq!(rig.events.count(ControlEvent::InterlockTripped), 1);
    assert_eq!(heater_writes(&rig), vec![vec![false, true, false]; 3]);
}

#[test]
fn okay_signal_restores_heaters_once() {
    let mut rig = Rig::started();
    heaters_on(&mut rig);
    rig.run_for(3_500, 10);
    assert!(rig.controller.interlock().is_tripped());

    let summary = rig.host("otp_okay");
    assert_eq!(summary.interlock_edge, Some(InterlockEdge::Cleared));
    rig.host("otp_okay");
    rig.step(1);

    assert_eq!(rig.events.count(ControlEvent::InterlockCleared), 1);
    assert_eq!(heater_writes(&rig), vec![vec![false, true, false, true]; 3]);
}

#[test]
fn regular_okay_signals_keep_heaters_running() {
    let mut rig = Rig::started();
    heaters_on(&mut rig);

    for _ in 0..10 {
        rig.step(2_000);
        let summary = rig.host("otp_okay");
        assert_eq!(summary.interlock_edge, None);
    }

    assert!(!rig.controller.interlock().is_tripped());
    assert_eq!(heater_writes(&rig), vec![vec![false, true]; 3]);
}

#[test]
fn host_trip_acts_on_the_same_pass() {
    let mut rig = Rig::started();
    heaters_on(&mut rig);

    let summary = rig.host("otp_trip");
    assert_eq!(summary.interlock_edge, Some(InterlockEdge::Tripped));
    assert!(!rig.controller.state().relays.is_on(RelayId::HEATER_PSU_2));
}

#[test]
fn disabled_interlock_leaves_heaters_to_the_operator() {
    let mut rig = Rig::started();

    rig.debug("ena_otp off");
    assert_eq!(
        rig.port.take_replies(),
        vec![(CommandSource::Debug, "otp disabled".to_string())]
    );
    rig.debug("r2 on");

    rig.run_for(5_000, 10);
    assert!(rig.controller.state().relays.is_on(RelayId::HEATER_PSU_2));
    assert_eq!(rig.events.count(ControlEvent::InterlockTripped), 0);

    rig.host("?");
    let (_, report) = rig.port.take_replies().pop().expect("report reply");
    assert_eq!(report.split('\t').nth(1), Some("0"));
}

#[test]
fn debug_heater_commands_apply_silently_while_disabled() {
    let mut rig = Rig::started();
    rig.debug("ena_otp off");
    rig.port.take_replies();

    for line in ["r1 on", "r2", "r3 on"] {
        let summary = rig.debug(line);
        assert_eq!(summary.commands_applied, 1);
    }

    assert!(rig.port.take_replies().is_empty());
    for relay in [
        RelayId::HEATER_PSU_1,
        RelayId::HEATER_PSU_2,
        RelayId::HEATER_PSU_3,
    ] {
        assert!(rig.controller.state().relays.is_on(relay));
    }
}

#[test]
fn re_enabling_applies_a_stale_signal() {
    let mut rig = Rig::started();
    rig.debug("ena_otp off");
    rig.debug("r2 on");
    rig.run_for(5_000, 10);

    let summary = rig.debug("ena_otp on");
    assert_eq!(summary.interlock_edge, Some(InterlockEdge::Tripped));
    assert!(!rig.controller.state().relays.is_on(RelayId::HEATER_PSU_2));
    assert_eq!(rig.events.count(ControlEvent::InterlockEnabled), 1);
    assert_eq!(rig.events.count(ControlEvent::InterlockDisabled), 1);
}

#[test]
fn host_toggles_interlock_without_a_reply() {
    let mut rig = Rig::started();

    rig.host("ena_otp off");
    assert!(!rig.controller.interlock().is_enabled());
    rig.host("ena_otp on");
    assert!(rig.controller.interlock().is_enabled());
    assert!(rig.port.replies.is_empty());
}

#[test]
fn soft_reset_rearms_with_a_fresh_signal() {
    let mut rig = Rig::started();
    rig.host("ena_otp off");
    rig.run_for(10_000, 100);

    rig.host("soft_reset");
    let reset_at = rig.clock.ms();
    assert!(rig.controller.interlock().is_enabled());

    rig.step(2_998);
    assert!(!rig.controller.interlock().is_tripped());
    rig.step(2);
    assert!(rig.clock.ms() - reset_at >= 3_000);
    assert!(rig.controller.interlock().is_tripped());
}

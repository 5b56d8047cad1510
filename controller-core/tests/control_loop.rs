mod common;

use common::{FREE_BYTES, Rig, flow_code_for, test_config};
use controller_core::calibration::PUMP_TRANSMITTER;
use controller_core::commands::{CommandSource, DEBUG_IDENTITY, HOST_IDENTITY};
use controller_core::gains::GainSet;
use controller_core::pid::Mode;
use controller_core::relays::{BUBBLE_VALVE_RELAYS, RelayId};
use controller_core::telemetry::ControlEvent;

#[test]
fn start_writes_every_output_and_arms_watchdog() {
    let rig = Rig::started();

    let relays = rig.relays();
    assert!(relays.begun);
    assert_eq!(relays.writes.len(), 9);
    assert!(relays.writes.iter().all(|(_, on)| !on));

    assert!(rig.pump().begun);
    assert_eq!(rig.pump().codes, vec![PUMP_TRANSMITTER.ma_to_code(4.0)]);
    assert_eq!(rig.watchdog().timeout_ms, Some(1_000));
    assert_eq!(rig.events.events, vec![(ControlEvent::Started, 0)]);
}

#[test]
fn channels_sample_on_their_own_intervals() {
    let mut rig = Rig::started();

    let first = rig.step(1);
    assert!(!first.pressure_sampled);
    assert!(!first.flow_sampled);

    let pressure = rig.step(1);
    assert!(pressure.pressure_sampled);
    assert!(!pressure.flow_sampled);

    rig.run_for(22, 1);
    let flow = rig.step(1);
    assert!(flow.flow_sampled);

    let readings = rig.controller.state();
    assert!((readings.pressure.code - 763.0).abs() < f32::EPSILON);
    assert!((readings.flow.ma - 4.0).abs() < 1e-4);
    assert!(readings.flow.value.abs() < 1e-4);
    assert_eq!(rig.controller.peripherals().pressure.reads, 12);
    assert_eq!(rig.controller.peripherals().flow.reads, 1);
}

#[test]
fn watchdog_is_refreshed_until_reboot_is_requested() {
    let mut rig = Rig::started();

    rig.run_for(2_000, 100);
    assert_eq!(rig.watchdog().resets, vec![800, 1_600]);

    rig.debug("reboot");
    assert!(!rig.controller.is_feeding_watchdog());
    assert_eq!(
        rig.port.take_replies(),
        vec![(
            CommandSource::Debug,
            "watchdog refresh stopped, restarting".to_string()
        )]
    );
    assert_eq!(rig.events.count(ControlEvent::RebootRequested), 1);

    rig.run_for(3_000, 100);
    assert_eq!(rig.watchdog().resets.len(), 2);
}

#[test]
fn host_link_cannot_request_reboot() {
    let mut rig = Rig::started();

    let summary = rig.host("reboot");
    assert_eq!(summary.commands_applied, 0);
    assert!(rig.controller.is_feeding_watchdog());
}

#[test]
fn identify_replies_on_the_asking_link() {
    let mut rig = Rig::started();

    rig.host("ID?");
    rig.debug("id?");

    assert_eq!(
        rig.port.take_replies(),
        vec![
            (CommandSource::Host, HOST_IDENTITY.to_string()),
            (CommandSource::Debug, DEBUG_IDENTITY.to_string()),
        ]
    );
}

#[test]
fn report_lists_state_in_field_order() {
    let mut rig = Rig::started();
    rig.run_for(30, 1);

    rig.host("?");

    let replies = rig.port.take_replies();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].0, CommandSource::Host);
    assert_eq!(
        replies[0].1,
        format!(
            "{FREE_BYTES}\t1\t0\t0\t0\t0\t0\t0\t0\t0\t0\t763.00\t4.00\t-0.11\t4.000\t758.00\t4.000\t0\t0.00"
        )
    );
}

#[test]
fn report_shows_applied_relays_and_operator_settings() {
    let mut rig = Rig::started();
    rig.host("r2 on");
    rig.host("sfr12.5");
    rig.host("ena_pfr on");
    rig.host("?");

    let (_, line) = rig.port.take_replies().pop().expect("report reply");
    let fields: Vec<&str> = line.split('\t').collect();
    assert_eq!(fields.len(), 19);
    assert_eq!(&fields[2..5], &["0", "1", "0"]);
    assert_eq!(fields[17], "1");
    assert_eq!(fields[18], "12.50");
}

#[test]
fn pump_current_is_clamped_and_written_once_per_change() {
    let mut rig = Rig::started();

    rig.host("sps12");
    assert!((rig.controller.state().pump_pct() - 50.0).abs() < 1e-3);
    rig.host("sps12");
    rig.host("sps25");
    assert!((rig.controller.state().pump_ma() - 20.0).abs() < f32::EPSILON);
    rig.host("sps1");
    assert!((rig.controller.state().pump_ma() - 4.0).abs() < f32::EPSILON);

    assert_eq!(
        rig.pump().codes,
        vec![
            PUMP_TRANSMITTER.ma_to_code(4.0),
            PUMP_TRANSMITTER.ma_to_code(12.0),
            PUMP_TRANSMITTER.ma_to_code(20.0),
            PUMP_TRANSMITTER.ma_to_code(4.0),
        ]
    );
}

#[test]
fn flow_setpoint_is_clamped_to_meter_range() {
    let mut rig = Rig::started();

    rig.host("sfr99");
    assert!((rig.controller.state().setpoint_m3h - 30.0).abs() < f32::EPSILON);
    rig.host("sfr-3");
    assert!(rig.controller.state().setpoint_m3h.abs() < f32::EPSILON);
}

#[test]
fn unrecognized_lines_are_ignored() {
    let mut rig = Rig::started();
    let before = rig.controller.state().clone();

    for line in ["hello", "sps", "sfrnan", "r0 on", "r10", "bub maybe", ""] {
        let summary = rig.host(line);
        assert_eq!(summary.commands_applied, 0, "{line:?}");
    }

    assert!(rig.port.replies.is_empty());
    assert_eq!(rig.controller.state().relays, before.relays);
    assert!((rig.controller.state().pump_ma() - before.pump_ma()).abs() < f32::EPSILON);
}

#[test]
fn relay_commands_toggle_and_switch_relays() {
    let mut rig = Rig::started();

    rig.host("r5");
    rig.host("r5");
    rig.host("r5 on");
    let summary = rig.host("r5 on");
    assert_eq!(summary.relay_writes, 0);

    assert_eq!(
        rig.relays().writes_to(RelayId::new(5).expect("relay")),
        vec![false, true, false, true]
    );
}

#[test]
fn one_line_per_link_is_applied_each_pass() {
    let mut rig = Rig::started();
    rig.port.host("r4 on");
    rig.port.host("r6 on");
    rig.port.debug("r1 on");

    let first = rig.step(1);
    assert_eq!(first.commands_applied, 2);
    let state = rig.controller.state();
    assert!(state.relays.is_on(RelayId::HEATER_PSU_1));
    assert!(state.relays.is_on(RelayId::new(4).expect("relay")));
    assert!(!state.relays.is_on(RelayId::new(6).expect("relay")));

    let second = rig.step(1);
    assert_eq!(second.commands_applied, 1);
    assert!(rig.controller.state().relays.is_on(RelayId::new(6).expect("relay")));
}

#[test]
fn debug_link_is_limited_to_its_command_set() {
    let mut rig = Rig::started();

    for line in ["sps12", "sfr10", "r9 on", "r4 on", "ena_pfr on", "soft_reset", "otp_trip"] {
        let summary = rig.debug(line);
        assert_eq!(summary.commands_applied, 0, "{line:?}");
    }

    rig.debug("r3 on");
    rig.debug("bub on");

    let relays = &rig.controller.state().relays;
    assert!(relays.is_on(RelayId::HEATER_PSU_3));
    assert!(BUBBLE_VALVE_RELAYS.iter().all(|relay| relays.is_on(*relay)));
    assert!(!relays.is_on(RelayId::PUMP_ENABLE));
}

#[test]
fn automatic_control_requires_the_pump_relay() {
    let mut rig = Rig::started();

    rig.host("ena_pfr on");
    rig.step(1);
    assert_eq!(rig.controller.pid().mode(), Mode::Manual);

    rig.host("r9 on");
    rig.step(1);
    assert_eq!(rig.controller.pid().mode(), Mode::Automatic);
    assert_eq!(rig.events.count(ControlEvent::AutomaticEngaged), 1);

    rig.host("r9 off");
    rig.step(1);
    assert_eq!(rig.controller.pid().mode(), Mode::Manual);
    assert_eq!(rig.events.count(ControlEvent::AutomaticReleased), 1);
}

#[test]
fn engaging_automatic_control_is_bumpless() {
    let mut rig = Rig::new(test_config(), 763, flow_code_for(10.5));
    rig.run_for(30, 1);
    rig.host("sps12");
    rig.host("sfr10.5");
    rig.host("r9 on");

    let summary = rig.host("ena_pfr on");

    let output = summary.pid_output.expect("pid computed on engagement");
    assert!((output - 50.0).abs() < 0.01, "{output}");
    assert!((rig.controller.state().pump_pct() - output).abs() < f32::EPSILON);
}

#[test]
fn automatic_output_follows_the_sample_time() {
    let mut rig = Rig::new(test_config(), 763, flow_code_for(5.0));
    rig.run_for(30, 1);
    rig.host("sfr10");
    rig.host("r9 on");
    let engaged = rig.host("ena_pfr on");
    assert!(engaged.pid_output.is_some());

    for _ in 0..999 {
        assert!(rig.step(1).pid_output.is_none());
    }
    assert!(rig.step(1).pid_output.is_some());

    let (min, max) = rig.controller.pid().output_limits();
    let pct = rig.controller.state().pump_pct();
    assert!(pct >= min && pct <= max);
    assert!(pct > 0.0);
}

#[test]
fn soft_reset_restores_safe_defaults() {
    let mut rig = Rig::started();
    for line in ["r1 on", "r9 on", "bub on", "sps12", "sfr10", "ena_pfr on", "ena_otp off"] {
        rig.host(line);
    }
    rig.step(1);
    assert_eq!(rig.controller.pid().mode(), Mode::Automatic);
    let applied_before = rig.events.count(ControlEvent::GainSetApplied(GainSet::Fast));

    rig.host("soft_reset");

    let state = rig.controller.state();
    assert!(RelayId::all().all(|relay| !state.relays.is_on(relay)));
    assert!((state.pump_ma() - 4.0).abs() < f32::EPSILON);
    assert!(!state.auto_enabled);
    assert!(state.setpoint_m3h.abs() < f32::EPSILON);
    assert!(rig.controller.interlock().is_enabled());
    assert!(!rig.controller.interlock().is_tripped());
    assert_eq!(rig.controller.pid().mode(), Mode::Manual);
    assert_eq!(
        rig.events.count(ControlEvent::SoftReset(CommandSource::Host)),
        1
    );
    assert_eq!(
        rig.events.count(ControlEvent::GainSetApplied(GainSet::Fast)),
        applied_before + 1
    );
    assert_eq!(
        rig.pump().codes.last().copied(),
        Some(PUMP_TRANSMITTER.ma_to_code(4.0))
    );
}

#![no_std]

// Control and safety logic for the flow rig.
//
// This crate stays portable across MCU firmware and host tooling by avoiding the
// Rust standard library and exposing hardware seams as traits the other crates
// implement.

pub mod acquisition;
pub mod actuator;
pub mod calibration;
pub mod clock;
pub mod commands;
pub mod config;
pub mod controller;
pub mod gains;
pub mod interlock;
pub mod pid;
pub mod relays;
pub mod report;
pub mod state;
pub mod telemetry;

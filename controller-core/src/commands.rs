//! Line commands accepted from the host and debug links.
//!
//! Each command arrives as one already-terminated line. The grammar is small
//! enough that `winnow` parses the text directly:
//!
//! | Command | Effect |
//! |---------|--------|
//! | `id?` | identify (case-insensitive) |
//! | `?` | full state report |
//! | `rN`, `rN on`, `rN off` | toggle / switch relay `N` (1–9) |
//! | `bub on`, `bub off` | all bubble valves |
//! | `sps<mA>` | pump drive current, clamped to 4–20 mA |
//! | `sfr<m3h>` | flow setpoint, clamped to the meter range |
//! | `ena_pfr on`, `ena_pfr off` | automatic flow control |
//! | `ena_otp on`, `ena_otp off` | interlock enforcement |
//! | `otp_okay`, `otp_trip` | interlock confirmation / trip |
//! | `soft_reset` | return to safe defaults |
//! | `reboot` | stop refreshing the watchdog (debug link only) |

use core::fmt;

use winnow::ascii::{Caseless, float, space0, space1};
use winnow::combinator::{alt, opt, preceded};
use winnow::prelude::*;
use winnow::token::one_of;

use crate::relays::{HEATER_PSU_RELAYS, RelayAction, RelayId};

/// Longest accepted command line.
pub const MAX_COMMAND_LEN: usize = 64;

/// Bounded command line as delivered by a link.
pub type CommandLine = heapless::String<MAX_COMMAND_LEN>;

/// Reply to `id?` on the host link.
pub const HOST_IDENTITY: &str = "flow-rig controller";

/// Reply to `id?` on the debug link.
pub const DEBUG_IDENTITY: &str = "flow-rig controller debug";

/// Link a command arrived on.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommandSource {
    /// Supervisory host program; full vocabulary.
    Host,
    /// Operator console; diagnostics and manual heater/valve control.
    Debug,
}

impl CommandSource {
    #[must_use]
    pub const fn identity(self) -> &'static str {
        match self {
            CommandSource::Host => HOST_IDENTITY,
            CommandSource::Debug => DEBUG_IDENTITY,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InterlockCommand {
    Enable,
    Disable,
    Okay,
    Trip,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Command {
    Identify,
    Report,
    SoftReset,
    Reboot,
    Relay { relay: RelayId, action: RelayAction },
    BubbleValves(bool),
    /// Pump drive current in mA, unclamped.
    PumpCurrent(f32),
    /// Flow setpoint in m³/h, unclamped.
    FlowSetpoint(f32),
    AutoControl(bool),
    Interlock(InterlockCommand),
}

impl Command {
    /// Whether the command may be issued from `source`.
    #[must_use]
    pub fn is_permitted(&self, source: CommandSource) -> bool {
        match source {
            CommandSource::Host => !matches!(self, Command::Reboot),
            CommandSource::Debug => match self {
                Command::Identify
                | Command::Report
                | Command::Reboot
                | Command::BubbleValves(_)
                | Command::Interlock(InterlockCommand::Enable | InterlockCommand::Disable) => true,
                Command::Relay { relay, .. } => HEATER_PSU_RELAYS.contains(relay),
                _ => false,
            },
        }
    }
}

/// Reasons a line produced no command. Callers ignore the line.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommandError {
    Unrecognized,
    NotPermitted(CommandSource),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Unrecognized => f.write_str("unrecognized command"),
            CommandError::NotPermitted(source) => write!(f, "command not permitted on {source:?} link"),
        }
    }
}

/// Parses one command line received from `source`.
///
/// # Errors
///
/// Returns [`CommandError::Unrecognized`] for anything outside the grammar,
/// including numeric arguments that are missing or not finite, and
/// [`CommandError::NotPermitted`] for commands the link may not issue.
pub fn parse(line: &str, source: CommandSource) -> Result<Command, CommandError> {
    let command = command_line
        .parse(line.trim())
        .map_err(|_| CommandError::Unrecognized)?;
    if command.is_permitted(source) {
        Ok(command)
    } else {
        Err(CommandError::NotPermitted(source))
    }
}

fn command_line(input: &mut &str) -> ModalResult<Command> {
    alt((
        Caseless("id?").value(Command::Identify),
        "?".value(Command::Report),
        "soft_reset".value(Command::SoftReset),
        "reboot".value(Command::Reboot),
        "otp_okay".value(Command::Interlock(InterlockCommand::Okay)),
        "otp_trip".value(Command::Interlock(InterlockCommand::Trip)),
        preceded(("ena_otp", space1), on_off).map(|on| {
            Command::Interlock(if on {
                InterlockCommand::Enable
            } else {
                InterlockCommand::Disable
            })
        }),
        preceded(("ena_pfr", space1), on_off).map(Command::AutoControl),
        preceded(("bub", space1), on_off).map(Command::BubbleValves),
        preceded("sps", argument).map(Command::PumpCurrent),
        preceded("sfr", argument).map(Command::FlowSetpoint),
        relay,
    ))
    .parse_next(input)
}

fn on_off(input: &mut &str) -> ModalResult<bool> {
    alt(("on".value(true), "off".value(false))).parse_next(input)
}

fn argument(input: &mut &str) -> ModalResult<f32> {
    preceded(space0, float::<_, f32, _>)
        .verify(|value: &f32| value.is_finite())
        .parse_next(input)
}

fn relay(input: &mut &str) -> ModalResult<Command> {
    (relay_id, opt(preceded(space1, on_off)))
        .map(|(relay, state)| Command::Relay {
            relay,
            action: state.map_or(RelayAction::Toggle, RelayAction::from),
        })
        .parse_next(input)
}

fn relay_id(input: &mut &str) -> ModalResult<RelayId> {
    preceded('r', one_of('1'..='9'))
        .verify_map(|digit: char| {
            digit
                .to_digit(10)
                .and_then(|number| u8::try_from(number).ok())
                .and_then(RelayId::new)
        })
        .parse_next(input)
}

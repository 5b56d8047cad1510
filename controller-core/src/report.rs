//! Tab-delimited state report sent in reply to `?`.
//!
//! Field order:
//!
//! ```text
//! free_memory  interlock_enabled  relay1 .. relay9
//! pressure_code  pressure_mA  pressure_mbar  pump_mA
//! flow_code  flow_mA  auto_enabled  setpoint_m3h
//! ```
//!
//! Flags print as `0`/`1`, unknown readings as `nan`. Pump and flow currents
//! carry three decimals, every other reading two.

use core::fmt;

use heapless::String;

use crate::relays::RelayId;
use crate::state::ControlState;

/// Capacity of a rendered report line.
pub const REPORT_CAPACITY: usize = 192;

/// Rendered report line.
pub type ReportLine = String<REPORT_CAPACITY>;

/// Platform hook reporting unused RAM for the first report field.
pub trait MemoryProbe {
    /// Bytes currently free, if the platform can tell.
    fn free_bytes(&self) -> Option<usize>;
}

/// Probe for platforms without a meaningful free-memory figure.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoMemoryProbe;

impl MemoryProbe for NoMemoryProbe {
    fn free_bytes(&self) -> Option<usize> {
        None
    }
}

/// Renders a [`ControlState`] as one report line.
#[derive(Clone, Copy, Debug)]
pub struct StateReport<'a> {
    state: &'a ControlState,
    interlock_enabled: bool,
    free_bytes: Option<usize>,
}

impl<'a> StateReport<'a> {
    #[must_use]
    pub const fn new(
        state: &'a ControlState,
        interlock_enabled: bool,
        free_bytes: Option<usize>,
    ) -> Self {
        Self {
            state,
            interlock_enabled,
            free_bytes,
        }
    }

    /// Writes the report without a line terminator.
    pub fn write_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        let state = self.state;

        write!(writer, "{}", self.free_bytes.unwrap_or(0))?;
        write_flag(writer, self.interlock_enabled)?;
        for relay in RelayId::all() {
            write_flag(writer, state.relays.is_on(relay))?;
        }

        write_float(writer, state.pressure.code, 2)?;
        write_float(writer, state.pressure.ma, 2)?;
        write_float(writer, state.pressure.value, 2)?;
        write_float(writer, state.pump_ma(), 3)?;
        write_float(writer, state.flow.code, 2)?;
        write_float(writer, state.flow.ma, 3)?;
        write_flag(writer, state.auto_enabled)?;
        write_float(writer, state.setpoint_m3h, 2)
    }

    /// Renders into a bounded line buffer.
    ///
    /// # Errors
    ///
    /// Returns [`fmt::Error`] if the line does not fit [`REPORT_CAPACITY`].
    pub fn render(&self) -> Result<ReportLine, fmt::Error> {
        let mut line = ReportLine::new();
        self.write_line(&mut line)?;
        Ok(line)
    }
}

impl fmt::Display for StateReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_line(f)
    }
}

fn write_flag<W: fmt::Write>(writer: &mut W, flag: bool) -> fmt::Result {
    writer.write_char('\t')?;
    writer.write_char(if flag { '1' } else { '0' })
}

fn write_float<W: fmt::Write>(writer: &mut W, value: f32, decimals: usize) -> fmt::Result {
    writer.write_char('\t')?;
    if value.is_nan() {
        writer.write_str("nan")
    } else if value.is_infinite() {
        writer.write_str(if value > 0.0 { "inf" } else { "-inf" })
    } else {
        write!(writer, "{value:.decimals$}")
    }
}

//! Current-loop calibrations and engineering-unit conversions.

/// Full-scale code of the 12-bit current-loop converters.
pub const FULL_SCALE_CODE: u16 = 0x0FFF;

/// Two-point linear map between converter codes and loop current.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LinearCalibration {
    pub p1_ma: f32,
    pub p1_code: u16,
    pub p2_ma: f32,
    pub p2_code: u16,
}

impl LinearCalibration {
    #[must_use]
    pub const fn new(p1_ma: f32, p1_code: u16, p2_ma: f32, p2_code: u16) -> Self {
        Self {
            p1_ma,
            p1_code,
            p2_ma,
            p2_code,
        }
    }

    /// Both points must be distinct in code and current.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.p1_code != self.p2_code
            && self.p1_ma.is_finite()
            && self.p2_ma.is_finite()
            && (self.p2_ma - self.p1_ma).abs() > f32::EPSILON
    }

    /// Converts a (possibly filtered, fractional) code to milliamps.
    #[must_use]
    pub fn code_to_ma(&self, code: f32) -> f32 {
        let span = f32::from(self.p2_code) - f32::from(self.p1_code);
        self.p1_ma + (code - f32::from(self.p1_code)) / span * (self.p2_ma - self.p1_ma)
    }

    /// Converts milliamps to the nearest code the converter accepts.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn ma_to_code(&self, ma: f32) -> u16 {
        let span = f32::from(self.p2_code) - f32::from(self.p1_code);
        let code = (ma - self.p1_ma) / (self.p2_ma - self.p1_ma) * span + f32::from(self.p1_code);
        libm::roundf(code).clamp(0.0, f32::from(FULL_SCALE_CODE)) as u16
    }
}

/// Receiver on the gas-volume-fraction differential pressure transducer.
pub const PRESSURE_RECEIVER: LinearCalibration = LinearCalibration::new(4.00, 763, 20.11, 3967);

/// Receiver on the tunnel flow meter.
pub const FLOW_RECEIVER: LinearCalibration = LinearCalibration::new(4.00, 758, 20.00, 3928);

/// Transmitter driving the tunnel pump speed input.
pub const PUMP_TRANSMITTER: LinearCalibration = LinearCalibration::new(4.00, 790, 20.5, 4095);

/// Bottom of the 4-20 mA loop.
pub const LOOP_MIN_MA: f32 = 4.0;

/// Top of the 4-20 mA loop.
pub const LOOP_MAX_MA: f32 = 20.0;

/// Flow meter full-scale reading.
pub const DEFAULT_FLOW_FULL_SCALE_M3H: f32 = 30.0;

/// Flow meter reading for a loop current; clamped to the meter range.
#[must_use]
pub fn flow_m3h(ma: f32, full_scale_m3h: f32) -> f32 {
    ((ma - LOOP_MIN_MA) / (LOOP_MAX_MA - LOOP_MIN_MA)).clamp(0.0, 1.0) * full_scale_m3h
}

/// Differential pressure for a loop current, from the transducer calibration sheet.
#[must_use]
pub fn pressure_mbar(ma: f32) -> f32 {
    (ma - 4.01) / 16.072 * 170.0
}

/// Pump drive current for a speed percentage.
#[must_use]
pub fn pump_pct_to_ma(pct: f32) -> f32 {
    pct * 0.16 + LOOP_MIN_MA
}

/// Pump speed percentage for a drive current.
#[must_use]
pub fn pump_ma_to_pct(ma: f32) -> f32 {
    (ma - LOOP_MIN_MA) / 0.16
}

/// Extracts the 12-bit sample from a two-byte receiver frame.
///
/// The first byte carries a null bit and the top bits, the second the low bits
/// followed by one trailing bit.
#[must_use]
pub fn decode_receiver_frame(frame: [u8; 2]) -> u16 {
    let high = u16::from(frame[0] & 0x1F);
    ((high << 8) | u16::from(frame[1])) >> 1
}

/// Builds the two-byte transmitter frame for a 12-bit code.
///
/// The control nibble selects unbuffered, 1x gain, active output.
#[must_use]
pub fn encode_transmitter_frame(code: u16) -> [u8; 2] {
    let [high, low] = (code & FULL_SCALE_CODE).to_be_bytes();
    [high | 0x30, low]
}

//! STM32G0 implementations of the `controller-core` hardware seams.
//!
//! The two current-loop receivers and the pump transmitter are MIKROE click
//! boards sharing SPI1 (1 MHz, mode 0) with one chip select each. Relays are
//! plain push-pull outputs, the watchdog is the IWDG.

use core::cell::RefCell;

use controller_core::acquisition::ValueSource;
use controller_core::actuator::OutputDriver;
use controller_core::calibration::{decode_receiver_frame, encode_transmitter_frame};
use controller_core::clock::{Micros, Millis, MonotonicClock};
use controller_core::controller::HardwareWatchdog;
use controller_core::relays::{RELAY_COUNT, RelayId, RelayOutputs};
use controller_core::report::MemoryProbe;
use embassy_stm32::Peri;
use embassy_stm32::gpio::{Level, Output};
use embassy_stm32::mode::Blocking;
use embassy_stm32::peripherals::IWDG;
use embassy_stm32::spi::Spi;
use embassy_stm32::wdg::IndependentWatchdog;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::Instant;

/// SPI bus shared by the click boards.
pub type ClickBus = Mutex<CriticalSectionRawMutex, RefCell<Spi<'static, Blocking>>>;

/// Filler clocked out while reading a receiver.
const JUNK: u8 = 0xFF;

/// 4-20 mA R click receiver.
pub struct CurrentReceiver {
    bus: &'static ClickBus,
    select: Output<'static>,
    last_code: u16,
}

impl CurrentReceiver {
    pub fn new(bus: &'static ClickBus, select: Output<'static>) -> Self {
        Self {
            bus,
            select,
            last_code: 0,
        }
    }
}

impl ValueSource for CurrentReceiver {
    fn read(&mut self) -> u32 {
        let mut frame = [JUNK; 2];
        let result = self.bus.lock(|spi| {
            self.select.set_low();
            let result = spi.borrow_mut().blocking_transfer_in_place(&mut frame);
            self.select.set_high();
            result
        });

        match result {
            Ok(()) => self.last_code = decode_receiver_frame(frame),
            Err(_) => defmt::warn!("hw: receiver read failed, reusing code {}", self.last_code),
        }
        u32::from(self.last_code)
    }
}

/// 4-20 mA T click transmitter driving the tunnel pump.
pub struct CurrentTransmitter {
    bus: &'static ClickBus,
    select: Output<'static>,
}

impl CurrentTransmitter {
    pub fn new(bus: &'static ClickBus, select: Output<'static>) -> Self {
        Self { bus, select }
    }
}

impl OutputDriver<u16> for CurrentTransmitter {
    fn write(&mut self, code: u16) {
        let frame = encode_transmitter_frame(code);
        let result = self.bus.lock(|spi| {
            self.select.set_low();
            let result = spi.borrow_mut().blocking_write(&frame);
            self.select.set_high();
            result
        });

        if result.is_err() {
            defmt::warn!("hw: transmitter write of code {} failed", code);
        }
    }
}

/// Relay coils on GPIO, in relay-number order.
pub struct GpioRelays {
    lines: [Output<'static>; RELAY_COUNT],
}

impl GpioRelays {
    pub fn new(lines: [Output<'static>; RELAY_COUNT]) -> Self {
        Self { lines }
    }
}

impl RelayOutputs for GpioRelays {
    fn write(&mut self, relay: RelayId, on: bool) {
        self.lines[relay.index()].set_level(Level::from(on));
    }
}

/// IWDG, started on the first [`HardwareWatchdog::enable`].
pub struct IwdgWatchdog {
    instance: Option<Peri<'static, IWDG>>,
    dog: Option<IndependentWatchdog<'static, IWDG>>,
}

impl IwdgWatchdog {
    pub fn new(instance: Peri<'static, IWDG>) -> Self {
        Self {
            instance: Some(instance),
            dog: None,
        }
    }
}

impl HardwareWatchdog for IwdgWatchdog {
    fn enable(&mut self, timeout_ms: Millis) {
        let Some(instance) = self.instance.take() else {
            defmt::warn!("hw: watchdog already running");
            return;
        };

        let mut dog = IndependentWatchdog::new(instance, timeout_ms.saturating_mul(1_000));
        dog.unleash();
        defmt::info!("hw: watchdog armed, timeout {}ms", timeout_ms);
        self.dog = Some(dog);
    }

    fn reset(&mut self) {
        if let Some(dog) = self.dog.as_mut() {
            dog.pet();
        }
    }
}

/// Embassy time driver as the loop clock.
#[derive(Copy, Clone, Default)]
pub struct EmbassyClock;

impl MonotonicClock for EmbassyClock {
    #[allow(clippy::cast_possible_truncation)]
    fn now_ms(&self) -> Millis {
        Instant::now().as_millis() as Millis
    }

    #[allow(clippy::cast_possible_truncation)]
    fn now_us(&self) -> Micros {
        Instant::now().as_micros() as Micros
    }
}

/// Gap between the end of static RAM and the main stack pointer.
#[derive(Copy, Clone, Default)]
pub struct StackHeadroom;

unsafe extern "C" {
    static __sheap: u8;
}

impl MemoryProbe for StackHeadroom {
    fn free_bytes(&self) -> Option<usize> {
        let heap_start = unsafe { &raw const __sheap } as usize;
        let stack_pointer = cortex_m::register::msp::read() as usize;
        stack_pointer.checked_sub(heap_start)
    }
}

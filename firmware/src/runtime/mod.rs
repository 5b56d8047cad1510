use core::cell::RefCell;

use controller_core::config::ControllerConfig;
use controller_core::controller::{FlowController, Peripherals};
use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::gpio::{Level, Output, Speed};
use embassy_stm32::spi::{self, Spi};
use embassy_stm32::time::Hertz;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use static_cell::StaticCell;

use crate::hw::{
    ClickBus, CurrentReceiver, CurrentTransmitter, GpioRelays, IwdgWatchdog, StackHeadroom,
};
use crate::links::{ChannelPort, LineQueue, Link, ReplyQueue};
use crate::telemetry::TelemetryRecorder;
use crate::usb;

mod control_task;
mod usb_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

pub(super) static HOST_LINES: LineQueue<CriticalSectionRawMutex> = Channel::new();
pub(super) static HOST_REPLIES: ReplyQueue<CriticalSectionRawMutex> = Channel::new();
pub(super) static DEBUG_LINES: LineQueue<CriticalSectionRawMutex> = Channel::new();
pub(super) static DEBUG_REPLIES: ReplyQueue<CriticalSectionRawMutex> = Channel::new();
pub(super) static USB_STORAGE: StaticCell<usb::UsbDeviceStorage> = StaticCell::new();
static CLICK_BUS: StaticCell<ClickBus> = StaticCell::new();

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let p = hal::init(hal::Config::default());

    let relays = GpioRelays::new([
        Output::new(p.PA0, Level::Low, Speed::Low),
        Output::new(p.PA1, Level::Low, Speed::Low),
        Output::new(p.PA2, Level::Low, Speed::Low),
        Output::new(p.PA3, Level::Low, Speed::Low),
        Output::new(p.PA4, Level::Low, Speed::Low),
        Output::new(p.PA8, Level::Low, Speed::Low),
        Output::new(p.PA9, Level::Low, Speed::Low),
        Output::new(p.PA10, Level::Low, Speed::Low),
        Output::new(p.PA15, Level::Low, Speed::Low),
    ]);

    let mut spi_config = spi::Config::default();
    spi_config.frequency = Hertz(1_000_000);
    spi_config.mode = spi::MODE_0;
    let spi = Spi::new_blocking(p.SPI1, p.PA5, p.PA7, p.PA6, spi_config);
    let bus: &'static ClickBus = CLICK_BUS.init(Mutex::new(RefCell::new(spi)));

    // Chip selects idle high.
    let peripherals = Peripherals {
        pressure: CurrentReceiver::new(
            bus,
            Output::new(p.PB0, Level::High, Speed::VeryHigh),
        ),
        flow: CurrentReceiver::new(
            bus,
            Output::new(p.PB1, Level::High, Speed::VeryHigh),
        ),
        relays,
        pump: CurrentTransmitter::new(
            bus,
            Output::new(p.PB2, Level::High, Speed::VeryHigh),
        ),
        watchdog: IwdgWatchdog::new(p.IWDG),
        memory: StackHeadroom,
    };

    let controller = FlowController::new(ControllerConfig::default(), peripherals)
        .expect("rig configuration is valid");
    let port = ChannelPort::new(
        Link {
            lines: &HOST_LINES,
            replies: &HOST_REPLIES,
        },
        Link {
            lines: &DEBUG_LINES,
            replies: &DEBUG_REPLIES,
        },
    );

    spawner.spawn(usb_task::run(p.USB, p.PA12, p.PA11).expect("failed to spawn USB task"));
    spawner.spawn(
        control_task::run(controller, port, TelemetryRecorder::new())
            .expect("failed to spawn control task"),
    );

    core::future::pending::<()>().await;
}

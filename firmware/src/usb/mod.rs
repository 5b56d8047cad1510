//! Dual-CDC USB composite.
//!
//! CDC0 carries the host program link, CDC1 the operator debug console. The
//! builder wrapper hands out split port handles so the USB task never touches
//! Embassy USB bookkeeping directly.

use controller_core::commands::CommandSource;
use embassy_usb::class::cdc_acm::{CdcAcmClass, ControlChanged, Receiver, Sender, State};
use embassy_usb::driver::Driver;
use embassy_usb::{Builder, Config, UsbDevice};

pub const MAX_PACKET_SIZE: u16 = 64;

const CONTROL_BUFFER_LEN: usize = 64;
const CONFIG_DESCRIPTOR_LEN: usize = 256;
const BOS_DESCRIPTOR_LEN: usize = 256;
const MSOS_DESCRIPTOR_LEN: usize = 256;

/// User-visible strings advertised in the USB descriptors.
#[derive(Clone, Copy, Debug)]
pub struct UsbDeviceStrings {
    pub manufacturer: &'static str,
    pub product: &'static str,
    pub serial_number: Option<&'static str>,
}

impl Default for UsbDeviceStrings {
    fn default() -> Self {
        Self {
            manufacturer: "Flow Rig",
            product: "flow-rig controller",
            serial_number: None,
        }
    }
}

/// Backing storage for the USB builder and both CDC ACM classes.
pub struct UsbDeviceStorage {
    control_buf: [u8; CONTROL_BUFFER_LEN],
    config_descriptor: [u8; CONFIG_DESCRIPTOR_LEN],
    bos_descriptor: [u8; BOS_DESCRIPTOR_LEN],
    msos_descriptor: [u8; MSOS_DESCRIPTOR_LEN],
    host_state: State<'static>,
    debug_state: State<'static>,
}

impl UsbDeviceStorage {
    pub fn new() -> Self {
        Self {
            control_buf: [0; CONTROL_BUFFER_LEN],
            config_descriptor: [0; CONFIG_DESCRIPTOR_LEN],
            bos_descriptor: [0; BOS_DESCRIPTOR_LEN],
            msos_descriptor: [0; MSOS_DESCRIPTOR_LEN],
            host_state: State::new(),
            debug_state: State::new(),
        }
    }
}

/// Split handles for one CDC ACM interface.
pub struct CdcAcmHandle<D: Driver<'static>> {
    pub source: CommandSource,
    pub sender: Sender<'static, D>,
    pub receiver: Receiver<'static, D>,
    pub control: ControlChanged<'static>,
}

/// The USB device plus the not-yet-claimed CDC interfaces.
pub struct UsbComposite<D: Driver<'static>> {
    pub device: UsbDevice<'static, D>,
    host: Option<CdcAcmHandle<D>>,
    debug: Option<CdcAcmHandle<D>>,
}

impl<D: Driver<'static>> UsbComposite<D> {
    pub fn new(driver: D, storage: &'static mut UsbDeviceStorage, strings: UsbDeviceStrings) -> Self {
        let mut config = Config::new(0x1209, 0x0001);
        config.manufacturer = Some(strings.manufacturer);
        config.product = Some(strings.product);
        config.serial_number = strings.serial_number;
        config.max_packet_size_0 = 64;
        config.max_power = 100;
        config.device_class = 0xEF;
        config.device_sub_class = 0x02;
        config.device_protocol = 0x01;
        config.composite_with_iads = true;

        let mut builder = Builder::new(
            driver,
            config,
            &mut storage.config_descriptor,
            &mut storage.bos_descriptor,
            &mut storage.msos_descriptor,
            &mut storage.control_buf,
        );

        let host = CdcAcmClass::new(&mut builder, &mut storage.host_state, MAX_PACKET_SIZE);
        let debug = CdcAcmClass::new(&mut builder, &mut storage.debug_state, MAX_PACKET_SIZE);

        let (host_tx, host_rx, host_ctrl) = host.split_with_control();
        let (debug_tx, debug_rx, debug_ctrl) = debug.split_with_control();

        Self {
            device: builder.build(),
            host: Some(CdcAcmHandle {
                source: CommandSource::Host,
                sender: host_tx,
                receiver: host_rx,
                control: host_ctrl,
            }),
            debug: Some(CdcAcmHandle {
                source: CommandSource::Debug,
                sender: debug_tx,
                receiver: debug_rx,
                control: debug_ctrl,
            }),
        }
    }

    /// Takes ownership of the interface serving `source`.
    pub fn take_port(&mut self, source: CommandSource) -> Option<CdcAcmHandle<D>> {
        match source {
            CommandSource::Host => self.host.take(),
            CommandSource::Debug => self.debug.take(),
        }
    }
}

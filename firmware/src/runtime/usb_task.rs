use controller_core::commands::CommandSource;
use embassy_futures::join::{join, join3};
use embassy_futures::select::{Either3, select3};
use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_usb::class::cdc_acm::{ControlChanged, Sender};
use embassy_usb::driver::{Driver, EndpointError};

use super::{DEBUG_LINES, DEBUG_REPLIES, HOST_LINES, HOST_REPLIES, USB_STORAGE};
use crate::links::{LineAssembler, LineError, LineQueue, ReplyFrame, ReplyQueue};
use crate::usb::{self, CdcAcmHandle, UsbDeviceStrings};

embassy_stm32::bind_interrupts!(struct UsbIrqs {
    USB_UCPD1_2 => embassy_stm32::usb::InterruptHandler<hal::peripherals::USB>;
});

#[allow(clippy::cast_lossless)]
const PACKET_LEN: usize = usb::MAX_PACKET_SIZE as usize;

#[embassy_executor::task]
pub async fn run(
    usb: Peri<'static, hal::peripherals::USB>,
    dp: Peri<'static, hal::peripherals::PA12>,
    dm: Peri<'static, hal::peripherals::PA11>,
) -> ! {
    let storage = USB_STORAGE.init(usb::UsbDeviceStorage::new());
    let driver = embassy_stm32::usb::Driver::new(usb, UsbIrqs, dp, dm);

    let mut composite = usb::UsbComposite::new(driver, storage, UsbDeviceStrings::default());
    let host = composite
        .take_port(CommandSource::Host)
        .expect("host CDC interface unavailable");
    let debug = composite
        .take_port(CommandSource::Debug)
        .expect("debug CDC interface unavailable");

    let mut device = composite.device;

    join3(
        device.run(),
        serve_link(host, &HOST_LINES, &HOST_REPLIES),
        serve_link(debug, &DEBUG_LINES, &DEBUG_REPLIES),
    )
    .await;
    loop {
        core::future::pending::<()>().await;
    }
}

/// Moves lines from one CDC interface into its queue and writes queued replies back.
async fn serve_link<D>(
    handle: CdcAcmHandle<D>,
    lines: &'static LineQueue<CriticalSectionRawMutex>,
    replies: &'static ReplyQueue<CriticalSectionRawMutex>,
) -> !
where
    D: Driver<'static>,
{
    let CdcAcmHandle {
        source,
        mut sender,
        mut receiver,
        control,
    } = handle;
    let name = source.identity();
    let mut assembler = LineAssembler::new();
    let mut ingress = [0u8; PACKET_LEN];

    loop {
        join(receiver.wait_connection(), sender.wait_connection()).await;
        wait_for_dtr(&control, &sender).await;
        assembler.clear();
        replies.clear();

        defmt::info!("usb: {} connected", name);

        loop {
            match select3(
                receiver.read_packet(&mut ingress),
                replies.receive(),
                control.control_changed(),
            )
            .await
            {
                Either3::First(Ok(count)) => {
                    for byte in &ingress[..count] {
                        match assembler.push(*byte) {
                            Some(Ok(line)) => {
                                if lines.try_send(line).is_err() {
                                    defmt::warn!("usb: {} line queue full, dropping line", name);
                                }
                            }
                            Some(Err(LineError::Overflow)) => {
                                defmt::warn!("usb: {} dropping overlong line", name);
                            }
                            Some(Err(LineError::InvalidUtf8)) => {
                                defmt::warn!("usb: {} dropping non-UTF-8 line", name);
                            }
                            None => {}
                        }
                    }
                }
                Either3::First(Err(EndpointError::Disabled)) => {
                    defmt::warn!("usb: {} interface disabled", name);
                    break;
                }
                Either3::First(Err(_)) => {
                    defmt::warn!("usb: {} read error", name);
                }
                Either3::Second(frame) => match write_frame(&mut sender, &frame).await {
                    Ok(()) => {}
                    Err(EndpointError::Disabled) => {
                        defmt::warn!("usb: {} write disabled", name);
                        break;
                    }
                    Err(_) => {
                        defmt::warn!("usb: {} write error", name);
                    }
                },
                Either3::Third(()) => {
                    if !sender.dtr() {
                        defmt::warn!("usb: {} host dropped DTR", name);
                        break;
                    }
                }
            }
        }
    }
}

/// Writes a reply in packet-sized chunks, ending with a short packet.
async fn write_frame<D>(
    sender: &mut Sender<'static, D>,
    frame: &ReplyFrame,
) -> Result<(), EndpointError>
where
    D: Driver<'static>,
{
    let bytes = frame.as_bytes();
    for chunk in bytes.chunks(PACKET_LEN) {
        sender.write_packet(chunk).await?;
    }
    if bytes.len() % PACKET_LEN == 0 {
        sender.write_packet(&[]).await?;
    }
    Ok(())
}

async fn wait_for_dtr<D>(control: &ControlChanged<'static>, sender: &Sender<'static, D>)
where
    D: Driver<'static>,
{
    while !sender.dtr() {
        control.control_changed().await;
    }
}

//! Line-oriented command links.
//!
//! Each USB CDC interface feeds a [`LineAssembler`] and hands complete lines to
//! the control task through a bounded queue. Replies flow back through a second
//! queue so the control loop never waits on USB.

use core::str;

use controller_core::commands::{CommandLine, CommandSource, MAX_COMMAND_LEN};
use controller_core::controller::CommandPort;
use controller_core::report::REPORT_CAPACITY;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Channel;
use heapless::{String, Vec};
use portable_atomic::{AtomicU32, Ordering};

/// Received lines waiting for the control loop, per link.
pub const LINE_QUEUE_DEPTH: usize = 4;

/// Reply lines waiting for the USB task, per link.
pub const REPLY_QUEUE_DEPTH: usize = 4;

/// Reply text plus the CR LF terminator.
pub type ReplyFrame = String<{ REPORT_CAPACITY + 2 }>;

pub type LineQueue<M> = Channel<M, CommandLine, LINE_QUEUE_DEPTH>;
pub type ReplyQueue<M> = Channel<M, ReplyFrame, REPLY_QUEUE_DEPTH>;

static DROPPED_REPLIES: AtomicU32 = AtomicU32::new(0);

/// Replies discarded because their queue was full or they did not fit a frame.
pub fn dropped_replies() -> u32 {
    DROPPED_REPLIES.load(Ordering::Relaxed)
}

/// Why a received line was discarded.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LineError {
    /// Longer than [`MAX_COMMAND_LEN`].
    Overflow,
    InvalidUtf8,
}

/// Collects bytes into command lines terminated by CR or LF.
pub struct LineAssembler {
    buffer: Vec<u8, MAX_COMMAND_LEN>,
    overflowed: bool,
}

impl LineAssembler {
    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            overflowed: false,
        }
    }

    /// Feeds one byte. Returns a result once a terminator completes a line;
    /// empty lines are skipped.
    pub fn push(&mut self, byte: u8) -> Option<Result<CommandLine, LineError>> {
        match byte {
            b'\r' | b'\n' => self.finish(),
            0x08 | 0x7f => {
                self.buffer.pop();
                None
            }
            value => {
                if self.buffer.push(value).is_err() {
                    self.overflowed = true;
                }
                None
            }
        }
    }

    /// Drops any partial line, e.g. after the host disconnects.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.overflowed = false;
    }

    fn finish(&mut self) -> Option<Result<CommandLine, LineError>> {
        if self.overflowed {
            self.clear();
            return Some(Err(LineError::Overflow));
        }
        if self.buffer.is_empty() {
            return None;
        }

        let result = str::from_utf8(&self.buffer)
            .map_err(|_| LineError::InvalidUtf8)
            .and_then(|text| {
                let mut line = CommandLine::new();
                line.push_str(text).map_err(|_| LineError::Overflow)?;
                Ok(line)
            });
        self.buffer.clear();
        Some(result)
    }
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Queues shared between one USB interface and the control task.
pub struct Link<'a, M: RawMutex> {
    pub lines: &'a LineQueue<M>,
    pub replies: &'a ReplyQueue<M>,
}

/// [`CommandPort`] backed by the host and debug link queues.
pub struct ChannelPort<'a, M: RawMutex> {
    host: Link<'a, M>,
    debug: Link<'a, M>,
}

impl<'a, M: RawMutex> ChannelPort<'a, M> {
    pub const fn new(host: Link<'a, M>, debug: Link<'a, M>) -> Self {
        Self { host, debug }
    }

    const fn link(&self, source: CommandSource) -> &Link<'a, M> {
        match source {
            CommandSource::Host => &self.host,
            CommandSource::Debug => &self.debug,
        }
    }
}

impl<M: RawMutex> CommandPort for ChannelPort<'_, M> {
    fn next_line(&mut self, source: CommandSource) -> Option<CommandLine> {
        self.link(source).lines.try_receive().ok()
    }

    fn reply(&mut self, source: CommandSource, line: &str) {
        let mut frame = ReplyFrame::new();
        let queued = frame.push_str(line).is_ok()
            && frame.push_str("\r\n").is_ok()
            && self.link(source).replies.try_send(frame).is_ok();
        if !queued {
            let dropped = DROPPED_REPLIES.fetch_add(1, Ordering::Relaxed) + 1;
            log_dropped_reply(source, dropped);
        }
    }
}

#[cfg(target_os = "none")]
fn log_dropped_reply(source: CommandSource, total: u32) {
    defmt::warn!(
        "links: dropped reply on {} link (total {})",
        source.identity(),
        total
    );
}

#[cfg(not(target_os = "none"))]
fn log_dropped_reply(source: CommandSource, total: u32) {
    println!("links: dropped reply on {source:?} link (total {total})");
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    fn feed(assembler: &mut LineAssembler, bytes: &[u8]) -> Option<Result<CommandLine, LineError>> {
        let mut last = None;
        for byte in bytes {
            if let Some(result) = assembler.push(*byte) {
                last = Some(result);
            }
        }
        last
    }

    #[test]
    fn assembles_lines_on_either_terminator() {
        let mut assembler = LineAssembler::new();

        let line = feed(&mut assembler, b"sps12\r").expect("line").expect("valid");
        assert_eq!(line.as_str(), "sps12");
        assert_eq!(assembler.push(b'\n'), None);

        let line = feed(&mut assembler, b"r1 on\n").expect("line").expect("valid");
        assert_eq!(line.as_str(), "r1 on");
    }

    #[test]
    fn backspace_removes_the_previous_byte() {
        let mut assembler = LineAssembler::new();
        let line = feed(&mut assembler, b"sfx\x7fr5\n").expect("line").expect("valid");
        assert_eq!(line.as_str(), "sfr5");
    }

    #[test]
    fn overlong_lines_are_discarded_whole() {
        let mut assembler = LineAssembler::new();
        let long = [b'a'; MAX_COMMAND_LEN + 8];

        assert_eq!(feed(&mut assembler, &long), None);
        assert_eq!(assembler.push(b'\n'), Some(Err(LineError::Overflow)));

        let line = feed(&mut assembler, b"?\n").expect("line").expect("valid");
        assert_eq!(line.as_str(), "?");
    }

    #[test]
    fn invalid_utf8_is_reported() {
        let mut assembler = LineAssembler::new();
        assert_eq!(
            feed(&mut assembler, &[0xff, 0xfe, b'\n']),
            Some(Err(LineError::InvalidUtf8))
        );
    }

    #[test]
    fn port_routes_lines_and_replies_per_link() {
        let host_lines = LineQueue::<NoopRawMutex>::new();
        let host_replies = ReplyQueue::<NoopRawMutex>::new();
        let debug_lines = LineQueue::<NoopRawMutex>::new();
        let debug_replies = ReplyQueue::<NoopRawMutex>::new();
        let mut port = ChannelPort::new(
            Link {
                lines: &host_lines,
                replies: &host_replies,
            },
            Link {
                lines: &debug_lines,
                replies: &debug_replies,
            },
        );

        let mut line = CommandLine::new();
        line.push_str("id?").expect("fits");
        debug_lines.try_send(line).expect("queue has room");

        assert_eq!(port.next_line(CommandSource::Host), None);
        let received = port.next_line(CommandSource::Debug).expect("debug line");
        assert_eq!(received.as_str(), "id?");

        port.reply(CommandSource::Debug, "flow-rig controller debug");
        let frame = debug_replies.try_receive().expect("reply queued");
        assert_eq!(frame.as_str(), "flow-rig controller debug\r\n");
        assert!(host_replies.try_receive().is_err());
    }

    #[test]
    fn replies_beyond_queue_depth_are_dropped() {
        let lines = LineQueue::<NoopRawMutex>::new();
        let replies = ReplyQueue::<NoopRawMutex>::new();
        let idle_lines = LineQueue::<NoopRawMutex>::new();
        let idle_replies = ReplyQueue::<NoopRawMutex>::new();
        let mut port = ChannelPort::new(
            Link {
                lines: &lines,
                replies: &replies,
            },
            Link {
                lines: &idle_lines,
                replies: &idle_replies,
            },
        );

        let before = dropped_replies();
        for _ in 0..REPLY_QUEUE_DEPTH + 2 {
            port.reply(CommandSource::Host, "x");
        }

        assert_eq!(replies.len(), REPLY_QUEUE_DEPTH);
        assert!(dropped_replies() >= before + 2);
    }
}

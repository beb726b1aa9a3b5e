//! SLCAN serial link
//!
//! Owns one adapter connection:
//! - READ thread: bytes -> [`LineAssembler`] -> ack correlation -> frame decode
//! - DRAIN thread: the only writer; empties the bounded [`WriteQueue`] in order
//! - receive-poll task: sends `A` until the adapter proves it auto-forwards
//! - [`TxScheduler`]: periodic frame loops
//!
//! `disconnect` is the single teardown path. It stops the periodic tasks,
//! optionally closes the CAN channel, fails every pending ack, then joins the
//! threads; dropping the transports closes the device. Read or write faults
//! collapse the link through the same path.

pub mod ack;
pub mod lines;
pub mod queue;

pub use ack::{AckCorrelator, AckOutcome, LineDisposition, PendingAck};
pub use lines::{LineAssembler, LineEvent};
pub use queue::{MAX_SERIAL_QUEUE, WriteQueue};

use crate::core::SharedContext;
use crate::core::types::PeriodicFrame;
use crate::error::{Error, Result};
use crate::protocol::commands::AckPolicy;
use crate::protocol::{BitrateCode, SlcanCommand, decode_status, find_frame};
use crate::scheduler::{LineSink, PeriodicTask, TaskControl, TxScheduler};
use crate::telemetry::{LinkStatus, SerialLoadMeter};
use crate::transport::{MockTransport, SerialTransport, Transport};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Bytes per read call
const READ_CHUNK: usize = 256;

/// Pause after an empty read
const READ_IDLE: Duration = Duration::from_millis(1);

/// Longest the drain thread sleeps without a wake-up
const DRAIN_IDLE: Duration = Duration::from_millis(50);

/// Adapter settle time between handshake steps
const SETTLE_DELAY: Duration = Duration::from_millis(50);

/// Default receive-poll period
pub const RX_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Reader and writer handles for one device
pub struct LinkIo {
    pub reader: Box<dyn Transport>,
    pub writer: Box<dyn Transport>,
}

impl LinkIo {
    /// Open a serial device and split it into reader/writer handles
    pub fn serial(path: &str, baud_rate: u32) -> Result<Self> {
        let writer = SerialTransport::open(path, baud_rate)?;
        let reader = writer
            .try_clone()
            .map_err(|e| Error::Connection(format!("failed to clone {}: {}", path, e)))?;
        Ok(Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        })
    }

    /// Both handles share one mock buffer pair
    pub fn mock(mock: &MockTransport) -> Self {
        Self {
            reader: Box::new(mock.clone()),
            writer: Box::new(mock.clone()),
        }
    }
}

/// Connection parameters
#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub baud_rate: u32,
    pub bitrate: BitrateCode,
    /// Frames with this id are decoded into the mission state
    pub rx_filter_id: u16,
    pub periodic_frames: Vec<PeriodicFrame>,
    pub rx_poll_interval: Duration,
}

/// Receive-side processing shared with the read thread
struct RxPath {
    acks: Arc<AckCorrelator>,
    ctx: Arc<SharedContext>,
    rx_filter_id: u16,
    auto_forwarding: Arc<AtomicBool>,
}

impl RxPath {
    fn handle(&self, event: LineEvent) {
        match event {
            LineEvent::AckToken => self.acks.settle_next(true),
            LineEvent::Bell => {
                log::debug!("SLCAN: RX <BEL>");
                self.acks.settle_next(false);
            }
            LineEvent::Line(line) => self.handle_line(&line),
        }
    }

    fn handle_line(&self, line: &str) {
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("RX {}", line);
        }

        if self.acks.match_line(line) == LineDisposition::Consumed {
            return;
        }

        match line {
            "z" | "Z" => {
                if !self.auto_forwarding.swap(true, Ordering::AcqRel) {
                    log::info!("SLCAN: adapter forwards frames automatically, polling disabled");
                }
                return;
            }
            "A" => return,
            _ => {}
        }

        let Some(frame) = find_frame(line) else {
            return;
        };
        let matched = frame.id == self.rx_filter_id;
        self.ctx.telemetry.record_rx(&frame, matched);
        if matched {
            self.ctx.set_mission(decode_status(&frame.data));
        }
    }
}

/// Write every queued line, oldest first; returns the count written
pub fn drain_pending(
    queue: &WriteQueue,
    writer: &mut dyn Transport,
    meter: &SerialLoadMeter,
) -> Result<usize> {
    let mut written = 0;
    while let Some(line) = queue.pop() {
        writer.write_all(line.as_bytes())?;
        meter.record_tx(line.len());
        written += 1;
    }
    if written > 0 {
        writer.flush()?;
    }
    Ok(written)
}

/// One live adapter connection
pub struct SlcanLink {
    settings: LinkSettings,
    ctx: Arc<SharedContext>,
    acks: Arc<AckCorrelator>,
    queue: Arc<WriteQueue>,
    /// Held while a waiter is registered and its line queued
    send_lock: Mutex<()>,
    connected: AtomicBool,
    running: Arc<AtomicBool>,
    auto_forwarding: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
    drain: Mutex<Option<JoinHandle<()>>>,
    scheduler: Mutex<TxScheduler>,
    rx_poll: Mutex<Option<PeriodicTask>>,
    teardown: Mutex<()>,
    adapter_version: Mutex<Option<String>>,
}

impl SlcanLink {
    fn new(settings: LinkSettings, ctx: Arc<SharedContext>) -> Self {
        Self {
            scheduler: Mutex::new(TxScheduler::new(Arc::clone(&ctx))),
            settings,
            ctx,
            acks: Arc::new(AckCorrelator::new()),
            queue: Arc::new(WriteQueue::new(MAX_SERIAL_QUEUE)),
            send_lock: Mutex::new(()),
            connected: AtomicBool::new(false),
            running: Arc::new(AtomicBool::new(false)),
            auto_forwarding: Arc::new(AtomicBool::new(false)),
            reader: Mutex::new(None),
            drain: Mutex::new(None),
            rx_poll: Mutex::new(None),
            teardown: Mutex::new(()),
            adapter_version: Mutex::new(None),
        }
    }

    /// Start the I/O threads, run the adapter handshake, then start receive
    /// polling and periodic transmission.
    ///
    /// On failure everything started so far is torn down and a
    /// [`Error::Connection`] is returned.
    pub fn connect(
        io: LinkIo,
        settings: LinkSettings,
        ctx: Arc<SharedContext>,
    ) -> Result<Arc<Self>> {
        let link = Arc::new(Self::new(settings, ctx));
        link.ctx.telemetry.set_link_status(LinkStatus::Connecting);

        let result = link.start_io(io).and_then(|_| link.initialize());
        match result {
            Ok(version) => {
                link.ctx
                    .telemetry
                    .set_link_status(LinkStatus::Connected { version });
                Ok(link)
            }
            Err(e) => {
                let reason = format!("connect failed: {}", e);
                link.disconnect(&reason, true);
                Err(Error::Connection(reason))
            }
        }
    }

    /// Device and writer present
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn adapter_version(&self) -> Option<String> {
        self.adapter_version.lock().clone()
    }

    /// Adapter confirmed automatic frame forwarding
    pub fn auto_forwarding(&self) -> bool {
        self.auto_forwarding.load(Ordering::Acquire)
    }

    /// Receive polling currently running
    pub fn is_polling(&self) -> bool {
        self.rx_poll
            .lock()
            .as_ref()
            .map(|t| t.is_active())
            .unwrap_or(false)
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    /// Queue a raw line (CR appended)
    pub fn write_line(&self, line: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.queue.push(line);
        Ok(())
    }

    /// Send an adapter command with its default acknowledgement policy
    pub fn send_command(&self, command: SlcanCommand) -> Result<Option<String>> {
        self.send_with_policy(&command.line(), command.default_policy())
    }

    /// Send a raw command line, optionally waiting for its acknowledgement
    pub fn send_with_policy(&self, line: &str, policy: AckPolicy) -> Result<Option<String>> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        log::debug!("SLCAN: TX {}", line);

        if !policy.wait_for_ack {
            self.queue.push(line);
            return Ok(None);
        }

        // Register before writing so a fast reply cannot miss its waiter;
        // waiter order must equal wire order across callers
        let pending = {
            let _send = self.send_lock.lock();
            let pending = self
                .acks
                .register(line, policy.allow_ack_error, policy.timeout);
            self.queue.push(line);
            pending
        };
        pending.wait().map_err(|e| {
            self.ctx.telemetry.record_command_error(e.to_string());
            e
        })
    }

    /// Tear the link down; a no-op apart from the status report when
    /// already disconnected
    pub fn disconnect(&self, reason: &str, send_close: bool) {
        let _guard = self.teardown.lock();
        self.teardown_locked(reason, send_close);
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    fn start_io(self: &Arc<Self>, io: LinkIo) -> Result<()> {
        self.queue.clear();
        self.ctx.telemetry.load_meter.reset();
        self.ctx.telemetry.reset_link_counters();
        self.running.store(true, Ordering::Release);

        let reader = self.spawn_reader(io.reader)?;
        *self.reader.lock() = Some(reader);
        let drain = self.spawn_drain(io.writer)?;
        *self.drain.lock() = Some(drain);

        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    fn initialize(self: &Arc<Self>) -> Result<Option<String>> {
        let version = self.send_command(SlcanCommand::Version)?;
        log::info!(
            "SLCAN: adapter version {}",
            version.as_deref().unwrap_or("-")
        );
        *self.adapter_version.lock() = version.clone();

        // Channel may still be open from a previous session
        if let Err(e) = self.send_command(SlcanCommand::Close) {
            log::debug!("SLCAN: pre-open close ignored: {}", e);
        }
        thread::sleep(SETTLE_DELAY);

        self.send_command(SlcanCommand::SetBitrate(self.settings.bitrate))?;
        log::info!(
            "SLCAN: bus bitrate {} kbit/s (S{})",
            self.settings.bitrate.kbps(),
            self.settings.bitrate.code()
        );
        thread::sleep(SETTLE_DELAY);

        self.configure_receive_filter();

        self.auto_forwarding.store(false, Ordering::Release);
        if let Err(e) = self.send_command(SlcanCommand::AutoForward(true)) {
            log::warn!("SLCAN: auto-forward request failed: {}", e);
        }
        self.send_command(SlcanCommand::Open)?;

        self.start_receive_polling()?;
        self.start_transmit()?;
        Ok(version)
    }

    /// Accept every standard id; filtering happens on the host
    fn configure_receive_filter(&self) {
        let result = self
            .send_command(SlcanCommand::AcceptanceCode(0x0000_0000))
            .and_then(|_| self.send_command(SlcanCommand::AcceptanceMask(0xFFFF_FFFF)));
        match result {
            Ok(_) => log::info!(
                "SLCAN: receive filter open, decoding 0x{:03X}",
                self.settings.rx_filter_id
            ),
            Err(e) => log::warn!("SLCAN: receive filter setup skipped: {}", e),
        }
    }

    fn start_receive_polling(self: &Arc<Self>) -> Result<()> {
        if let Some(mut task) = self.rx_poll.lock().take() {
            task.stop();
        }
        if self.auto_forwarding() {
            return Ok(());
        }

        let weak = Arc::downgrade(self);
        let task = PeriodicTask::spawn("slcan-rx-poll", self.settings.rx_poll_interval, move || {
            match weak.upgrade() {
                Some(link) => link.poll_once(),
                None => TaskControl::Stop,
            }
        })?;
        *self.rx_poll.lock() = Some(task);
        Ok(())
    }

    /// One receive-poll firing; skipped while the write queue is full
    fn poll_once(&self) -> TaskControl {
        if self.auto_forwarding() {
            return TaskControl::Stop;
        }
        if self.is_connected() && self.queue.len() < self.queue.capacity() {
            self.queue.push(&SlcanCommand::PollAll.line());
        }
        TaskControl::Continue
    }

    fn start_transmit(self: &Arc<Self>) -> Result<()> {
        let sink: Arc<dyn LineSink> = Arc::new(LinkSink(Arc::downgrade(self)));
        self.scheduler
            .lock()
            .start(&self.settings.periodic_frames, sink)
    }

    /// Fault from an I/O thread; skipped if a teardown is already running
    fn fail(&self, reason: &str) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        log::error!("SLCAN: {}", reason);
        if let Some(_guard) = self.teardown.try_lock() {
            self.teardown_locked(reason, false);
        }
    }

    fn teardown_locked(&self, reason: &str, send_close: bool) {
        let was_connected = self.is_connected();
        let has_threads = self.reader.lock().is_some() || self.drain.lock().is_some();
        if !was_connected && !has_threads {
            self.ctx.telemetry.set_link_status(LinkStatus::Disconnected {
                reason: reason.to_string(),
            });
            return;
        }

        self.scheduler.lock().stop();
        if let Some(mut task) = self.rx_poll.lock().take() {
            task.stop();
        }

        if send_close && was_connected && self.running.load(Ordering::Acquire) {
            if let Err(e) = self.send_command(SlcanCommand::Close) {
                log::debug!("SLCAN: close on disconnect ignored: {}", e);
            }
        }

        self.connected.store(false, Ordering::Release);
        self.acks.clear_all("serial disconnected");
        self.running.store(false, Ordering::Release);
        self.queue.wake();

        join_worker(self.reader.lock().take(), "read");
        join_worker(self.drain.lock().take(), "drain");

        self.queue.clear();
        self.auto_forwarding.store(false, Ordering::Release);
        self.ctx.telemetry.load_meter.reset();
        self.ctx.telemetry.set_link_status(LinkStatus::Disconnected {
            reason: reason.to_string(),
        });
    }

    // ========================================================================
    // Worker threads
    // ========================================================================

    fn spawn_reader(self: &Arc<Self>, mut reader: Box<dyn Transport>) -> Result<JoinHandle<()>> {
        let rx = RxPath {
            acks: Arc::clone(&self.acks),
            ctx: Arc::clone(&self.ctx),
            rx_filter_id: self.settings.rx_filter_id,
            auto_forwarding: Arc::clone(&self.auto_forwarding),
        };
        let running = Arc::clone(&self.running);
        let weak = Arc::downgrade(self);

        thread::Builder::new()
            .name("slcan-reader".to_string())
            .spawn(move || {
                log::info!("SLCAN: read thread started");
                let mut assembler = LineAssembler::new();
                let mut buffer = [0u8; READ_CHUNK];
                let mut events = Vec::new();

                while running.load(Ordering::Acquire) {
                    match reader.read(&mut buffer) {
                        Ok(0) => thread::sleep(READ_IDLE),
                        Ok(n) => {
                            rx.ctx.telemetry.load_meter.record_rx(n);
                            assembler.push(&buffer[..n], &mut events);
                            for event in events.drain(..) {
                                rx.handle(event);
                            }
                        }
                        Err(e) => {
                            report_fault(&weak, &format!("serial read failed: {}", e));
                            break;
                        }
                    }
                    rx.acks.expire_overdue(Instant::now());
                }

                log::info!("SLCAN: read thread stopped");
            })
            .map_err(|e| Error::Connection(format!("Failed to spawn read thread: {}", e)))
    }

    fn spawn_drain(self: &Arc<Self>, mut writer: Box<dyn Transport>) -> Result<JoinHandle<()>> {
        let queue = Arc::clone(&self.queue);
        let ctx = Arc::clone(&self.ctx);
        let running = Arc::clone(&self.running);
        let weak = Arc::downgrade(self);

        thread::Builder::new()
            .name("slcan-drain".to_string())
            .spawn(move || {
                log::info!("SLCAN: drain thread started");
                while running.load(Ordering::Acquire) {
                    if let Err(e) = drain_pending(&queue, writer.as_mut(), &ctx.telemetry.load_meter)
                    {
                        report_fault(&weak, &format!("serial write failed: {}", e));
                        break;
                    }
                    queue.wait(DRAIN_IDLE);
                }
                log::info!("SLCAN: drain thread stopped");
            })
            .map_err(|e| Error::Connection(format!("Failed to spawn drain thread: {}", e)))
    }
}

impl LineSink for SlcanLink {
    fn is_connected(&self) -> bool {
        SlcanLink::is_connected(self)
    }

    fn write_line(&self, line: &str) -> Result<()> {
        SlcanLink::write_line(self, line)
    }
}

impl Drop for SlcanLink {
    fn drop(&mut self) {
        let has_threads = self.reader.get_mut().is_some() || self.drain.get_mut().is_some();
        if self.is_connected() || has_threads {
            self.disconnect("link dropped", false);
        }
    }
}

/// Scheduler-facing handle that does not keep the link alive
struct LinkSink(Weak<SlcanLink>);

impl LineSink for LinkSink {
    fn is_connected(&self) -> bool {
        self.0
            .upgrade()
            .map(|link| link.is_connected())
            .unwrap_or(false)
    }

    fn write_line(&self, line: &str) -> Result<()> {
        match self.0.upgrade() {
            Some(link) => link.write_line(line),
            None => Err(Error::NotConnected),
        }
    }
}

fn report_fault(link: &Weak<SlcanLink>, reason: &str) {
    if let Some(link) = link.upgrade() {
        link.fail(reason);
    }
}

/// Join a worker unless called from that worker
fn join_worker(handle: Option<JoinHandle<()>>, name: &str) {
    let Some(handle) = handle else {
        return;
    };
    if handle.thread().id() == thread::current().id() {
        return;
    }
    if handle.join().is_err() {
        log::error!("SLCAN: {} thread panicked", name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_writes_newest_survivors_in_order() {
        let queue = WriteQueue::new(MAX_SERIAL_QUEUE);
        for i in 0..600 {
            queue.push(&format!("t1001{:02X}", i % 256));
        }

        let mock = MockTransport::new();
        let mut writer: Box<dyn Transport> = Box::new(mock.clone());
        let meter = SerialLoadMeter::new();
        let written = drain_pending(&queue, writer.as_mut(), &meter).unwrap();
        assert_eq!(written, MAX_SERIAL_QUEUE);

        let lines = mock.written_lines();
        assert_eq!(lines.len(), MAX_SERIAL_QUEUE);
        let expected: Vec<String> = (88..600).map(|i| format!("t1001{:02X}", i % 256)).collect();
        assert_eq!(lines, expected);
    }

    #[test]
    fn test_rx_path_decodes_filtered_frame() {
        let ctx = Arc::new(SharedContext::new());
        let rx = RxPath {
            acks: Arc::new(AckCorrelator::new()),
            ctx: Arc::clone(&ctx),
            rx_filter_id: 0x520,
            auto_forwarding: Arc::new(AtomicBool::new(false)),
        };

        rx.handle(LineEvent::Line("t1002AABB".to_string()));
        assert_eq!(ctx.mission(), Default::default());

        rx.handle(LineEvent::Line("zt5203010823".to_string()));
        let state = ctx.mission();
        assert!(state.handshake);
        assert!(state.go_signal);
        assert_eq!(state.as_state, 3);
        assert_eq!(state.ami_state, 2);
        assert_eq!(ctx.telemetry.rx_total(), 2);
    }

    #[test]
    fn test_receive_poll_skips_full_queue() {
        let settings = crate::config::BridgeConfig::default().validated().link;
        let link = SlcanLink::new(settings, Arc::new(SharedContext::new()));

        // Not connected: nothing queued
        assert_eq!(link.poll_once(), TaskControl::Continue);
        assert!(link.queue.is_empty());

        link.connected.store(true, Ordering::Release);
        assert_eq!(link.poll_once(), TaskControl::Continue);
        assert_eq!(link.queue.pop().as_deref(), Some("A\r"));

        for i in 0..MAX_SERIAL_QUEUE {
            link.queue.push(&format!("t1001{:02X}", i % 256));
        }
        assert_eq!(link.poll_once(), TaskControl::Continue);
        assert_eq!(link.queue.len(), MAX_SERIAL_QUEUE);
        assert_eq!(link.queue.dropped(), 0);
        assert!(std::iter::from_fn(|| link.queue.pop()).all(|l| l != "A\r"));

        link.auto_forwarding.store(true, Ordering::Release);
        assert_eq!(link.poll_once(), TaskControl::Stop);
        assert!(link.queue.is_empty());
        link.connected.store(false, Ordering::Release);
    }

    #[test]
    fn test_rx_path_detects_auto_forwarding() {
        let flag = Arc::new(AtomicBool::new(false));
        let rx = RxPath {
            acks: Arc::new(AckCorrelator::new()),
            ctx: Arc::new(SharedContext::new()),
            rx_filter_id: 0x520,
            auto_forwarding: Arc::clone(&flag),
        };
        rx.handle(LineEvent::Line("A".to_string()));
        assert!(!flag.load(Ordering::Relaxed));
        rx.handle(LineEvent::Line("Z".to_string()));
        assert!(flag.load(Ordering::Relaxed));
    }
}

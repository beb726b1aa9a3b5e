//! Periodic CAN transmission
//!
//! One [`PeriodicTask`] per configured frame. Each firing snapshots the shared
//! context, builds that id's payload, encodes it and hands the line to the
//! link. Firings while the link is down are skipped silently.

mod periodic;

pub use periodic::{PeriodicTask, TaskControl, next_delay};

use crate::core::SharedContext;
use crate::core::types::{CanFrame, PeriodicFrame};
use crate::error::Result;
use crate::protocol::{PayloadInputs, build_outgoing_payload, encode_frame};
use crate::telemetry::SchedulerState;
use std::sync::Arc;

/// Where encoded lines go
pub trait LineSink: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Queue one line for transmission (terminator added by the sink)
    fn write_line(&self, line: &str) -> Result<()>;
}

/// Build the frame currently due for `id`
pub fn build_frame(id: u16, ctx: &SharedContext) -> Option<CanFrame> {
    let inputs = PayloadInputs {
        mission: ctx.mission(),
        control: ctx.control(),
        event: ctx.last_event(),
        state_byte: ctx.tx_state(),
    };
    CanFrame::new(id, &build_outgoing_payload(id, &inputs))
}

/// One firing: build, encode, write, count
fn transmit(id: u16, ctx: &SharedContext, sink: &dyn LineSink) {
    if !sink.is_connected() {
        return;
    }
    let Some(frame) = build_frame(id, ctx) else {
        return;
    };
    let line = match encode_frame(frame.id, &frame.data) {
        Ok(line) => line,
        Err(e) => {
            log::error!("TX 0x{:03X}: {}", id, e);
            return;
        }
    };
    if let Err(e) = sink.write_line(&line) {
        log::debug!("TX 0x{:03X} skipped: {}", id, e);
        return;
    }
    if log::log_enabled!(log::Level::Trace) {
        log::trace!("TX {}", line);
    }
    ctx.telemetry.record_tx(frame);
}

/// Owns the transmit loops
pub struct TxScheduler {
    ctx: Arc<SharedContext>,
    tasks: Vec<PeriodicTask>,
}

impl TxScheduler {
    pub fn new(ctx: Arc<SharedContext>) -> Self {
        Self {
            ctx,
            tasks: Vec::new(),
        }
    }

    /// (Re)start one loop per frame; nothing starts while the sink is down
    pub fn start(&mut self, frames: &[PeriodicFrame], sink: Arc<dyn LineSink>) -> Result<()> {
        self.stop();

        if !sink.is_connected() {
            return Ok(());
        }
        if frames.is_empty() {
            self.ctx
                .telemetry
                .set_scheduler_state(SchedulerState::NoFramesConfigured);
            return Ok(());
        }

        for frame in frames {
            let id = frame.id;
            let ctx = Arc::clone(&self.ctx);
            let sink = Arc::clone(&sink);
            let task = PeriodicTask::spawn(
                &format!("can-tx-{:03x}", id),
                frame.interval,
                move || {
                    transmit(id, &ctx, sink.as_ref());
                    TaskControl::Continue
                },
            );
            match task {
                Ok(task) => self.tasks.push(task),
                Err(e) => {
                    self.stop();
                    return Err(e);
                }
            }
        }

        self.ctx
            .telemetry
            .set_scheduler_state(SchedulerState::Running(self.tasks.len()));
        Ok(())
    }

    /// Cancel every loop
    pub fn stop(&mut self) {
        for mut task in self.tasks.drain(..) {
            task.stop();
        }
        self.ctx.telemetry.set_scheduler_state(SchedulerState::Stopped);
    }

    pub fn running(&self) -> usize {
        self.tasks.len()
    }
}

impl Drop for TxScheduler {
    fn drop(&mut self) {
        for mut task in self.tasks.drain(..) {
            task.stop();
        }
    }
}

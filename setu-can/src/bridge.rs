//! Bridge orchestration
//!
//! Owns the shared context, the process-wide loops and the current link.
//! The loops run for the bridge's whole lifetime, connected or not:
//!
//! | Loop          | Period | Writes                                  |
//! |---------------|--------|-----------------------------------------|
//! | gamepad-poll  | 10 ms  | inputs, last gamepad event              |
//! | mission-tick  | 10 ms  | control vector, mission timer, label    |
//! | state-seq     | config | state byte, local state label           |
//! | serial-load   | 1 s    | serial load estimate                    |
//!
//! The per-connection loops (transmit, receive poll) belong to the link.

use crate::config::ValidatedConfig;
use crate::control::{
    CONTROL_TICK_MS, ControlSettings, StateSequencer, control_tick, create_logic,
};
use crate::core::SharedContext;
use crate::error::{Error, Result};
use crate::gamepad::{GAMEPAD_POLL_MS, GamepadDiffEngine, GamepadSource};
use crate::link::{LinkIo, LinkSettings, SlcanLink};
use crate::scheduler::{PeriodicTask, TaskControl};
use crate::telemetry::{LinkStatus, TelemetrySnapshot};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Serial load sampling window
pub const LOAD_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Interval between telemetry summaries in [`Bridge::run`]
pub const STATS_INTERVAL: Duration = Duration::from_secs(10);

/// Gamepad/mission-to-CAN bridge
pub struct Bridge {
    port: String,
    link_settings: LinkSettings,
    ctx: Arc<SharedContext>,
    link: Mutex<Option<Arc<SlcanLink>>>,
    tasks: Vec<PeriodicTask>,
    shutdown: Arc<AtomicBool>,
}

impl Bridge {
    /// Start the process-wide loops; no link is opened yet
    pub fn new(config: ValidatedConfig, gamepad: Box<dyn GamepadSource>) -> Result<Self> {
        let ctx = Arc::new(SharedContext::new());
        log::info!("Bridge: {}", config.describe());
        log::info!("State enumeration: {}", config.describe_states());

        let mut bridge = Self {
            port: config.port.clone(),
            link_settings: config.link.clone(),
            ctx,
            link: Mutex::new(None),
            tasks: Vec::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
        };

        if let Err(e) = bridge.start_loops(&config, gamepad) {
            bridge.stop_loops();
            return Err(e);
        }
        Ok(bridge)
    }

    pub fn context(&self) -> &Arc<SharedContext> {
        &self.ctx
    }

    /// Flag checked by [`Bridge::run`]; set it to stop the main loop
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    // ========================================================================
    // Link lifecycle
    // ========================================================================

    /// Open the configured serial port and connect
    pub fn connect_serial(&self) -> Result<()> {
        log::info!(
            "Opening {} at {} baud",
            self.port,
            self.link_settings.baud_rate
        );
        self.disconnect("reconnect");
        let io = match LinkIo::serial(&self.port, self.link_settings.baud_rate) {
            Ok(io) => io,
            Err(e) => {
                let reason = format!("connect failed: {}", e);
                self.ctx.telemetry.set_link_status(LinkStatus::Disconnected {
                    reason: reason.clone(),
                });
                return Err(Error::Connection(reason));
            }
        };
        self.connect(io)
    }

    /// Connect over an already opened device, replacing any current link
    pub fn connect(&self, io: LinkIo) -> Result<()> {
        self.disconnect("reconnect");
        let link = SlcanLink::connect(io, self.link_settings.clone(), Arc::clone(&self.ctx))?;
        *self.link.lock() = Some(link);
        Ok(())
    }

    /// Close the adapter channel and drop the link
    pub fn disconnect(&self, reason: &str) {
        let link = self.link.lock().take();
        if let Some(link) = link {
            link.disconnect(reason, true);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.link
            .lock()
            .as_ref()
            .map(|l| l.is_connected())
            .unwrap_or(false)
    }

    /// Current link, if any
    pub fn link(&self) -> Option<Arc<SlcanLink>> {
        self.link.lock().clone()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.ctx.snapshot()
    }

    /// Block until the shutdown flag is set, logging a summary periodically
    pub fn run(&self) -> Result<()> {
        let mut last_stats = Instant::now();
        let mut was_connected = self.is_connected();

        while !self.shutdown.load(Ordering::Relaxed) {
            std::thread::sleep(Duration::from_millis(100));

            let connected = self.is_connected();
            if was_connected && !connected {
                log::warn!("Link lost: {}", self.ctx.telemetry.link_status());
            }
            was_connected = connected;

            if last_stats.elapsed() >= STATS_INTERVAL {
                log::info!("{}", self.snapshot());
                last_stats = Instant::now();
            }
        }
        Ok(())
    }

    /// Disconnect (sending `C`) and stop every loop
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.disconnect("shutdown");
        self.stop_loops();
        log::info!("Bridge stopped");
    }

    // ========================================================================
    // Process-wide loops
    // ========================================================================

    fn start_loops(
        &mut self,
        config: &ValidatedConfig,
        gamepad: Box<dyn GamepadSource>,
    ) -> Result<()> {
        self.tasks.push(spawn_gamepad_poll(Arc::clone(&self.ctx), gamepad)?);
        self.tasks
            .push(spawn_mission_tick(Arc::clone(&self.ctx), &config.control)?);
        self.tasks.push(spawn_sequencer(
            Arc::clone(&self.ctx),
            StateSequencer::new(config.states.clone(), config.transition_button),
            config.sequencer_interval,
        )?);
        self.tasks.push(spawn_load_sampler(
            Arc::clone(&self.ctx),
            self.link_settings.baud_rate,
        )?);
        Ok(())
    }

    fn stop_loops(&mut self) {
        for mut task in self.tasks.drain(..) {
            task.stop();
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if !self.tasks.is_empty() || self.link.lock().is_some() {
            self.shutdown();
        }
    }
}

fn spawn_gamepad_poll(
    ctx: Arc<SharedContext>,
    mut source: Box<dyn GamepadSource>,
) -> Result<PeriodicTask> {
    log::info!("Gamepad source: {}", source.name());
    let mut engine = GamepadDiffEngine::new();
    PeriodicTask::spawn(
        "gamepad-poll",
        Duration::from_millis(GAMEPAD_POLL_MS),
        move || {
            let pads = source.poll();
            let output = engine.process(&pads);
            for event in &output.events {
                log::debug!("Gamepad: {:?}", event);
            }
            if let Some(last) = output.events.last() {
                ctx.set_last_event(last.to_bytes());
            }
            ctx.set_inputs(output.inputs);
            TaskControl::Continue
        },
    )
}

fn spawn_mission_tick(ctx: Arc<SharedContext>, settings: &ControlSettings) -> Result<PeriodicTask> {
    let mut logic = create_logic(settings, &ctx);
    log::info!("Control logic: {}", logic.name());
    PeriodicTask::spawn(
        "mission-tick",
        Duration::from_millis(u64::from(CONTROL_TICK_MS)),
        move || {
            control_tick(logic.as_mut(), &ctx, CONTROL_TICK_MS);
            TaskControl::Continue
        },
    )
}

fn spawn_sequencer(
    ctx: Arc<SharedContext>,
    mut sequencer: StateSequencer,
    interval: Duration,
) -> Result<PeriodicTask> {
    publish_local_state(&ctx, &sequencer);
    PeriodicTask::spawn("state-seq", interval, move || {
        if sequencer.poll(&ctx.inputs()) {
            publish_local_state(&ctx, &sequencer);
        }
        TaskControl::Continue
    })
}

fn publish_local_state(ctx: &SharedContext, sequencer: &StateSequencer) {
    ctx.set_tx_state(sequencer.current_value());
    ctx.telemetry.set_local_state(sequencer.label());
}

fn spawn_load_sampler(ctx: Arc<SharedContext>, baud_rate: u32) -> Result<PeriodicTask> {
    PeriodicTask::spawn("serial-load", LOAD_SAMPLE_INTERVAL, move || {
        let load = ctx.telemetry.load_meter.sample(baud_rate);
        ctx.telemetry.set_serial_load(load);
        TaskControl::Continue
    })
}

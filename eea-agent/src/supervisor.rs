//! Runtime supervisor.
//!
//! The supervisor owns the interpreter session and is the only task that
//! ever calls into the guest. Each tick runs in a fixed order: drive
//! `eea_loop`, apply a pending bundle hot-swap, then drain the inbound
//! queue. A bundle arriving during `eea_loop` is therefore installed before
//! queued messages are delivered, and those messages reach the new
//! bundle.
//!
//! Guest calls may recurse deeply, so the thread stack is sized from
//! configuration; on memory-tight platforms that is the hook for backing
//! the stack from expansion RAM.

use crate::hello::hello_message;
use crate::peripherals::PeripheralDriver;
use crate::wasm::session::DeliverOutcome;
use crate::wasm::{GuestRuntime, GuestRuntimeConfig, HostState, Session};
use eea_core::{
    AgentConfig, Bundle, EeaError, InboundMessage, OutboundMessage, PersistRequest,
    QueueReceiver, QueueSender, Result, SlotReceiver, SlotSender,
};
use std::fmt;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Tick period while faulted; the supervisor only spins awaiting an
/// external reset.
const FAULT_SPIN: Duration = Duration::from_secs(1);

/// Supervisor lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// No bundle installed; the guest loop is not ticked.
    Idle,
    /// A bundle was received and the interpreter is being built.
    Loading,
    /// The guest loop is ticked and inbound messages are dispatched.
    Running,
    /// The guest trapped. Terminal until external restart.
    Faulted,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Running => "running",
            Self::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// The supervisor task: guest lifecycle, message dispatch, hot-swap.
pub struct Supervisor {
    config: Arc<AgentConfig>,
    runtime: GuestRuntime,
    session: Option<Session>,
    state: SupervisorState,
    connected: bool,
    boot: Instant,
    inbound: QueueReceiver<InboundMessage>,
    bundles: SlotReceiver<Bundle>,
    outbound: QueueSender<OutboundMessage>,
    persist: SlotSender<PersistRequest>,
    peripherals: Arc<dyn PeripheralDriver>,
}

impl Supervisor {
    /// Build a supervisor around the four queue endpoints.
    pub fn new(
        config: Arc<AgentConfig>,
        inbound: QueueReceiver<InboundMessage>,
        bundles: SlotReceiver<Bundle>,
        outbound: QueueSender<OutboundMessage>,
        persist: SlotSender<PersistRequest>,
        peripherals: Arc<dyn PeripheralDriver>,
    ) -> Result<Self> {
        let runtime = GuestRuntime::new(GuestRuntimeConfig::default())?;
        Ok(Self {
            config,
            runtime,
            session: None,
            state: SupervisorState::Idle,
            connected: false,
            boot: Instant::now(),
            inbound,
            bundles,
            outbound,
            persist,
            peripherals,
        })
    }

    /// Launch the supervisor on its own large-stack thread.
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        let stack = self.config.supervisor_stack_bytes;
        thread::Builder::new()
            .name("eea-supervisor".to_string())
            .stack_size(stack)
            .spawn(move || self.run())
    }

    /// Tick loop. Runs until the process exits.
    pub fn run(mut self) {
        let tick_interval = Duration::from_millis(self.config.tick_interval_ms);
        loop {
            if self.state == SupervisorState::Faulted {
                thread::sleep(FAULT_SPIN);
                continue;
            }
            self.tick();
            thread::sleep(tick_interval);
        }
    }

    /// One supervisor cycle: guest loop, hot-swap, inbound drain.
    pub fn tick(&mut self) {
        if self.state == SupervisorState::Running {
            self.run_guest_loop();
        }
        if self.state != SupervisorState::Faulted {
            if let Some(bundle) = self.bundles.take() {
                self.install(bundle);
            }
            self.drain_inbound();
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Identifier of the installed bundle, if any.
    pub fn bundle_id(&self) -> Option<&str> {
        self.session.as_ref().map(Session::bundle_id)
    }

    fn run_guest_loop(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let now_ms = self.boot.elapsed().as_millis() as i64;
        let started = Instant::now();
        match session.call_loop(now_ms) {
            Ok(0) => {
                tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "guest loop tick");
            }
            Ok(code) => tracing::warn!(code, "guest loop returned non-zero"),
            Err(err) => self.fault(err),
        }
    }

    /// Hot-swap: tear down the current session, then build one for the
    /// new bundle. Teardown first keeps peak memory at one bundle plus
    /// one module, at the documented cost that a failed load lands in
    /// `Idle` rather than keeping the previous bundle running.
    fn install(&mut self, bundle: Bundle) {
        self.set_state(SupervisorState::Loading);

        if let Some(mut session) = self.session.take() {
            tracing::info!(bundle_id = %session.bundle_id(), "tearing down current bundle");
            session.shutdown();
            // session drop frees interpreter, module, and environment;
            // the pinned blob goes with it
        }

        let host = HostState::new(
            self.config.device_id.clone(),
            self.config.trace_level,
            self.outbound.clone(),
            Arc::clone(&self.peripherals),
        );
        let mut session = match Session::new(&self.runtime, &bundle, host, &self.config) {
            Ok(session) => session,
            Err(EeaError::EntryPointMissing { name }) => {
                tracing::error!(entry = %name, "bundle lacks its loop entry point");
                self.set_state(SupervisorState::Faulted);
                return;
            }
            Err(err) => {
                tracing::error!(error = %err, "bundle load failed, bundle discarded");
                self.set_state(SupervisorState::Idle);
                return;
            }
        };

        // A freshly installed guest starts out assuming disconnected;
        // tell it the current link state.
        if self.connected {
            if let Err(err) = session.set_connection_status(true) {
                tracing::error!(error = %err, "connection-status hook failed during install, bundle discarded");
                self.set_state(SupervisorState::Idle);
                return;
            }
        }

        let bundle_id = session.bundle_id().to_string();
        let blob = Arc::clone(session.bundle_bytes());
        self.session = Some(session);
        self.set_state(SupervisorState::Running);

        self.outbound.try_send(hello_message(&self.config, &bundle_id));
        self.persist.replace(PersistRequest {
            bundle_id,
            bytes: blob,
        });
    }

    fn drain_inbound(&mut self) {
        while let Some(message) = self.inbound.try_recv() {
            self.dispatch(message);
            if self.state == SupervisorState::Faulted {
                break;
            }
        }
    }

    fn dispatch(&mut self, message: InboundMessage) {
        if let Some(connected) = message.link_state() {
            tracing::info!(connected, "broker link state changed");
            self.connected = connected;
            if let Some(session) = self.session.as_mut() {
                if let Err(err) = session.set_connection_status(connected) {
                    self.fault(err);
                }
            }
            return;
        }

        let Some(session) = self.session.as_mut() else {
            tracing::debug!(topic = %message.topic, "no bundle installed, message dropped");
            return;
        };

        match session.deliver(&message) {
            Ok(DeliverOutcome::Delivered { code, .. }) => {
                if code != 0 {
                    tracing::warn!(topic = %message.topic, code, "guest message handler returned non-zero");
                }
            }
            Ok(DeliverOutcome::NoBuffers) => {
                tracing::warn!(topic = %message.topic, "guest registered no message buffers, message dropped");
            }
            Ok(DeliverOutcome::NoHandler) => {
                tracing::debug!(topic = %message.topic, "guest has no message handler, message dropped");
            }
            Ok(DeliverOutcome::PayloadTooLarge { len, cap }) => {
                tracing::warn!(topic = %message.topic, len, cap, "payload exceeds guest buffer, message dropped");
            }
            Err(err) => self.fault(err),
        }
    }

    /// Terminal trap handling: log the backtrace and stop ticking.
    fn fault(&mut self, err: EeaError) {
        if let EeaError::GuestTrap {
            ref entry,
            ref cause,
            ref backtrace,
        } = err
        {
            tracing::error!(entry = %entry, cause = %cause, "guest trapped");
            if backtrace.is_empty() {
                tracing::error!("no wasm backtrace available");
            } else {
                tracing::error!("wasm backtrace:\n{}", backtrace.trim_end());
            }
        } else {
            tracing::error!(error = %err, "guest failure");
        }
        self.set_state(SupervisorState::Faulted);
    }

    fn set_state(&mut self, next: SupervisorState) {
        if self.state != next {
            tracing::info!(from = %self.state, to = %next, "supervisor state change");
            self.state = next;
        }
    }
}

//! Bridge orchestration
//!
//! [`Bridge`] owns one reading provider and one publication sink and drives
//! them at the configured poll interval. Each cycle reads every channel,
//! smooths and derives the published values, advances the energy counters,
//! runs every output through its publication gate and persists the counters
//! when they changed. The loop ends on a shutdown signal, after a final
//! flush of the counters.

use crate::accumulator::{EnergyAccumulator, ResetPolicy};
use crate::config::Config;
use crate::derivation::{GeneratorDetector, PvAcDerivation};
use crate::error::Result;
use crate::gate::PublicationGate;
use crate::logging::{RateLimitedLogger, StructuredLogger, get_logger};
use crate::persistence::{PersistentState, SCHEMA_VERSION, StateStore};
use crate::readings::ReadingProvider;
use crate::sink::{OutputChannel, PublicationSink};
use crate::smoothing::Ema;
use chrono::Utc;
use chrono_tz::Tz;
use std::collections::BTreeMap;
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, Instant, MissedTickBehavior, interval};

mod cycle;
mod types;


pub use types::{BridgeState, CycleSnapshot};

/// Per-channel smoothing filters
#[derive(Debug, Clone)]
struct Smoothers {
    l1: Ema,
    pv: Ema,
    generator: Ema,
    l2: Ema,
    l3: Ema,
}

impl Smoothers {
    fn new(alpha: f64) -> Self {
        Self {
            l1: Ema::new(alpha),
            pv: Ema::new(alpha),
            generator: Ema::new(alpha),
            l2: Ema::new(alpha),
            l3: Ema::new(alpha),
        }
    }
}

/// Energy counters published by the bridge
#[derive(Debug, Clone)]
struct Counters {
    pv: EnergyAccumulator,
    l2: EnergyAccumulator,
    l3: EnergyAccumulator,
}

impl Counters {
    fn restore(state: PersistentState) -> Self {
        Self {
            pv: EnergyAccumulator::from_state(state.pv, ResetPolicy::Daily),
            l2: EnergyAccumulator::from_state(state.l2, ResetPolicy::Never),
            l3: EnergyAccumulator::from_state(state.l3, ResetPolicy::Never),
        }
    }

    fn is_dirty(&self) -> bool {
        self.pv.is_dirty() || self.l2.is_dirty() || self.l3.is_dirty()
    }

    fn mark_clean(&mut self) {
        self.pv.mark_clean();
        self.l2.mark_clean();
        self.l3.mark_clean();
    }

    fn snapshot(&self) -> PersistentState {
        PersistentState {
            schema_version: SCHEMA_VERSION,
            pv: self.pv.state().clone(),
            l2: self.l2.state().clone(),
            l3: self.l3.state().clone(),
        }
    }
}

/// Main bridge between metering sources and the publication sink
pub struct Bridge<P = Box<dyn ReadingProvider>, S = Box<dyn PublicationSink>> {
    config: Config,
    tz: Tz,

    provider: P,
    sink: S,

    derivation: PvAcDerivation,
    generator: GeneratorDetector,
    smoothers: Smoothers,
    counters: Counters,
    gates: BTreeMap<OutputChannel, PublicationGate>,
    store: StateStore,

    state: watch::Sender<BridgeState>,
    shutdown_tx: mpsc::UnboundedSender<()>,
    shutdown_rx: mpsc::UnboundedReceiver<()>,

    logger: StructuredLogger,
    /// Repeated read, publish and persist failures
    fault_logger: RateLimitedLogger,

    last_cycle: Option<Instant>,
    secs_since_summary: f64,
    total_cycles: u64,
    overrun_count: u64,
    persist_failures: u64,
}

impl<P: ReadingProvider, S: PublicationSink> Bridge<P, S> {
    /// Create a bridge, restoring the energy counters from the state file
    pub fn new(config: Config, provider: P, sink: S) -> Result<Self> {
        let tz = config.tz()?;
        let logger = get_logger("bridge");
        let fault_logger = RateLimitedLogger::new(
            get_logger("bridge"),
            Duration::from_millis(config.logging.rate_limit_ms),
        );

        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(BridgeState::Initializing);

        logger.info(&format!("Initializing bridge (provider: {})", provider.describe()));

        let store = StateStore::new(&config.state_file);
        let counters = Counters::restore(store.load());

        let gates = OutputChannel::ALL
            .iter()
            .map(|&channel| (channel, PublicationGate::new(config.stale_threshold)))
            .collect();

        Ok(Self {
            tz,
            derivation: PvAcDerivation::new(&config.topology),
            generator: GeneratorDetector::new(&config.generator),
            smoothers: Smoothers::new(config.smoothing.alpha),
            counters,
            gates,
            store,
            state: state_tx,
            shutdown_tx,
            shutdown_rx,
            logger,
            fault_logger,
            last_cycle: None,
            // The first cycle logs a summary
            secs_since_summary: config.summary_period_secs as f64,
            total_cycles: 0,
            overrun_count: 0,
            persist_failures: 0,
            provider,
            sink,
            config,
        })
    }

    /// Sender that stops [`Bridge::run`] when signalled
    pub fn shutdown_sender(&self) -> mpsc::UnboundedSender<()> {
        self.shutdown_tx.clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<BridgeState> {
        self.state.subscribe()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    pub fn overrun_count(&self) -> u64 {
        self.overrun_count
    }

    pub fn persist_failures(&self) -> u64 {
        self.persist_failures
    }

    /// Current energy counters as they would be persisted
    pub fn persistent_state(&self) -> PersistentState {
        self.counters.snapshot()
    }

    /// Run the polling loop until a shutdown signal arrives
    pub async fn run(&mut self) -> Result<()> {
        self.logger.info(&format!(
            "Starting bridge main loop ({} ms interval)",
            self.config.poll_interval_ms
        ));
        self.state.send(BridgeState::Running).ok();

        let period = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let mut poll_interval = interval(period);
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = poll_interval.tick() => {
                    let started = Instant::now();
                    self.run_once().await;
                    if started.elapsed() > period {
                        self.overrun_count = self.overrun_count.saturating_add(1);
                    }
                }
                _ = self.shutdown_rx.recv() => {
                    self.logger.info("Shutdown signal received");
                    break;
                }
            }
        }

        self.state.send(BridgeState::ShuttingDown).ok();
        self.shutdown().await
    }

    /// One cycle timed against the monotonic clock
    pub async fn run_once(&mut self) -> CycleSnapshot {
        let now = Instant::now();
        let elapsed = match self.last_cycle {
            Some(last) => now.saturating_duration_since(last),
            None => Duration::ZERO,
        };
        self.last_cycle = Some(now);
        self.run_cycle_at(Utc::now(), elapsed).await
    }

    /// Persist the counters if anything changed since the last write
    pub fn persist(&mut self) -> bool {
        if !self.counters.is_dirty() {
            return false;
        }
        match self.store.save(&self.counters.snapshot()) {
            Ok(()) => {
                self.counters.mark_clean();
                true
            }
            Err(e) => {
                self.persist_failures = self.persist_failures.saturating_add(1);
                self.fault_logger
                    .warn(&format!("Failed to persist energy counters: {}", e));
                false
            }
        }
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.logger.info("Shutting down bridge");
        self.persist();
        if let Err(e) = self.sink.flush().await {
            self.logger.warn(&format!("Final sink flush failed: {}", e));
        }
        if let Err(e) = self.sink.close().await {
            self.logger.warn(&format!("Closing sink failed: {}", e));
        }
        self.logger.info(&format!(
            "Bridge shutdown complete after {} cycles ({} overruns)",
            self.total_cycles, self.overrun_count
        ));
        Ok(())
    }
}

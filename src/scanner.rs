//! Scan coordinator: a fixed pool of workers, each looping
//! draw address → probe → filter → record, until cancelled.
//!
//! Network I/O runs outside any lock. Everything shared (counters, the
//! progress decision, the results file) is mutated under one `Mutex` per
//! completed cycle, so increments are never lost and record blocks never
//! interleave.
use std::sync::Arc;
use std::time::Instant;

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::address::AddressGenerator;
use crate::config::ScanConfig;
use crate::error::{Result, ScanError};
use crate::filter;
use crate::prober::Prober;
use crate::results::ResultSink;
use crate::types::{ProbeOutcome, ScanState, ScanSummary, StatsSnapshot};

/// Progress is published each time the checked counter reaches a multiple of this.
pub const PROGRESS_EVERY: u64 = 10;

/// Notifications for a live display. Delivery is best effort.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    Progress(StatsSnapshot),
    Found(ProbeOutcome),
}

/// Monotonic counters plus the fixed start time used for throughput.
#[derive(Debug, Clone)]
pub struct ScanStats {
    checked: u64,
    found: u64,
    started: Instant,
    rate: f64,
    checks_per_sec: f64,
}

impl ScanStats {
    fn new() -> Self {
        Self {
            checked: 0,
            found: 0,
            started: Instant::now(),
            rate: 0.0,
            checks_per_sec: 0.0,
        }
    }

    fn refresh_rates(&mut self) {
        let secs = self.started.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.rate = self.found as f64 / secs;
            self.checks_per_sec = self.checked as f64 / secs;
        } else {
            self.rate = 0.0;
            self.checks_per_sec = 0.0;
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            checked: self.checked,
            found: self.found,
            elapsed_secs: self.started.elapsed().as_secs_f64(),
            rate: self.rate,
            checks_per_sec: self.checks_per_sec,
        }
    }
}

/// State guarded by the coordinator's single lock.
#[derive(Debug)]
struct Ledger {
    stats: ScanStats,
    sink: ResultSink,
}

impl Ledger {
    /// Book one finished cycle. Returns a snapshot when progress is due.
    fn complete_cycle(&mut self, finding: Option<&ProbeOutcome>) -> Result<Option<StatsSnapshot>> {
        self.stats.checked += 1;
        if let Some(outcome) = finding {
            self.stats.found += 1;
            record_blocking(&mut self.sink, outcome)?;
        }
        if self.stats.checked % PROGRESS_EVERY == 0 {
            self.stats.refresh_rates();
            return Ok(Some(self.stats.snapshot()));
        }
        Ok(None)
    }
}

/// File appends happen with the ledger lock held. On a multi-threaded
/// runtime the write is moved off the async worker with `block_in_place`.
fn record_blocking(sink: &mut ResultSink, outcome: &ProbeOutcome) -> Result<()> {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| sink.record(outcome))
        }
        _ => sink.record(outcome),
    }
}

/// Read-only access to the live counters, usable while the coordinator is
/// busy in [`ScanCoordinator::wait`].
#[derive(Debug, Clone)]
pub struct StatsHandle {
    ledger: Arc<Mutex<Ledger>>,
}

impl StatsHandle {
    pub async fn stats(&self) -> StatsSnapshot {
        self.ledger.lock().await.stats.snapshot()
    }
}

struct Worker<P> {
    id: usize,
    config: Arc<ScanConfig>,
    prober: Arc<P>,
    generator: Arc<AddressGenerator>,
    ledger: Arc<Mutex<Ledger>>,
    events: Option<mpsc::Sender<ScanEvent>>,
    cancel: CancellationToken,
}

impl<P: Prober> Worker<P> {
    /// Loop until cancelled or the cycle limit is reached. Returns cycles run.
    async fn run(self) -> Result<u64> {
        let mut cycles = 0u64;
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            if self.config.cycle_limit.is_some_and(|limit| cycles >= limit) {
                break;
            }

            let ip = self.generator.next();
            let outcome = self.prober.probe(ip, &self.config).await;
            let finding = outcome.filter(|o| filter::matches(Some(o), &self.config));

            {
                let mut ledger = self.ledger.lock().await;
                let progress = ledger.complete_cycle(finding.as_ref())?;
                if let Some(outcome) = finding {
                    log::info!(
                        "[scanner] found: ip={} protocol={} title={:?}",
                        outcome.ip,
                        outcome.protocol,
                        outcome.title
                    );
                    self.emit(ScanEvent::Found(outcome));
                }
                if let Some(snapshot) = progress {
                    self.emit(ScanEvent::Progress(snapshot));
                }
            }
            cycles += 1;
        }
        log::debug!("[scanner] worker_exited: id={} cycles={}", self.id, cycles);
        Ok(cycles)
    }

    fn emit(&self, event: ScanEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.try_send(event);
        }
    }
}

/// Owns the worker pool and the shared ledger.
///
/// Idle → Running on [`start`](Self::start); Running → Draining → Stopped on
/// [`cancel`](Self::cancel), on the cancellation token firing during
/// [`wait`](Self::wait), when every worker hits its cycle limit, or on a
/// persistence failure.
pub struct ScanCoordinator<P: Prober + 'static> {
    config: Arc<ScanConfig>,
    prober: Arc<P>,
    generator: Arc<AddressGenerator>,
    ledger: Arc<Mutex<Ledger>>,
    events: Option<mpsc::Sender<ScanEvent>>,
    cancel: CancellationToken,
    state: watch::Sender<ScanState>,
    workers: JoinSet<Result<u64>>,
}

impl<P: Prober + 'static> ScanCoordinator<P> {
    pub fn new(config: ScanConfig, prober: P) -> Result<Self> {
        config.validate()?;
        let sink = ResultSink::new(config.results_path.clone());
        let (state, _) = watch::channel(ScanState::Idle);
        Ok(Self {
            config: Arc::new(config),
            prober: Arc::new(prober),
            generator: Arc::new(AddressGenerator::default()),
            ledger: Arc::new(Mutex::new(Ledger { stats: ScanStats::new(), sink })),
            events: None,
            cancel: CancellationToken::new(),
            state,
            workers: JoinSet::new(),
        })
    }

    /// Deliver [`ScanEvent`]s to `tx`. Events are dropped when it is full.
    pub fn with_events(mut self, tx: mpsc::Sender<ScanEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Token that stops the scan when cancelled; safe to hand to a signal handler.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> ScanState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ScanState> {
        self.state.subscribe()
    }

    pub fn stats_handle(&self) -> StatsHandle {
        StatsHandle { ledger: Arc::clone(&self.ledger) }
    }

    pub async fn stats(&self) -> StatsSnapshot {
        self.ledger.lock().await.stats.snapshot()
    }

    /// Reset the results file and spawn the worker pool.
    pub async fn start(&mut self) -> Result<()> {
        self.expect_state(ScanState::Idle)?;
        {
            let mut ledger = self.ledger.lock().await;
            ledger.sink.reset()?;
            ledger.stats = ScanStats::new();
        }

        for id in 0..self.config.workers {
            let worker = Worker {
                id,
                config: Arc::clone(&self.config),
                prober: Arc::clone(&self.prober),
                generator: Arc::clone(&self.generator),
                ledger: Arc::clone(&self.ledger),
                events: self.events.clone(),
                cancel: self.cancel.clone(),
            };
            self.workers.spawn(worker.run());
        }
        self.state.send_replace(ScanState::Running);
        log::info!(
            "[scanner] started: workers={} timeout={}ms protocols={:?} cycle_limit={:?}",
            self.config.workers,
            self.config.timeout.as_millis(),
            self.config.protocols,
            self.config.cycle_limit
        );
        Ok(())
    }

    /// Signal every worker to stop, wait for in-flight cycles and report.
    pub async fn cancel(&mut self) -> Result<ScanSummary> {
        self.expect_state(ScanState::Running)?;
        self.cancel.cancel();
        self.drain(None).await
    }

    /// Run until the token is cancelled, every worker retires, or a worker
    /// fails, then drain and report.
    pub async fn wait(&mut self) -> Result<ScanSummary> {
        self.expect_state(ScanState::Running)?;
        let mut fatal = None;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                joined = self.workers.join_next() => match joined {
                    None => break,
                    Some(res) => {
                        if let Err(e) = flatten(res) {
                            log::error!("[scanner] worker_failed: error={}", e);
                            fatal = Some(e);
                            break;
                        }
                    }
                },
            }
        }
        self.drain(fatal).await
    }

    async fn drain(&mut self, mut fatal: Option<ScanError>) -> Result<ScanSummary> {
        self.state.send_replace(ScanState::Draining);
        self.cancel.cancel();
        log::info!("[scanner] draining: in_flight_workers={}", self.workers.len());

        while let Some(res) = self.workers.join_next().await {
            if let Err(e) = flatten(res) {
                log::error!("[scanner] worker_failed: error={}", e);
                fatal.get_or_insert(e);
            }
        }

        self.state.send_replace(ScanState::Stopped);
        let stats = {
            let mut ledger = self.ledger.lock().await;
            ledger.stats.refresh_rates();
            ledger.stats.snapshot()
        };
        log::info!(
            "[scanner] stopped: checked={} found={} elapsed={:.1}s results={}",
            stats.checked,
            stats.found,
            stats.elapsed_secs,
            self.config.results_path.display()
        );

        match fatal {
            Some(e) => Err(e),
            None => Ok(ScanSummary {
                state: ScanState::Stopped,
                stats,
                results_path: self.config.results_path.clone(),
            }),
        }
    }

    fn expect_state(&self, expected: ScanState) -> Result<()> {
        let actual = self.state();
        if actual != expected {
            return Err(ScanError::InvalidState { expected, actual });
        }
        Ok(())
    }
}

fn flatten(res: std::result::Result<Result<u64>, tokio::task::JoinError>) -> Result<u64> {
    match res {
        Ok(inner) => inner,
        Err(e) => Err(ScanError::Worker(e.to_string())),
    }
}

//! Two RLC instances over an emulated lossy MAC
//!
//! Each instance gets an SDU generator task and a MAC reader task that pulls
//! PDUs of random size and hands them to the peer, dropping some. A tick
//! task drives the protocol timers. All tasks watch one stop channel and are
//! joined before the RLC instances are shut down.

use anyhow::Result;
use bytes::Bytes;
use common::{BufferPool, Lcid, PoolStats};
use interfaces::rlc::{PdcpRlcInterface, RrcRlcInterface};
use layers::rlc::{Rlc, RlcConfig, RlcError, RlcMetrics};
use layers::ProtocolLayer;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Logical channel used by the test
pub const LCID: Lcid = Lcid(1);

/// Largest SDU the generator produces
pub const MAX_SDU_SIZE: usize = 1500;

/// Harness parameters, filled from the command line
#[derive(Debug, Clone)]
pub struct HarnessArgs {
    pub duration: Duration,
    pub sdu_gen_delay: Duration,
    pub pdu_tx_delay: Duration,
    pub error_rate: f64,
    /// Opportunity size as a multiple of the SDU size; 0 picks it at random
    pub opp_sdu_ratio: f64,
    pub reestablish: bool,
    pub reestablish_period: Duration,
    /// Only the first instance generates SDUs
    pub single_tx: bool,
    /// SDU size; 0 picks it at random per SDU
    pub sdu_size: usize,
    pub seed: u64,
}

/// Upper layer that checks every SDU it receives
///
/// Generated SDUs repeat one byte value, so a wrongly reassembled SDU shows
/// up as mixed content.
#[derive(Default)]
pub struct SduChecker {
    name: &'static str,
    received: AtomicU64,
    received_bytes: AtomicU64,
    corrupted: AtomicU64,
    max_retx: AtomicU64,
}

impl SduChecker {
    pub fn new(name: &'static str) -> Self {
        Self { name, ..Self::default() }
    }
}

impl PdcpRlcInterface for SduChecker {
    fn deliver_sdu(&self, lcid: Lcid, sdu: Bytes) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.received_bytes.fetch_add(sdu.len() as u64, Ordering::Relaxed);
        if sdu.iter().any(|b| *b != sdu[0]) {
            self.corrupted.fetch_add(1, Ordering::Relaxed);
            warn!("{}: corrupted SDU of {} bytes on {}", self.name, sdu.len(), lcid);
        }
    }
}

impl RrcRlcInterface for SduChecker {
    fn notify_max_retx(&self, lcid: Lcid) {
        self.max_retx.fetch_add(1, Ordering::Relaxed);
        error!("{}: max retransmissions reached on {}", self.name, lcid);
    }
}

/// Per-instance results
#[derive(Debug, Clone, Serialize)]
pub struct InstanceReport {
    pub sdus_generated: u64,
    pub sdus_rejected: u64,
    pub sdus_received: u64,
    pub bytes_received: u64,
    pub corrupted_sdus: u64,
    pub max_retx_events: u64,
    pub rlc: RlcMetrics,
}

/// Final report, printed as JSON
#[derive(Debug, Clone, Serialize)]
pub struct StressReport {
    pub seed: u64,
    pub duration_ms: u128,
    pub reestablishments: u64,
    pub rlc1: InstanceReport,
    pub rlc2: InstanceReport,
    pub pool_outstanding: usize,
    pub pool_high_water: usize,
    pub pool_exhausted: usize,
}

#[derive(Default)]
struct GenCounters {
    generated: AtomicU64,
    rejected: AtomicU64,
}

struct Instance {
    rlc: Arc<Rlc>,
    upper: Arc<SduChecker>,
    counters: Arc<GenCounters>,
}

impl Instance {
    async fn new(name: &'static str, config: &RlcConfig) -> Result<Self> {
        let upper = Arc::new(SduChecker::new(name));
        let mut rlc = Rlc::new(upper.clone());
        rlc.initialize().await?;
        rlc.add_bearer(LCID, config.clone())?;
        Ok(Self {
            rlc: Arc::new(rlc),
            upper,
            counters: Arc::new(GenCounters::default()),
        })
    }

    fn report(&self) -> Result<InstanceReport> {
        Ok(InstanceReport {
            sdus_generated: self.counters.generated.load(Ordering::Relaxed),
            sdus_rejected: self.counters.rejected.load(Ordering::Relaxed),
            sdus_received: self.upper.received.load(Ordering::Relaxed),
            bytes_received: self.upper.received_bytes.load(Ordering::Relaxed),
            corrupted_sdus: self.upper.corrupted.load(Ordering::Relaxed),
            max_retx_events: self.upper.max_retx.load(Ordering::Relaxed),
            rlc: self.rlc.metrics(LCID)?,
        })
    }

    async fn shutdown(mut self) -> Result<()> {
        match Arc::get_mut(&mut self.rlc) {
            Some(rlc) => rlc.shutdown().await?,
            None => warn!("RLC still referenced at shutdown"),
        }
        Ok(())
    }
}

/// The stress test
pub struct Harness {
    args: HarnessArgs,
    rlc1: Instance,
    rlc2: Instance,
    pool: Arc<BufferPool>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Harness {
    pub async fn new(args: HarnessArgs, config: RlcConfig) -> Result<Self> {
        let rlc1 = Instance::new("rlc1", &config).await?;
        let rlc2 = Instance::new("rlc2", &config).await?;
        let pool = Arc::new(BufferPool::new("sdu", 1024, MAX_SDU_SIZE));
        let (stop_tx, stop_rx) = watch::channel(false);
        Ok(Self {
            args,
            rlc1,
            rlc2,
            pool,
            stop_tx,
            stop_rx,
            tasks: Vec::new(),
        })
    }

    fn spawn_tasks(&mut self) {
        let seed = self.args.seed;

        self.tasks.push(tokio::spawn(mac_reader(
            "rlc1->rlc2",
            self.rlc1.rlc.clone(),
            self.rlc2.rlc.clone(),
            self.args.clone(),
            StdRng::seed_from_u64(seed),
            self.stop_rx.clone(),
        )));
        self.tasks.push(tokio::spawn(mac_reader(
            "rlc2->rlc1",
            self.rlc2.rlc.clone(),
            self.rlc1.rlc.clone(),
            self.args.clone(),
            StdRng::seed_from_u64(seed.wrapping_add(1)),
            self.stop_rx.clone(),
        )));

        self.tasks.push(tokio::spawn(sdu_generator(
            self.rlc1.rlc.clone(),
            self.rlc1.counters.clone(),
            self.pool.clone(),
            self.args.clone(),
            StdRng::seed_from_u64(seed.wrapping_add(2)),
            self.stop_rx.clone(),
        )));
        if !self.args.single_tx {
            self.tasks.push(tokio::spawn(sdu_generator(
                self.rlc2.rlc.clone(),
                self.rlc2.counters.clone(),
                self.pool.clone(),
                self.args.clone(),
                StdRng::seed_from_u64(seed.wrapping_add(3)),
                self.stop_rx.clone(),
            )));
        }

        self.tasks.push(tokio::spawn(ticker(
            vec![self.rlc1.rlc.clone(), self.rlc2.rlc.clone()],
            self.stop_rx.clone(),
        )));
    }

    /// Run until the configured duration elapses or Ctrl-C
    pub async fn run(mut self) -> Result<StressReport> {
        info!(
            "Running RLC stress test for {:?} (seed {}, error rate {})",
            self.args.duration, self.args.seed, self.args.error_rate
        );
        let started = tokio::time::Instant::now();
        self.spawn_tasks();

        let mut reestablishments = 0;
        let mut reestablish_timer = tokio::time::interval(self.args.reestablish_period);
        reestablish_timer.tick().await;
        let deadline = tokio::time::sleep(self.args.duration);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
                _ = reestablish_timer.tick(), if self.args.reestablish => {
                    let r1 = self.rlc1.rlc.reestablish();
                    let r2 = self.rlc2.rlc.reestablish();
                    reestablishments += 1;
                    info!(
                        "Reestablished: rlc1 requeued {} discarded {}, rlc2 requeued {} discarded {}",
                        r1.requeued_sdus, r1.discarded_sdus, r2.requeued_sdus, r2.discarded_sdus
                    );
                }
            }
        }

        info!("Stopping tasks");
        let _ = self.stop_tx.send(true);
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!("Task failed: {}", e);
            }
        }

        let pool: PoolStats = self.pool.stats();
        let report = StressReport {
            seed: self.args.seed,
            duration_ms: started.elapsed().as_millis(),
            reestablishments,
            rlc1: self.rlc1.report()?,
            rlc2: self.rlc2.report()?,
            pool_outstanding: pool.outstanding,
            pool_high_water: pool.high_water,
            pool_exhausted: pool.exhausted,
        };

        self.rlc1.shutdown().await?;
        self.rlc2.shutdown().await?;
        self.pool.teardown();
        Ok(report)
    }
}

/// Sleep for `delay`, or yield when it is zero. Returns true once stop was signalled.
async fn pause(delay: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    if delay.is_zero() {
        tokio::task::yield_now().await;
        return *stop.borrow();
    }
    tokio::select! {
        _ = stop.changed() => true,
        _ = tokio::time::sleep(delay) => *stop.borrow(),
    }
}

async fn mac_reader(
    name: &'static str,
    tx: Arc<Rlc>,
    rx: Arc<Rlc>,
    args: HarnessArgs,
    mut rng: StdRng,
    mut stop: watch::Receiver<bool>,
) {
    let mut forwarded = 0u64;
    let mut dropped = 0u64;

    loop {
        let opportunity = if args.opp_sdu_ratio > 0.0 {
            let sdu_size = if args.sdu_size == 0 { MAX_SDU_SIZE } else { args.sdu_size };
            ((sdu_size as f64 * args.opp_sdu_ratio) as usize).max(1)
        } else {
            rng.gen_range(1..=2 * MAX_SDU_SIZE)
        };

        if let Some(pdu) = tx.read_pdu(LCID, opportunity) {
            if rng.gen_bool(args.error_rate) {
                dropped += 1;
            } else {
                forwarded += 1;
                rx.write_pdu(LCID, pdu);
            }
        }

        if pause(args.pdu_tx_delay, &mut stop).await {
            break;
        }
    }
    debug!("MAC reader {} stopped: {} PDUs forwarded, {} dropped", name, forwarded, dropped);
}

async fn sdu_generator(
    rlc: Arc<Rlc>,
    counters: Arc<GenCounters>,
    pool: Arc<BufferPool>,
    args: HarnessArgs,
    mut rng: StdRng,
    mut stop: watch::Receiver<bool>,
) {
    let mut tag = 0u8;

    loop {
        let size = if args.sdu_size == 0 {
            rng.gen_range(1..=MAX_SDU_SIZE)
        } else {
            args.sdu_size
        };

        match pool.acquire() {
            Ok(mut buf) => {
                buf.resize(size, tag);
                let sdu = buf.split().freeze();
                pool.release(buf);

                match rlc.write_sdu(LCID, sdu) {
                    Ok(()) => {
                        counters.generated.fetch_add(1, Ordering::Relaxed);
                        tag = tag.wrapping_add(1);
                    }
                    Err(RlcError::CapacityExceeded { .. }) => {
                        counters.rejected.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        debug!("SDU generator stopping: {}", e);
                        break;
                    }
                }
            }
            Err(e) => warn!("No buffer for SDU: {}", e),
        }

        if pause(args.sdu_gen_delay, &mut stop).await {
            break;
        }
    }
}

async fn ticker(instances: Vec<Arc<Rlc>>, mut stop: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(Duration::from_millis(1));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Burst);

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = interval.tick() => {
                for rlc in &instances {
                    rlc.tick(1);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(seed: u64) -> HarnessArgs {
        HarnessArgs {
            duration: Duration::from_millis(300),
            sdu_gen_delay: Duration::from_micros(500),
            pdu_tx_delay: Duration::from_micros(100),
            error_rate: 0.05,
            opp_sdu_ratio: 0.0,
            reestablish: false,
            reestablish_period: Duration::from_secs(1),
            single_tx: false,
            sdu_size: 0,
            seed,
        }
    }

    #[test]
    fn test_checker_detects_corruption() {
        let checker = SduChecker::new("test");
        checker.deliver_sdu(LCID, Bytes::from(vec![3u8; 10]));
        checker.deliver_sdu(LCID, Bytes::from(vec![3, 3, 4]));
        assert_eq!(checker.received.load(Ordering::Relaxed), 2);
        assert_eq!(checker.corrupted.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_am_stress_run() {
        let harness = Harness::new(args(7), RlcConfig::default_am()).await.unwrap();
        let report = harness.run().await.unwrap();

        assert!(report.rlc1.sdus_generated > 0);
        assert!(report.rlc2.sdus_received > 0);
        assert_eq!(report.rlc1.corrupted_sdus + report.rlc2.corrupted_sdus, 0);
        assert_eq!(report.pool_outstanding, 0);
    }

    #[tokio::test]
    async fn test_um_stress_run_single_tx() {
        let args = HarnessArgs { single_tx: true, ..args(11) };
        let harness = Harness::new(args, RlcConfig::default_um()).await.unwrap();
        let report = harness.run().await.unwrap();

        assert_eq!(report.rlc2.sdus_generated, 0);
        assert_eq!(report.rlc1.sdus_received, 0);
        assert!(report.rlc2.sdus_received > 0);
        assert_eq!(report.rlc2.corrupted_sdus, 0);
    }

    #[tokio::test]
    async fn test_am_stress_run_with_reestablishment() {
        let args = HarnessArgs {
            duration: Duration::from_millis(400),
            reestablish: true,
            reestablish_period: Duration::from_millis(50),
            ..args(13)
        };
        let harness = Harness::new(args, RlcConfig::default_am()).await.unwrap();
        let report = harness.run().await.unwrap();

        assert!(report.reestablishments >= 2);
        assert!(report.rlc1.sdus_received + report.rlc2.sdus_received > 0);
        assert_eq!(report.rlc1.corrupted_sdus + report.rlc2.corrupted_sdus, 0);
        assert_eq!(report.pool_outstanding, 0);
    }
}

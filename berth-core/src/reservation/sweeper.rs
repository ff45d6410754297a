//! Background release of idle host reservations
//!
//! The sweeper wakes on the configured release period and checks every
//! reserved host. VM lifecycle code can also push a host id through a
//! [`CapacityReleaseNotifier`] whenever a VM frees its capacity; the sweeper
//! then checks that host right away.

use super::HostReservationLedger;
use crate::config::ReservationConfig;
use crate::error::BerthResult;
use crate::lifecycle::LifecycleManager;
use crate::types::HostId;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// Fire-and-forget handle for capacity release events
#[derive(Debug, Clone)]
pub struct CapacityReleaseNotifier {
    tx: mpsc::UnboundedSender<HostId>,
}

impl CapacityReleaseNotifier {
    /// Ask for a release check of `host_id`. Never fails the caller.
    pub fn notify(&self, host_id: HostId) {
        if self.tx.send(host_id).is_err() {
            warn!(
                "Reservation sweeper is gone, dropping release event for host {}",
                host_id
            );
        }
    }
}

pub struct ReservationReleaseSweeper {
    ledger: Arc<HostReservationLedger>,
    period: Duration,
    tx: mpsc::UnboundedSender<HostId>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<HostId>>>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ReservationReleaseSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReservationReleaseSweeper")
            .field("ledger", &self.ledger)
            .field("period", &self.period)
            .field("handle", &self.handle.as_ref().map(|_| "<JoinHandle>"))
            .finish()
    }
}

impl ReservationReleaseSweeper {
    pub fn new(ledger: Arc<HostReservationLedger>, config: &ReservationConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            ledger,
            period: config.release_period,
            tx,
            rx: Arc::new(Mutex::new(rx)),
            handle: None,
        }
    }

    pub fn notifier(&self) -> CapacityReleaseNotifier {
        CapacityReleaseNotifier {
            tx: self.tx.clone(),
        }
    }

    /// Run one sweep over every reserved host
    pub fn sweep_once(&self) -> BerthResult<Vec<HostId>> {
        run_sweep(&self.ledger)
    }
}

fn run_sweep(ledger: &HostReservationLedger) -> BerthResult<Vec<HostId>> {
    let released = ledger.release_idle_hosts()?;
    if !released.is_empty() {
        info!("Released reservations of hosts {:?}", released);
    }
    Ok(released)
}

#[async_trait]
impl LifecycleManager for ReservationReleaseSweeper {
    async fn start(&mut self) -> BerthResult<()> {
        if self.handle.is_some() {
            warn!("ReservationReleaseSweeper is already running");
            return Ok(());
        }

        let ledger = Arc::clone(&self.ledger);
        let rx = Arc::clone(&self.rx);
        let period = self.period;

        let handle = tokio::spawn(async move {
            info!("Starting host reservation sweeper with period: {:?}", period);
            let mut rx = rx.lock().await;
            let mut ticker = interval(period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // Ledger stores do blocking I/O
                        let sweeping = Arc::clone(&ledger);
                        match tokio::task::spawn_blocking(move || run_sweep(&sweeping)).await {
                            Ok(Ok(_)) => {}
                            Ok(Err(e)) => error!("Host reservation sweep failed: {}", e),
                            Err(e) => error!("Host reservation sweep task join error: {}", e),
                        }
                    }
                    event = rx.recv() => {
                        let Some(host_id) = event else {
                            debug!("Capacity release channel closed");
                            break;
                        };
                        let checking = Arc::clone(&ledger);
                        let released = tokio::task::spawn_blocking(move || {
                            checking.check_host_reservation_release(host_id)
                        })
                        .await;
                        match released {
                            Ok(Ok(_)) => {}
                            Ok(Err(e)) => {
                                warn!("Failed to release reservation of host {}: {}", host_id, e)
                            }
                            Err(e) => warn!("Release check of host {} did not finish: {}", host_id, e),
                        }
                    }
                }
            }
        });

        self.handle = Some(handle);
        info!("ReservationReleaseSweeper started");
        Ok(())
    }

    async fn stop(&mut self) -> BerthResult<()> {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            // Wait for the aborted task so the receiver lock is free for a restart
            let _ = handle.await;
            info!("ReservationReleaseSweeper stopped");
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn name(&self) -> &'static str {
        "ReservationReleaseSweeper"
    }
}

impl Drop for ReservationReleaseSweeper {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

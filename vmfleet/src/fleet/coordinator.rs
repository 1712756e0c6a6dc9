//! Fleet coordinator: fan specifications out to provisioners, fan outcomes
//! back in.

use super::abort::AbortSignal;
use super::outcome::Outcome;
use super::pool::WorkerPool;
use crate::config::FleetConfig;
use crate::platform::PlatformClient;
use crate::provision::InstanceProvisioner;
use crate::spec::InstanceSpec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use ulid::Ulid;

/// Result of one batch.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub batch_id: Ulid,
    /// Outcomes in receipt order.
    pub outcomes: Vec<Outcome>,
    pub aborted: bool,
    pub duration_ms: u128,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }
}

/// Runs every specification of a batch through its own provisioner.
pub struct FleetCoordinator {
    client: PlatformClient,
    config: Arc<FleetConfig>,
}

impl FleetCoordinator {
    pub fn new(client: PlatformClient, config: FleetConfig) -> Self {
        Self {
            client,
            config: Arc::new(config),
        }
    }

    /// Provision `specs` and wait for all of them.
    ///
    /// Returns exactly one outcome per specification, whatever happens to the
    /// workers; an abort only stops instances before their next stage.
    pub async fn run(&self, specs: Vec<InstanceSpec>) -> BatchReport {
        let batch_id = Ulid::new();
        let start = Instant::now();
        let total = specs.len();
        let abort = AbortSignal::new(self.config.abort_policy);

        tracing::info!(
            batch_id = %batch_id,
            instances = total,
            concurrency = self.config.concurrency,
            abort_policy = ?self.config.abort_policy,
            serialized = self.client.is_serialized(),
            "Starting batch"
        );
        warn_duplicate_names(&specs);

        let provisioner =
            InstanceProvisioner::new(self.client.clone(), Arc::clone(&self.config), abort.clone());
        let (tx, mut rx) = mpsc::channel::<Outcome>(total.max(1));
        let mut pool = WorkerPool::new(self.config.concurrency);

        for (index, spec) in specs.into_iter().enumerate() {
            let provisioner = provisioner.clone();
            let tx = tx.clone();
            let identity = spec.name.clone();
            pool.spawn((index, identity), async move {
                let outcome = provisioner.provision(index, spec).await;
                if tx.send(outcome).await.is_err() {
                    tracing::error!(index, "Result channel closed before outcome was sent");
                }
            });
        }

        // The channel holds every outcome, so workers never block on send
        // and supervision can finish before draining.
        let mut reported = vec![false; total];
        let mut identities = HashMap::new();
        while let Some(((index, identity), result)) = pool.join_next().await {
            if let Err(panic) = result {
                tracing::error!(index, instance = %identity, "Provisioner panicked: {}", panic.0);
                let outcome = Outcome::lost(
                    index,
                    identity.clone(),
                    format!("provisioner panicked: {}", panic.0),
                    start.elapsed().as_millis(),
                );
                abort.signal_and_acknowledge(&format!("{} panicked", identity));
                if tx.send(outcome).await.is_err() {
                    tracing::error!(index, "Result channel closed before outcome was sent");
                }
            }
            identities.insert(index, identity);
        }
        drop(tx);

        let mut outcomes = Vec::with_capacity(total);
        while let Some(outcome) = rx.recv().await {
            if let Some(seen) = reported.get_mut(outcome.index) {
                *seen = true;
            }
            outcomes.push(outcome);
        }

        // A worker cancelled by the runtime never reported.
        for (index, seen) in reported.iter().enumerate() {
            if !seen {
                let identity = identities.remove(&index).unwrap_or_default();
                tracing::error!(index, instance = %identity, "Worker ended without an outcome");
                outcomes.push(Outcome::lost(
                    index,
                    identity,
                    "worker ended without an outcome".to_string(),
                    start.elapsed().as_millis(),
                ));
            }
        }

        let report = BatchReport {
            batch_id,
            outcomes,
            aborted: abort.is_aborted(),
            duration_ms: start.elapsed().as_millis(),
        };
        tracing::info!(
            batch_id = %batch_id,
            succeeded = report.succeeded(),
            failed = report.failed(),
            duration_ms = report.duration_ms,
            "Batch finished"
        );
        report
    }
}

fn warn_duplicate_names(specs: &[InstanceSpec]) {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for spec in specs {
        *seen.entry(spec.name.as_str()).or_default() += 1;
    }
    for (name, count) in seen.into_iter().filter(|(_, count)| *count > 1) {
        tracing::warn!(
            instance = %name,
            count,
            "Duplicate instance name in batch, outcomes for it are ambiguous"
        );
    }
}

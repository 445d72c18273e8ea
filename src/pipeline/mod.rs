//! Delivery pipeline
//!
//! [`PipelineExecutor`] runs one delivery through a hook's component chain:
//! each component gets its own transaction on its own partition, the first
//! failure rolls back that component and halts the chain, and the hook's
//! counters are incremented whatever the outcome.
//!
//! [`Dispatcher`] sits between ingress and the executor as a bounded queue
//! drained by a fixed set of workers.

pub mod dispatch;

pub use dispatch::{DispatchError, Dispatcher, DispatcherConfig, DispatcherHandle};

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::components::{Component, ComponentRegistry, ProcessError};
use crate::hooks::{Hook, HookComponent, HookStore, Request};
use crate::store::TxMode;

/// Default bound on one delivery's whole chain.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(120);

/// What happened to one component during a delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Committed,
    /// The component type is not registered.
    Skipped,
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub instance_id: String,
    pub component: String,
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

/// Per-delivery summary, for logs and tests.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeliveryReport {
    pub hook_id: String,
    pub steps: Vec<StepReport>,
    /// A component failed and later components did not run.
    pub halted: bool,
    /// The delivery deadline expired.
    pub timed_out: bool,
    /// Counters were updated.
    pub counted: bool,
}

impl DeliveryReport {
    pub fn committed(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.outcome == StepOutcome::Committed)
            .count()
    }
}

pub struct PipelineExecutor {
    hooks: HookStore,
    registry: Arc<ComponentRegistry>,
    delivery_timeout: Duration,
}

impl PipelineExecutor {
    pub fn new(hooks: HookStore, delivery_timeout: Duration) -> Self {
        let registry = hooks.registry().clone();
        Self {
            hooks,
            registry,
            delivery_timeout,
        }
    }

    /// Run `request` through `hook`'s chain and record it in the counters.
    pub async fn execute(&self, hook: &Hook, request: &Request) -> DeliveryReport {
        let mut report = DeliveryReport {
            hook_id: hook.id.clone(),
            ..DeliveryReport::default()
        };

        let chain = self.run_chain(hook, request, &mut report);
        if tokio::time::timeout(self.delivery_timeout, chain)
            .await
            .is_err()
        {
            warn!(
                target: "pipeline",
                hook = %hook.id,
                timeout = ?self.delivery_timeout,
                "delivery deadline exceeded; in-flight component rolled back"
            );
            report.timed_out = true;
            report.halted = true;
        }

        match self.hooks.increment(&hook.id, request.received_at).await {
            Ok(()) => report.counted = true,
            Err(e) => error!(target: "pipeline", hook = %hook.id, error = %e, "failed to update delivery counters"),
        }

        info!(
            target: "pipeline",
            hook = %hook.id,
            steps = report.steps.len(),
            committed = report.committed(),
            halted = report.halted,
            "delivery processed"
        );
        report
    }

    async fn run_chain(&self, hook: &Hook, request: &Request, report: &mut DeliveryReport) {
        for instance in &hook.components {
            let Some(component) = self.registry.lookup(&instance.name) else {
                warn!(
                    target: "pipeline",
                    hook = %hook.id,
                    component = %instance.name,
                    "unknown component type; skipping"
                );
                report.steps.push(step(instance, StepOutcome::Skipped));
                continue;
            };

            match self.run_component(hook, instance, component.as_ref(), request).await {
                Ok(()) => {
                    debug!(target: "pipeline", hook = %hook.id, component = %instance.name, "component committed");
                    report.steps.push(step(instance, StepOutcome::Committed));
                }
                Err(e) => {
                    if e.is_storage() {
                        error!(
                            target: "pipeline",
                            hook = %hook.id,
                            component = %instance.name,
                            error = %e,
                            "storage failure while processing; halting"
                        );
                    } else {
                        warn!(
                            target: "pipeline",
                            hook = %hook.id,
                            component = %instance.name,
                            error = %e,
                            "component failed; halting"
                        );
                    }
                    report.steps.push(step(
                        instance,
                        StepOutcome::Failed {
                            error: e.to_string(),
                        },
                    ));
                    report.halted = true;
                    return;
                }
            }
        }
    }

    async fn run_component(
        &self,
        hook: &Hook,
        instance: &HookComponent,
        component: &dyn Component,
        request: &Request,
    ) -> Result<(), ProcessError> {
        let mode = if component.writes_state() {
            TxMode::Write
        } else {
            TxMode::Read
        };
        let tx = self.hooks.store().begin(mode).await?;

        let result = component
            .process(hook, request, &tx.partition(&instance.name, &hook.id))
            .await;

        match result {
            Ok(()) => {
                tx.commit().await?;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    error!(target: "pipeline", hook = %hook.id, error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }
}

fn step(instance: &HookComponent, outcome: StepOutcome) -> StepReport {
    StepReport {
        instance_id: instance.id.clone(),
        component: instance.name.clone(),
        outcome,
    }
}

//! Core orchestrator - owns submitted plans and the executor registry, and
//! drives each plan batch by batch as completion notifications arrive.
//!
//! The orchestrator runs as a single tokio task. Callers talk to it through
//! an [`OrchestratorHandle`]; executors talk to it through the completion
//! listener it subscribes on every executor it dispatches to. Both inputs are
//! processed one message at a time, so plan state needs no locking.

mod batch;

use std::collections::{HashMap, HashSet};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::capability::CapabilityCatalog;
use crate::config::{BatchSelection, OrchestratorConfig};
use crate::error::{OrchestratorError, OrchestratorResult, PlanValidationError};
use crate::executor::{Completion, CompletionListener, ExecutorHandle};
use crate::model::{Plan, WorkItem};
use crate::types::{CapabilityId, PlanId, WorkItemId};

/// Progress notifications published by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanEvent {
    /// A batch was handed to its executors. `batch` counts dispatches from 0.
    BatchDispatched {
        plan_id: PlanId,
        batch: usize,
        items: Vec<WorkItemId>,
    },
    ItemCompleted(Completion),
    PlanCompleted {
        plan_id: PlanId,
        succeeded: usize,
        failed: usize,
    },
}

/// Where a plan is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanState {
    NotStarted,
    AwaitingCompletions { batch: usize },
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStatus {
    pub plan_id: PlanId,
    pub state: PlanState,
    pub cursor: usize,
    pub total: usize,
    pub pending: usize,
    pub succeeded: usize,
    pub failed: usize,
}

enum Command {
    Submit {
        plan: Plan,
        reply: oneshot::Sender<OrchestratorResult<PlanId>>,
    },
    Status {
        plan_id: PlanId,
        reply: oneshot::Sender<OrchestratorResult<PlanStatus>>,
    },
    ResolveExecutor {
        capability: CapabilityId,
        reply: oneshot::Sender<OrchestratorResult<ExecutorHandle>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable address of a running orchestrator.
#[derive(Clone)]
pub struct OrchestratorHandle {
    mailbox: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<PlanEvent>,
}

impl OrchestratorHandle {
    /// Spawn an orchestrator over the given capabilities.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(catalog: CapabilityCatalog, config: OrchestratorConfig) -> Self {
        let (mailbox, inbox) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (listener, completions) = CompletionListener::channel();

        tracing::info!(
            capabilities = catalog.len(),
            batch_selection = ?config.batch_selection,
            timing = ?config.timing,
            "Starting orchestrator"
        );

        let actor = OrchestratorActor {
            config,
            catalog,
            plans: HashMap::new(),
            executors: HashMap::new(),
            listener,
            events: events.clone(),
        };
        tokio::spawn(actor.run(inbox, completions));

        Self { mailbox, events }
    }

    /// Register a plan and dispatch its first batch.
    ///
    /// Returns once the first batch has been accepted by its executors; it
    /// does not wait for the plan to finish.
    pub async fn submit(&self, plan: Plan) -> OrchestratorResult<PlanId> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Submit { plan, reply })?;
        rx.await.map_err(|_| OrchestratorError::Stopped)?
    }

    /// Current progress of a plan, or `PlanNotFound` if it was never submitted.
    pub async fn plan_status(&self, plan_id: PlanId) -> OrchestratorResult<PlanStatus> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Status { plan_id, reply })?;
        rx.await.map_err(|_| OrchestratorError::Stopped)?
    }

    /// The executor that runs `item`, spawning it on first use.
    pub async fn resolve_executor(&self, item: &WorkItem) -> OrchestratorResult<ExecutorHandle> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ResolveExecutor {
            capability: item.capability.clone(),
            reply,
        })?;
        rx.await.map_err(|_| OrchestratorError::Stopped)?
    }

    /// Receive every event published after this call.
    pub fn subscribe_events(&self) -> broadcast::Receiver<PlanEvent> {
        self.events.subscribe()
    }

    /// Wait until the plan has completed and return its final status.
    pub async fn wait_for_completion(&self, plan_id: PlanId) -> OrchestratorResult<PlanStatus> {
        let mut events = self.subscribe_events();

        loop {
            let status = self.plan_status(plan_id).await?;
            if status.state == PlanState::Complete {
                return Ok(status);
            }

            loop {
                match events.recv().await {
                    Ok(PlanEvent::PlanCompleted { plan_id: done, .. }) if done == plan_id => break,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(%plan_id, skipped, "Event receiver lagged, re-checking status");
                        break;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(OrchestratorError::Stopped);
                    }
                }
            }
        }
    }

    /// Stop the orchestrator and every executor it spawned.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Shutdown { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    fn send(&self, cmd: Command) -> OrchestratorResult<()> {
        self.mailbox.send(cmd).map_err(|_| OrchestratorError::Stopped)
    }
}

/// Check a plan the way `submit` does before registering it: structural
/// rules first, then the rules specific to the batch selection in use.
pub fn validate_plan(plan: &Plan, rule: BatchSelection) -> Result<(), PlanValidationError> {
    plan.validate()?;
    batch::check_rule(plan, rule)
}

/// Orchestrator-side bookkeeping around a submitted plan.
struct PlanRecord {
    plan: Plan,
    batches_dispatched: usize,
    in_flight: HashSet<WorkItemId>,
    succeeded: usize,
    failed: usize,
    completion_reported: bool,
}

impl PlanRecord {
    fn new(plan: Plan) -> Self {
        Self {
            plan,
            batches_dispatched: 0,
            in_flight: HashSet::new(),
            succeeded: 0,
            failed: 0,
            completion_reported: false,
        }
    }

    fn status(&self) -> PlanStatus {
        let state = if self.plan.is_complete() {
            PlanState::Complete
        } else if self.batches_dispatched == 0 {
            PlanState::NotStarted
        } else {
            PlanState::AwaitingCompletions {
                batch: self.batches_dispatched - 1,
            }
        };

        PlanStatus {
            plan_id: self.plan.id(),
            state,
            cursor: self.plan.cursor(),
            total: self.plan.len(),
            pending: self.plan.pending(),
            succeeded: self.succeeded,
            failed: self.failed,
        }
    }
}

struct OrchestratorActor {
    config: OrchestratorConfig,
    catalog: CapabilityCatalog,
    plans: HashMap<PlanId, PlanRecord>,
    executors: HashMap<CapabilityId, ExecutorHandle>,
    listener: CompletionListener,
    events: broadcast::Sender<PlanEvent>,
}

impl OrchestratorActor {
    async fn run(
        mut self,
        mut inbox: mpsc::UnboundedReceiver<Command>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        loop {
            tokio::select! {
                biased;

                // Completions already delivered are applied before the next command.
                Some(completion) = completions.recv() => {
                    self.on_completed(completion).await;
                }
                cmd = inbox.recv() => match cmd {
                    Some(cmd) => {
                        if !self.handle(cmd).await {
                            break;
                        }
                    }
                    None => {
                        self.stop_executors();
                        break;
                    }
                },
            }
        }

        tracing::info!(plans = self.plans.len(), "Orchestrator stopped");
    }

    /// Apply one command. Returns false once the actor should stop.
    async fn handle(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Submit { plan, reply } => {
                let result = self.submit(plan).await;
                let _ = reply.send(result);
            }
            Command::Status { plan_id, reply } => {
                let result = self
                    .plans
                    .get(&plan_id)
                    .map(PlanRecord::status)
                    .ok_or(OrchestratorError::PlanNotFound(plan_id));
                let _ = reply.send(result);
            }
            Command::ResolveExecutor { capability, reply } => {
                let _ = reply.send(self.resolve_executor(&capability));
            }
            Command::Shutdown { reply } => {
                self.stop_executors();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    async fn submit(&mut self, plan: Plan) -> OrchestratorResult<PlanId> {
        let plan_id = plan.id();

        validate_plan(&plan, self.config.batch_selection)?;

        if self.plans.contains_key(&plan_id) {
            return Err(OrchestratorError::DuplicatePlan(plan_id));
        }

        if let Some(item) = plan
            .items()
            .iter()
            .find(|item| !self.catalog.contains(&item.capability))
        {
            return Err(OrchestratorError::UnknownCapability(item.capability.clone()));
        }

        tracing::info!(%plan_id, items = plan.len(), "Plan submitted");

        self.plans.insert(plan_id, PlanRecord::new(plan));
        self.dispatch_next_batch(plan_id).await;

        Ok(plan_id)
    }

    fn resolve_executor(&mut self, capability: &CapabilityId) -> OrchestratorResult<ExecutorHandle> {
        if let Some(executor) = self.executors.get(capability) {
            if !executor.is_stopped() {
                return Ok(executor.clone());
            }
            tracing::info!(%capability, executor = %executor.id(), "Replacing stopped executor");
        }

        let instance = self
            .catalog
            .get(capability)
            .ok_or_else(|| OrchestratorError::UnknownCapability(capability.clone()))?;

        let executor = ExecutorHandle::spawn(capability.clone(), instance, self.config.timing);
        self.executors.insert(capability.clone(), executor.clone());

        Ok(executor)
    }

    async fn dispatch_next_batch(&mut self, plan_id: PlanId) {
        let rule = self.config.batch_selection;

        let Some(record) = self.plans.get_mut(&plan_id) else {
            tracing::debug!(%plan_id, "Dispatch requested for unknown plan");
            return;
        };

        let Some(selection) = batch::select_next_batch(&mut record.plan, rule) else {
            if !record.completion_reported {
                record.completion_reported = true;
                let (succeeded, failed) = (record.succeeded, record.failed);
                tracing::info!(%plan_id, succeeded, failed, "Plan complete");
                self.publish(PlanEvent::PlanCompleted {
                    plan_id,
                    succeeded,
                    failed,
                });
            }
            return;
        };

        if selection.fallback {
            tracing::warn!(
                %plan_id,
                cursor = record.plan.cursor() - 1,
                "No item matched the batch rule at the cursor; dispatching it alone"
            );
        }

        let batch = record.batches_dispatched;
        record.batches_dispatched += 1;
        record.in_flight = selection.items.iter().map(|item| item.id).collect();

        let ids: Vec<WorkItemId> = selection.items.iter().map(|item| item.id).collect();
        tracing::debug!(%plan_id, batch, items = ?ids, "Dispatching batch");
        self.publish(PlanEvent::BatchDispatched {
            plan_id,
            batch,
            items: ids,
        });

        for item in selection.items {
            let item_id = item.id;
            if let Err(e) = self.dispatch_item(item).await {
                tracing::error!(%plan_id, %item_id, "Failed to dispatch work item: {}", e);
                // Reported back through our own listener so the batch still resolves.
                self.listener.notify(Completion {
                    item_id,
                    plan_id,
                    success: false,
                    message: format!("dispatch failed: {}", e),
                });
            }
        }
    }

    async fn dispatch_item(&mut self, item: WorkItem) -> OrchestratorResult<()> {
        let executor = self.resolve_executor(&item.capability)?;
        executor.subscribe(self.listener.clone()).await?;
        executor.run(item).await?;
        Ok(())
    }

    async fn on_completed(&mut self, completion: Completion) {
        let plan_id = completion.plan_id;

        let Some(record) = self.plans.get_mut(&plan_id) else {
            tracing::debug!(%plan_id, item_id = %completion.item_id, "Completion for unknown plan");
            return;
        };

        if !record.in_flight.remove(&completion.item_id) {
            tracing::warn!(
                %plan_id,
                item_id = %completion.item_id,
                "Ignoring completion for an item not in flight"
            );
            return;
        }

        if completion.success {
            record.succeeded += 1;
        } else {
            record.failed += 1;
        }
        let pending = record.plan.complete_one();

        self.publish(PlanEvent::ItemCompleted(completion));

        if pending == 0 {
            self.dispatch_next_batch(plan_id).await;
        }
    }

    fn publish(&self, event: PlanEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn stop_executors(&mut self) {
        for executor in self.executors.values() {
            executor.shutdown();
        }
        self.executors.clear();
    }
}

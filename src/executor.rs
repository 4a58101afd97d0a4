//! Executor actor.
//!
//! An executor owns one capability instance and runs work items against it,
//! one at a time. Overlapping `run` calls are queued in arrival order. When an
//! activation finishes, every listener subscribed at that moment receives a
//! [`Completion`]. Delivery is fire-and-forget: a listener whose channel is
//! closed is dropped from the subscriber set and nothing is retried.
//!
//! A stopping executor aborts its running activation and reports it, along
//! with every queued item, to its subscribers as a failed completion.

use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;

use crate::capability::{Activation, Capability};
use crate::config::TimingPolicy;
use crate::error::ExecutorError;
use crate::model::WorkItem;
use crate::types::{CapabilityId, ExecutorId, ListenerId, PlanId, WorkItemId};

/// Notification emitted once per finished work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub item_id: WorkItemId,
    pub plan_id: PlanId,
    pub success: bool,
    pub message: String,
}

/// A subscriber that receives completions over an unbounded channel.
#[derive(Debug, Clone)]
pub struct CompletionListener {
    id: ListenerId,
    sender: mpsc::UnboundedSender<Completion>,
}

impl CompletionListener {
    /// Create a listener and the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Completion>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                id: ListenerId::new(),
                sender,
            },
            receiver,
        )
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Deliver a completion. Returns false when the receiver is gone.
    pub(crate) fn notify(&self, completion: Completion) -> bool {
        self.sender.send(completion).is_ok()
    }
}

/// Snapshot of an executor's internal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorStatus {
    pub in_flight: Option<(PlanId, WorkItemId)>,
    pub queued: usize,
    pub subscribers: usize,
}

enum ExecutorMessage {
    Run {
        item: WorkItem,
        accepted: oneshot::Sender<()>,
    },
    Subscribe {
        listener: CompletionListener,
        reply: oneshot::Sender<bool>,
    },
    Unsubscribe {
        listener: ListenerId,
        reply: oneshot::Sender<bool>,
    },
    Status {
        reply: oneshot::Sender<ExecutorStatus>,
    },
    Shutdown,
}

/// Cloneable address of a running executor actor.
#[derive(Debug, Clone)]
pub struct ExecutorHandle {
    id: ExecutorId,
    capability: CapabilityId,
    mailbox: mpsc::UnboundedSender<ExecutorMessage>,
}

impl ExecutorHandle {
    /// Spawn an executor actor for one capability instance.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        capability_id: CapabilityId,
        capability: Arc<dyn Capability>,
        timing: TimingPolicy,
    ) -> Self {
        let (mailbox, inbox) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let id = ExecutorId::new();

        let actor = ExecutorActor {
            id,
            capability_id: capability_id.clone(),
            capability,
            timing,
            subscribers: HashMap::new(),
            queue: VecDeque::new(),
            in_flight: None,
            activation: None,
            done_tx,
        };
        tokio::spawn(actor.run(inbox, done_rx));

        tracing::debug!(executor = %id, capability = %capability_id, "Executor spawned");

        Self {
            id,
            capability: capability_id,
            mailbox,
        }
    }

    pub fn id(&self) -> ExecutorId {
        self.id
    }

    pub fn capability(&self) -> &CapabilityId {
        &self.capability
    }

    /// True when both handles address the same executor actor.
    pub fn same_executor(&self, other: &ExecutorHandle) -> bool {
        self.id == other.id && self.mailbox.same_channel(&other.mailbox)
    }

    /// Hand an item to the executor. Resolves once the item is accepted
    /// (queued or started), not when its activation finishes.
    pub async fn run(&self, item: WorkItem) -> Result<(), ExecutorError> {
        let (accepted, rx) = oneshot::channel();
        self.send(ExecutorMessage::Run { item, accepted })?;
        rx.await.map_err(|_| self.stopped_error())
    }

    /// Add a listener. Returns false if it was already subscribed.
    pub async fn subscribe(&self, listener: CompletionListener) -> Result<bool, ExecutorError> {
        let (reply, rx) = oneshot::channel();
        self.send(ExecutorMessage::Subscribe { listener, reply })?;
        rx.await.map_err(|_| self.stopped_error())
    }

    /// Remove a listener. Returns false if it was not subscribed.
    pub async fn unsubscribe(&self, listener: ListenerId) -> Result<bool, ExecutorError> {
        let (reply, rx) = oneshot::channel();
        self.send(ExecutorMessage::Unsubscribe { listener, reply })?;
        rx.await.map_err(|_| self.stopped_error())
    }

    pub async fn status(&self) -> Result<ExecutorStatus, ExecutorError> {
        let (reply, rx) = oneshot::channel();
        self.send(ExecutorMessage::Status { reply })?;
        rx.await.map_err(|_| self.stopped_error())
    }

    /// Stop the actor. The running item and every queued item are reported
    /// to subscribers as failed.
    pub fn shutdown(&self) {
        let _ = self.mailbox.send(ExecutorMessage::Shutdown);
    }

    /// True once the actor has stopped accepting messages.
    pub fn is_stopped(&self) -> bool {
        self.mailbox.is_closed()
    }

    /// Wait until the actor has stopped.
    pub async fn stopped(&self) {
        self.mailbox.closed().await
    }

    fn send(&self, msg: ExecutorMessage) -> Result<(), ExecutorError> {
        self.mailbox.send(msg).map_err(|_| self.stopped_error())
    }

    fn stopped_error(&self) -> ExecutorError {
        ExecutorError::Stopped(self.capability.clone())
    }
}

struct ExecutorActor {
    id: ExecutorId,
    capability_id: CapabilityId,
    capability: Arc<dyn Capability>,
    timing: TimingPolicy,
    subscribers: HashMap<ListenerId, CompletionListener>,
    queue: VecDeque<WorkItem>,
    in_flight: Option<(PlanId, WorkItemId)>,
    activation: Option<AbortHandle>,
    done_tx: mpsc::UnboundedSender<(WorkItem, Activation)>,
}

impl ExecutorActor {
    async fn run(
        mut self,
        mut inbox: mpsc::UnboundedReceiver<ExecutorMessage>,
        mut done_rx: mpsc::UnboundedReceiver<(WorkItem, Activation)>,
    ) {
        loop {
            tokio::select! {
                msg = inbox.recv() => match msg {
                    Some(ExecutorMessage::Shutdown) | None => break,
                    Some(msg) => self.handle(msg),
                },
                Some((item, outcome)) = done_rx.recv() => {
                    self.finish(item, outcome);
                    self.start_next();
                }
            }
        }

        // Stop accepting messages before failing outstanding work.
        drop(inbox);
        self.drain();

        tracing::debug!(
            executor = %self.id,
            capability = %self.capability_id,
            "Executor stopped"
        );
    }

    fn handle(&mut self, msg: ExecutorMessage) {
        match msg {
            ExecutorMessage::Run { item, accepted } => {
                tracing::debug!(
                    plan_id = %item.plan_id,
                    item_id = %item.id,
                    capability = %self.capability_id,
                    "Work item accepted"
                );
                self.queue.push_back(item);
                let _ = accepted.send(());
                self.start_next();
            }
            ExecutorMessage::Subscribe { listener, reply } => {
                let added = match self.subscribers.entry(listener.id()) {
                    std::collections::hash_map::Entry::Occupied(_) => false,
                    std::collections::hash_map::Entry::Vacant(slot) => {
                        slot.insert(listener);
                        true
                    }
                };
                let _ = reply.send(added);
            }
            ExecutorMessage::Unsubscribe { listener, reply } => {
                let _ = reply.send(self.subscribers.remove(&listener).is_some());
            }
            ExecutorMessage::Status { reply } => {
                let _ = reply.send(ExecutorStatus {
                    in_flight: self.in_flight,
                    queued: self.queue.len(),
                    subscribers: self.subscribers.len(),
                });
            }
            ExecutorMessage::Shutdown => {}
        }
    }

    fn start_next(&mut self) {
        if self.in_flight.is_some() {
            return;
        }
        let Some(item) = self.queue.pop_front() else {
            return;
        };

        self.in_flight = Some((item.plan_id, item.id));

        let capability = self.capability.clone();
        let timing = self.timing;
        let done = self.done_tx.clone();

        let activation_item = item.clone();
        let task = tokio::spawn(async move { activate(capability, &activation_item, timing).await });
        self.activation = Some(task.abort_handle());

        tokio::spawn(async move {
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(e) => Activation::failure(format!("activation aborted: {}", e)),
            };
            let _ = done.send((item, outcome));
        });
    }

    fn finish(&mut self, item: WorkItem, outcome: Activation) {
        self.in_flight = None;
        self.activation = None;

        if outcome.success {
            tracing::info!(
                plan_id = %item.plan_id,
                item_id = %item.id,
                capability = %self.capability_id,
                "Work item succeeded: {}",
                outcome.message
            );
        } else {
            tracing::warn!(
                plan_id = %item.plan_id,
                item_id = %item.id,
                capability = %self.capability_id,
                "Work item failed: {}",
                outcome.message
            );
        }

        self.notify_all(Completion {
            item_id: item.id,
            plan_id: item.plan_id,
            success: outcome.success,
            message: outcome.message,
        });
    }

    /// Fail the running item and everything queued behind it.
    fn drain(&mut self) {
        if let Some(activation) = self.activation.take() {
            activation.abort();
        }

        let running = self.in_flight.take();
        let queued = self.queue.drain(..).map(|item| (item.plan_id, item.id));
        let abandoned: Vec<(PlanId, WorkItemId)> = running.into_iter().chain(queued).collect();

        for (plan_id, item_id) in abandoned {
            tracing::warn!(
                %plan_id,
                %item_id,
                capability = %self.capability_id,
                "Work item abandoned by stopping executor"
            );
            self.notify_all(Completion {
                item_id,
                plan_id,
                success: false,
                message: "executor stopped".to_string(),
            });
        }
    }

    fn notify_all(&mut self, completion: Completion) {
        self.subscribers.retain(|id, listener| {
            let delivered = listener.notify(completion.clone());
            if !delivered {
                tracing::debug!(listener = %id, "Dropping closed completion listener");
            }
            delivered
        });
    }
}

/// Run the capability for one item, applying the timing policy.
async fn activate(
    capability: Arc<dyn Capability>,
    item: &WorkItem,
    timing: TimingPolicy,
) -> Activation {
    if timing == TimingPolicy::Enforce {
        if let Some(start) = item.earliest_start {
            if let Ok(wait) = (start - Utc::now()).to_std() {
                tokio::time::sleep(wait).await;
            }
        }

        if let Some(deadline) = item.deadline {
            let Ok(remaining) = (deadline - Utc::now()).to_std() else {
                return Activation::failure("deadline passed before activation");
            };
            return match tokio::time::timeout(remaining, capability.activate(&item.params)).await {
                Ok(outcome) => outcome,
                Err(_) => Activation::failure(format!(
                    "deadline exceeded after {}ms",
                    remaining.as_millis()
                )),
            };
        }
    }

    capability.activate(&item.params).await
}

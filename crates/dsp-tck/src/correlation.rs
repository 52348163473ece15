//! Correlation store: tracked exchanges, pending callbacks, and buffering.
//!
//! The store is the only shared mutable state of a run. Each process id owns
//! one [`Slot`] behind its own mutex, so unrelated exchanges never contend.
//! The map lock is held only for lookup, insert and removal, and no lock is
//! held across an `.await`.
//!
//! Lock order: map, then retired set, then slot.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dsp_protocol::{
    IllegalTransition, MessageType, NegotiationSnapshot, NegotiationState, ProcessId,
    ProtocolMessage, Role, SenderRole, transition,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{CorrelationError, CorrelationResult};

// ─────────────────────────────────────────────────────────────────────────────
// Exchange
// ─────────────────────────────────────────────────────────────────────────────

/// One accepted transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub message: ProtocolMessage,
    pub resulting_state: NegotiationState,
    pub sender: SenderRole,
    pub at: DateTime<Utc>,
}

/// A rejected message, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_type: Option<MessageType>,
    pub sender: SenderRole,
    pub error: String,
    pub at: DateTime<Utc>,
}

/// One tracked negotiation, seen from the engine's side.
#[derive(Debug, Clone, Serialize)]
pub struct Exchange {
    process_id: ProcessId,
    role: Role,
    state: NegotiationState,
    #[serde(skip_serializing_if = "Option::is_none")]
    counterparty_pid: Option<ProcessId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    offer_id: Option<String>,
    initiated_by: SenderRole,
    history: Vec<HistoryEntry>,
    violations: Vec<Violation>,
    #[serde(skip)]
    last_received: Option<Value>,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
}

impl Exchange {
    fn new(params: ExchangeParams) -> Self {
        let now = Utc::now();
        Self {
            process_id: params.process_id,
            role: params.role,
            state: NegotiationState::Initial,
            counterparty_pid: None,
            callback_address: None,
            offer_id: params.offer_id,
            initiated_by: params.initiated_by,
            history: Vec::new(),
            violations: Vec::new(),
            last_received: None,
            created_at: now,
            last_activity_at: now,
        }
    }

    #[must_use]
    pub const fn process_id(&self) -> &ProcessId {
        &self.process_id
    }

    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub const fn state(&self) -> NegotiationState {
        self.state
    }

    /// The SUT's process id for this negotiation, once learned.
    #[must_use]
    pub const fn counterparty_pid(&self) -> Option<&ProcessId> {
        self.counterparty_pid.as_ref()
    }

    /// Callback address the SUT announced in its initial message.
    #[must_use]
    pub fn callback_address(&self) -> Option<&str> {
        self.callback_address.as_deref()
    }

    #[must_use]
    pub fn offer_id(&self) -> Option<&str> {
        self.offer_id.as_deref()
    }

    #[must_use]
    pub const fn initiated_by(&self) -> SenderRole {
        self.initiated_by
    }

    /// Append-only transition history.
    #[must_use]
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    #[must_use]
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Last compact document received from the SUT on this exchange.
    #[must_use]
    pub const fn last_received(&self) -> Option<&Value> {
        self.last_received.as_ref()
    }

    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub const fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_activity_at
    }

    /// Pids in consumer/provider order.
    #[must_use]
    pub fn pids(&self) -> (Option<ProcessId>, Option<ProcessId>) {
        let own = Some(self.process_id.clone());
        let other = self.counterparty_pid.clone();
        match self.role {
            Role::Consumer => (own, other),
            Role::Provider => (other, own),
        }
    }

    /// `ContractNegotiation` view of this exchange.
    #[must_use]
    pub fn negotiation_snapshot(&self) -> NegotiationSnapshot {
        let (consumer_pid, provider_pid) = self.pids();
        NegotiationSnapshot {
            consumer_pid,
            provider_pid,
            state: self.state,
        }
    }

    /// Validate and apply one message. History is only appended on success.
    fn apply(
        &mut self,
        message: &ProtocolMessage,
        sender: SenderRole,
    ) -> Result<NegotiationState, IllegalTransition> {
        let next = transition(
            self.role,
            self.state,
            message.message_type,
            sender.direction(),
        )?;
        let now = Utc::now();
        self.state = next;
        self.last_activity_at = now;
        self.history.push(HistoryEntry {
            message: message.clone(),
            resulting_state: next,
            sender,
            at: now,
        });
        if sender == SenderRole::Sut {
            self.learn_from(message);
        }
        Ok(next)
    }

    fn learn_from(&mut self, message: &ProtocolMessage) {
        if self.counterparty_pid.is_none() {
            self.counterparty_pid = message.process_id(self.role.counterparty()).cloned();
        }
        if let Some(address) = message.callback_address() {
            self.callback_address = Some(address.to_string());
        }
        if self.offer_id.is_none() {
            self.offer_id = message.offer_id().map(str::to_string);
        }
        self.last_received = dsp_protocol::to_document(message).ok();
    }

    fn push_violation(&mut self, message_type: Option<MessageType>, sender: SenderRole, error: String) {
        let now = Utc::now();
        self.last_activity_at = now;
        self.violations.push(Violation {
            message_type,
            sender,
            error,
            at: now,
        });
    }
}

/// Parameters for beginning an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeParams {
    pub process_id: ProcessId,
    pub role: Role,
    /// Who is expected to send the first message.
    pub initiated_by: SenderRole,
    /// Offer the exchange is about, when known up front.
    pub offer_id: Option<String>,
    /// Scenario that owns the exchange. Owned exchanges are never reaped;
    /// the scenario ends them itself.
    pub owner: Option<String>,
}

impl ExchangeParams {
    /// An exchange the engine initiates.
    #[must_use]
    pub fn new(process_id: impl Into<ProcessId>, role: Role) -> Self {
        Self {
            process_id: process_id.into(),
            role,
            initiated_by: SenderRole::Tck,
            offer_id: None,
            owner: None,
        }
    }

    #[must_use]
    pub const fn initiated_by(mut self, sender: SenderRole) -> Self {
        self.initiated_by = sender;
        self
    }

    #[must_use]
    pub fn with_offer_id(mut self, offer_id: impl Into<String>) -> Self {
        self.offer_id = Some(offer_id.into());
        self
    }

    #[must_use]
    pub fn owned_by(mut self, scenario: impl Into<String>) -> Self {
        self.owner = Some(scenario.into());
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Slots
// ─────────────────────────────────────────────────────────────────────────────

struct Pending {
    id: u64,
    expected: Vec<MessageType>,
    tx: oneshot::Sender<CorrelationResult<ProtocolMessage>>,
}

struct Buffered {
    message: ProtocolMessage,
    arrived: Instant,
}

struct Slot {
    exchange: Exchange,
    seq: u64,
    owned: bool,
    claimed: bool,
    touched: Instant,
    pending: Option<Pending>,
    buffered: Option<Buffered>,
    fault: Option<CorrelationError>,
}

impl Slot {
    fn fail_pending(&mut self, err: CorrelationError) -> bool {
        match self.pending.take() {
            Some(pending) => {
                let _ = pending.tx.send(Err(err));
                true
            }
            None => false,
        }
    }
}

/// Result of a delivery that was accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// State after the inbound message (and any immediate reply).
    pub state: NegotiationState,
    /// Immediate reply recorded as outbound, to be put on the wire by the caller.
    pub reply: Option<ProtocolMessage>,
    /// Whether a waiting AWAIT step consumed the message.
    pub consumed: bool,
}

/// How an inbound initial message was correlated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitialResolution {
    /// Same sender pid seen before: idempotent redelivery.
    Redelivered(ProcessId),
    /// A declared SUT-initiated exchange was claimed.
    Claimed(ProcessId),
}

impl InitialResolution {
    #[must_use]
    pub const fn process_id(&self) -> &ProcessId {
        match self {
            Self::Redelivered(pid) | Self::Claimed(pid) => pid,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

/// Run-wide registry of exchanges.
#[derive(Default)]
pub struct CorrelationStore {
    exchanges: RwLock<HashMap<ProcessId, Arc<Mutex<Slot>>>>,
    retired: Mutex<HashSet<ProcessId>>,
    next_seq: AtomicU64,
    next_waiter: AtomicU64,
}

impl std::fmt::Debug for CorrelationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationStore")
            .field("exchanges", &self.exchanges.read().len())
            .field("retired", &self.retired.lock().len())
            .finish()
    }
}

impl CorrelationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, pid: &ProcessId) -> CorrelationResult<Arc<Mutex<Slot>>> {
        self.exchanges
            .read()
            .get(pid)
            .cloned()
            .ok_or_else(|| CorrelationError::UnknownProcess(pid.clone()))
    }

    /// Begin tracking an exchange.
    ///
    /// # Errors
    /// [`CorrelationError::DuplicateProcess`] if the pid is tracked or was
    /// tracked earlier in this run.
    pub fn begin(&self, params: ExchangeParams) -> CorrelationResult<Exchange> {
        let mut map = self.exchanges.write();
        let retired = self.retired.lock();
        if map.contains_key(&params.process_id) || retired.contains(&params.process_id) {
            return Err(CorrelationError::DuplicateProcess(params.process_id));
        }
        drop(retired);
        let owned = params.owner.is_some();
        let exchange = Exchange::new(params);
        debug!(
            process_id = %exchange.process_id,
            role = %exchange.role,
            initiated_by = ?exchange.initiated_by,
            "exchange begun"
        );
        let slot = Slot {
            exchange: exchange.clone(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            owned,
            claimed: false,
            touched: Instant::now(),
            pending: None,
            buffered: None,
            fault: None,
        };
        map.insert(exchange.process_id.clone(), Arc::new(Mutex::new(slot)));
        Ok(exchange)
    }

    /// Begin tracking an engine-initiated exchange.
    ///
    /// # Errors
    /// See [`Self::begin`].
    pub fn begin_exchange(&self, pid: impl Into<ProcessId>, role: Role) -> CorrelationResult<Exchange> {
        self.begin(ExchangeParams::new(pid, role))
    }

    /// Validate and record one transition.
    ///
    /// Illegal messages from the SUT are also kept as violations.
    ///
    /// # Errors
    /// [`CorrelationError::UnknownProcess`] or
    /// [`CorrelationError::IllegalTransition`]; the state is unchanged on error.
    pub fn record_transition(
        &self,
        pid: &ProcessId,
        message: &ProtocolMessage,
        sender: SenderRole,
    ) -> CorrelationResult<NegotiationState> {
        let slot = self.slot(pid)?;
        let mut slot = slot.lock();
        slot.touched = Instant::now();
        match slot.exchange.apply(message, sender) {
            Ok(state) => {
                debug!(
                    process_id = %pid,
                    message_type = %message.message_type,
                    sender = ?sender,
                    state = %state,
                    "transition recorded"
                );
                Ok(state)
            }
            Err(illegal) => {
                if sender == SenderRole::Sut {
                    slot.exchange.push_violation(
                        Some(message.message_type),
                        sender,
                        illegal.to_string(),
                    );
                }
                Err(illegal.into())
            }
        }
    }

    /// Deliver an inbound SUT message.
    ///
    /// # Errors
    /// Same as [`Self::deliver_with_reply`].
    pub fn deliver_callback(
        &self,
        pid: &ProcessId,
        message: ProtocolMessage,
    ) -> CorrelationResult<NegotiationState> {
        self.deliver_with_reply(pid, message, |_| None)
            .map(|delivery| delivery.state)
    }

    /// Deliver an inbound SUT message and atomically record an immediate reply.
    ///
    /// The inbound transition is recorded first. `reply` sees the updated
    /// exchange; a reply it returns is recorded as outbound under the same
    /// lock, so a competing delivery cannot interleave between the two.
    /// A legal message then fulfils a matching pending callback or is
    /// buffered, superseding any older buffered message.
    ///
    /// An illegal message is kept as a violation. It fails the pending
    /// callback if one exists, otherwise it is kept as a fault that the next
    /// [`Self::await_callback`] surfaces.
    ///
    /// # Errors
    /// [`CorrelationError::UnknownProcess`] or
    /// [`CorrelationError::IllegalTransition`].
    pub fn deliver_with_reply<F>(
        &self,
        pid: &ProcessId,
        message: ProtocolMessage,
        reply: F,
    ) -> CorrelationResult<Delivery>
    where
        F: FnOnce(&Exchange) -> Option<ProtocolMessage>,
    {
        let slot = self.slot(pid)?;
        let mut slot = slot.lock();
        slot.touched = Instant::now();
        let message_type = message.message_type;

        let mut state = match slot.exchange.apply(&message, SenderRole::Sut) {
            Ok(state) => state,
            Err(illegal) => {
                warn!(
                    process_id = %pid,
                    message_type = %message_type,
                    state = %slot.exchange.state,
                    "illegal inbound message"
                );
                slot.exchange
                    .push_violation(Some(message_type), SenderRole::Sut, illegal.to_string());
                let err = CorrelationError::IllegalTransition(illegal);
                if !slot.fail_pending(err.clone()) && slot.fault.is_none() {
                    slot.fault = Some(err.clone());
                }
                return Err(err);
            }
        };

        let mut reply_message = reply(&slot.exchange);
        if let Some(outbound) = &reply_message {
            match slot.exchange.apply(outbound, SenderRole::Tck) {
                Ok(next) => state = next,
                Err(illegal) => {
                    warn!(process_id = %pid, error = %illegal, "scripted reply is not legal; dropped");
                    reply_message = None;
                }
            }
        }

        let consumed = match slot.pending.take() {
            Some(pending) if pending.expected.contains(&message_type) => {
                match pending.tx.send(Ok(message)) {
                    Ok(()) => true,
                    Err(Ok(unclaimed)) => {
                        slot.buffered = Some(Buffered {
                            message: unclaimed,
                            arrived: Instant::now(),
                        });
                        false
                    }
                    Err(Err(_)) => false,
                }
            }
            other => {
                slot.pending = other;
                if let Some(previous) = &slot.buffered {
                    debug!(
                        process_id = %pid,
                        superseded = %previous.message.message_type,
                        "buffered message superseded"
                    );
                }
                slot.buffered = Some(Buffered {
                    message,
                    arrived: Instant::now(),
                });
                false
            }
        };

        debug!(
            process_id = %pid,
            message_type = %message_type,
            state = %state,
            consumed,
            "callback delivered"
        );
        Ok(Delivery {
            state,
            reply: reply_message,
            consumed,
        })
    }

    /// Wait for an inbound message of one of `expected` types.
    ///
    /// A pending fault is surfaced first. A buffered message matches when its
    /// type is expected and it arrived no longer than `deadline` ago.
    /// Otherwise a single-fulfilment slot is registered, replacing (and
    /// cancelling) any earlier registration for the same process.
    ///
    /// # Errors
    /// [`CorrelationError::CallbackTimeout`] when nothing matching arrives in
    /// time, the stored or delivered fault, or
    /// [`CorrelationError::UnknownProcess`].
    pub async fn await_callback(
        &self,
        pid: &ProcessId,
        expected: &[MessageType],
        deadline: Duration,
    ) -> CorrelationResult<ProtocolMessage> {
        let slot = self.slot(pid)?;
        let waiter = self.next_waiter.fetch_add(1, Ordering::Relaxed);
        let mut rx = {
            let mut guard = slot.lock();
            if let Some(fault) = guard.fault.take() {
                return Err(fault);
            }
            if let Some(buffered) = guard.buffered.take() {
                if expected.contains(&buffered.message.message_type)
                    && buffered.arrived.elapsed() <= deadline
                {
                    return Ok(buffered.message);
                }
                guard.buffered = Some(buffered);
            }
            guard.fail_pending(CorrelationError::Cancelled(pid.clone()));
            let (tx, rx) = oneshot::channel();
            guard.pending = Some(Pending {
                id: waiter,
                expected: expected.to_vec(),
                tx,
            });
            rx
        };

        match tokio::time::timeout(deadline, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CorrelationError::Cancelled(pid.clone())),
            Err(_) => {
                let mut guard = slot.lock();
                if guard.pending.as_ref().is_some_and(|p| p.id == waiter) {
                    guard.pending = None;
                } else if let Ok(result) = rx.try_recv() {
                    // Fulfilled between the timer firing and taking the lock.
                    return result;
                }
                Err(CorrelationError::CallbackTimeout {
                    process_id: pid.clone(),
                    expected: expected.to_vec(),
                    waited: deadline,
                    buffered: guard.buffered.as_ref().map(|b| b.message.message_type),
                })
            }
        }
    }

    /// Learn the SUT's pid for an exchange. An already known pid is kept.
    ///
    /// # Errors
    /// [`CorrelationError::UnknownProcess`].
    pub fn bind_counterparty(&self, pid: &ProcessId, counterparty: ProcessId) -> CorrelationResult<()> {
        let slot = self.slot(pid)?;
        let mut slot = slot.lock();
        if slot.exchange.counterparty_pid.is_none() {
            debug!(process_id = %pid, counterparty_pid = %counterparty, "counterparty bound");
            slot.exchange.counterparty_pid = Some(counterparty);
        }
        Ok(())
    }

    /// Keep the last document the SUT returned (acknowledgements, queries).
    ///
    /// # Errors
    /// [`CorrelationError::UnknownProcess`].
    pub fn set_last_received(&self, pid: &ProcessId, document: Value) -> CorrelationResult<()> {
        let slot = self.slot(pid)?;
        slot.lock().exchange.last_received = Some(document);
        Ok(())
    }

    /// Correlate an inbound initial message sent by the SUT.
    ///
    /// Returns the exchange that already records the sender's pid, or claims
    /// the oldest unclaimed SUT-initiated exchange of `role` still in
    /// `INITIAL` (preferring a matching offer id). `None` means the caller
    /// should begin a fresh exchange.
    pub fn claim_initial(&self, role: Role, message: &ProtocolMessage) -> Option<InitialResolution> {
        let sender_pid = message.process_id(role.counterparty());
        let offer_id = message.offer_id();

        let map = self.exchanges.read();
        let mut candidates = Vec::new();
        for (pid, slot) in map.iter() {
            let guard = slot.lock();
            let exchange = &guard.exchange;
            if exchange.role != role {
                continue;
            }
            if sender_pid.is_some() && exchange.counterparty_pid.as_ref() == sender_pid {
                return Some(InitialResolution::Redelivered(pid.clone()));
            }
            if !guard.claimed
                && exchange.initiated_by == SenderRole::Sut
                && exchange.state == NegotiationState::Initial
            {
                let offer_match = offer_id.is_some() && exchange.offer_id.as_deref() == offer_id;
                candidates.push((!offer_match, guard.seq, pid.clone(), Arc::clone(slot)));
            }
        }
        candidates.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        for (_, _, pid, slot) in candidates {
            let mut guard = slot.lock();
            if guard.claimed || guard.exchange.state != NegotiationState::Initial {
                continue;
            }
            guard.claimed = true;
            if guard.exchange.counterparty_pid.is_none() {
                guard.exchange.counterparty_pid = sender_pid.cloned();
            }
            debug!(process_id = %pid, "declared exchange claimed by initial message");
            return Some(InitialResolution::Claimed(pid));
        }
        None
    }

    /// Keep a violation that did not go through the state machine.
    ///
    /// # Errors
    /// [`CorrelationError::UnknownProcess`].
    pub fn record_violation(
        &self,
        pid: &ProcessId,
        message_type: Option<MessageType>,
        sender: SenderRole,
        error: impl Into<String>,
    ) -> CorrelationResult<()> {
        let slot = self.slot(pid)?;
        slot.lock()
            .exchange
            .push_violation(message_type, sender, error.into());
        Ok(())
    }

    /// Report an asynchronous failure on an exchange.
    ///
    /// Fails the pending callback if one exists, otherwise keeps the first
    /// fault until [`Self::take_fault`] or the next await.
    ///
    /// # Errors
    /// [`CorrelationError::UnknownProcess`].
    pub fn record_fault(&self, pid: &ProcessId, fault: CorrelationError) -> CorrelationResult<()> {
        let slot = self.slot(pid)?;
        let mut slot = slot.lock();
        warn!(process_id = %pid, error = %fault, "exchange fault");
        if !slot.fail_pending(fault.clone()) && slot.fault.is_none() {
            slot.fault = Some(fault);
        }
        Ok(())
    }

    /// Take a fault nobody awaited.
    #[must_use]
    pub fn take_fault(&self, pid: &ProcessId) -> Option<CorrelationError> {
        self.slot(pid).ok().and_then(|slot| slot.lock().fault.take())
    }

    /// Copy of the exchange as it is now.
    ///
    /// # Errors
    /// [`CorrelationError::UnknownProcess`].
    pub fn snapshot(&self, pid: &ProcessId) -> CorrelationResult<Exchange> {
        Ok(self.slot(pid)?.lock().exchange.clone())
    }

    #[must_use]
    pub fn contains(&self, pid: &ProcessId) -> bool {
        self.exchanges.read().contains_key(pid)
    }

    /// Cancel a registered pending callback. Returns whether one existed.
    pub fn cancel_pending(&self, pid: &ProcessId) -> bool {
        self.slot(pid).is_ok_and(|slot| {
            slot.lock()
                .fail_pending(CorrelationError::Cancelled(pid.clone()))
        })
    }

    /// Stop tracking an exchange. The pid stays reserved for the run.
    pub fn end_exchange(&self, pid: &ProcessId) -> Option<Exchange> {
        let mut map = self.exchanges.write();
        let slot = map.remove(pid)?;
        self.retired.lock().insert(pid.clone());
        drop(map);
        let mut slot = slot.lock();
        slot.fail_pending(CorrelationError::Cancelled(pid.clone()));
        debug!(process_id = %pid, state = %slot.exchange.state, "exchange ended");
        Some(slot.exchange.clone())
    }

    /// Remove terminal exchanges idle for at least `idle`. Exchanges owned by
    /// a scenario stay until the scenario ends them.
    pub fn reap_terminal(&self, idle: Duration) -> Vec<Exchange> {
        let mut map = self.exchanges.write();
        let expired: Vec<ProcessId> = map
            .iter()
            .filter(|(_, slot)| {
                let slot = slot.lock();
                !slot.owned && slot.exchange.state.is_terminal() && slot.touched.elapsed() >= idle
            })
            .map(|(pid, _)| pid.clone())
            .collect();
        let mut retired = self.retired.lock();
        let mut reaped = Vec::with_capacity(expired.len());
        for pid in expired {
            if let Some(slot) = map.remove(&pid) {
                retired.insert(pid);
                reaped.push(slot.lock().exchange.clone());
            }
        }
        if !reaped.is_empty() {
            debug!(count = reaped.len(), "terminal exchanges reaped");
        }
        reaped
    }

    /// Tracked pids in creation order.
    #[must_use]
    pub fn process_ids(&self) -> Vec<ProcessId> {
        let map = self.exchanges.read();
        let mut ids: Vec<(u64, ProcessId)> = map
            .iter()
            .map(|(pid, slot)| (slot.lock().seq, pid.clone()))
            .collect();
        ids.sort_unstable_by_key(|(seq, _)| *seq);
        ids.into_iter().map(|(_, pid)| pid).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.exchanges.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exchanges.read().is_empty()
    }
}

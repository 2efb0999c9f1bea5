//! Priority message bus.
//!
//! Every registered recipient owns ten priority lanes. `send` validates an
//! envelope, queues it for its recipient, records it in the history ring and
//! delivers it inline: callbacks run first, then the recipient's worker (if
//! any) consumes the envelope. Requests answered by a worker produce a
//! response (or error) envelope that is queued back to the sender, where the
//! caller collects it with [`MessageBus::take_reply`].
//!
//! Recipients registered without a worker are mailboxes: their envelopes stay
//! queued until [`MessageBus::next`] or [`MessageBus::take_reply`] pops them.

use crate::types::{BusConfig, BusStats, Callback, HistoryFilter, SendOutcome};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use switchboard_common::{
    now_millis, Envelope, EnvelopeStatus, MessageType, Priority, SwitchboardError, Worker,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

type Lanes = [VecDeque<Envelope>; Priority::LANES];

struct Registration {
    worker: Option<Arc<dyn Worker>>,
    callbacks: Vec<Callback>,
    /// Serializes deliveries to this recipient.
    lane: Arc<tokio::sync::Mutex<()>>,
}

#[derive(Default)]
struct Counters {
    sent: u64,
    processed: u64,
    errors: u64,
    rejected: u64,
    timed_out: u64,
    by_type: BTreeMap<String, u64>,
    by_agent: BTreeMap<String, u64>,
    processing_total: Duration,
    processing_samples: u64,
}

#[derive(Default)]
struct BusState {
    registrations: HashMap<String, Registration>,
    queues: HashMap<String, Lanes>,
    history: VecDeque<Envelope>,
    /// Envelope id -> start of processing
    in_flight: HashMap<String, Instant>,
    counters: Counters,
}

impl BusState {
    fn record_status(&mut self, id: &str, next: EnvelopeStatus) {
        let Some(entry) = self.history.iter_mut().rev().find(|e| e.id == id) else {
            return;
        };
        if let Err(e) = entry.transition(next) {
            debug!(envelope = %id, error = %e, "History status not updated");
        }
    }

    fn pop_queued(&mut self, recipient: &str, id: &str) -> Option<Envelope> {
        let lanes = self.queues.get_mut(recipient)?;
        for lane in lanes.iter_mut() {
            if let Some(pos) = lane.iter().position(|e| e.id == id) {
                return lane.remove(pos);
            }
        }
        None
    }

    /// Mark a popped mailbox envelope as consumed.
    fn consume(&mut self, envelope: &Envelope) {
        self.record_status(&envelope.id, EnvelopeStatus::Processing);
        self.record_status(&envelope.id, EnvelopeStatus::Done);
        self.counters.processed += 1;
    }
}

pub struct MessageBus {
    config: BusConfig,
    state: Mutex<BusState>,
}

impl MessageBus {
    pub fn new(config: BusConfig) -> Self {
        info!(history_capacity = config.history_capacity, "Initializing message bus");
        Self {
            config: BusConfig {
                history_capacity: config.history_capacity.max(1),
            },
            state: Mutex::new(BusState::default()),
        }
    }

    pub fn with_default_config() -> Self {
        Self::new(BusConfig::default())
    }

    /// Register `name`, replacing any previous registration under that name.
    pub fn register(
        &self,
        name: impl Into<String>,
        worker: Option<Arc<dyn Worker>>,
        callback: Option<Callback>,
    ) {
        let name = name.into();
        info!(agent = %name, has_worker = worker.is_some(), "Registering bus recipient");

        let mut state = self.state.lock();
        state.registrations.insert(
            name.clone(),
            Registration {
                worker,
                callbacks: callback.into_iter().collect(),
                lane: Arc::new(tokio::sync::Mutex::new(())),
            },
        );
        state.queues.entry(name).or_default();
    }

    /// Remove `name` and drop anything still queued for it.
    pub fn deregister(&self, name: &str) -> bool {
        let mut state = self.state.lock();
        let removed = state.registrations.remove(name).is_some();
        if let Some(lanes) = state.queues.remove(name) {
            let dropped: usize = lanes.iter().map(VecDeque::len).sum();
            if dropped > 0 {
                warn!(agent = %name, dropped, "Deregistered recipient with queued envelopes");
            }
        }
        if removed {
            info!(agent = %name, "Deregistered bus recipient");
        }
        removed
    }

    pub fn add_callback(&self, name: &str, callback: Callback) -> bool {
        match self.state.lock().registrations.get_mut(name) {
            Some(registration) => {
                registration.callbacks.push(callback);
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.state.lock().registrations.contains_key(name)
    }

    pub fn registered(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().registrations.keys().cloned().collect();
        names.sort();
        names
    }

    /// Validate, queue and deliver one envelope.
    ///
    /// Invalid envelopes and unknown recipients come back as a rejected
    /// outcome rather than an error.
    pub async fn send(&self, envelope: Envelope) -> SendOutcome {
        let id = envelope.id.clone();
        if let Err(e) = self.accept(&envelope) {
            warn!(envelope = %id, recipient = %envelope.recipient, error = %e, "Envelope rejected");
            return SendOutcome::rejected(id, e);
        }
        self.deliver(envelope).await
    }

    /// Send `payload` to every registered recipient except the sender and
    /// `exclude`.
    pub async fn broadcast(
        &self,
        sender: &str,
        payload: &str,
        exclude: &[&str],
    ) -> Vec<(String, SendOutcome)> {
        let recipients: Vec<String> = self
            .registered()
            .into_iter()
            .filter(|name| name != sender && !exclude.contains(&name.as_str()))
            .collect();

        debug!(sender = %sender, recipients = recipients.len(), "Broadcasting");

        let mut outcomes = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let envelope = Envelope::new(MessageType::Broadcast, sender, &recipient, payload);
            let outcome = self.send(envelope).await;
            outcomes.push((recipient, outcome));
        }
        outcomes
    }

    /// Pop the highest-priority envelope queued for `recipient`.
    pub fn next(&self, recipient: &str) -> Option<Envelope> {
        let mut state = self.state.lock();
        let envelope = state
            .queues
            .get_mut(recipient)?
            .iter_mut()
            .find_map(VecDeque::pop_front)?;
        state.consume(&envelope);
        Some(envelope)
    }

    /// Remove the queued envelope for `recipient` that answers `correlation_id`.
    pub fn take_reply(&self, recipient: &str, correlation_id: &str) -> Option<Envelope> {
        let mut state = self.state.lock();
        let lanes = state.queues.get_mut(recipient)?;
        let envelope = lanes.iter_mut().find_map(|lane| {
            let pos = lane
                .iter()
                .position(|e| e.correlation_id.as_deref() == Some(correlation_id))?;
            lane.remove(pos)
        })?;
        state.consume(&envelope);
        Some(envelope)
    }

    pub fn queue_depth(&self, recipient: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(recipient)
            .map_or(0, |lanes| lanes.iter().map(VecDeque::len).sum())
    }

    /// Drop queued envelopes past their timeout and mark them timed out.
    /// Nothing is resubmitted.
    pub fn expire_timed_out(&self) -> Vec<Envelope> {
        let now = now_millis();
        let mut state = self.state.lock();

        let mut expired = Vec::new();
        for lanes in state.queues.values_mut() {
            for lane in lanes.iter_mut() {
                let (stale, keep): (VecDeque<Envelope>, VecDeque<Envelope>) =
                    lane.drain(..).partition(|e| e.is_expired_at(now));
                *lane = keep;
                expired.extend(stale);
            }
        }

        for envelope in &mut expired {
            let timeout = SwitchboardError::TimeoutExceeded(format!(
                "envelope {} pending longer than {}ms",
                envelope.id, envelope.timeout_ms
            ));
            warn!(
                envelope = %envelope.id,
                recipient = %envelope.recipient,
                error = %timeout,
                "Envelope timed out"
            );
            state.record_status(&envelope.id, EnvelopeStatus::TimedOut);
            envelope.status = EnvelopeStatus::TimedOut;
        }
        state.counters.timed_out += expired.len() as u64;
        expired
    }

    /// Give up on an envelope the caller stopped waiting for: drop it from
    /// its queue and the in-flight registry and record it as timed out.
    pub fn mark_timed_out(&self, recipient: &str, id: &str) -> bool {
        let mut state = self.state.lock();
        let queued = state.pop_queued(recipient, id).is_some();
        let in_flight = state.in_flight.remove(id).is_some();
        if !queued && !in_flight {
            return false;
        }
        state.record_status(id, EnvelopeStatus::TimedOut);
        state.counters.timed_out += 1;
        warn!(envelope = %id, recipient = %recipient, "Envelope abandoned by caller");
        true
    }

    /// Recorded envelopes matching `filter`, oldest first.
    pub fn history(&self, filter: &HistoryFilter) -> Vec<Envelope> {
        let state = self.state.lock();
        let mut matched: Vec<Envelope> = state
            .history
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            let skip = matched.len().saturating_sub(limit);
            matched.drain(..skip);
        }
        matched
    }

    pub fn stats(&self) -> BusStats {
        let state = self.state.lock();
        let counters = &state.counters;
        BusStats {
            sent: counters.sent,
            processed: counters.processed,
            errors: counters.errors,
            rejected: counters.rejected,
            timed_out: counters.timed_out,
            by_type: counters.by_type.clone(),
            by_agent: counters.by_agent.clone(),
            avg_processing_ms: if counters.processing_samples == 0 {
                0.0
            } else {
                counters.processing_total.as_secs_f64() * 1000.0
                    / counters.processing_samples as f64
            },
            queue_depth: state
                .queues
                .values()
                .flat_map(|lanes| lanes.iter())
                .map(VecDeque::len)
                .sum(),
            in_flight: state.in_flight.len(),
            history_size: state.history.len(),
            registered_agents: state.registrations.len(),
        }
    }

    /// Clear queues, history and counters. Registrations are kept.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        for lanes in state.queues.values_mut() {
            lanes.iter_mut().for_each(VecDeque::clear);
        }
        state.history.clear();
        state.in_flight.clear();
        state.counters = Counters::default();
        info!("Message bus reset");
    }

    /// Validate and queue an envelope. Does not deliver it.
    fn accept(&self, envelope: &Envelope) -> switchboard_common::Result<()> {
        let mut state = self.state.lock();

        let checked = envelope.validate().and_then(|()| {
            if state.registrations.contains_key(&envelope.recipient) {
                Ok(())
            } else {
                Err(SwitchboardError::Validation(format!(
                    "unknown recipient '{}'",
                    envelope.recipient
                )))
            }
        });
        if let Err(e) = checked {
            state.counters.rejected += 1;
            return Err(e);
        }

        let counters = &mut state.counters;
        counters.sent += 1;
        *counters
            .by_type
            .entry(envelope.message_type.as_str().to_string())
            .or_default() += 1;
        *counters.by_agent.entry(envelope.sender.clone()).or_default() += 1;

        state
            .queues
            .entry(envelope.recipient.clone())
            .or_default()[envelope.priority.lane()]
        .push_back(envelope.clone());

        state.history.push_back(envelope.clone());
        while state.history.len() > self.config.history_capacity {
            state.history.pop_front();
        }

        debug!(
            envelope = %envelope.id,
            kind = envelope.message_type.as_str(),
            sender = %envelope.sender,
            recipient = %envelope.recipient,
            priority = envelope.priority.value(),
            "Envelope queued"
        );
        Ok(())
    }

    /// Run callbacks, then hand the envelope to the recipient's worker.
    async fn deliver(&self, envelope: Envelope) -> SendOutcome {
        let id = envelope.id.clone();
        let recipient = envelope.recipient.clone();

        let (callbacks, worker, lane) = {
            let state = self.state.lock();
            match state.registrations.get(&recipient) {
                Some(r) => (r.callbacks.clone(), r.worker.clone(), r.lane.clone()),
                None => return SendOutcome::accepted(id, EnvelopeStatus::Pending),
            }
        };

        for callback in &callbacks {
            if let Err(e) = callback(&envelope) {
                warn!(agent = %recipient, envelope = %id, error = %e, "Bus callback failed");
            }
        }

        // Replies are always collected from the mailbox.
        let consumes = matches!(
            envelope.message_type,
            MessageType::Request | MessageType::Notification | MessageType::Broadcast
        );
        let Some(worker) = worker.filter(|_| consumes) else {
            return SendOutcome::accepted(id, EnvelopeStatus::Pending);
        };

        let _lane = lane.lock().await;

        let started = Instant::now();
        {
            let mut state = self.state.lock();
            if state.pop_queued(&recipient, &id).is_none() {
                // Expired or drained while waiting for the lane.
                return SendOutcome::accepted(id, EnvelopeStatus::TimedOut);
            }
            state.record_status(&id, EnvelopeStatus::Processing);
            state.in_flight.insert(id.clone(), started);
        }

        debug!(agent = %recipient, envelope = %id, "Delivering to worker");
        let result = worker.process(&envelope.payload, &envelope.context).await;
        let elapsed = started.elapsed();

        let (status, reply, error) = match result {
            Ok(text) => {
                let reply = (envelope.message_type == MessageType::Request)
                    .then(|| Envelope::reply_to(&envelope, text));
                (EnvelopeStatus::Done, reply, None)
            }
            Err(e) => {
                warn!(agent = %recipient, envelope = %id, error = %e, "Worker failed");
                let reply = (envelope.message_type == MessageType::Request)
                    .then(|| Envelope::error_reply(&envelope, e.to_string()));
                (EnvelopeStatus::Error, reply, Some(e.to_string()))
            }
        };

        {
            let mut state = self.state.lock();
            state.in_flight.remove(&id);
            state.record_status(&id, status);
            let counters = &mut state.counters;
            counters.processing_total += elapsed;
            counters.processing_samples += 1;
            if status == EnvelopeStatus::Done {
                counters.processed += 1;
            } else {
                counters.errors += 1;
            }
        }

        if let Some(reply) = &reply {
            self.route_reply(reply);
        }

        SendOutcome {
            accepted: true,
            message_id: id,
            status,
            response: reply,
            error,
        }
    }

    /// Queue a worker's reply for the original sender and notify its
    /// callbacks. Replies never reach a worker.
    fn route_reply(&self, reply: &Envelope) {
        if !self.is_registered(&reply.recipient) {
            debug!(
                envelope = %reply.id,
                recipient = %reply.recipient,
                "Reply sender not registered, returning reply inline only"
            );
            return;
        }
        if let Err(e) = self.accept(reply) {
            warn!(envelope = %reply.id, error = %e, "Reply rejected");
            return;
        }
        let callbacks = self
            .state
            .lock()
            .registrations
            .get(&reply.recipient)
            .map(|r| r.callbacks.clone())
            .unwrap_or_default();
        for callback in &callbacks {
            if let Err(e) = callback(reply) {
                warn!(
                    agent = %reply.recipient,
                    envelope = %reply.id,
                    error = %e,
                    "Bus callback failed"
                );
            }
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::with_default_config()
    }
}

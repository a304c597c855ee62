//! Analytics sink integration
//!
//! The ledger reports blocks, transactions, validator registrations and fee
//! changes to an external analytics service and asks it for advisory numbers.
//! Notifications are queued and delivered by a background worker with bounded
//! retries; nothing the sink does can fail or block a ledger operation.

use crate::blockchain::Block;
use crate::config::AnalyticsConfig;
use crate::economics::Amount;
use crate::transaction::Transaction;
use crossbeam_channel::{bounded, Sender, TrySendError};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

const RETRY_BACKOFF: Duration = Duration::from_millis(50);
const MAX_BACKOFF_DOUBLINGS: u32 = 6;
/// Analysed items whose individual cost is remembered.
pub const COST_HISTORY: usize = 1_024;

#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    #[error("analytics request failed: {0}")]
    Request(String),
    #[error("analytics endpoint returned status {0}")]
    Status(u16),
    #[error("malformed analytics response: {0}")]
    Response(String),
}

/// Outbound interface to the analytics service.
pub trait AnalyticsSink: Send + Sync {
    fn notify_block_created(&self, block: &Block) -> Result<(), AnalyticsError>;
    fn notify_transaction(&self, tx: &Transaction) -> Result<(), AnalyticsError>;
    fn notify_validator_registered(
        &self,
        address: &str,
        stake: Amount,
    ) -> Result<(), AnalyticsError>;
    fn notify_fee_adjustment(
        &self,
        base_fee: Amount,
        priority_rate: Amount,
    ) -> Result<(), AnalyticsError>;
    fn predict_staking_bonus(
        &self,
        amount: Amount,
        duration_days: u32,
    ) -> Result<f64, AnalyticsError>;
    fn predict_network_yield(&self) -> Result<f64, AnalyticsError>;
    fn optimization_suggestions(&self) -> Result<Vec<String>, AnalyticsError>;
}

/// Sink that accepts everything and predicts nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl AnalyticsSink for NoopSink {
    fn notify_block_created(&self, _block: &Block) -> Result<(), AnalyticsError> {
        Ok(())
    }

    fn notify_transaction(&self, _tx: &Transaction) -> Result<(), AnalyticsError> {
        Ok(())
    }

    fn notify_validator_registered(
        &self,
        _address: &str,
        _stake: Amount,
    ) -> Result<(), AnalyticsError> {
        Ok(())
    }

    fn notify_fee_adjustment(
        &self,
        _base_fee: Amount,
        _priority_rate: Amount,
    ) -> Result<(), AnalyticsError> {
        Ok(())
    }

    fn predict_staking_bonus(
        &self,
        _amount: Amount,
        _duration_days: u32,
    ) -> Result<f64, AnalyticsError> {
        Ok(0.0)
    }

    fn predict_network_yield(&self) -> Result<f64, AnalyticsError> {
        Ok(0.0)
    }

    fn optimization_suggestions(&self) -> Result<Vec<String>, AnalyticsError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone)]
pub enum AnalyticsEvent {
    BlockCreated(Block),
    Transaction(Transaction),
    ValidatorRegistered { address: String, stake: Amount },
    FeeAdjustment { base_fee: Amount, priority_rate: Amount },
}

impl AnalyticsEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AnalyticsEvent::BlockCreated(_) => "block_created",
            AnalyticsEvent::Transaction(_) => "transaction",
            AnalyticsEvent::ValidatorRegistered { .. } => "validator_registered",
            AnalyticsEvent::FeeAdjustment { .. } => "fee_adjustment",
        }
    }

    fn deliver(&self, sink: &dyn AnalyticsSink) -> Result<(), AnalyticsError> {
        match self {
            AnalyticsEvent::BlockCreated(block) => sink.notify_block_created(block),
            AnalyticsEvent::Transaction(tx) => sink.notify_transaction(tx),
            AnalyticsEvent::ValidatorRegistered { address, stake } => {
                sink.notify_validator_registered(address, *stake)
            }
            AnalyticsEvent::FeeAdjustment {
                base_fee,
                priority_rate,
            } => sink.notify_fee_adjustment(*base_fee, *priority_rate),
        }
    }
}

enum Command {
    Deliver(AnalyticsEvent),
    Flush(Sender<()>),
}

/// Handle owned by the ledger: a delivery queue plus direct access to the
/// sink for advisory queries.
pub struct Analytics {
    sink: Arc<dyn AnalyticsSink>,
    queue: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
}

impl Analytics {
    pub fn new(sink: Arc<dyn AnalyticsSink>, queue_size: usize, max_retries: u32) -> Self {
        let (tx, rx) = bounded::<Command>(queue_size.max(1));
        let worker_sink = sink.clone();
        let spawned = std::thread::Builder::new()
            .name("ontiblock-analytics".to_string())
            .spawn(move || {
                for command in rx {
                    match command {
                        Command::Deliver(event) => {
                            deliver_with_retry(worker_sink.as_ref(), &event, max_retries)
                        }
                        Command::Flush(ack) => {
                            let _ = ack.send(());
                        }
                    }
                }
            });

        match spawned {
            Ok(handle) => Self {
                sink,
                queue: Some(tx),
                worker: Some(handle),
            },
            Err(e) => {
                warn!(error = %e, "failed to start analytics worker; notifications disabled");
                Self {
                    sink,
                    queue: None,
                    worker: None,
                }
            }
        }
    }

    pub fn from_config(sink: Arc<dyn AnalyticsSink>, config: &AnalyticsConfig) -> Self {
        Self::new(sink, config.queue_size, config.max_retries)
    }

    pub fn noop() -> Self {
        Self::new(Arc::new(NoopSink), 64, 0)
    }

    /// Queues `event` for delivery. Never blocks; drops the event when the
    /// queue is full.
    pub fn notify(&self, event: AnalyticsEvent) {
        let Some(queue) = &self.queue else {
            return;
        };
        let kind = event.kind();
        match queue.try_send(Command::Deliver(event)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(event = kind, "analytics queue full; dropping notification")
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!(event = kind, "analytics worker stopped; dropping notification")
            }
        }
    }

    /// Waits until every notification queued before this call has been
    /// handled. Returns `false` on timeout.
    pub fn flush(&self, timeout: Duration) -> bool {
        let Some(queue) = &self.queue else {
            return true;
        };
        let (ack_tx, ack_rx) = bounded(1);
        if queue.send_timeout(Command::Flush(ack_tx), timeout).is_err() {
            return false;
        }
        ack_rx.recv_timeout(timeout).is_ok()
    }

    pub fn predict_staking_bonus(&self, amount: Amount, duration_days: u32) -> f64 {
        advisory_number(
            "predict_staking_bonus",
            self.sink.predict_staking_bonus(amount, duration_days),
        )
    }

    pub fn predict_network_yield(&self) -> f64 {
        advisory_number("predict_network_yield", self.sink.predict_network_yield())
    }

    pub fn optimization_suggestions(&self) -> Vec<String> {
        match self.sink.optimization_suggestions() {
            Ok(suggestions) => suggestions,
            Err(e) => {
                warn!(error = %e, "analytics query optimization_suggestions failed");
                Vec::new()
            }
        }
    }
}

impl Drop for Analytics {
    fn drop(&mut self) {
        // Closing the queue lets the worker drain and exit.
        self.queue.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn advisory_number(query: &'static str, result: Result<f64, AnalyticsError>) -> f64 {
    match result {
        Ok(value) if value.is_finite() => value,
        Ok(value) => {
            warn!(query, value, "analytics returned a non-finite number; using 0");
            0.0
        }
        Err(e) => {
            warn!(query, error = %e, "analytics query failed; using 0");
            0.0
        }
    }
}

fn deliver_with_retry(sink: &dyn AnalyticsSink, event: &AnalyticsEvent, max_retries: u32) {
    let mut attempt = 0;
    loop {
        match event.deliver(sink) {
            Ok(()) => {
                debug!(event = event.kind(), attempt, "analytics notification delivered");
                return;
            }
            Err(e) if attempt < max_retries => {
                debug!(
                    event = event.kind(),
                    attempt,
                    error = %e,
                    "analytics notification failed; retrying"
                );
                std::thread::sleep(RETRY_BACKOFF * 2u32.pow(attempt.min(MAX_BACKOFF_DOUBLINGS)));
                attempt += 1;
            }
            Err(e) => {
                warn!(
                    event = event.kind(),
                    attempts = attempt + 1,
                    error = %e,
                    "analytics notification dropped"
                );
                return;
            }
        }
    }
}

/// Request body understood by the analytics service.
#[derive(Debug, Serialize)]
struct AnalyticsRequest {
    prompt: String,
    model: &'static str,
    timestamp: i64,
    context: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
struct AnalyticsResponse {
    #[serde(default)]
    cost: f64,
    #[serde(default)]
    value: Option<f64>,
    #[serde(default)]
    suggestions: Vec<String>,
}

/// Analytics sink that posts JSON to an HTTP endpoint with a bearer token.
pub struct HttpAnalyticsSink {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: Option<String>,
    costs: Mutex<CostTracker>,
}

/// Cost reported per block hash / transaction id for the most recent items,
/// plus a running total over everything analysed.
struct CostTracker {
    recent: LruCache<String, f64>,
    total: f64,
}

impl CostTracker {
    fn new(capacity: usize) -> Self {
        Self {
            recent: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
            total: 0.0,
        }
    }
}

impl HttpAnalyticsSink {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, AnalyticsError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AnalyticsError::Request(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            costs: Mutex::new(CostTracker::new(COST_HISTORY)),
        })
    }

    pub fn from_config(config: &AnalyticsConfig) -> Result<Self, AnalyticsError> {
        Self::new(
            config.endpoint.clone(),
            std::env::var(crate::config::ANALYTICS_KEY_ENV).ok(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Cost reported for each of the last [`COST_HISTORY`] analysed items.
    pub fn cost_analysis(&self) -> HashMap<String, f64> {
        self.costs
            .lock()
            .recent
            .iter()
            .map(|(key, cost)| (key.clone(), *cost))
            .collect()
    }

    /// Sum of every reported cost, including evicted items.
    pub fn total_cost(&self) -> f64 {
        self.costs.lock().total
    }

    fn call(
        &self,
        prompt: String,
        model: &'static str,
        context: serde_json::Value,
    ) -> Result<AnalyticsResponse, AnalyticsError> {
        let body = AnalyticsRequest {
            prompt,
            model,
            timestamp: chrono::Utc::now().timestamp_millis(),
            context,
        };
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .map_err(|e| AnalyticsError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(AnalyticsError::Status(response.status().as_u16()));
        }
        response
            .json::<AnalyticsResponse>()
            .map_err(|e| AnalyticsError::Response(e.to_string()))
    }

    fn record_cost(&self, key: &str, cost: f64) {
        let mut costs = self.costs.lock();
        if cost.is_finite() {
            costs.total += cost;
        }
        costs.recent.put(key.to_string(), cost);
    }
}

impl AnalyticsSink for HttpAnalyticsSink {
    fn notify_block_created(&self, block: &Block) -> Result<(), AnalyticsError> {
        let response = self.call(
            format!("Analyze new block #{}", block.index),
            "ontiblock-analyzer",
            serde_json::json!({
                "block_index": block.index,
                "block_hash": block.hash,
                "transactions": block.transactions.len(),
                "validator": block.validator,
            }),
        )?;
        self.record_cost(&block.hash, response.cost);
        Ok(())
    }

    fn notify_transaction(&self, tx: &Transaction) -> Result<(), AnalyticsError> {
        let response = self.call(
            format!("Analyze transaction {}", tx.id),
            "ontiblock-tx-analyzer",
            serde_json::json!({ "transaction_id": tx.id, "amount": tx.amount, "fee": tx.fee }),
        )?;
        self.record_cost(&tx.id, response.cost);
        Ok(())
    }

    fn notify_validator_registered(
        &self,
        address: &str,
        stake: Amount,
    ) -> Result<(), AnalyticsError> {
        self.call(
            format!("Validator {} registered", address),
            "ontiblock-analyzer",
            serde_json::json!({ "validator": address, "stake": stake }),
        )
        .map(|_| ())
    }

    fn notify_fee_adjustment(
        &self,
        base_fee: Amount,
        priority_rate: Amount,
    ) -> Result<(), AnalyticsError> {
        self.call(
            "Fee structure adjusted".to_string(),
            "ontiblock-analyzer",
            serde_json::json!({ "base_fee": base_fee, "priority_fee_rate": priority_rate }),
        )
        .map(|_| ())
    }

    fn predict_staking_bonus(
        &self,
        amount: Amount,
        duration_days: u32,
    ) -> Result<f64, AnalyticsError> {
        let response = self.call(
            format!("Predict staking bonus for {} over {} days", amount, duration_days),
            "ontiblock-predictor",
            serde_json::json!({ "amount": amount, "duration_days": duration_days }),
        )?;
        response
            .value
            .ok_or_else(|| AnalyticsError::Response("missing value".to_string()))
    }

    fn predict_network_yield(&self) -> Result<f64, AnalyticsError> {
        let response = self.call(
            "Predict network yield".to_string(),
            "ontiblock-predictor",
            serde_json::Value::Null,
        )?;
        response
            .value
            .ok_or_else(|| AnalyticsError::Response("missing value".to_string()))
    }

    fn optimization_suggestions(&self) -> Result<Vec<String>, AnalyticsError> {
        Ok(self
            .call(
                "Suggest profit optimizations".to_string(),
                "ontiblock-advisor",
                serde_json::Value::Null,
            )?
            .suggestions)
    }
}

//! In-memory doubles for the store, chain and webhook transport.

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use alloy::primitives::{Address, B256, LogData};
use alloy::rpc::types::Log;
use async_trait::async_trait;
use rust_decimal::Decimal;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::chain::{ChainClient, ChainError, ChainSettings, ChargeReceipt};
use crate::entities::{
    ChainStatus, Charge, ChargeStatus, Merchant, NewCharge, NewPolicy, NewWebhookEvent, Policy,
    WebhookCounts, WebhookOutboxEvent, WebhookStatus,
};
use crate::store::{Store, StoreError};
use crate::webhook::WebhookTransport;

/// An RPC-shaped log with the metadata a mined log carries.
pub fn rpc_log(block_number: u64, log_index: u64, tx_hash: B256, data: LogData) -> Log {
    Log {
        inner: alloy::primitives::Log {
            address: Address::ZERO,
            data,
        },
        block_hash: Some(B256::ZERO),
        block_number: Some(block_number),
        block_timestamp: None,
        transaction_hash: Some(tx_hash),
        transaction_index: Some(0),
        log_index: Some(log_index),
        removed: false,
    }
}

pub fn test_settings() -> ChainSettings {
    ChainSettings {
        chain_id: 1,
        name: "testchain".to_string(),
        start_block: 0,
        batch_size: 9_000,
        confirmations: 2,
        poll_interval: Duration::from_secs(15),
    }
}

// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemState {
    policies: HashMap<(i64, String), Policy>,
    charges: Vec<Charge>,
    cursors: HashMap<i64, i64>,
    webhooks: Vec<WebhookOutboxEvent>,
    merchants: HashMap<(i64, String), Merchant>,
    fail_mark_delivered: bool,
}

/// In-memory [`Store`] mirroring the SQL semantics of `PgStore`, including
/// the charge replay guard and the backing-off exclusion in due-selection.
#[derive(Default)]
pub struct MemStore {
    state: Mutex<MemState>,
}

impl MemStore {
    pub fn fail_mark_delivered(&self, fail: bool) {
        self.state.lock().unwrap().fail_mark_delivered = fail;
    }

    pub fn charges_for_policy(&self, chain_id: i64, policy_id: &str) -> Vec<Charge> {
        self.state
            .lock()
            .unwrap()
            .charges
            .iter()
            .filter(|c| c.chain_id == chain_id && c.policy_id == policy_id)
            .cloned()
            .collect()
    }

    pub fn webhook(&self, id: Uuid) -> Option<WebhookOutboxEvent> {
        self.state
            .lock()
            .unwrap()
            .webhooks
            .iter()
            .find(|w| w.id == id)
            .cloned()
    }

    pub fn webhook_status(&self, id: Uuid) -> Option<WebhookStatus> {
        self.webhook(id).map(|w| w.status)
    }

    pub fn webhooks_by_type(&self, event_type: &str) -> Vec<WebhookOutboxEvent> {
        self.state
            .lock()
            .unwrap()
            .webhooks
            .iter()
            .filter(|w| w.event_type == event_type)
            .cloned()
            .collect()
    }
}

const EPOCH: OffsetDateTime = OffsetDateTime::UNIX_EPOCH;

#[async_trait]
impl Store for MemStore {
    async fn insert_policy_if_absent(&self, policy: NewPolicy) -> Result<bool, StoreError> {
        let mut state = self.state.lock().unwrap();
        let key = (policy.chain_id, policy.policy_id.clone());
        if state.policies.contains_key(&key) {
            return Ok(false);
        }
        state.policies.insert(
            key,
            Policy {
                policy_id: policy.policy_id,
                chain_id: policy.chain_id,
                payer: policy.payer,
                merchant: policy.merchant,
                charge_amount: policy.charge_amount,
                spending_cap: policy.spending_cap,
                total_spent: Decimal::ZERO,
                interval_seconds: policy.interval_seconds,
                last_charged_at: 0,
                charge_count: 0,
                consecutive_failures: 0,
                end_time: 0,
                active: true,
                needs_attention: false,
                last_error: None,
                metadata_url: policy.metadata_url,
                last_event_block: policy.created_block,
                last_event_log_index: policy.created_log_index,
                created_at: EPOCH,
                updated_at: EPOCH,
            },
        );
        Ok(true)
    }

    async fn get_policy(
        &self,
        chain_id: i64,
        policy_id: &str,
    ) -> Result<Option<Policy>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state.policies.get(&(chain_id, policy_id.to_string())).cloned())
    }

    async fn list_policies(&self, chain_id: i64) -> Result<Vec<Policy>, StoreError> {
        let state = self.state.lock().unwrap();
        let mut policies: Vec<Policy> = state
            .policies
            .values()
            .filter(|p| p.chain_id == chain_id)
            .cloned()
            .collect();
        policies.sort_by(|a, b| a.policy_id.cmp(&b.policy_id));
        Ok(policies)
    }

    async fn due_policies(
        &self,
        chain_id: i64,
        now: OffsetDateTime,
        limit: i64,
    ) -> Result<Vec<Policy>, StoreError> {
        let state = self.state.lock().unwrap();
        let now_unix = now.unix_timestamp();
        let mut due: Vec<Policy> = state
            .policies
            .values()
            .filter(|p| p.chain_id == chain_id && p.is_due(now_unix))
            .filter(|p| {
                !state.charges.iter().any(|c| {
                    c.chain_id == p.chain_id
                        && c.policy_id == p.policy_id
                        && c.status == ChargeStatus::Pending
                        && c.next_attempt_at.is_some_and(|at| at > now)
                })
            })
            .cloned()
            .collect();
        due.sort_by_key(|p| p.last_charged_at + p.interval_seconds);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn deactivate_policy(
        &self,
        chain_id: i64,
        policy_id: &str,
        end_time: i64,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(p) = state.policies.get_mut(&(chain_id, policy_id.to_string())) {
            p.active = false;
            p.end_time = end_time;
        }
        Ok(())
    }

    async fn apply_charge_succeeded(
        &self,
        chain_id: i64,
        policy_id: &str,
        amount: Decimal,
        charged_at: i64,
        block_number: i64,
        log_index: i64,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().unwrap();
        let Some(p) = state.policies.get_mut(&(chain_id, policy_id.to_string())) else {
            return Ok(false);
        };
        if (p.last_event_block, p.last_event_log_index) >= (block_number, log_index) {
            return Ok(false);
        }
        p.total_spent += amount;
        p.charge_count += 1;
        p.last_charged_at = charged_at;
        p.consecutive_failures = 0;
        p.needs_attention = false;
        p.last_error = None;
        p.last_event_block = block_number;
        p.last_event_log_index = log_index;
        Ok(true)
    }

    async fn record_charge_failed_event(
        &self,
        chain_id: i64,
        policy_id: &str,
        reason: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(p) = state.policies.get_mut(&(chain_id, policy_id.to_string())) {
            p.last_error = Some(reason.to_string());
        }
        Ok(())
    }

    async fn increment_consecutive_failures(
        &self,
        chain_id: i64,
        policy_id: &str,
        error: &str,
    ) -> Result<i32, StoreError> {
        let mut state = self.state.lock().unwrap();
        let p = state
            .policies
            .get_mut(&(chain_id, policy_id.to_string()))
            .ok_or(StoreError::NotFound("policy"))?;
        p.consecutive_failures += 1;
        p.last_error = Some(error.to_string());
        Ok(p.consecutive_failures)
    }

    async fn reset_consecutive_failures(
        &self,
        chain_id: i64,
        policy_id: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(p) = state.policies.get_mut(&(chain_id, policy_id.to_string())) {
            p.consecutive_failures = 0;
            p.needs_attention = false;
            p.last_error = None;
        }
        Ok(())
    }

    async fn mark_policy_needs_attention(
        &self,
        chain_id: i64,
        policy_id: &str,
        error: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(p) = state.policies.get_mut(&(chain_id, policy_id.to_string())) {
            p.needs_attention = true;
            p.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn create_charge(&self, charge: NewCharge) -> Result<Uuid, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.charges.push(Charge {
            id: charge.id,
            policy_id: charge.policy_id,
            chain_id: charge.chain_id,
            amount: charge.amount,
            attempt_count: 0,
            status: ChargeStatus::Pending,
            tx_hash: None,
            protocol_fee: None,
            error: None,
            next_attempt_at: None,
            created_at: EPOCH,
            updated_at: EPOCH,
        });
        Ok(charge.id)
    }

    async fn find_pending_charge(
        &self,
        chain_id: i64,
        policy_id: &str,
    ) -> Result<Option<Charge>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .charges
            .iter()
            .rev()
            .find(|c| {
                c.chain_id == chain_id
                    && c.policy_id == policy_id
                    && c.status == ChargeStatus::Pending
            })
            .cloned())
    }

    async fn mark_charge_succeeded(
        &self,
        id: Uuid,
        tx_hash: &str,
        protocol_fee: Decimal,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(c) = state.charges.iter_mut().find(|c| c.id == id) {
            c.status = ChargeStatus::Succeeded;
            c.tx_hash = Some(tx_hash.to_string());
            c.protocol_fee = Some(protocol_fee);
            c.error = None;
            c.next_attempt_at = None;
        }
        Ok(())
    }

    async fn mark_charge_failed(
        &self,
        id: Uuid,
        error: &str,
        attempt_count: i32,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(c) = state.charges.iter_mut().find(|c| c.id == id) {
            c.status = ChargeStatus::Failed;
            c.error = Some(error.to_string());
            c.attempt_count = attempt_count;
            c.next_attempt_at = None;
        }
        Ok(())
    }

    async fn schedule_charge_retry(
        &self,
        id: Uuid,
        attempt_count: i32,
        next_attempt_at: OffsetDateTime,
        error: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(c) = state
            .charges
            .iter_mut()
            .find(|c| c.id == id && c.status == ChargeStatus::Pending)
        {
            c.attempt_count = attempt_count;
            c.next_attempt_at = Some(next_attempt_at);
            c.error = Some(error.to_string());
        }
        Ok(())
    }

    async fn cursor(&self, chain_id: i64) -> Result<Option<i64>, StoreError> {
        Ok(self.state.lock().unwrap().cursors.get(&chain_id).copied())
    }

    async fn set_cursor(&self, chain_id: i64, last_block: i64) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let entry = state.cursors.entry(chain_id).or_insert(last_block);
        *entry = (*entry).max(last_block);
        Ok(())
    }

    async fn enqueue_webhook(&self, event: NewWebhookEvent) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.webhooks.push(WebhookOutboxEvent {
            id: event.id,
            policy_id: event.policy_id,
            chain_id: event.chain_id,
            event_type: event.event_type,
            payload: event.payload,
            charge_id: event.charge_id,
            status: WebhookStatus::Pending,
            attempt_count: 0,
            next_attempt_at: EPOCH,
            error: None,
            created_at: EPOCH,
            updated_at: EPOCH,
        });
        Ok(())
    }

    async fn due_webhooks(
        &self,
        now: OffsetDateTime,
        limit: i64,
    ) -> Result<Vec<WebhookOutboxEvent>, StoreError> {
        let state = self.state.lock().unwrap();
        let mut due: Vec<WebhookOutboxEvent> = state
            .webhooks
            .iter()
            .filter(|w| w.status == WebhookStatus::Pending && w.next_attempt_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|w| w.next_attempt_at);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn mark_webhook_delivered(&self, id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_mark_delivered {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        if let Some(w) = state.webhooks.iter_mut().find(|w| w.id == id) {
            w.status = WebhookStatus::Delivered;
            w.error = None;
        }
        Ok(())
    }

    async fn reschedule_webhook(
        &self,
        id: Uuid,
        attempt_count: i32,
        next_attempt_at: OffsetDateTime,
        error: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(w) = state
            .webhooks
            .iter_mut()
            .find(|w| w.id == id && w.status == WebhookStatus::Pending)
        {
            w.attempt_count = attempt_count;
            w.next_attempt_at = next_attempt_at;
            w.error = Some(error.to_string());
        }
        Ok(())
    }

    async fn mark_webhook_failed(
        &self,
        id: Uuid,
        attempt_count: i32,
        error: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(w) = state.webhooks.iter_mut().find(|w| w.id == id) {
            w.status = WebhookStatus::Failed;
            w.attempt_count = attempt_count;
            w.error = Some(error.to_string());
        }
        Ok(())
    }

    async fn get_merchant(
        &self,
        chain_id: i64,
        address: &str,
    ) -> Result<Option<Merchant>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state.merchants.get(&(chain_id, address.to_string())).cloned())
    }

    async fn register_merchant(&self, merchant: Merchant) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state
            .merchants
            .insert((merchant.chain_id, merchant.address.clone()), merchant);
        Ok(())
    }

    async fn chain_status(&self, chain_id: i64) -> Result<ChainStatus, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(ChainStatus {
            chain_id,
            last_indexed_block: state.cursors.get(&chain_id).copied(),
            active_policies: state
                .policies
                .values()
                .filter(|p| p.chain_id == chain_id && p.active)
                .count() as i64,
            pending_charges: state
                .charges
                .iter()
                .filter(|c| c.chain_id == chain_id && c.status == ChargeStatus::Pending)
                .count() as i64,
        })
    }

    async fn webhook_counts(&self) -> Result<WebhookCounts, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(WebhookCounts {
            pending: state
                .webhooks
                .iter()
                .filter(|w| w.status == WebhookStatus::Pending)
                .count() as i64,
            failed: state
                .webhooks
                .iter()
                .filter(|w| w.status == WebhookStatus::Failed)
                .count() as i64,
        })
    }
}

// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockChainState {
    head: u64,
    logs: Vec<Log>,
    fail_logs_once: bool,
    charge_results: VecDeque<Result<ChargeReceipt, ChainError>>,
    charge_calls: Vec<B256>,
    cancel_calls: Vec<B256>,
}

/// Scripted [`ChainClient`].
pub struct MockChain {
    state: Mutex<MockChainState>,
}

impl MockChain {
    pub fn new(head: u64) -> Self {
        Self {
            state: Mutex::new(MockChainState {
                head,
                ..Default::default()
            }),
        }
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    pub fn push_log(&self, log: Log) {
        self.state.lock().unwrap().logs.push(log);
    }

    pub fn fail_logs_once(&self) {
        self.state.lock().unwrap().fail_logs_once = true;
    }

    pub fn queue_charge(&self, result: Result<ChargeReceipt, ChainError>) {
        self.state.lock().unwrap().charge_results.push_back(result);
    }

    pub fn charge_calls(&self) -> Vec<B256> {
        self.state.lock().unwrap().charge_calls.clone()
    }

    pub fn cancel_calls(&self) -> Vec<B256> {
        self.state.lock().unwrap().cancel_calls.clone()
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(self.state.lock().unwrap().head)
    }

    async fn logs(&self, from_block: u64, to_block: u64) -> Result<Vec<Log>, ChainError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_logs_once {
            state.fail_logs_once = false;
            return Err(ChainError::Rpc("simulated rpc failure".into()));
        }
        Ok(state
            .logs
            .iter()
            .filter(|l| {
                l.block_number
                    .is_some_and(|b| b >= from_block && b <= to_block)
            })
            .cloned()
            .collect())
    }

    async fn charge(&self, policy_id: B256) -> Result<ChargeReceipt, ChainError> {
        let mut state = self.state.lock().unwrap();
        state.charge_calls.push(policy_id);
        state
            .charge_results
            .pop_front()
            .unwrap_or_else(|| Err(ChainError::Rpc("no scripted charge result".into())))
    }

    async fn cancel_failed_policy(&self, policy_id: B256) -> Result<B256, ChainError> {
        let mut state = self.state.lock().unwrap();
        state.cancel_calls.push(policy_id);
        Ok(B256::repeat_byte(0x99))
    }
}

// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RecordedPost {
    pub url: String,
    pub body: Vec<u8>,
    pub signature: String,
}

#[derive(Default)]
struct MockTransportState {
    responses: VecDeque<Result<u16, String>>,
    posts: Vec<RecordedPost>,
}

/// Scripted [`WebhookTransport`]; unscripted posts answer 200.
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockTransportState>,
}

impl MockTransport {
    pub fn queue_response(&self, response: Result<u16, String>) {
        self.state.lock().unwrap().responses.push_back(response);
    }

    pub fn posts(&self) -> Vec<RecordedPost> {
        self.state.lock().unwrap().posts.clone()
    }
}

#[async_trait]
impl WebhookTransport for MockTransport {
    async fn post(&self, url: &str, body: &[u8], signature: &str) -> Result<u16, String> {
        let mut state = self.state.lock().unwrap();
        state.posts.push(RecordedPost {
            url: url.to_string(),
            body: body.to_vec(),
            signature: signature.to_string(),
        });
        state.responses.pop_front().unwrap_or(Ok(200))
    }
}

//! In-process storage, used when no database is configured.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::dispatch::{EventStore, PaymentDispatcher, WalletChange, WalletStore};
use crate::error::{Error, Result, SettlementError};
use crate::schemas::{
    DeliveryOutcome, DispatchReport, Event, Participant, ParticipantId, SettlementRequest,
};
use crate::wallet::Wallet;

#[derive(Debug, Default)]
pub struct MemoryBackend {
    events: RwLock<HashMap<String, Event>>,
    /// One entry per dispatch call that delivered something, holding only
    /// the requests delivered by that call
    dispatched: RwLock<Vec<SettlementRequest>>,
    unreachable: RwLock<HashSet<ParticipantId>>,
    wallets: RwLock<HashMap<String, Wallet>>,
}

impl MemoryBackend {
    /// Every delivery so far, oldest first
    pub async fn dispatched(&self) -> Vec<SettlementRequest> {
        self.dispatched.read().await.clone()
    }

    /// Makes requests to `participant` fail until switched back.
    pub async fn set_unreachable(&self, participant: &str, unreachable: bool) {
        let mut set = self.unreachable.write().await;
        if unreachable {
            set.insert(participant.to_string());
        } else {
            set.remove(participant);
        }
    }
}

fn missing_event(id: &str) -> Error {
    Error::NotFound(format!("event {}", id))
}

#[async_trait]
impl EventStore for MemoryBackend {
    async fn fetch_event(&self, id: &str) -> Result<Option<Event>> {
        Ok(self.events.read().await.get(id).cloned())
    }

    async fn insert_event(&self, event: &Event) -> Result<()> {
        self.events
            .write()
            .await
            .insert(event.id.clone(), event.clone());
        Ok(())
    }

    async fn add_participant(&self, event_id: &str, participant: &Participant) -> Result<()> {
        let mut events = self.events.write().await;
        let event = events.get_mut(event_id).ok_or_else(|| missing_event(event_id))?;
        if event.participants.iter().any(|p| p.id == participant.id) {
            return Err(SettlementError::DuplicateParticipant(participant.id.clone()).into());
        }
        event.participants.push(participant.clone());
        Ok(())
    }

    async fn set_paid(&self, event_id: &str, participant_id: &str, paid: bool) -> Result<bool> {
        let mut events = self.events.write().await;
        let event = events.get_mut(event_id).ok_or_else(|| missing_event(event_id))?;
        let participant = event
            .participants
            .iter_mut()
            .find(|p| p.id == participant_id)
            .ok_or_else(|| Error::NotFound(format!("participant {}", participant_id)))?;
        if participant.has_paid == paid {
            return Ok(false);
        }
        participant.has_paid = paid;
        participant.selected = !paid;
        Ok(true)
    }
}

#[async_trait]
impl PaymentDispatcher for MemoryBackend {
    async fn dispatch(&self, request: &SettlementRequest) -> Result<DispatchReport> {
        let mut dispatched = self.dispatched.write().await;
        let unreachable = self.unreachable.read().await;

        let already_sent: HashSet<ParticipantId> = dispatched
            .iter()
            .filter(|sent| sent.idempotency_key == request.idempotency_key)
            .flat_map(|sent| sent.requests.iter().map(|r| r.participant.clone()))
            .collect();

        let mut outcomes = Vec::with_capacity(request.requests.len());
        let mut delivered_now = Vec::new();
        let mut attempted = 0;
        for payment in &request.requests {
            let delivered = if already_sent.contains(&payment.participant) {
                true
            } else {
                attempted += 1;
                let reachable = !unreachable.contains(&payment.participant);
                if reachable {
                    delivered_now.push(payment.clone());
                } else {
                    warn!(participant = %payment.participant, "payment request not delivered");
                }
                reachable
            };
            outcomes.push(DeliveryOutcome {
                participant: payment.participant.clone(),
                amount: payment.amount,
                delivered,
            });
        }

        info!(
            event = %request.event_id,
            delivered = delivered_now.len(),
            attempted,
            "payment requests recorded in memory"
        );
        if !delivered_now.is_empty() {
            dispatched.push(SettlementRequest {
                requests: delivered_now,
                ..request.clone()
            });
        }
        Ok(DispatchReport {
            idempotency_key: request.idempotency_key.clone(),
            outcomes,
            replayed: attempted == 0,
        })
    }

    async fn requested_amount(
        &self,
        event_id: &str,
        participant_id: &str,
    ) -> Result<Option<Decimal>> {
        Ok(self
            .dispatched
            .read()
            .await
            .iter()
            .rev()
            .filter(|sent| sent.event_id == event_id)
            .find_map(|sent| {
                sent.requests
                    .iter()
                    .find(|r| r.participant == participant_id)
                    .map(|r| r.amount)
            }))
    }
}

#[async_trait]
impl WalletStore for MemoryBackend {
    async fn load_wallet(&self, owner: &str) -> Result<Wallet> {
        Ok(self
            .wallets
            .read()
            .await
            .get(owner)
            .cloned()
            .unwrap_or_else(|| Wallet::new(owner)))
    }

    async fn update_wallet(&self, owner: &str, change: WalletChange<'_>) -> Result<Wallet> {
        let mut wallets = self.wallets.write().await;
        let mut wallet = wallets
            .get(owner)
            .cloned()
            .unwrap_or_else(|| Wallet::new(owner));
        change(&mut wallet)?;
        wallet.version += 1;
        wallets.insert(owner.to_string(), wallet.clone());
        Ok(wallet)
    }
}

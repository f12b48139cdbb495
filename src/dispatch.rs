//! Collaborators the settlement flow talks to.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Result, WalletError};
use crate::schemas::{
    DispatchReport, Event, EventId, Participant, PaymentRequest, SettlementRequest, UserNick,
};
use crate::wallet::Wallet;

/// Where events and their rosters live.
///
/// Settlement only reads through `fetch_event`; the returned participants are
/// a snapshot for the lifetime of one session.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn fetch_event(&self, id: &str) -> Result<Option<Event>>;
    async fn insert_event(&self, event: &Event) -> Result<()>;
    /// Fails with `DuplicateParticipant` when the id is already on the event.
    async fn add_participant(&self, event_id: &str, participant: &Participant) -> Result<()>;
    /// Sets the paid flag only if it currently holds the opposite value.
    /// Returns whether it changed; `false` means someone else got there first.
    async fn set_paid(&self, event_id: &str, participant_id: &str, paid: bool) -> Result<bool>;
}

/// Sends payment requests to participants.
///
/// Under a repeated idempotency key, recipients already delivered are not
/// sent again; only the ones still missing are. `replayed` is set when
/// nothing was left to send.
#[async_trait]
pub trait PaymentDispatcher: Send + Sync {
    async fn dispatch(&self, request: &SettlementRequest) -> Result<DispatchReport>;

    /// Amount of the most recent delivered request to this participant for
    /// this event, if any.
    async fn requested_amount(&self, event_id: &str, participant_id: &str)
        -> Result<Option<Decimal>>;
}

/// A change applied to one wallet. It may run more than once when the store
/// retries after a concurrent write.
pub type WalletChange<'a> =
    &'a (dyn Fn(&mut Wallet) -> std::result::Result<(), WalletError> + Send + Sync);

#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Returns an empty wallet for owners seen for the first time
    async fn load_wallet(&self, owner: &str) -> Result<Wallet>;

    /// Loads, changes and stores one wallet without losing concurrent
    /// updates. Nothing is stored when `change` fails.
    async fn update_wallet(&self, owner: &str, change: WalletChange<'_>) -> Result<Wallet>;
}

pub fn idempotency_key(session_id: Uuid, event_id: &EventId, requests: &[PaymentRequest]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    hasher.update(event_id.as_bytes());
    for request in requests {
        hasher.update(request.participant.as_bytes());
        hasher.update([0u8]);
        hasher.update(request.amount.to_string().as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

pub fn settlement_request(
    session_id: Uuid,
    event_id: EventId,
    requester: UserNick,
    requests: Vec<PaymentRequest>,
) -> SettlementRequest {
    SettlementRequest {
        idempotency_key: idempotency_key(session_id, &event_id, &requests),
        session_id,
        event_id,
        requester,
        requests,
    }
}

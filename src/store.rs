use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::{
    bson::doc,
    error::{ErrorKind, WriteFailure},
    options::{FindOneOptions, IndexOptions, UpdateOptions},
    Client, Collection, IndexModel,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dispatch::{EventStore, PaymentDispatcher, WalletChange, WalletStore};
use crate::error::{Error, Result, SettlementError};
use crate::schemas::{
    DeliveryOutcome, DispatchReport, Event, EventId, Participant, ParticipantId, SettlementRequest,
    UserNick,
};
use crate::wallet::Wallet;

const WALLET_WRITE_ATTEMPTS: usize = 5;
const DUPLICATE_KEY: i32 = 11000;

/// One document per payment request, keyed by the settlement's idempotency
/// key and the participant
#[derive(Clone, Debug, Deserialize, Serialize)]
struct PaymentRequestDocument {
    idempotency_key: String,
    event_id: EventId,
    requester: UserNick,
    participant: ParticipantId,
    amount: Decimal,
    status: String,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    requested_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct MongoStore {
    client: Client,
    database: String,
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY
    )
}

fn unique_index(keys: bson::Document) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().unique(true).build())
        .build()
}

impl MongoStore {
    pub async fn connect(uri: &str, database: impl Into<String>) -> Result<Self> {
        let client = Client::with_uri_str(uri).await?;
        let store = Self {
            client,
            database: database.into(),
        };
        store
            .wallets()
            .create_index(unique_index(doc! { "owner": 1 }), None)
            .await?;
        store
            .payment_requests()
            .create_index(
                unique_index(doc! { "idempotency_key": 1, "participant": 1 }),
                None,
            )
            .await?;
        Ok(store)
    }

    fn events(&self) -> Collection<Event> {
        self.client.database(&self.database).collection("Events")
    }

    fn payment_requests(&self) -> Collection<PaymentRequestDocument> {
        self.client
            .database(&self.database)
            .collection("PaymentRequests")
    }

    fn wallets(&self) -> Collection<Wallet> {
        self.client.database(&self.database).collection("Wallets")
    }

    async fn require_event(&self, event_id: &str) -> Result<Event> {
        self.fetch_event(event_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("event {}", event_id)))
    }

    /// Writes `wallet` only if nobody changed it since it was read at
    /// `read_version`. `None` means there was no stored wallet.
    async fn write_wallet(&self, wallet: &Wallet, read_version: Option<i64>) -> Result<bool> {
        match read_version {
            Some(version) => {
                let filter = if version == 0 {
                    doc! {
                        "owner": &wallet.owner,
                        "$or": [{ "version": 0_i64 }, { "version": { "$exists": false } }],
                    }
                } else {
                    doc! { "owner": &wallet.owner, "version": version }
                };
                let result = self.wallets().replace_one(filter, wallet, None).await?;
                Ok(result.matched_count == 1)
            }
            None => match self.wallets().insert_one(wallet, None).await {
                Ok(_) => Ok(true),
                Err(err) if is_duplicate_key(&err) => Ok(false),
                Err(err) => Err(err.into()),
            },
        }
    }
}

#[async_trait]
impl EventStore for MongoStore {
    async fn fetch_event(&self, id: &str) -> Result<Option<Event>> {
        Ok(self.events().find_one(doc! { "id": id }, None).await?)
    }

    async fn insert_event(&self, event: &Event) -> Result<()> {
        self.events().insert_one(event, None).await?;
        Ok(())
    }

    async fn add_participant(&self, event_id: &str, participant: &Participant) -> Result<()> {
        let result = self
            .events()
            .update_one(
                doc! { "id": event_id, "participants.id": { "$ne": &participant.id } },
                doc! { "$push": { "participants": bson::to_bson(participant)? } },
                None,
            )
            .await?;
        if result.matched_count == 0 {
            self.require_event(event_id).await?;
            return Err(SettlementError::DuplicateParticipant(participant.id.clone()).into());
        }
        Ok(())
    }

    async fn set_paid(&self, event_id: &str, participant_id: &str, paid: bool) -> Result<bool> {
        let result = self
            .events()
            .update_one(
                doc! {
                    "id": event_id,
                    "participants": { "$elemMatch": { "id": participant_id, "has_paid": !paid } },
                },
                doc! { "$set": {
                    "participants.$.has_paid": paid,
                    "participants.$.selected": !paid,
                } },
                None,
            )
            .await?;
        if result.modified_count == 1 {
            return Ok(true);
        }
        let event = self.require_event(event_id).await?;
        if !event.participants.iter().any(|p| p.id == participant_id) {
            return Err(Error::NotFound(format!(
                "participant {} in event {}",
                participant_id, event_id
            )));
        }
        Ok(false)
    }
}

#[async_trait]
impl PaymentDispatcher for MongoStore {
    async fn dispatch(&self, request: &SettlementRequest) -> Result<DispatchReport> {
        use futures::TryStreamExt;

        let collection = self.payment_requests();
        let existing: Vec<PaymentRequestDocument> = collection
            .find(
                doc! { "idempotency_key": &request.idempotency_key, "status": "sent" },
                None,
            )
            .await?
            .try_collect()
            .await?;
        let already_sent: HashSet<&str> = existing
            .iter()
            .map(|document| document.participant.as_str())
            .collect();

        let mut outcomes = Vec::with_capacity(request.requests.len());
        let mut attempted = 0;
        let mut failed = 0;
        for payment in &request.requests {
            if already_sent.contains(payment.participant.as_str()) {
                outcomes.push(DeliveryOutcome {
                    participant: payment.participant.clone(),
                    amount: payment.amount,
                    delivered: true,
                });
                continue;
            }

            attempted += 1;
            let document = PaymentRequestDocument {
                idempotency_key: request.idempotency_key.clone(),
                event_id: request.event_id.clone(),
                requester: request.requester.clone(),
                participant: payment.participant.clone(),
                amount: payment.amount,
                status: "sent".to_string(),
                requested_at: Utc::now(),
            };
            let delivered = match collection
                .update_one(
                    doc! {
                        "idempotency_key": &document.idempotency_key,
                        "participant": &document.participant,
                    },
                    doc! { "$setOnInsert": bson::to_bson(&document)? },
                    UpdateOptions::builder().upsert(true).build(),
                )
                .await
            {
                Ok(_) => true,
                Err(err) => {
                    warn!(participant = %payment.participant, %err, "payment request not stored");
                    failed += 1;
                    false
                }
            };
            outcomes.push(DeliveryOutcome {
                participant: payment.participant.clone(),
                amount: payment.amount,
                delivered,
            });
        }

        if attempted > 0 && failed == attempted && already_sent.is_empty() {
            return Err(Error::Dispatch(format!(
                "no payment request for event {} could be stored",
                request.event_id
            )));
        }

        if attempted == 0 {
            warn!(
                key = %request.idempotency_key,
                "settlement already dispatched, not sending again"
            );
        } else {
            info!(
                event = %request.event_id,
                attempted,
                failed,
                "payment requests stored"
            );
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
        let latest = self
            .payment_requests()
            .find_one(
                doc! { "event_id": event_id, "participant": participant_id, "status": "sent" },
                FindOneOptions::builder()
                    .sort(doc! { "requested_at": -1 })
                    .build(),
            )
            .await?;
        Ok(latest.map(|document| document.amount))
    }
}

#[async_trait]
impl WalletStore for MongoStore {
    async fn load_wallet(&self, owner: &str) -> Result<Wallet> {
        Ok(self
            .wallets()
            .find_one(doc! { "owner": owner }, None)
            .await?
            .unwrap_or_else(|| Wallet::new(owner)))
    }

    async fn update_wallet(&self, owner: &str, change: WalletChange<'_>) -> Result<Wallet> {
        for attempt in 1..=WALLET_WRITE_ATTEMPTS {
            let stored = self.wallets().find_one(doc! { "owner": owner }, None).await?;
            let read_version = stored.as_ref().map(|wallet| wallet.version);
            let mut wallet = stored.unwrap_or_else(|| Wallet::new(owner));
            change(&mut wallet)?;
            wallet.version += 1;

            if self.write_wallet(&wallet, read_version).await? {
                return Ok(wallet);
            }
            warn!(owner, attempt, "wallet changed concurrently, retrying");
        }
        Err(Error::Conflict(format!("wallet {}", owner)))
    }
}

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserNick = String;
pub type ParticipantId = UserNick;
pub type EventId = String;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Event {
    pub id: EventId,
    pub title: String,
    pub organizer: UserNick,
    pub total_cost: Decimal,
    #[serde(default)]
    pub participants: Vec<Participant>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Participant {
    pub id: ParticipantId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub has_paid: bool,
    #[serde(default)]
    pub selected: bool,
    #[serde(default)]
    pub amount_due: Decimal,
}

impl Participant {
    /// A freshly loaded participant: selected unless they already paid.
    pub fn new(id: impl Into<ParticipantId>, name: impl Into<String>, has_paid: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            has_paid,
            selected: !has_paid,
            amount_due: Decimal::ZERO,
        }
    }

    pub fn owes_share(&self) -> bool {
        self.selected && !self.has_paid
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitMethod {
    #[default]
    Equal,
    Custom,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct PaymentRequest {
    pub participant: ParticipantId,
    pub amount: Decimal,
}

/// The finalized output of a settlement session, handed to a dispatcher.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct SettlementRequest {
    pub session_id: Uuid,
    pub event_id: EventId,
    pub requester: UserNick,
    pub idempotency_key: String,
    pub requests: Vec<PaymentRequest>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct DeliveryOutcome {
    pub participant: ParticipantId,
    pub amount: Decimal,
    pub delivered: bool,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct DispatchReport {
    pub idempotency_key: String,
    pub outcomes: Vec<DeliveryOutcome>,
    /// True when the key had already been dispatched and nothing new was sent
    #[serde(default)]
    pub replayed: bool,
}

impl DispatchReport {
    pub fn all_delivered(&self) -> bool {
        self.outcomes.iter().all(|outcome| outcome.delivered)
    }
}

//! Error types for settlement sessions, wallets and storage

use crate::schemas::ParticipantId;
use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for courtsplit operations
pub type Result<T> = std::result::Result<T, Error>;

/// Validation failures raised while splitting an event cost.
///
/// None of these are faults: the caller renders the message and lets the
/// organizer correct the input.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettlementError {
    #[error("Insufficient participants for split: select at least one unpaid participant")]
    InsufficientParticipants,

    #[error("No participants selected: select at least one unpaid participant")]
    NoParticipantsSelected,

    #[error("Split mismatch: requested {requested}, event cost {expected} (delta {delta})")]
    SplitMismatch {
        requested: Decimal,
        expected: Decimal,
        delta: Decimal,
    },

    #[error("Total requested amount must be greater than 0")]
    ZeroAmountRequested,

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Unknown participant: {0}")]
    UnknownParticipant(ParticipantId),

    #[error("Participant {0} has already paid")]
    AlreadyPaid(ParticipantId),

    #[error("No event selected")]
    NoEventSelected,

    #[error("Settlement session already submitted")]
    SessionClosed,

    #[error("Participant {0} is already on this event")]
    DuplicateParticipant(ParticipantId),

    #[error("Participant {0} is not selected for this request")]
    NotSelected(ParticipantId),

    #[error("No payment was requested from {0} for this event")]
    NoPaymentRequest(ParticipantId),

    #[error("Payment of {offered} does not match the requested {expected}")]
    PaymentMismatch { expected: Decimal, offered: Decimal },
}

impl SettlementError {
    /// Stable machine-readable error kind
    pub fn kind(&self) -> &'static str {
        match self {
            SettlementError::InsufficientParticipants => "InsufficientParticipants",
            SettlementError::NoParticipantsSelected => "NoParticipantsSelected",
            SettlementError::SplitMismatch { .. } => "SplitMismatch",
            SettlementError::ZeroAmountRequested => "ZeroAmountRequested",
            SettlementError::InvalidAmount(_) => "InvalidAmount",
            SettlementError::UnknownParticipant(_) => "UnknownParticipant",
            SettlementError::AlreadyPaid(_) => "AlreadyPaid",
            SettlementError::NoEventSelected => "NoEventSelected",
            SettlementError::SessionClosed => "SessionClosed",
            SettlementError::DuplicateParticipant(_) => "DuplicateParticipant",
            SettlementError::NotSelected(_) => "NotSelected",
            SettlementError::NoPaymentRequest(_) => "NoPaymentRequest",
            SettlementError::PaymentMismatch { .. } => "PaymentMismatch",
        }
    }
}

/// Wallet ledger errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WalletError {
    #[error("Please enter a valid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        required: Decimal,
        available: Decimal,
    },

    #[error("Cannot transfer funds to the same wallet")]
    SelfTransfer,
}

impl WalletError {
    pub fn kind(&self) -> &'static str {
        match self {
            WalletError::InvalidAmount(_) => "InvalidAmount",
            WalletError::InsufficientBalance { .. } => "InsufficientBalance",
            WalletError::SelfTransfer => "SelfTransfer",
        }
    }
}

/// Crate-level errors
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Settlement(#[from] SettlementError),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bson::ser::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Payment request dispatch failed: {0}")]
    Dispatch(String),

    #[error("Concurrent update conflict: {0}")]
    Conflict(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Settlement(err) => err.kind(),
            Error::Wallet(err) => err.kind(),
            Error::Database(_) => "Database",
            Error::Serialization(_) => "Serialization",
            Error::NotFound(_) => "NotFound",
            Error::Dispatch(_) => "Dispatch",
            Error::Conflict(_) => "Conflict",
            Error::Config(_) => "Config",
            Error::Io(_) => "Io",
        }
    }
}

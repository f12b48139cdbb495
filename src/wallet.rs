//! Wallet balances and their transaction history.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::WalletError;
use crate::schemas::{EventId, UserNick};
use crate::split::max_amount;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    Payment,
    Refund,
    Transfer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Completed,
    Pending,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Transaction {
    pub id: Uuid,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub description: String,
    pub date: DateTime<Utc>,
    pub status: TransactionStatus,
    #[serde(default)]
    pub related_event: Option<EventId>,
}

impl Transaction {
    fn new(kind: TransactionKind, amount: Decimal, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            amount,
            description: description.into(),
            date: Utc::now(),
            status: TransactionStatus::Completed,
            related_event: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Wallet {
    pub owner: UserNick,
    pub balance: Decimal,
    /// Newest first
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    /// Bumped by the store on every write
    #[serde(default)]
    pub version: i64,
}

/// Parses a user-entered amount; it has to be a number above zero and no
/// larger than [`max_amount`].
pub fn parse_positive_amount(raw: &str) -> Result<Decimal, WalletError> {
    match Decimal::from_str(raw.trim()) {
        Ok(amount) if amount > Decimal::ZERO && amount <= max_amount() => Ok(amount),
        _ => Err(WalletError::InvalidAmount(raw.to_string())),
    }
}

fn check_positive(amount: Decimal) -> Result<(), WalletError> {
    if amount <= Decimal::ZERO {
        return Err(WalletError::InvalidAmount(amount.to_string()));
    }
    Ok(())
}

fn with_note(base: String, note: Option<&str>) -> String {
    match note.map(str::trim).filter(|note| !note.is_empty()) {
        Some(note) => format!("{}: {}", base, note),
        None => base,
    }
}

impl Wallet {
    pub fn new(owner: impl Into<UserNick>) -> Self {
        Self {
            owner: owner.into(),
            balance: Decimal::ZERO,
            transactions: Vec::new(),
            version: 0,
        }
    }

    fn record(&mut self, transaction: Transaction) -> &Transaction {
        self.transactions.insert(0, transaction);
        &self.transactions[0]
    }

    fn debit(&mut self, amount: Decimal) -> Result<(), WalletError> {
        check_positive(amount)?;
        if amount > self.balance {
            return Err(WalletError::InsufficientBalance {
                required: amount,
                available: self.balance,
            });
        }
        self.balance = self
            .balance
            .checked_sub(amount)
            .ok_or_else(|| WalletError::InvalidAmount(amount.to_string()))?;
        Ok(())
    }

    fn credit(&mut self, amount: Decimal) -> Result<(), WalletError> {
        check_positive(amount)?;
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or_else(|| WalletError::InvalidAmount(amount.to_string()))?;
        Ok(())
    }

    pub fn deposit(&mut self, amount: Decimal) -> Result<&Transaction, WalletError> {
        self.credit(amount)?;
        Ok(self.record(Transaction::new(
            TransactionKind::Deposit,
            amount,
            "Wallet top-up",
        )))
    }

    /// Funds leave the balance right away; the bank side stays pending.
    pub fn withdraw(&mut self, amount: Decimal) -> Result<&Transaction, WalletError> {
        self.debit(amount)?;
        let mut transaction = Transaction::new(
            TransactionKind::Withdrawal,
            amount,
            "Withdrawal to bank account",
        );
        transaction.status = TransactionStatus::Pending;
        Ok(self.record(transaction))
    }

    pub fn pending(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions
            .iter()
            .filter(|t| t.status == TransactionStatus::Pending)
    }

    /// Outgoing half of a transfer. The receiving wallet is credited
    /// separately with [`Wallet::receive_transfer`].
    pub fn send_transfer(
        &mut self,
        to: &str,
        amount: Decimal,
        note: Option<&str>,
    ) -> Result<&Transaction, WalletError> {
        if self.owner == to {
            return Err(WalletError::SelfTransfer);
        }
        self.debit(amount)?;
        let description = with_note(format!("Transfer to {}", to), note);
        Ok(self.record(Transaction::new(TransactionKind::Transfer, amount, description)))
    }

    pub fn receive_transfer(
        &mut self,
        from: &str,
        amount: Decimal,
        note: Option<&str>,
    ) -> Result<&Transaction, WalletError> {
        if self.owner == from {
            return Err(WalletError::SelfTransfer);
        }
        self.credit(amount)?;
        let description = with_note(format!("Transfer from {}", from), note);
        Ok(self.record(Transaction::new(TransactionKind::Transfer, amount, description)))
    }

    /// A participant pays their share of an event to its organizer.
    pub fn pay_event_share(
        &mut self,
        organizer: &str,
        amount: Decimal,
        event_id: &str,
        event_title: &str,
    ) -> Result<&Transaction, WalletError> {
        if self.owner == organizer {
            return Err(WalletError::SelfTransfer);
        }
        self.debit(amount)?;
        let mut payment = Transaction::new(
            TransactionKind::Payment,
            amount,
            format!("{} - Event Payment", event_title),
        );
        payment.related_event = Some(event_id.to_string());
        Ok(self.record(payment))
    }

    /// The organizer's side of [`Wallet::pay_event_share`].
    pub fn receive_event_share(
        &mut self,
        amount: Decimal,
        event_id: &str,
        event_title: &str,
    ) -> Result<&Transaction, WalletError> {
        self.credit(amount)?;
        let mut credit = Transaction::new(
            TransactionKind::Transfer,
            amount,
            format!("Expense sharing - {}", event_title),
        );
        credit.related_event = Some(event_id.to_string());
        Ok(self.record(credit))
    }

    /// Gives back funds taken by an operation that could not be completed.
    pub fn refund(
        &mut self,
        amount: Decimal,
        description: impl Into<String>,
    ) -> Result<&Transaction, WalletError> {
        self.credit(amount)?;
        Ok(self.record(Transaction::new(TransactionKind::Refund, amount, description)))
    }
}

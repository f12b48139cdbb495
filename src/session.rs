//! One organizer's attempt at splitting one event's cost.
//!
//! The session walks `SelectingEvent -> SelectingParticipants ->
//! ChoosingSplitMethod -> Ready -> Submitted`. Everything before `Submitted`
//! is derived from the current inputs, so editing a ready session leaves it
//! ready with freshly computed amounts. Only `submit` moves it to
//! `Submitted`, after which it rejects every change.

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dispatch::{settlement_request, PaymentDispatcher};
use crate::error::{Error, Result, SettlementError};
use crate::roster::Roster;
use crate::schemas::{
    DispatchReport, Event, EventId, Participant, SettlementRequest, SplitMethod, UserNick,
};
use crate::split::{self, SplitPolicy};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SessionState {
    SelectingEvent,
    SelectingParticipants,
    ChoosingSplitMethod,
    Ready,
    Submitted,
}

#[derive(Clone, Debug)]
struct EventSummary {
    id: EventId,
    title: String,
    organizer: UserNick,
    total_cost: Decimal,
}

#[derive(Clone, Debug)]
pub struct SettlementSession {
    id: Uuid,
    policy: SplitPolicy,
    event: Option<EventSummary>,
    roster: Roster,
    split_method: SplitMethod,
    method_chosen: bool,
    report: Option<DispatchReport>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionView {
    pub id: Uuid,
    pub state: SessionState,
    pub event_id: Option<EventId>,
    pub title: Option<String>,
    pub total_cost: Option<Decimal>,
    pub split_method: SplitMethod,
    /// `None` when the custom amounts add up past what a decimal can hold
    pub requested_total: Option<Decimal>,
    pub participants: Vec<Participant>,
    pub report: Option<DispatchReport>,
}

impl SettlementSession {
    pub fn new(policy: SplitPolicy) -> Self {
        Self {
            id: Uuid::new_v4(),
            policy,
            event: None,
            roster: Roster::default(),
            split_method: SplitMethod::Equal,
            method_chosen: false,
            report: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn split_method(&self) -> SplitMethod {
        self.split_method
    }

    pub fn state(&self) -> SessionState {
        if self.report.is_some() {
            SessionState::Submitted
        } else if self.event.is_none() {
            SessionState::SelectingEvent
        } else if self.roster.selected_unpaid_count() == 0 {
            SessionState::SelectingParticipants
        } else if !self.method_chosen {
            SessionState::ChoosingSplitMethod
        } else {
            SessionState::Ready
        }
    }

    fn ensure_open(&self) -> std::result::Result<(), SettlementError> {
        if self.report.is_some() {
            return Err(SettlementError::SessionClosed);
        }
        Ok(())
    }

    fn total_cost(&self) -> std::result::Result<Decimal, SettlementError> {
        self.event
            .as_ref()
            .map(|event| event.total_cost)
            .ok_or(SettlementError::NoEventSelected)
    }

    /// Re-runs the equal split over the whole roster. With nobody left to
    /// charge every amount is cleared before the error is returned.
    fn recompute(&mut self) -> std::result::Result<(), SettlementError> {
        if self.split_method != SplitMethod::Equal {
            return Ok(());
        }
        let total_cost = self.total_cost()?;
        match split::compute_equal_split(total_cost, &mut self.roster, &self.policy) {
            Ok(_) => Ok(()),
            Err(SettlementError::InsufficientParticipants) => {
                for participant in self.roster.iter_mut() {
                    participant.amount_due = Decimal::ZERO;
                }
                Err(SettlementError::InsufficientParticipants)
            }
            Err(err) => Err(err),
        }
    }

    /// Loads an event snapshot, replacing whatever was selected before.
    ///
    /// Unpaid participants start selected and the split starts equal.
    pub fn select_event(&mut self, event: Event) -> std::result::Result<(), SettlementError> {
        self.ensure_open()?;
        split::check_total_cost(event.total_cost)?;

        self.roster = Roster::from_participants(
            event
                .participants
                .into_iter()
                .map(|p| Participant::new(p.id, p.name, p.has_paid)),
        );
        self.event = Some(EventSummary {
            id: event.id,
            title: event.title,
            organizer: event.organizer,
            total_cost: event.total_cost,
        });
        self.split_method = SplitMethod::Equal;
        self.method_chosen = false;

        match self.recompute() {
            Ok(()) | Err(SettlementError::InsufficientParticipants) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Flips a participant in or out of the request and returns the new flag.
    pub fn toggle_participant(
        &mut self,
        participant_id: &str,
    ) -> std::result::Result<bool, SettlementError> {
        self.ensure_open()?;
        self.total_cost()?;
        let selected = self.roster.toggle_selected(participant_id)?;
        self.recompute()?;
        Ok(selected)
    }

    pub fn choose_split_method(
        &mut self,
        method: SplitMethod,
    ) -> std::result::Result<(), SettlementError> {
        self.ensure_open()?;
        self.total_cost()?;
        self.split_method = method;
        self.method_chosen = true;
        self.recompute()
    }

    /// Typing an amount for someone switches the session to a custom split.
    pub fn set_custom_amount(
        &mut self,
        participant_id: &str,
        raw_amount: &str,
    ) -> std::result::Result<Decimal, SettlementError> {
        self.ensure_open()?;
        self.total_cost()?;
        let amount = split::set_custom_amount(
            &mut self.roster,
            participant_id,
            raw_amount,
            self.policy.amount_parsing,
        )?;
        self.split_method = SplitMethod::Custom;
        self.method_chosen = true;
        Ok(amount)
    }

    pub fn mark_paid(&mut self, participant_id: &str) -> std::result::Result<(), SettlementError> {
        self.ensure_open()?;
        self.total_cost()?;
        self.roster.mark_paid(participant_id)?;
        self.recompute()
    }

    /// Validates the current split and builds the request without sending it.
    pub fn prepare(&self) -> std::result::Result<SettlementRequest, SettlementError> {
        self.ensure_open()?;
        let event = self.event.as_ref().ok_or(SettlementError::NoEventSelected)?;
        let requests = split::validate_and_submit(
            event.total_cost,
            &self.roster,
            self.split_method,
            &self.policy,
        )?;
        Ok(settlement_request(
            self.id,
            event.id.clone(),
            event.organizer.clone(),
            requests,
        ))
    }

    /// Sends the payment requests. The session only closes once every
    /// request has been delivered; otherwise it stays `Ready` and a later
    /// submit of the same split reuses the idempotency key, so only the
    /// missing recipients are sent.
    pub async fn submit(&mut self, dispatcher: &dyn PaymentDispatcher) -> Result<DispatchReport> {
        let request = match self.prepare() {
            Ok(request) => request,
            Err(err) => {
                debug!(session = %self.id, %err, "settlement rejected");
                return Err(err.into());
            }
        };

        let report = dispatcher.dispatch(&request).await?;
        if !report.all_delivered() {
            let missing: Vec<&str> = report
                .outcomes
                .iter()
                .filter(|outcome| !outcome.delivered)
                .map(|outcome| outcome.participant.as_str())
                .collect();
            warn!(session = %self.id, event = %request.event_id, ?missing, "some payment requests were not delivered");
            return Err(Error::Dispatch(format!(
                "not delivered to {}",
                missing.join(", ")
            )));
        }

        info!(
            session = %self.id,
            event = %request.event_id,
            recipients = request.requests.len(),
            replayed = report.replayed,
            "payment requests sent"
        );
        self.report = Some(report.clone());
        Ok(report)
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            id: self.id,
            state: self.state(),
            event_id: self.event.as_ref().map(|event| event.id.clone()),
            title: self.event.as_ref().map(|event| event.title.clone()),
            total_cost: self.event.as_ref().map(|event| event.total_cost),
            split_method: self.split_method,
            requested_total: self.roster.requested_total().ok(),
            participants: self.roster.iter().cloned().collect(),
            report: self.report.clone(),
        }
    }
}

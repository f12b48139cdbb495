//! Participants of one event, keyed by id.
//!
//! Lookups and single-participant updates go through the map; display order
//! is kept in a separate list so it survives updates.

use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::error::SettlementError;
use crate::schemas::{Participant, ParticipantId};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Roster {
    order: Vec<ParticipantId>,
    by_id: HashMap<ParticipantId, Participant>,
}

impl Roster {
    /// Builds a roster; a repeated id keeps its first occurrence.
    pub fn from_participants(participants: impl IntoIterator<Item = Participant>) -> Self {
        let mut roster = Roster::default();
        for participant in participants {
            if roster.by_id.contains_key(&participant.id) {
                continue;
            }
            roster.order.push(participant.id.clone());
            roster.by_id.insert(participant.id.clone(), participant);
        }
        roster
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Participant> {
        self.by_id.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Result<&mut Participant, SettlementError> {
        self.by_id
            .get_mut(id)
            .ok_or_else(|| SettlementError::UnknownParticipant(id.to_string()))
    }

    /// Participants in display order
    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.order.iter().filter_map(|id| self.by_id.get(id))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Participant> {
        self.by_id.values_mut()
    }

    /// Unpaid participants included in the current request, in display order
    pub fn selected_unpaid(&self) -> impl Iterator<Item = &Participant> {
        self.iter().filter(|p| p.owes_share())
    }

    pub fn selected_unpaid_count(&self) -> usize {
        self.selected_unpaid().count()
    }

    /// Sum of what the selected, unpaid participants owe; fails instead of
    /// overflowing.
    pub fn requested_total(&self) -> Result<Decimal, SettlementError> {
        self.selected_unpaid().try_fold(Decimal::ZERO, |total, p| {
            total
                .checked_add(p.amount_due)
                .ok_or_else(|| SettlementError::InvalidAmount(p.amount_due.to_string()))
        })
    }

    /// Flips `selected` and returns the new value. A deselected participant
    /// owes nothing.
    pub fn toggle_selected(&mut self, id: &str) -> Result<bool, SettlementError> {
        let participant = self.get_mut(id)?;
        if participant.has_paid {
            return Err(SettlementError::AlreadyPaid(participant.id.clone()));
        }
        participant.selected = !participant.selected;
        if !participant.selected {
            participant.amount_due = Decimal::ZERO;
        }
        Ok(participant.selected)
    }

    /// Paid participants leave every later split and owe nothing.
    pub fn mark_paid(&mut self, id: &str) -> Result<(), SettlementError> {
        let participant = self.get_mut(id)?;
        participant.has_paid = true;
        participant.selected = false;
        participant.amount_due = Decimal::ZERO;
        Ok(())
    }

    pub fn into_participants(mut self) -> Vec<Participant> {
        self.order
            .iter()
            .filter_map(|id| self.by_id.remove(id))
            .collect()
    }
}

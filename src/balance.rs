use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::SettlementError;
use crate::schemas::ParticipantId;

/// Tolerance used whenever a monetary value is compared to zero.
pub const EPSILON: f64 = 1e-9;

/// A confirmed participant as the calculator sees it.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitParticipant {
    pub id: ParticipantId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_key: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitCost {
    pub participant_id: ParticipantId,
    pub amount: f64,
    #[serde(default)]
    pub description: String,
}

/// Everything the calculator needs about one event, already read from storage.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSnapshot {
    pub participants: Vec<SplitParticipant>,
    pub costs: Vec<SplitCost>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Standing {
    ToReceive,
    ToPay,
    Settled,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantBalance {
    pub participant_id: ParticipantId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_key: Option<String>,
    pub contribution: f64,
    /// Contribution minus share. Positive means the participant is owed money.
    pub balance: f64,
}

impl ParticipantBalance {
    pub fn standing(&self) -> Standing {
        if self.balance > EPSILON {
            Standing::ToReceive
        } else if self.balance < -EPSILON {
            Standing::ToPay
        } else {
            Standing::Settled
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSheet {
    pub total_costs: f64,
    pub share: f64,
    pub balances: Vec<ParticipantBalance>,
}

impl EventSnapshot {
    pub fn balances(&self) -> Result<BalanceSheet, SettlementError> {
        compute_balances(&self.participants, &self.costs)
    }
}

fn check_amount(cost: &SplitCost) -> Result<f64, SettlementError> {
    if cost.amount.is_finite() && cost.amount > 0.0 {
        Ok(cost.amount)
    } else {
        Err(SettlementError::InvalidAmount {
            participant_id: cost.participant_id.clone(),
            amount: cost.amount,
        })
    }
}

/// Splits the event's costs equally between the confirmed participants.
///
/// Entries owned by anyone outside `participants` are ignored, since a
/// participant can keep cost history after being unconfirmed. Balances come
/// back in the order of `participants`.
pub fn compute_balances(
    participants: &[SplitParticipant],
    costs: &[SplitCost],
) -> Result<BalanceSheet, SettlementError> {
    let mut contributions: HashMap<&str, f64> = HashMap::with_capacity(participants.len());
    for participant in participants {
        if contributions.insert(&participant.id, 0.0).is_some() {
            return Err(SettlementError::DuplicateParticipant(participant.id.clone()));
        }
    }

    let mut total_costs = 0.0;
    for cost in costs {
        let amount = check_amount(cost)?;
        if let Some(contribution) = contributions.get_mut(cost.participant_id.as_str()) {
            *contribution += amount;
            total_costs += amount;
        }
    }

    let share = if participants.is_empty() {
        0.0
    } else {
        total_costs / participants.len() as f64
    };

    let balances = participants
        .iter()
        .map(|participant| {
            let contribution = contributions
                .get(participant.id.as_str())
                .copied()
                .unwrap_or_default();
            ParticipantBalance {
                participant_id: participant.id.clone(),
                name: participant.name.clone(),
                contact_key: participant.contact_key.clone(),
                contribution,
                balance: contribution - share,
            }
        })
        .collect();

    Ok(BalanceSheet {
        total_costs,
        share,
        balances,
    })
}

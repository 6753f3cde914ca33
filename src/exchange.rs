use serde::Serialize;

use crate::balance::{
    compute_balances, BalanceSheet, ParticipantBalance, SplitCost, SplitParticipant, Standing,
    EPSILON,
};
use crate::error::SettlementError;
use crate::schemas::ParticipantId;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    pub from: ParticipantId,
    pub to: ParticipantId,
    pub amount: f64,
    /// Payment key of the receiving participant, if they registered one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_key: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    pub total_costs: f64,
    pub share: f64,
    pub balances: Vec<ParticipantBalance>,
    pub transfers: Vec<Transfer>,
}

/// One participant's side of a settlement: who they pay and who pays them.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantPosition {
    #[serde(flatten)]
    pub balance: ParticipantBalance,
    pub standing: Standing,
    pub pays: Vec<Transfer>,
    pub receives: Vec<Transfer>,
}

struct PersonalBalance<'a> {
    entry: &'a ParticipantBalance,
    amount: f64,
    assigned: f64,
}

// Largest first. `sort_by` is stable so equal amounts keep participant order.
fn sorted_by_amount(mut people: Vec<PersonalBalance<'_>>) -> Vec<PersonalBalance<'_>> {
    people.sort_by(|a, b| b.amount.total_cmp(&a.amount));
    people
}

/// Builds the transfers that bring every balance back to zero.
///
/// Debtors are taken from the largest debt down, and each one pays the
/// creditors from the largest credit down until its debt is covered.
/// Balances within [`EPSILON`] of zero take no part.
pub fn plan_transfers(balances: &[ParticipantBalance]) -> Vec<Transfer> {
    let mut payers = Vec::new();
    let mut receivers = Vec::new();

    for entry in balances {
        let person = PersonalBalance {
            entry,
            amount: entry.balance.abs(),
            assigned: 0.0,
        };
        match entry.standing() {
            Standing::ToPay => payers.push(person),
            Standing::ToReceive => receivers.push(person),
            Standing::Settled => {}
        }
    }

    let payers = sorted_by_amount(payers);
    let mut receivers = sorted_by_amount(receivers);
    let mut transfers = Vec::new();

    for payer in &payers {
        let mut remaining = payer.amount;
        for receiver in receivers.iter_mut() {
            if remaining <= EPSILON {
                break;
            }
            let available = receiver.amount - receiver.assigned;
            if available <= EPSILON {
                continue;
            }
            let amount = remaining.min(available);
            receiver.assigned += amount;
            remaining -= amount;
            transfers.push(Transfer {
                from: payer.entry.participant_id.clone(),
                to: receiver.entry.participant_id.clone(),
                amount,
                contact_key: receiver.entry.contact_key.clone(),
            });
        }
    }

    tracing::debug!(
        payers = payers.len(),
        receivers = receivers.len(),
        transfers = transfers.len(),
        "planned settlement"
    );
    transfers
}

/// Computes balances and the transfer plan for one event in a single pass.
pub fn settle(
    participants: &[SplitParticipant],
    costs: &[SplitCost],
) -> Result<Settlement, SettlementError> {
    let BalanceSheet {
        total_costs,
        share,
        balances,
    } = compute_balances(participants, costs)?;
    let transfers = plan_transfers(&balances);
    Ok(Settlement {
        total_costs,
        share,
        balances,
        transfers,
    })
}

fn round_to_2_decimals(n: f64) -> f64 {
    (n * 100.0).round() / 100.0
}

impl Settlement {
    /// Copy rounded to cents for display. Legs that round to nothing are dropped.
    pub fn rounded(&self) -> Settlement {
        Settlement {
            total_costs: round_to_2_decimals(self.total_costs),
            share: round_to_2_decimals(self.share),
            balances: self
                .balances
                .iter()
                .map(|b| ParticipantBalance {
                    contribution: round_to_2_decimals(b.contribution),
                    balance: round_to_2_decimals(b.balance),
                    ..b.clone()
                })
                .collect(),
            transfers: self
                .transfers
                .iter()
                .map(|t| Transfer {
                    amount: round_to_2_decimals(t.amount),
                    ..t.clone()
                })
                .filter(|t| t.amount > 0.0)
                .collect(),
        }
    }

    pub fn payments_owed_by<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Transfer> {
        self.transfers.iter().filter(move |t| t.from == id)
    }

    pub fn payments_due_to<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Transfer> {
        self.transfers.iter().filter(move |t| t.to == id)
    }

    pub fn position_of(&self, id: &str) -> Option<ParticipantPosition> {
        let balance = self.balances.iter().find(|b| b.participant_id == id)?;
        Some(ParticipantPosition {
            balance: balance.clone(),
            standing: balance.standing(),
            pays: self.payments_owed_by(id).cloned().collect(),
            receives: self.payments_due_to(id).cloned().collect(),
        })
    }
}

use serde::Serialize;

use crate::balance::{BalanceSheet, EventSnapshot};
use crate::error::SettlementError;

/// Headline numbers shown next to an event in the event list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSummary {
    pub participant_count: usize,
    pub total_value: f64,
    pub value_per_participant: f64,
}

impl From<&BalanceSheet> for EventSummary {
    fn from(sheet: &BalanceSheet) -> Self {
        EventSummary {
            participant_count: sheet.balances.len(),
            total_value: sheet.total_costs,
            value_per_participant: sheet.share,
        }
    }
}

pub fn summarize_event(snapshot: &EventSnapshot) -> Result<EventSummary, SettlementError> {
    snapshot.balances().map(|sheet| EventSummary::from(&sheet))
}

/// Summaries in the same order as `snapshots`. Stops at the first event
/// whose data is invalid.
pub fn summarize_events<'a, I>(snapshots: I) -> Result<Vec<EventSummary>, SettlementError>
where
    I: IntoIterator<Item = &'a EventSnapshot>,
{
    snapshots.into_iter().map(summarize_event).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::tests::{costs, people};

    #[test]
    fn summarizes_confirmed_participants_only() {
        let snapshot = EventSnapshot {
            participants: people(&["a", "b", "c", "d"]),
            costs: costs(&[("a", 120.0), ("b", 80.0), ("left", 999.0)]),
        };

        let summary = summarize_event(&snapshot).unwrap();
        assert_eq!(
            summary,
            EventSummary {
                participant_count: 4,
                total_value: 200.0,
                value_per_participant: 50.0,
            }
        );
    }

    #[test]
    fn empty_event_has_zero_per_head() {
        let summary = summarize_event(&EventSnapshot::default()).unwrap();
        assert_eq!(summary, EventSummary::default());
    }

    #[test]
    fn batch_keeps_event_order() {
        let snapshots = vec![
            EventSnapshot {
                participants: people(&["a", "b"]),
                costs: costs(&[("a", 10.0)]),
            },
            EventSnapshot::default(),
            EventSnapshot {
                participants: people(&["x"]),
                costs: costs(&[("x", 7.5)]),
            },
        ];

        let totals: Vec<f64> = summarize_events(&snapshots)
            .unwrap()
            .iter()
            .map(|s| s.total_value)
            .collect();
        assert_eq!(totals, vec![10.0, 0.0, 7.5]);
    }

    #[test]
    fn batch_fails_on_invalid_event() {
        let snapshots = [EventSnapshot {
            participants: people(&["a"]),
            costs: costs(&[("a", -5.0)]),
        }];

        assert!(summarize_events(&snapshots).is_err());
    }

    #[test]
    fn serializes_list_view_keys() {
        let json = serde_json::to_value(EventSummary {
            participant_count: 2,
            total_value: 30.0,
            value_per_participant: 15.0,
        })
        .unwrap();

        assert_eq!(json["participantCount"], 2);
        assert_eq!(json["valuePerParticipant"], 15.0);
    }
}

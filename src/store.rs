use bson::{doc, oid::ObjectId, Bson, Document};
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::{
    error::{Error, ErrorKind, Result, WriteFailure},
    options::{FindOneOptions, FindOptions, IndexOptions},
    Client, Collection, Database, IndexModel,
};

use crate::balance::{EventSnapshot, SplitCost, SplitParticipant};
use crate::config::Config;
use crate::schemas::{
    ConfirmationStatus, CostEntry, Event, EventParticipant, EventStatus, NewCost, NewEvent,
    NewParticipant, Participant,
};

const DUPLICATE_KEY: i32 = 11000;
const EVENT_NUMBER_ATTEMPTS: usize = 3;

pub fn new_id() -> String {
    ObjectId::new().to_hex()
}

pub fn is_duplicate_key(err: &Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY
    )
}

fn unique(keys: Document) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().unique(true).build())
        .build()
}

/// Unique indexes per collection. They back the read-then-write checks of
/// the handlers when requests race.
pub fn index_plan() -> Vec<(&'static str, IndexModel)> {
    vec![
        ("Events", unique(doc! { "id": 1 })),
        ("Events", unique(doc! { "number": 1 })),
        ("Participants", unique(doc! { "id": 1 })),
        ("Participants", unique(doc! { "name": 1 })),
        ("EventParticipants", unique(doc! { "eventId": 1, "participantId": 1 })),
        ("CostEntries", unique(doc! { "id": 1 })),
    ]
}

/// Thin wrapper over the OpenSplit database. Every method is one or two
/// round trips, and nothing is cached between calls.
#[derive(Clone, Debug)]
pub struct Store {
    db: Database,
}

impl Store {
    pub async fn connect(config: &Config) -> Result<Self> {
        let client = Client::with_uri_str(&config.mongodb_uri).await?;
        Ok(Store {
            db: client.database(&config.database),
        })
    }

    pub async fn ensure_indexes(&self) -> Result<()> {
        for (collection, index) in index_plan() {
            self.db
                .collection::<Document>(collection)
                .create_index(index, None)
                .await?;
        }
        tracing::info!("storage indexes ready");
        Ok(())
    }

    fn events(&self) -> Collection<Event> {
        self.db.collection("Events")
    }

    fn participants(&self) -> Collection<Participant> {
        self.db.collection("Participants")
    }

    fn event_participants(&self) -> Collection<EventParticipant> {
        self.db.collection("EventParticipants")
    }

    fn costs(&self) -> Collection<CostEntry> {
        self.db.collection("CostEntries")
    }

    // Events

    async fn next_event_number(&self) -> Result<i64> {
        let last = self
            .events()
            .find_one(
                None,
                FindOneOptions::builder().sort(doc! { "number": -1 }).build(),
            )
            .await?;
        Ok(last.map_or(1, |event| event.number + 1))
    }

    /// Numbers are max + 1. A concurrent insert that takes the same number
    /// trips the unique index, and the number is read again.
    pub async fn create_event(&self, new_event: NewEvent) -> Result<Event> {
        let mut attempt = 1;
        loop {
            let event = Event {
                id: new_id(),
                number: self.next_event_number().await?,
                title: new_event.title.clone(),
                description: new_event.description.clone(),
                date: new_event.date,
                status: EventStatus::Active,
                created_at: Utc::now(),
            };
            match self.events().insert_one(&event, None).await {
                Ok(_) => return Ok(event),
                Err(err) if is_duplicate_key(&err) && attempt < EVENT_NUMBER_ATTEMPTS => {
                    tracing::debug!(number = event.number, attempt, "event number taken, retrying");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub async fn list_events(&self) -> Result<Vec<Event>> {
        let options = FindOptions::builder().sort(doc! { "number": -1 }).build();
        self.events().find(None, options).await?.try_collect().await
    }

    pub async fn find_event(&self, id: &str) -> Result<Option<Event>> {
        self.events().find_one(doc! { "id": id }, None).await
    }

    pub async fn update_event(&self, id: &str, update: Document) -> Result<Option<Event>> {
        let result = self
            .events()
            .update_one(doc! { "id": id }, doc! { "$set": update }, None)
            .await?;
        if result.matched_count == 0 {
            return Ok(None);
        }
        self.find_event(id).await
    }

    pub async fn rename_event(&self, id: &str, title: &str) -> Result<Option<Event>> {
        self.update_event(id, doc! { "title": title }).await
    }

    pub async fn set_event_status(&self, id: &str, status: EventStatus) -> Result<Option<Event>> {
        self.update_event(id, doc! { "status": status.as_str() }).await
    }

    // Participants

    pub async fn list_participants(&self) -> Result<Vec<Participant>> {
        let options = FindOptions::builder().sort(doc! { "name": 1 }).build();
        self.participants().find(None, options).await?.try_collect().await
    }

    pub async fn find_participant(&self, id: &str) -> Result<Option<Participant>> {
        self.participants().find_one(doc! { "id": id }, None).await
    }

    pub async fn find_participant_by_name(&self, name: &str) -> Result<Option<Participant>> {
        self.participants().find_one(doc! { "name": name }, None).await
    }

    pub async fn create_participant(&self, new_participant: NewParticipant) -> Result<Participant> {
        let participant = Participant {
            id: new_id(),
            name: new_participant.name,
            contact_key: new_participant.contact_key,
            created_at: Utc::now(),
        };
        self.participants().insert_one(&participant, None).await?;
        Ok(participant)
    }

    /// `contact_key` of `Some(None)` removes the stored key.
    pub async fn update_participant(
        &self,
        id: &str,
        name: Option<String>,
        contact_key: Option<Option<String>>,
    ) -> Result<Option<Participant>> {
        let mut update = Document::new();
        if let Some(name) = name {
            update.insert("name", name);
        }
        if let Some(contact_key) = contact_key {
            update.insert("contactKey", contact_key.map_or(Bson::Null, Bson::String));
        }
        let result = self
            .participants()
            .update_one(doc! { "id": id }, doc! { "$set": update }, None)
            .await?;
        if result.matched_count == 0 {
            return Ok(None);
        }
        self.find_participant(id).await
    }

    /// Removes the participant together with their confirmations and costs.
    pub async fn delete_participant(&self, id: &str) -> Result<bool> {
        self.event_participants()
            .delete_many(doc! { "participantId": id }, None)
            .await?;
        self.costs()
            .delete_many(doc! { "participantId": id }, None)
            .await?;
        let result = self.participants().delete_one(doc! { "id": id }, None).await?;
        Ok(result.deleted_count > 0)
    }

    /// Finished events the participant has a record or a cost entry in.
    pub async fn finished_events_of(&self, participant_id: &str) -> Result<Vec<Event>> {
        let filter = doc! { "participantId": participant_id };
        let event_participants = self.event_participants();
        let costs = self.costs();
        let (records, costs) = tokio::try_join!(
            event_participants.distinct("eventId", filter.clone(), None),
            costs.distinct("eventId", filter, None)
        )?;
        let event_ids: Vec<Bson> = records.into_iter().chain(costs).collect();
        let filter = doc! {
            "id": { "$in": event_ids },
            "status": EventStatus::Finished.as_str(),
        };
        let options = FindOptions::builder().sort(doc! { "number": 1 }).build();
        self.events().find(filter, options).await?.try_collect().await
    }

    // Event participants

    pub async fn list_event_participants(&self, event_id: &str) -> Result<Vec<EventParticipant>> {
        let options = FindOptions::builder().sort(doc! { "createdAt": 1, "id": 1 }).build();
        self.event_participants()
            .find(doc! { "eventId": event_id }, options)
            .await?
            .try_collect()
            .await
    }

    pub async fn find_event_participant(
        &self,
        event_id: &str,
        participant_id: &str,
    ) -> Result<Option<EventParticipant>> {
        self.event_participants()
            .find_one(
                doc! { "eventId": event_id, "participantId": participant_id },
                None,
            )
            .await
    }

    pub async fn add_event_participant(
        &self,
        event_id: &str,
        participant_id: &str,
    ) -> Result<EventParticipant> {
        let record = EventParticipant {
            id: new_id(),
            event_id: event_id.to_string(),
            participant_id: participant_id.to_string(),
            status: ConfirmationStatus::Confirmed,
            created_at: Utc::now(),
        };
        self.event_participants().insert_one(&record, None).await?;
        Ok(record)
    }

    pub async fn set_confirmation_status(
        &self,
        event_id: &str,
        participant_id: &str,
        status: ConfirmationStatus,
    ) -> Result<Option<EventParticipant>> {
        let filter = doc! { "eventId": event_id, "participantId": participant_id };
        let result = self
            .event_participants()
            .update_one(filter, doc! { "$set": { "status": status.as_str() } }, None)
            .await?;
        if result.matched_count == 0 {
            return Ok(None);
        }
        self.find_event_participant(event_id, participant_id).await
    }

    pub async fn remove_event_participant(
        &self,
        event_id: &str,
        participant_id: &str,
    ) -> Result<bool> {
        let result = self
            .event_participants()
            .delete_one(
                doc! { "eventId": event_id, "participantId": participant_id },
                None,
            )
            .await?;
        Ok(result.deleted_count > 0)
    }

    // Costs

    pub async fn list_costs(&self, event_id: &str) -> Result<Vec<CostEntry>> {
        let options = FindOptions::builder().sort(doc! { "createdAt": 1, "id": 1 }).build();
        self.costs()
            .find(doc! { "eventId": event_id }, options)
            .await?
            .try_collect()
            .await
    }

    fn cost_entry(event_id: &str, participant_id: &str, cost: NewCost) -> CostEntry {
        CostEntry {
            id: new_id(),
            event_id: event_id.to_string(),
            participant_id: participant_id.to_string(),
            amount: cost.amount,
            description: cost.description,
            created_at: Utc::now(),
        }
    }

    pub async fn add_cost(
        &self,
        event_id: &str,
        participant_id: &str,
        cost: NewCost,
    ) -> Result<CostEntry> {
        let entry = Self::cost_entry(event_id, participant_id, cost);
        self.costs().insert_one(&entry, None).await?;
        Ok(entry)
    }

    /// Replaces every cost entry the participant has in the event.
    pub async fn replace_costs(
        &self,
        event_id: &str,
        participant_id: &str,
        costs: Vec<NewCost>,
    ) -> Result<Vec<CostEntry>> {
        self.costs()
            .delete_many(
                doc! { "eventId": event_id, "participantId": participant_id },
                None,
            )
            .await?;
        let entries: Vec<CostEntry> = costs
            .into_iter()
            .map(|cost| Self::cost_entry(event_id, participant_id, cost))
            .collect();
        // insert_many rejects an empty batch
        if !entries.is_empty() {
            self.costs().insert_many(&entries, None).await?;
        }
        Ok(entries)
    }

    pub async fn delete_cost(&self, event_id: &str, cost_id: &str) -> Result<bool> {
        let result = self
            .costs()
            .delete_one(doc! { "eventId": event_id, "id": cost_id }, None)
            .await?;
        Ok(result.deleted_count > 0)
    }

    // Snapshots

    async fn confirmed_records(&self, event_id: &str) -> Result<Vec<EventParticipant>> {
        let filter = doc! {
            "eventId": event_id,
            "status": ConfirmationStatus::Confirmed.as_str(),
        };
        self.event_participants()
            .find(filter, None)
            .await?
            .try_collect()
            .await
    }

    /// Reads the confirmed participants and costs of an event, normalized for
    /// the calculator. Participants come back sorted by name.
    pub async fn snapshot(&self, event_id: &str) -> Result<EventSnapshot> {
        let (records, costs) =
            tokio::try_join!(self.confirmed_records(event_id), self.list_costs(event_id))?;

        let ids: Vec<&str> = records.iter().map(|r| r.participant_id.as_str()).collect();
        let options = FindOptions::builder().sort(doc! { "name": 1, "id": 1 }).build();
        let participants: Vec<Participant> = self
            .participants()
            .find(doc! { "id": { "$in": ids } }, options)
            .await?
            .try_collect()
            .await?;

        Ok(EventSnapshot {
            participants: participants
                .into_iter()
                .map(|p| SplitParticipant {
                    id: p.id,
                    name: p.name,
                    contact_key: p.contact_key,
                })
                .collect(),
            costs: costs
                .into_iter()
                .map(|c| SplitCost {
                    participant_id: c.participant_id,
                    amount: c.amount,
                    description: c.description,
                })
                .collect(),
        })
    }
}

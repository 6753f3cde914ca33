use actix_web::{
    delete, error::JsonPayloadError, get, patch, post, put, web, HttpRequest, HttpResponse,
};
use futures::future::try_join_all;
use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::exchange::settle;
use crate::schemas::{
    Event, EventParticipant, EventPatch, EventStatus, NewCost, NewEvent, NewParticipant,
    Participant, ParticipantPatch,
};
use crate::store::Store;
use crate::summary::{summarize_event, summarize_events, EventSummary};

#[derive(Serialize)]
struct EventOverview {
    #[serde(flatten)]
    event: Event,
    #[serde(flatten)]
    summary: EventSummary,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EventParticipantView {
    #[serde(flatten)]
    record: EventParticipant,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    contact_key: Option<String>,
}

async fn existing_event(store: &Store, id: &str) -> ApiResult<Event> {
    store.find_event(id).await?.ok_or(ApiError::NotFound("event"))
}

// Finished events are read-only
fn ensure_active(event: &Event) -> ApiResult<()> {
    if event.status == EventStatus::Finished {
        return Err(ApiError::Conflict(format!("event #{} is finished", event.number)));
    }
    Ok(())
}

async fn active_event(store: &Store, id: &str) -> ApiResult<Event> {
    let event = existing_event(store, id).await?;
    ensure_active(&event)?;
    Ok(event)
}

async fn existing_participant(store: &Store, id: &str) -> ApiResult<Participant> {
    store
        .find_participant(id)
        .await?
        .ok_or(ApiError::NotFound("participant"))
}

fn ensure_name_free(found: Option<&Participant>, except: Option<&str>) -> ApiResult<()> {
    match found {
        Some(other) if Some(other.id.as_str()) != except => Err(ApiError::Conflict(format!(
            "a participant named {} already exists",
            other.name
        ))),
        _ => Ok(()),
    }
}

async fn ensure_unique_name(store: &Store, name: &str, except: Option<&str>) -> ApiResult<()> {
    let found = store.find_participant_by_name(name).await?;
    ensure_name_free(found.as_ref(), except)
}

fn ensure_not_member(record: Option<&EventParticipant>) -> ApiResult<()> {
    match record {
        Some(_) => Err(ApiError::Conflict(
            "participant is already part of the event".into(),
        )),
        None => Ok(()),
    }
}

fn ensure_member(record: Option<EventParticipant>) -> ApiResult<EventParticipant> {
    record.ok_or(ApiError::NotFound("event participant"))
}

// Deleting cascades into every event, so finished ones must not be touched
fn ensure_deletable(finished: &[Event]) -> ApiResult<()> {
    if finished.is_empty() {
        return Ok(());
    }
    let numbers: Vec<String> = finished.iter().map(|e| format!("#{}", e.number)).collect();
    Err(ApiError::Conflict(format!(
        "participant belongs to finished events {}",
        numbers.join(", ")
    )))
}

pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    ApiError::BadRequest(err.to_string()).into()
}

#[get("/health")]
async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[post("/events")]
async fn create_event(store: web::Data<Store>, json: web::Json<NewEvent>) -> ApiResult<HttpResponse> {
    let event = store.create_event(json.into_inner().validated()?).await?;
    tracing::info!(event_id = %event.id, number = event.number, "event created");
    Ok(HttpResponse::Created().json(event))
}

#[get("/events")]
async fn list_events(store: web::Data<Store>) -> ApiResult<HttpResponse> {
    let events = store.list_events().await?;
    let snapshots = try_join_all(events.iter().map(|event| store.snapshot(&event.id))).await?;
    let summaries = summarize_events(&snapshots)?;
    let overview: Vec<EventOverview> = events
        .into_iter()
        .zip(summaries)
        .map(|(event, summary)| EventOverview { event, summary })
        .collect();
    Ok(HttpResponse::Ok().json(overview))
}

#[get("/events/{id}")]
async fn get_event(store: web::Data<Store>, id: web::Path<String>) -> ApiResult<HttpResponse> {
    let event = existing_event(&store, &id).await?;
    let summary = summarize_event(&store.snapshot(&event.id).await?)?;
    Ok(HttpResponse::Ok().json(EventOverview { event, summary }))
}

#[patch("/events/{id}")]
async fn rename_event(
    store: web::Data<Store>,
    id: web::Path<String>,
    json: web::Json<EventPatch>,
) -> ApiResult<HttpResponse> {
    let patch = json.into_inner().validated()?;
    let event = store
        .rename_event(&id, &patch.title)
        .await?
        .ok_or(ApiError::NotFound("event"))?;
    tracing::info!(event_id = %event.id, "event renamed");
    Ok(HttpResponse::Ok().json(event))
}

async fn change_event_status(store: &Store, id: &str, status: EventStatus) -> ApiResult<HttpResponse> {
    let event = store
        .set_event_status(id, status)
        .await?
        .ok_or(ApiError::NotFound("event"))?;
    tracing::info!(event_id = %event.id, status = status.as_str(), "event status changed");
    Ok(HttpResponse::Ok().json(event))
}

#[post("/events/{id}/finish")]
async fn finish_event(store: web::Data<Store>, id: web::Path<String>) -> ApiResult<HttpResponse> {
    change_event_status(&store, &id, EventStatus::Finished).await
}

#[post("/events/{id}/reopen")]
async fn reopen_event(store: web::Data<Store>, id: web::Path<String>) -> ApiResult<HttpResponse> {
    change_event_status(&store, &id, EventStatus::Active).await
}

#[get("/participants")]
async fn list_participants(store: web::Data<Store>) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(store.list_participants().await?))
}

#[post("/participants")]
async fn create_participant(
    store: web::Data<Store>,
    json: web::Json<NewParticipant>,
) -> ApiResult<HttpResponse> {
    let new_participant = json.into_inner().validated()?;
    ensure_unique_name(&store, &new_participant.name, None).await?;
    let participant = store.create_participant(new_participant).await?;
    tracing::info!(participant_id = %participant.id, "participant created");
    Ok(HttpResponse::Created().json(participant))
}

#[patch("/participants/{id}")]
async fn update_participant(
    store: web::Data<Store>,
    id: web::Path<String>,
    json: web::Json<ParticipantPatch>,
) -> ApiResult<HttpResponse> {
    let (name, contact_key) = json.into_inner().validated()?;
    if let Some(name) = &name {
        ensure_unique_name(&store, name, Some(id.as_str())).await?;
    }
    let participant = store
        .update_participant(&id, name, contact_key)
        .await?
        .ok_or(ApiError::NotFound("participant"))?;
    Ok(HttpResponse::Ok().json(participant))
}

#[delete("/participants/{id}")]
async fn delete_participant(store: web::Data<Store>, id: web::Path<String>) -> ApiResult<HttpResponse> {
    existing_participant(&store, &id).await?;
    ensure_deletable(&store.finished_events_of(&id).await?)?;
    if !store.delete_participant(&id).await? {
        return Err(ApiError::NotFound("participant"));
    }
    tracing::info!(participant_id = %id, "participant deleted");
    Ok(HttpResponse::NoContent().finish())
}

#[get("/events/{id}/participants")]
async fn list_event_participants(
    store: web::Data<Store>,
    id: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let event = existing_event(&store, &id).await?;
    let records = store.list_event_participants(&event.id).await?;
    let participants = store.list_participants().await?;

    let mut views: Vec<EventParticipantView> = records
        .into_iter()
        .filter_map(|record| {
            let participant = participants.iter().find(|p| p.id == record.participant_id)?;
            Some(EventParticipantView {
                name: participant.name.clone(),
                contact_key: participant.contact_key.clone(),
                record,
            })
        })
        .collect();
    views.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(HttpResponse::Ok().json(views))
}

#[put("/events/{id}/participants/{participant_id}")]
async fn add_event_participant(
    store: web::Data<Store>,
    path: web::Path<(String, String)>,
) -> ApiResult<HttpResponse> {
    let (event_id, participant_id) = path.into_inner();
    active_event(&store, &event_id).await?;
    existing_participant(&store, &participant_id).await?;
    let existing = store
        .find_event_participant(&event_id, &participant_id)
        .await?;
    ensure_not_member(existing.as_ref())?;
    let record = store.add_event_participant(&event_id, &participant_id).await?;
    tracing::info!(%event_id, %participant_id, "participant added to event");
    Ok(HttpResponse::Created().json(record))
}

#[post("/events/{id}/participants/{participant_id}/toggle")]
async fn toggle_event_participant(
    store: web::Data<Store>,
    path: web::Path<(String, String)>,
) -> ApiResult<HttpResponse> {
    let (event_id, participant_id) = path.into_inner();
    active_event(&store, &event_id).await?;
    let record = ensure_member(
        store
            .find_event_participant(&event_id, &participant_id)
            .await?,
    )?;
    let status = record.status.toggled();
    let record = store
        .set_confirmation_status(&event_id, &participant_id, status)
        .await?
        .ok_or(ApiError::NotFound("event participant"))?;
    tracing::info!(%event_id, %participant_id, status = status.as_str(), "confirmation toggled");
    Ok(HttpResponse::Ok().json(record))
}

#[delete("/events/{id}/participants/{participant_id}")]
async fn remove_event_participant(
    store: web::Data<Store>,
    path: web::Path<(String, String)>,
) -> ApiResult<HttpResponse> {
    let (event_id, participant_id) = path.into_inner();
    active_event(&store, &event_id).await?;
    if !store
        .remove_event_participant(&event_id, &participant_id)
        .await?
    {
        return Err(ApiError::NotFound("event participant"));
    }
    tracing::info!(%event_id, %participant_id, "participant removed from event");
    Ok(HttpResponse::NoContent().finish())
}

#[get("/events/{id}/costs")]
async fn list_costs(store: web::Data<Store>, id: web::Path<String>) -> ApiResult<HttpResponse> {
    let event = existing_event(&store, &id).await?;
    Ok(HttpResponse::Ok().json(store.list_costs(&event.id).await?))
}

async fn cost_target(store: &Store, event_id: &str, participant_id: &str) -> ApiResult<()> {
    active_event(store, event_id).await?;
    ensure_member(store.find_event_participant(event_id, participant_id).await?)?;
    Ok(())
}

#[post("/events/{id}/participants/{participant_id}/costs")]
async fn add_cost(
    store: web::Data<Store>,
    path: web::Path<(String, String)>,
    json: web::Json<NewCost>,
) -> ApiResult<HttpResponse> {
    let (event_id, participant_id) = path.into_inner();
    let cost = json.into_inner().validated()?;
    cost_target(&store, &event_id, &participant_id).await?;
    let entry = store.add_cost(&event_id, &participant_id, cost).await?;
    tracing::info!(%event_id, %participant_id, amount = entry.amount, "cost added");
    Ok(HttpResponse::Created().json(entry))
}

#[put("/events/{id}/participants/{participant_id}/costs")]
async fn replace_costs(
    store: web::Data<Store>,
    path: web::Path<(String, String)>,
    json: web::Json<Vec<NewCost>>,
) -> ApiResult<HttpResponse> {
    let (event_id, participant_id) = path.into_inner();
    let costs = json
        .into_inner()
        .into_iter()
        .map(NewCost::validated)
        .collect::<Result<Vec<_>, _>>()?;
    cost_target(&store, &event_id, &participant_id).await?;
    let entries = store
        .replace_costs(&event_id, &participant_id, costs)
        .await?;
    tracing::info!(%event_id, %participant_id, entries = entries.len(), "costs replaced");
    Ok(HttpResponse::Ok().json(entries))
}

#[delete("/events/{id}/costs/{cost_id}")]
async fn delete_cost(
    store: web::Data<Store>,
    path: web::Path<(String, String)>,
) -> ApiResult<HttpResponse> {
    let (event_id, cost_id) = path.into_inner();
    active_event(&store, &event_id).await?;
    if !store.delete_cost(&event_id, &cost_id).await? {
        return Err(ApiError::NotFound("cost entry"));
    }
    tracing::info!(%event_id, %cost_id, "cost deleted");
    Ok(HttpResponse::NoContent().finish())
}

#[get("/events/{id}/settlement")]
async fn get_settlement(store: web::Data<Store>, id: web::Path<String>) -> ApiResult<HttpResponse> {
    let event = existing_event(&store, &id).await?;
    let snapshot = store.snapshot(&event.id).await?;
    let settlement = settle(&snapshot.participants, &snapshot.costs)?;
    Ok(HttpResponse::Ok().json(settlement.rounded()))
}

#[get("/events/{id}/settlement/{participant_id}")]
async fn get_participant_settlement(
    store: web::Data<Store>,
    path: web::Path<(String, String)>,
) -> ApiResult<HttpResponse> {
    let (event_id, participant_id) = path.into_inner();
    let event = existing_event(&store, &event_id).await?;
    let snapshot = store.snapshot(&event.id).await?;
    let position = settle(&snapshot.participants, &snapshot.costs)?
        .rounded()
        .position_of(&participant_id)
        .ok_or(ApiError::NotFound("confirmed participant"))?;
    Ok(HttpResponse::Ok().json(position))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error_handler))
        .service(health)
        .service(create_event)
        .service(list_events)
        .service(get_event)
        .service(rename_event)
        .service(finish_event)
        .service(reopen_event)
        .service(list_participants)
        .service(create_participant)
        .service(update_participant)
        .service(delete_participant)
        .service(list_event_participants)
        .service(add_event_participant)
        .service(toggle_event_participant)
        .service(remove_event_participant)
        .service(list_costs)
        .service(add_cost)
        .service(replace_costs)
        .service(delete_cost)
        .service(get_settlement)
        .service(get_participant_settlement);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use actix_web::{body::to_bytes, http::StatusCode, test as actix_test, App, ResponseError};
    use chrono::Utc;
    use rstest::rstest;

    fn event(number: i64, status: EventStatus) -> Event {
        Event {
            id: format!("e{number}"),
            number,
            title: "Churrasco".into(),
            description: String::new(),
            date: Utc::now(),
            status,
            created_at: Utc::now(),
        }
    }

    fn participant(id: &str, name: &str) -> Participant {
        Participant {
            id: id.into(),
            name: name.into(),
            contact_key: None,
            created_at: Utc::now(),
        }
    }

    fn membership(event_id: &str, participant_id: &str) -> EventParticipant {
        EventParticipant {
            id: "ep1".into(),
            event_id: event_id.into(),
            participant_id: participant_id.into(),
            status: crate::schemas::ConfirmationStatus::Confirmed,
            created_at: Utc::now(),
        }
    }

    // The driver connects lazily, so requests rejected before any query
    // never need a running database.
    async fn offline_store() -> Store {
        let config = Config::from_lookup(|key| {
            (key == "MONGODB_URI").then(|| "mongodb://127.0.0.1:1".to_string())
        })
        .unwrap();
        Store::connect(&config).await.unwrap()
    }

    fn status_of(result: ApiResult<impl Sized>) -> u16 {
        match result {
            Ok(_) => 200,
            Err(err) => err.status_code().as_u16(),
        }
    }

    #[actix_web::test]
    async fn health_answers_without_storage() {
        let app = actix_test::init_service(App::new().configure(configure)).await;

        let request = actix_test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, request).await;
        assert_eq!(body["status"], "ok");
    }

    #[rstest]
    #[case::blank_participant_name("POST", "/participants", r#"{"name": "   "}"#)]
    #[case::empty_participant_patch("PATCH", "/participants/p1", r#"{}"#)]
    #[case::blank_event_title(
        "POST",
        "/events",
        r#"{"title": "", "date": "2024-05-01T18:00:00Z"}"#
    )]
    #[case::negative_cost(
        "POST",
        "/events/e1/participants/p1/costs",
        r#"{"amount": -10.0, "description": "drinks"}"#
    )]
    #[case::zero_cost_in_batch(
        "PUT",
        "/events/e1/participants/p1/costs",
        r#"[{"amount": 5.0, "description": "ice"}, {"amount": 0.0, "description": "bread"}]"#
    )]
    #[case::cost_without_description(
        "POST",
        "/events/e1/participants/p1/costs",
        r#"{"amount": 10.0, "description": " "}"#
    )]
    #[case::malformed_json("POST", "/participants", r#"{"name": "#)]
    #[actix_web::test]
    async fn invalid_requests_are_rejected_before_storage(
        #[case] method: &str,
        #[case] uri: &str,
        #[case] body: &'static str,
    ) {
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(offline_store().await))
                .configure(configure),
        )
        .await;

        let request = actix_test::TestRequest::default()
            .method(method.parse().unwrap())
            .uri(uri)
            .insert_header(("content-type", "application/json"))
            .set_payload(body)
            .to_request();
        let response = actix_test::call_service(&app, request).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = actix_test::read_body_json(response).await;
        assert_eq!(body["code"], 400);
    }

    #[actix_web::test]
    async fn json_errors_use_the_api_error_body() {
        let request = actix_test::TestRequest::default().to_http_request();
        let error = json_error_handler(JsonPayloadError::ContentType, &request);

        let response = error.as_response_error().error_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["code"], 400);
    }

    #[rstest]
    #[case::active(EventStatus::Active, 200)]
    #[case::finished(EventStatus::Finished, 409)]
    fn only_active_events_accept_changes(#[case] status: EventStatus, #[case] expected: u16) {
        assert_eq!(status_of(ensure_active(&event(4, status))), expected);
    }

    #[test]
    fn finished_event_conflict_names_the_event() {
        let err = ensure_active(&event(7, EventStatus::Finished)).unwrap_err();
        assert_eq!(err.to_string(), "event #7 is finished");
    }

    #[test]
    fn adding_a_member_twice_conflicts() {
        assert_eq!(status_of(ensure_not_member(None)), 200);
        assert_eq!(status_of(ensure_not_member(Some(&membership("e1", "p1")))), 409);
    }

    #[test]
    fn costs_need_an_event_membership() {
        assert_eq!(status_of(ensure_member(None)), 404);
        let record = ensure_member(Some(membership("e1", "p1"))).unwrap();
        assert_eq!(record.participant_id, "p1");
    }

    #[rstest]
    #[case::free_name(None, None, 200)]
    #[case::taken_by_other(Some("p2"), None, 409)]
    #[case::taken_by_other_on_rename(Some("p2"), Some("p1"), 409)]
    #[case::renaming_to_own_name(Some("p1"), Some("p1"), 200)]
    fn participant_names_stay_unique(
        #[case] owner: Option<&str>,
        #[case] except: Option<&str>,
        #[case] expected: u16,
    ) {
        let found = owner.map(|id| participant(id, "Ana"));
        assert_eq!(status_of(ensure_name_free(found.as_ref(), except)), expected);
    }

    #[test]
    fn participants_of_finished_events_cannot_be_deleted() {
        assert_eq!(status_of(ensure_deletable(&[])), 200);

        let finished = [event(2, EventStatus::Finished), event(5, EventStatus::Finished)];
        let err = ensure_deletable(&finished).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            err.to_string(),
            "participant belongs to finished events #2, #5"
        );
    }

    #[test]
    fn overview_flattens_event_and_summary() {
        let json = serde_json::to_value(EventOverview {
            event: event(3, EventStatus::Active),
            summary: EventSummary {
                participant_count: 2,
                total_value: 80.0,
                value_per_participant: 40.0,
            },
        })
        .unwrap();

        assert_eq!(json["number"], 3);
        assert_eq!(json["status"], "active");
        assert_eq!(json["valuePerParticipant"], 40.0);
    }
}

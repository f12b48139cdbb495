use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use actix_web::{
    delete, get, http::StatusCode, post, put, web, HttpResponse, ResponseError,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::dispatch::{EventStore, PaymentDispatcher, WalletStore};
use crate::error::{Error, Result, SettlementError, WalletError};
use crate::schemas::{Event, Participant, SplitMethod, UserNick};
use crate::session::{SessionView, SettlementSession};
use crate::split::{self, SplitPolicy};
use crate::wallet::parse_positive_amount;

const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);

type SessionHandle = Arc<Mutex<SettlementSession>>;

struct SessionEntry {
    session: SessionHandle,
    last_used: Instant,
}

pub struct AppState {
    pub events: Arc<dyn EventStore>,
    pub payments: Arc<dyn PaymentDispatcher>,
    pub wallets: Arc<dyn WalletStore>,
    pub policy: SplitPolicy,
    /// The map lock is only held to look a session up; each session has its
    /// own lock for the duration of a request.
    sessions: Mutex<HashMap<Uuid, SessionEntry>>,
    session_ttl: Duration,
}

impl AppState {
    pub fn new(
        events: Arc<dyn EventStore>,
        payments: Arc<dyn PaymentDispatcher>,
        wallets: Arc<dyn WalletStore>,
        policy: SplitPolicy,
    ) -> Self {
        Self {
            events,
            payments,
            wallets,
            policy,
            sessions: Mutex::new(HashMap::new()),
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }

    /// Sessions untouched for longer than `ttl` are dropped by
    /// [`AppState::evict_expired`].
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    async fn session(&self, id: Uuid) -> Result<SessionHandle> {
        let mut sessions = self.sessions.lock().await;
        let entry = sessions.get_mut(&id).ok_or_else(|| session_not_found(id))?;
        entry.last_used = Instant::now();
        Ok(entry.session.clone())
    }

    async fn insert_session(&self, session: SettlementSession) {
        self.sessions.lock().await.insert(
            session.id(),
            SessionEntry {
                session: Arc::new(Mutex::new(session)),
                last_used: Instant::now(),
            },
        );
    }

    /// Drops idle sessions and returns how many went.
    pub async fn evict_expired(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        let ttl = self.session_ttl;
        sessions.retain(|_, entry| entry.last_used.elapsed() < ttl);
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(evicted, remaining = sessions.len(), "idle settlement sessions evicted");
        }
        evicted
    }
}

#[derive(Serialize)]
struct ErrorJson {
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    delta: Option<Decimal>,
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::Settlement(SettlementError::SessionClosed)
            | Error::Settlement(SettlementError::DuplicateParticipant(_))
            | Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Settlement(SettlementError::UnknownParticipant(_))
            | Error::Settlement(SettlementError::NoPaymentRequest(_))
            | Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Settlement(_) | Error::Wallet(_) => StatusCode::BAD_REQUEST,
            Error::Dispatch(_) => StatusCode::BAD_GATEWAY,
            Error::Database(_) | Error::Serialization(_) | Error::Config(_) | Error::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            error!(kind = self.kind(), "{}", self);
        } else {
            debug!(kind = self.kind(), "{}", self);
        }
        let delta = match self {
            Error::Settlement(SettlementError::SplitMismatch { delta, .. }) => Some(*delta),
            _ => None,
        };
        HttpResponse::build(status).json(ErrorJson {
            kind: self.kind(),
            message: self.to_string(),
            delta,
        })
    }
}

fn session_not_found(id: Uuid) -> Error {
    Error::NotFound(format!("settlement session {}", id))
}

async fn update_session<T>(
    state: &AppState,
    id: Uuid,
    change: impl FnOnce(&mut SettlementSession) -> std::result::Result<T, SettlementError>,
) -> Result<SessionView> {
    let handle = state.session(id).await?;
    let mut session = handle.lock().await;
    change(&mut session)?;
    Ok(session.view())
}

#[derive(Deserialize, Serialize)]
struct EventJson {
    title: String,
    organizer: UserNick,
    total_cost: Decimal,
}

#[put("/events/{id}")]
async fn add_event(
    state: web::Data<AppState>,
    id: web::Path<String>,
    json: web::Json<EventJson>,
) -> Result<HttpResponse> {
    let json = json.into_inner();
    split::check_total_cost(json.total_cost)?;
    let event = Event {
        id: id.into_inner(),
        title: json.title,
        organizer: json.organizer,
        total_cost: json.total_cost,
        participants: vec![],
    };
    state.events.insert_event(&event).await?;
    info!(event = %event.id, total_cost = %event.total_cost, "event added");
    Ok(HttpResponse::Created().json(event))
}

#[get("/events/{id}")]
async fn get_event(state: web::Data<AppState>, id: web::Path<String>) -> Result<HttpResponse> {
    let id = id.into_inner();
    match state.events.fetch_event(&id).await? {
        Some(event) => Ok(HttpResponse::Ok().json(event)),
        None => Err(Error::NotFound(format!("event {}", id))),
    }
}

#[derive(Deserialize, Serialize)]
struct ParticipantJson {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    has_paid: bool,
}

#[post("/events/{id}/participants")]
async fn add_participant(
    state: web::Data<AppState>,
    id: web::Path<String>,
    json: web::Json<ParticipantJson>,
) -> Result<HttpResponse> {
    let json = json.into_inner();
    let participant = Participant::new(json.id, json.name, json.has_paid);
    state
        .events
        .add_participant(&id.into_inner(), &participant)
        .await?;
    Ok(HttpResponse::Ok().json(participant))
}

#[derive(Deserialize, Serialize)]
struct AmountJson {
    amount: String,
}

async fn release_paid_flag(state: &AppState, event_id: &str, participant_id: &str) {
    if let Err(err) = state.events.set_paid(event_id, participant_id, false).await {
        error!(event = %event_id, participant = %participant_id, %err, "paid flag left set");
    }
}

async fn refund(state: &AppState, owner: &str, amount: Decimal, description: String) {
    let result = state
        .wallets
        .update_wallet(owner, &|wallet| {
            wallet.refund(amount, description.as_str()).map(|_| ())
        })
        .await;
    if let Err(err) = result {
        error!(%owner, %amount, %err, "refund failed");
    }
}

/// Pays the amount last requested from this participant. The paid flag is
/// claimed first so two concurrent payments cannot both go through.
#[post("/events/{id}/participants/{participant}/pay")]
async fn pay_share(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    json: web::Json<AmountJson>,
) -> Result<HttpResponse> {
    let (event_id, participant_id) = path.into_inner();
    let offered = parse_positive_amount(&json.amount)?;

    let event = state
        .events
        .fetch_event(&event_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("event {}", event_id)))?;
    let participant = event
        .participants
        .iter()
        .find(|p| p.id == participant_id)
        .ok_or_else(|| SettlementError::UnknownParticipant(participant_id.clone()))?;
    if participant.has_paid {
        return Err(SettlementError::AlreadyPaid(participant_id).into());
    }

    let expected = state
        .payments
        .requested_amount(&event.id, &participant_id)
        .await?
        .ok_or_else(|| SettlementError::NoPaymentRequest(participant_id.clone()))?;
    if offered != expected {
        return Err(SettlementError::PaymentMismatch { expected, offered }.into());
    }

    if !state.events.set_paid(&event.id, &participant_id, true).await? {
        return Err(SettlementError::AlreadyPaid(participant_id).into());
    }

    // TODO: the paid flag and the two wallet writes are compensated by hand on
    // failure; use a Mongo transaction once the deployment runs a replica set.
    let payer = match state
        .wallets
        .update_wallet(&participant_id, &|wallet| {
            wallet
                .pay_event_share(&event.organizer, expected, &event.id, &event.title)
                .map(|_| ())
        })
        .await
    {
        Ok(payer) => payer,
        Err(err) => {
            release_paid_flag(&state, &event.id, &participant_id).await;
            return Err(err);
        }
    };

    let credited = state
        .wallets
        .update_wallet(&event.organizer, &|wallet| {
            wallet
                .receive_event_share(expected, &event.id, &event.title)
                .map(|_| ())
        })
        .await;
    if let Err(err) = credited {
        warn!(event = %event.id, participant = %participant_id, %err, "organizer not credited, reversing payment");
        refund(
            &state,
            &participant_id,
            expected,
            format!("{} - payment reversed", event.title),
        )
        .await;
        release_paid_flag(&state, &event.id, &participant_id).await;
        return Err(err);
    }

    info!(event = %event.id, participant = %participant_id, amount = %expected, "share paid");
    Ok(HttpResponse::Ok().json(payer))
}

#[derive(Deserialize, Serialize)]
struct OpenSessionJson {
    event_id: String,
}

#[post("/settlements")]
async fn open_session(
    state: web::Data<AppState>,
    json: web::Json<OpenSessionJson>,
) -> Result<HttpResponse> {
    let event_id = json.into_inner().event_id;
    let event = state
        .events
        .fetch_event(&event_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("event {}", event_id)))?;

    state.evict_expired().await;
    let mut session = SettlementSession::new(state.policy);
    session.select_event(event)?;
    let view = session.view();
    state.insert_session(session).await;

    info!(session = %view.id, event = %event_id, "settlement session opened");
    Ok(HttpResponse::Created().json(view))
}

#[get("/settlements/{id}")]
async fn get_session(state: web::Data<AppState>, id: web::Path<Uuid>) -> Result<HttpResponse> {
    let handle = state.session(id.into_inner()).await?;
    let session = handle.lock().await;
    Ok(HttpResponse::Ok().json(session.view()))
}

#[delete("/settlements/{id}")]
async fn close_session(state: web::Data<AppState>, id: web::Path<Uuid>) -> Result<HttpResponse> {
    let id = id.into_inner();
    state
        .sessions
        .lock()
        .await
        .remove(&id)
        .ok_or_else(|| session_not_found(id))?;
    info!(session = %id, "settlement session closed");
    Ok(HttpResponse::NoContent().finish())
}

#[post("/settlements/{id}/participants/{participant}/toggle")]
async fn toggle_participant(
    state: web::Data<AppState>,
    path: web::Path<(Uuid, String)>,
) -> Result<HttpResponse> {
    let (id, participant) = path.into_inner();
    let view = update_session(&state, id, |session| session.toggle_participant(&participant)).await?;
    Ok(HttpResponse::Ok().json(view))
}

#[put("/settlements/{id}/participants/{participant}/amount")]
async fn set_custom_amount(
    state: web::Data<AppState>,
    path: web::Path<(Uuid, String)>,
    json: web::Json<AmountJson>,
) -> Result<HttpResponse> {
    let (id, participant) = path.into_inner();
    let view = update_session(&state, id, |session| {
        session.set_custom_amount(&participant, &json.amount)
    })
    .await?;
    Ok(HttpResponse::Ok().json(view))
}

#[derive(Deserialize, Serialize)]
struct SplitMethodJson {
    method: SplitMethod,
}

#[put("/settlements/{id}/split-method")]
async fn choose_split_method(
    state: web::Data<AppState>,
    id: web::Path<Uuid>,
    json: web::Json<SplitMethodJson>,
) -> Result<HttpResponse> {
    let method = json.into_inner().method;
    let view = update_session(&state, id.into_inner(), |session| {
        session.choose_split_method(method)
    })
    .await?;
    Ok(HttpResponse::Ok().json(view))
}

#[post("/settlements/{id}/submit")]
async fn submit(state: web::Data<AppState>, id: web::Path<Uuid>) -> Result<HttpResponse> {
    let handle = state.session(id.into_inner()).await?;
    let mut session = handle.lock().await;
    let report = session.submit(state.payments.as_ref()).await?;
    Ok(HttpResponse::Ok().json(report))
}

#[get("/wallets/{owner}")]
async fn get_wallet(state: web::Data<AppState>, owner: web::Path<String>) -> Result<HttpResponse> {
    let wallet = state.wallets.load_wallet(&owner.into_inner()).await?;
    Ok(HttpResponse::Ok().json(wallet))
}

#[post("/wallets/{owner}/deposits")]
async fn deposit(
    state: web::Data<AppState>,
    owner: web::Path<String>,
    json: web::Json<AmountJson>,
) -> Result<HttpResponse> {
    let amount = parse_positive_amount(&json.amount)?;
    let wallet = state
        .wallets
        .update_wallet(&owner.into_inner(), &|wallet| {
            wallet.deposit(amount).map(|_| ())
        })
        .await?;
    info!(owner = %wallet.owner, %amount, "deposit");
    Ok(HttpResponse::Ok().json(wallet))
}

#[post("/wallets/{owner}/withdrawals")]
async fn withdraw(
    state: web::Data<AppState>,
    owner: web::Path<String>,
    json: web::Json<AmountJson>,
) -> Result<HttpResponse> {
    let amount = parse_positive_amount(&json.amount)?;
    let wallet = state
        .wallets
        .update_wallet(&owner.into_inner(), &|wallet| {
            wallet.withdraw(amount).map(|_| ())
        })
        .await?;
    info!(owner = %wallet.owner, %amount, "withdrawal initiated");
    Ok(HttpResponse::Ok().json(wallet))
}

#[derive(Deserialize, Serialize)]
struct TransferJson {
    to: UserNick,
    amount: String,
    #[serde(default)]
    note: Option<String>,
}

#[post("/wallets/{owner}/transfers")]
async fn transfer(
    state: web::Data<AppState>,
    owner: web::Path<String>,
    json: web::Json<TransferJson>,
) -> Result<HttpResponse> {
    let json = json.into_inner();
    let owner = owner.into_inner();
    if owner == json.to {
        return Err(WalletError::SelfTransfer.into());
    }
    let amount = parse_positive_amount(&json.amount)?;
    let note = json.note.as_deref();
    let from = state
        .wallets
        .update_wallet(&owner, &|wallet| {
            wallet.send_transfer(&json.to, amount, note).map(|_| ())
        })
        .await?;

    let received = state
        .wallets
        .update_wallet(&json.to, &|wallet| {
            wallet.receive_transfer(&owner, amount, note).map(|_| ())
        })
        .await;
    if let Err(err) = received {
        warn!(from = %owner, to = %json.to, %err, "transfer not credited, reversing");
        refund(&state, &owner, amount, format!("Transfer to {} reversed", json.to)).await;
        return Err(err);
    }

    info!(from = %owner, to = %json.to, %amount, "transfer");
    Ok(HttpResponse::Ok().json(from))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(add_event)
        .service(get_event)
        .service(add_participant)
        .service(pay_share)
        .service(open_session)
        .service(get_session)
        .service(close_session)
        .service(toggle_participant)
        .service(set_custom_amount)
        .service(choose_split_method)
        .service(submit)
        .service(get_wallet)
        .service(deposit)
        .service(withdraw)
        .service(transfer);
}

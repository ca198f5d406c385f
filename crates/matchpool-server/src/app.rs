// Application loop: owns the book and the database, handles one request at a
// time.
//
// Every mutation follows the same order: validate against the book, append
// the event to the journal, apply it, then record any settlement. Because a
// single task owns the book, bet admission and status transitions for a
// match can never interleave.

use anyhow::Context;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use matchpool_core::config::Config;
use matchpool_core::db::Database;
use matchpool_core::market::book::{Applied, Book, BookError, BookEvent};
use matchpool_core::market::outcome::{Outcome, Score};
use matchpool_core::market::state::{Match, MatchId, MatchStatus, UserId};
use matchpool_core::settlement::SlotPolicy;

use crate::protocol::{ClientRequest, ErrorPayload, MatchView, NewMatch, PoolView, ServerResponse};

/// A request from a connection, with the channel its reply goes back on.
#[derive(Debug)]
pub struct AppCommand {
    pub request: ClientRequest,
    pub reply: oneshot::Sender<ServerResponse>,
}

pub struct AppState {
    pub config: Config,
    pub book: Book,
    pub db: Database,
    /// Pushes match changes to every connected client.
    pub updates: broadcast::Sender<ServerResponse>,
}

impl AppState {
    pub fn new(config: Config, db: Database, updates: broadcast::Sender<ServerResponse>) -> Self {
        let book = Book::new(config.platform.pool_rules(), config.platform.stake_limits());
        AppState {
            config,
            book,
            db,
            updates,
        }
    }

    fn view(&self, m: &Match) -> MatchView {
        let pool = match self.book.pool_summary(m.id) {
            Ok(settlement) => Some(PoolView::new(settlement, m.rules.currency_scale)),
            Err(e) => {
                warn!("Pool for match {} cannot be settled: {e}", m.id);
                None
            }
        };
        let open_outcomes = match (m.status, m.rules.slot_policy) {
            (MatchStatus::Active, SlotPolicy::SingleSlot) => m.open_outcomes(),
            (MatchStatus::Active, SlotPolicy::OpenPool) => Outcome::ALL.to_vec(),
            _ => Vec::new(),
        };
        MatchView {
            details: m.clone(),
            pool,
            open_outcomes,
        }
    }

    fn view_of(&self, match_id: MatchId) -> Result<MatchView, ErrorPayload> {
        let m = self
            .book
            .match_by_id(match_id)
            .ok_or(BookError::UnknownMatch { match_id })?;
        Ok(self.view(m))
    }

    fn require_user(&self, user_id: UserId) -> Result<(), ErrorPayload> {
        self.book
            .account(user_id)
            .map(|_| ())
            .ok_or_else(|| BookError::UnknownUser { user_id }.into())
    }

    fn require_admin(&self, admin_id: UserId, request: &str) -> Result<(), ErrorPayload> {
        let account = self
            .book
            .account(admin_id)
            .ok_or(BookError::UnknownUser { user_id: admin_id })?;
        if !account.is_admin {
            warn!("User {admin_id} attempted {request} without admin rights");
            return Err(ErrorPayload::forbidden(format!(
                "{request} requires an admin; user {admin_id} is not one"
            )));
        }
        Ok(())
    }

    /// Journal and apply an event. Nothing is written if validation fails.
    fn commit(&mut self, event: BookEvent) -> Result<Applied, ErrorPayload> {
        self.book.validate(&event)?;
        self.db
            .append_event(&event)
            .map_err(|e| ErrorPayload::storage(&e))?;
        let applied = self.book.apply(&event).map_err(|e| {
            error!("Journaled {} event failed to apply: {e}", event.kind());
            ErrorPayload::from(e)
        })?;
        if let Applied::Settled(resolution) = &applied {
            // The journal is authoritative; a missing record is rebuilt on recovery.
            if let Err(e) = self.db.record_settlement(resolution) {
                error!(
                    "Failed to record settlement of match {}: {e:#}",
                    resolution.match_id
                );
            }
        }
        Ok(applied)
    }

    fn publish(&self, push: ServerResponse) {
        // No receivers simply means no clients are connected.
        let _ = self.updates.send(push);
    }

    fn publish_match(&self, match_id: MatchId) -> Result<MatchView, ErrorPayload> {
        let view = self.view_of(match_id)?;
        self.publish(ServerResponse::MatchUpdated(view.clone()));
        Ok(view)
    }
}

// ---------------------------------------------------------------------------
// Main event loop
// ---------------------------------------------------------------------------

/// Run the application loop until every command sender is dropped.
pub async fn run(mut rx: mpsc::Receiver<AppCommand>, mut state: AppState) -> anyhow::Result<()> {
    info!("Application event loop started");

    while let Some(AppCommand { request, reply }) = rx.recv().await {
        let name = request.name();
        let response = handle_request(&mut state, request, Utc::now());
        if let ServerResponse::Error(e) = &response {
            debug!("{name} rejected: {} ({})", e.code, e.message);
        }
        if reply.send(response).is_err() {
            debug!("Client went away before the {name} reply");
        }
    }

    info!("Command channel closed, application loop exiting");
    Ok(())
}

/// Handle one request at time `now`, producing exactly one response.
pub fn handle_request(
    state: &mut AppState,
    request: ClientRequest,
    now: DateTime<Utc>,
) -> ServerResponse {
    match dispatch(state, request, now) {
        Ok(response) => response,
        Err(e) => ServerResponse::Error(e),
    }
}

fn dispatch(
    state: &mut AppState,
    request: ClientRequest,
    now: DateTime<Utc>,
) -> Result<ServerResponse, ErrorPayload> {
    match request {
        ClientRequest::RegisterUser { username } => register_user(state, username, now),

        ClientRequest::GetAccount { user_id } => state
            .book
            .account(user_id)
            .cloned()
            .map(ServerResponse::Account)
            .ok_or_else(|| BookError::UnknownUser { user_id }.into()),

        ClientRequest::ListMatches { status } => Ok(ServerResponse::Matches {
            matches: state
                .book
                .matches(status)
                .into_iter()
                .map(|m| state.view(m))
                .collect(),
        }),

        ClientRequest::ListTemplates => Ok(ServerResponse::Matches {
            matches: state
                .book
                .templates()
                .into_iter()
                .map(|m| state.view(m))
                .collect(),
        }),

        ClientRequest::GetTemplate { match_id } => {
            let template = state.book.template(match_id)?;
            Ok(ServerResponse::Match(state.view(template)))
        }

        ClientRequest::UserGames { user_id } => {
            state.require_user(user_id)?;
            Ok(ServerResponse::Matches {
                matches: state
                    .book
                    .user_games(user_id)
                    .into_iter()
                    .map(|m| state.view(m))
                    .collect(),
            })
        }

        ClientRequest::CreateMatches { admin_id, matches } => {
            state.require_admin(admin_id, "CREATE_MATCHES")?;
            create_matches(state, matches, now)
        }

        ClientRequest::CreateGame {
            template_id,
            user_id,
            stake_amount,
        } => create_game(state, template_id, user_id, stake_amount, now),

        ClientRequest::UpdateStatus {
            admin_id,
            match_id,
            status,
        } => {
            state.require_admin(admin_id, "UPDATE_STATUS")?;
            update_status(state, match_id, status, now)
        }

        ClientRequest::PlaceBet {
            match_id,
            bettor_id,
            outcome,
        } => {
            state.commit(BookEvent::BetPlaced {
                match_id,
                bettor_id,
                outcome,
                at: now,
            })?;
            info!("User {bettor_id} bet {outcome} on match {match_id}");
            let view = state.publish_match(match_id)?;
            Ok(ServerResponse::BetPlaced {
                view,
                balance: balance_of(state, bettor_id)?,
            })
        }

        ClientRequest::CancelBet {
            match_id,
            bettor_id,
        } => {
            state.commit(BookEvent::BetCancelled {
                match_id,
                bettor_id,
                at: now,
            })?;
            info!("User {bettor_id} cancelled their bet on match {match_id}");
            let view = state.publish_match(match_id)?;
            Ok(ServerResponse::BetCancelled {
                view,
                balance: balance_of(state, bettor_id)?,
            })
        }

        ClientRequest::DeclareResult {
            admin_id,
            match_id,
            home_score,
            away_score,
        } => {
            state.require_admin(admin_id, "DECLARE_RESULT")?;
            declare_result(state, match_id, Score::new(home_score, away_score), now)
        }

        ClientRequest::DeleteMatch { admin_id, match_id } => {
            state.require_admin(admin_id, "DELETE_MATCH")?;
            let applied = state.commit(BookEvent::MatchDeleted { match_id, at: now })?;
            let Applied::MatchDeleted { refunds, .. } = applied else {
                return Err(unexpected("DELETE_MATCH", &applied));
            };
            info!(
                "Match {match_id} deleted, {} stakes refunded",
                refunds.len()
            );
            state.publish(ServerResponse::MatchRemoved { match_id });
            Ok(ServerResponse::MatchDeleted {
                match_id,
                refunded_bets: refunds.len(),
            })
        }

        ClientRequest::PoolSummary { match_id } => {
            let settlement = state.book.pool_summary(match_id)?;
            let scale = state
                .book
                .match_by_id(match_id)
                .map_or(state.config.platform.currency_scale, |m| {
                    m.rules.currency_scale
                });
            Ok(ServerResponse::PoolSummary {
                match_id,
                pool: PoolView::new(settlement, scale),
            })
        }

        ClientRequest::Transactions { user_id } => {
            state.require_user(user_id)?;
            Ok(ServerResponse::Transactions {
                transactions: state
                    .book
                    .transactions_for(user_id)
                    .into_iter()
                    .cloned()
                    .collect(),
            })
        }
    }
}

fn register_user(
    state: &mut AppState,
    username: String,
    now: DateTime<Utc>,
) -> Result<ServerResponse, ErrorPayload> {
    let user_id = state.book.next_user_id();
    let opening_balance = state.config.platform.starting_balance;
    let applied = state.commit(BookEvent::UserRegistered {
        user_id,
        username,
        opening_balance,
        is_admin: false,
        at: now,
    })?;
    let Applied::UserRegistered(account) = applied else {
        return Err(unexpected("REGISTER_USER", &applied));
    };
    info!("Registered user {} ({})", account.username, account.id);
    Ok(ServerResponse::Account(account))
}

fn create_matches(
    state: &mut AppState,
    matches: Vec<NewMatch>,
    now: DateTime<Utc>,
) -> Result<ServerResponse, ErrorPayload> {
    if matches.is_empty() {
        return Err(ErrorPayload::bad_request("no matches given"));
    }

    let first_id = state.book.next_match_id();
    let rules = *state.book.rules();
    let events: Vec<BookEvent> = matches
        .into_iter()
        .zip(first_id..)
        .map(|(m, match_id)| BookEvent::MatchCreated {
            match_id,
            home_team: m.home_team,
            away_team: m.away_team,
            stake_amount: m.stake_amount,
            rules,
            status: MatchStatus::Template,
            kickoff: m.kickoff,
            template_id: None,
            created_by: None,
            at: now,
        })
        .collect();

    // All or nothing: reject the batch before journaling any of it.
    for event in &events {
        state.book.validate(event)?;
    }

    let mut created = Vec::with_capacity(events.len());
    for event in events {
        let match_id = event.match_id().unwrap_or_default();
        state.commit(event)?;
        created.push(state.publish_match(match_id)?);
    }
    info!("Created {} match templates", created.len());
    Ok(ServerResponse::Matches { matches: created })
}

fn create_game(
    state: &mut AppState,
    template_id: MatchId,
    user_id: UserId,
    stake_amount: Option<Decimal>,
    now: DateTime<Utc>,
) -> Result<ServerResponse, ErrorPayload> {
    let template = state.book.template(template_id)?.clone();
    let match_id = state.book.next_match_id();
    let rules = *state.book.rules();
    state.commit(BookEvent::MatchCreated {
        match_id,
        home_team: template.home_team,
        away_team: template.away_team,
        stake_amount: stake_amount.unwrap_or(template.stake_amount),
        rules,
        status: MatchStatus::Active,
        kickoff: template.kickoff,
        template_id: Some(template_id),
        created_by: Some(user_id),
        at: now,
    })?;
    info!("User {user_id} opened game {match_id} from template {template_id}");
    Ok(ServerResponse::Match(state.publish_match(match_id)?))
}

fn update_status(
    state: &mut AppState,
    match_id: MatchId,
    status: MatchStatus,
    now: DateTime<Utc>,
) -> Result<ServerResponse, ErrorPayload> {
    if status == MatchStatus::Completed {
        return Err(ErrorPayload::bad_request(
            "matches are completed by DECLARE_RESULT",
        ));
    }
    let from = state
        .book
        .match_by_id(match_id)
        .map(|m| m.status)
        .ok_or(BookError::UnknownMatch { match_id })?;
    state.commit(BookEvent::StatusChanged {
        match_id,
        from,
        to: status,
        at: now,
    })?;
    info!("Match {match_id} moved from {from} to {status}");
    Ok(ServerResponse::Match(state.publish_match(match_id)?))
}

fn declare_result(
    state: &mut AppState,
    match_id: MatchId,
    final_score: Score,
    now: DateTime<Utc>,
) -> Result<ServerResponse, ErrorPayload> {
    let applied = state.commit(BookEvent::ResultDeclared {
        match_id,
        final_score,
        at: now,
    })?;
    let Applied::Settled(resolution) = applied else {
        return Err(unexpected("DECLARE_RESULT", &applied));
    };
    info!(
        "Match {match_id} settled {final_score} ({}): pool {}, house {}, {} credits",
        resolution.winning_outcome,
        resolution.settlement.total_pool,
        resolution.house_revenue(),
        resolution.credits().len()
    );
    if !resolution.has_winner() {
        warn!(
            "Nobody picked {} on match {match_id}",
            resolution.winning_outcome
        );
    }
    let view = state.publish_match(match_id)?;
    Ok(ServerResponse::ResultDeclared { view, resolution })
}

fn balance_of(state: &AppState, user_id: UserId) -> Result<Decimal, ErrorPayload> {
    state
        .book
        .account(user_id)
        .map(|a| a.balance)
        .ok_or_else(|| BookError::UnknownUser { user_id }.into())
}

fn unexpected(request: &str, applied: &Applied) -> ErrorPayload {
    error!("{request} produced unexpected effect {applied:?}");
    ErrorPayload::new("internal_error", format!("{request} produced an unexpected effect"))
}

// ---------------------------------------------------------------------------
// Startup
// ---------------------------------------------------------------------------

/// Register every configured admin username that has no account yet.
///
/// Admin accounts start with a zero balance. A configured name already held
/// by a regular account is left alone. Returns how many accounts were created.
pub fn seed_admins(state: &mut AppState, now: DateTime<Utc>) -> anyhow::Result<usize> {
    let mut created = 0;
    for username in state.config.platform.admins.clone() {
        if let Some(existing) = state.book.account_by_username(&username) {
            if !existing.is_admin {
                warn!("Configured admin `{username}` is a regular account; not promoting it");
            }
            continue;
        }
        let user_id = state.book.next_user_id();
        state
            .commit(BookEvent::UserRegistered {
                user_id,
                username: username.clone(),
                opening_balance: Decimal::ZERO,
                is_admin: true,
                at: now,
            })
            .map_err(|e| anyhow::anyhow!("{}: {}", e.code, e.message))
            .with_context(|| format!("failed to register admin `{username}`"))?;
        info!("Registered admin {username} ({user_id})");
        created += 1;
    }
    Ok(created)
}

/// Rebuild the book from the journal after a restart.
///
/// Returns `Ok(false)` when the journal is empty. Settlement records missing
/// for completed matches are written back from the replayed book.
pub fn recover_from_db(state: &mut AppState) -> anyhow::Result<bool> {
    let events = state.db.load_events()?;
    if events.is_empty() {
        info!("Journal is empty, starting fresh");
        return Ok(false);
    }

    info!("Crash recovery: replaying {} journaled events", events.len());
    state
        .book
        .restore_from_events(&events)
        .context("failed to replay book journal")?;

    let mut repaired = 0;
    for m in state.book.matches(Some(MatchStatus::Completed)) {
        let Some(resolution) = state.book.resolution(m.id) else {
            continue;
        };
        if state.db.load_settlement(m.id)?.is_none() {
            state.db.record_settlement(resolution)?;
            repaired += 1;
        }
    }
    if repaired > 0 {
        warn!("Rewrote {repaired} missing settlement records");
    }

    info!(
        "Crash recovery complete: {} matches, house revenue {}",
        state.book.matches(None).len(),
        state.book.house_revenue()
    );
    Ok(true)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

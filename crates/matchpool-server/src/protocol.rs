// Wire types exchanged with clients over the WebSocket.
//
// Every frame is a JSON object `{"type": "...", "payload": {...}}`. Each
// request receives exactly one response, in order. Accepted mutations are
// also pushed to every connected client as `MATCH_UPDATED` / `MATCH_REMOVED`.
// A client that falls behind the push feed is sent a full `SNAPSHOT`.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use matchpool_core::market::book::BookError;
use matchpool_core::market::outcome::{Outcome, OutcomeMap};
use matchpool_core::market::state::{Account, Match, MatchId, MatchStatus, Transaction, UserId};
use matchpool_core::settlement::{Resolution, SettlementResult};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientRequest {
    RegisterUser {
        username: String,
    },
    GetAccount {
        user_id: UserId,
    },
    ListMatches {
        #[serde(default)]
        status: Option<MatchStatus>,
    },
    ListTemplates,
    GetTemplate {
        match_id: MatchId,
    },
    UserGames {
        user_id: UserId,
    },
    /// Admin: create one or more match templates.
    CreateMatches {
        admin_id: UserId,
        matches: Vec<NewMatch>,
    },
    /// Open a bettable game from a template.
    CreateGame {
        template_id: MatchId,
        user_id: UserId,
        /// Defaults to the template's stake.
        #[serde(default)]
        stake_amount: Option<Decimal>,
    },
    UpdateStatus {
        admin_id: UserId,
        match_id: MatchId,
        status: MatchStatus,
    },
    PlaceBet {
        match_id: MatchId,
        bettor_id: UserId,
        outcome: Outcome,
    },
    CancelBet {
        match_id: MatchId,
        bettor_id: UserId,
    },
    DeclareResult {
        admin_id: UserId,
        match_id: MatchId,
        home_score: u32,
        away_score: u32,
    },
    DeleteMatch {
        admin_id: UserId,
        match_id: MatchId,
    },
    PoolSummary {
        match_id: MatchId,
    },
    Transactions {
        user_id: UserId,
    },
}

impl ClientRequest {
    pub fn name(&self) -> &'static str {
        match self {
            ClientRequest::RegisterUser { .. } => "REGISTER_USER",
            ClientRequest::GetAccount { .. } => "GET_ACCOUNT",
            ClientRequest::ListMatches { .. } => "LIST_MATCHES",
            ClientRequest::ListTemplates => "LIST_TEMPLATES",
            ClientRequest::GetTemplate { .. } => "GET_TEMPLATE",
            ClientRequest::UserGames { .. } => "USER_GAMES",
            ClientRequest::CreateMatches { .. } => "CREATE_MATCHES",
            ClientRequest::CreateGame { .. } => "CREATE_GAME",
            ClientRequest::UpdateStatus { .. } => "UPDATE_STATUS",
            ClientRequest::PlaceBet { .. } => "PLACE_BET",
            ClientRequest::CancelBet { .. } => "CANCEL_BET",
            ClientRequest::DeclareResult { .. } => "DECLARE_RESULT",
            ClientRequest::DeleteMatch { .. } => "DELETE_MATCH",
            ClientRequest::PoolSummary { .. } => "POOL_SUMMARY",
            ClientRequest::Transactions { .. } => "TRANSACTIONS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMatch {
    pub home_team: String,
    pub away_team: String,
    pub stake_amount: Decimal,
    #[serde(default)]
    pub kickoff: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerResponse {
    Account(Account),
    Matches { matches: Vec<MatchView> },
    Match(MatchView),
    BetPlaced { view: MatchView, balance: Decimal },
    BetCancelled { view: MatchView, balance: Decimal },
    ResultDeclared {
        view: MatchView,
        resolution: Resolution,
    },
    MatchDeleted {
        match_id: MatchId,
        refunded_bets: usize,
    },
    PoolSummary {
        match_id: MatchId,
        pool: PoolView,
    },
    Transactions { transactions: Vec<Transaction> },
    /// Pushed to all clients after a match changes.
    MatchUpdated(MatchView),
    /// Pushed to all clients after a match is deleted.
    MatchRemoved { match_id: MatchId },
    /// Pushed to a client that fell behind on updates: every match as it
    /// stands now.
    Snapshot { matches: Vec<MatchView> },
    Error(ErrorPayload),
}

impl ServerResponse {
    pub fn is_error(&self) -> bool {
        matches!(self, ServerResponse::Error(_))
    }

    /// Whether this is an unsolicited push rather than a reply.
    pub fn is_push(&self) -> bool {
        matches!(
            self,
            ServerResponse::MatchUpdated(_)
                | ServerResponse::MatchRemoved { .. }
                | ServerResponse::Snapshot { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

impl ErrorPayload {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        ErrorPayload {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("bad_request", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("forbidden", message)
    }

    pub fn storage(err: &anyhow::Error) -> Self {
        Self::new("storage_error", format!("{err:#}"))
    }
}

impl From<BookError> for ErrorPayload {
    fn from(err: BookError) -> Self {
        ErrorPayload::new(err.code(), err.to_string())
    }
}

impl From<ErrorPayload> for ServerResponse {
    fn from(err: ErrorPayload) -> Self {
        ServerResponse::Error(err)
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// A match together with its current pool, so clients never redo the math.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchView {
    #[serde(rename = "match")]
    pub details: Match,
    /// `None` only if the stored bets cannot be settled under the match's rules.
    pub pool: Option<PoolView>,
    /// Outcomes a new bet may still take.
    pub open_outcomes: Vec<Outcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolView {
    #[serde(flatten)]
    pub settlement: SettlementResult,
    /// What a single winning bet would receive for each outcome, rounded
    /// down to the currency scale. `None` where nobody has bet.
    pub potential_payouts: OutcomeMap<Option<Decimal>>,
}

impl PoolView {
    pub fn new(settlement: SettlementResult, currency_scale: u32) -> Self {
        let potential_payouts = OutcomeMap::from_fn(|o| {
            settlement
                .payout_per_winner(o)
                .map(|p| p.round_dp_with_strategy(currency_scale, RoundingStrategy::ToZero))
        });
        PoolView {
            settlement,
            potential_payouts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn parses_place_bet() {
        let json = r#"{"type":"PLACE_BET","payload":{"match_id":7,"bettor_id":3,"outcome":"draw"}}"#;
        let req: ClientRequest = serde_json::from_str(json).unwrap();
        assert_eq!(
            req,
            ClientRequest::PlaceBet {
                match_id: 7,
                bettor_id: 3,
                outcome: Outcome::Draw
            }
        );
        assert_eq!(req.name(), "PLACE_BET");
    }

    #[test]
    fn parses_unit_request_without_payload() {
        let req: ClientRequest = serde_json::from_str(r#"{"type":"LIST_TEMPLATES"}"#).unwrap();
        assert_eq!(req, ClientRequest::ListTemplates);
    }

    #[test]
    fn list_matches_status_is_optional() {
        let req: ClientRequest =
            serde_json::from_str(r#"{"type":"LIST_MATCHES","payload":{}}"#).unwrap();
        assert_eq!(req, ClientRequest::ListMatches { status: None });

        let req: ClientRequest =
            serde_json::from_str(r#"{"type":"LIST_MATCHES","payload":{"status":"inplay"}}"#)
                .unwrap();
        assert_eq!(
            req,
            ClientRequest::ListMatches {
                status: Some(MatchStatus::InPlay)
            }
        );
    }

    #[test]
    fn stake_accepts_string_decimal() {
        let req: ClientRequest = serde_json::from_value(json!({
            "type": "CREATE_MATCHES",
            "payload": {"admin_id": 1, "matches": [
                {"home_team": "Saint George", "away_team": "Fasil Kenema", "stake_amount": "25.50"}
            ]}
        }))
        .unwrap();
        match req {
            ClientRequest::CreateMatches { matches, .. } => {
                assert_eq!(matches[0].stake_amount, dec!(25.50));
                assert!(matches[0].kickoff.is_none());
            }
            other => panic!("expected CreateMatches, got {other:?}"),
        }
    }

    #[test]
    fn admin_requests_require_admin_id() {
        let json = r#"{"type":"DELETE_MATCH","payload":{"match_id":3}}"#;
        assert!(serde_json::from_str::<ClientRequest>(json).is_err());

        let json = r#"{"type":"DELETE_MATCH","payload":{"admin_id":1,"match_id":3}}"#;
        assert_eq!(
            serde_json::from_str::<ClientRequest>(json).unwrap(),
            ClientRequest::DeleteMatch {
                admin_id: 1,
                match_id: 3
            }
        );
    }

    #[test]
    fn snapshot_is_a_push() {
        let resp = ServerResponse::Snapshot { matches: vec![] };
        assert!(resp.is_push());
        assert_eq!(serde_json::to_value(&resp).unwrap()["type"], "SNAPSHOT");
    }

    #[test]
    fn rejects_unknown_outcome() {
        let json = r#"{"type":"PLACE_BET","payload":{"match_id":1,"bettor_id":1,"outcome":"win"}}"#;
        assert!(serde_json::from_str::<ClientRequest>(json).is_err());
    }

    #[test]
    fn error_response_shape() {
        let resp: ServerResponse = ErrorPayload::new("slot_taken", "taken").into();
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["type"], "ERROR");
        assert_eq!(value["payload"]["code"], "slot_taken");
        assert!(resp.is_error());
        assert!(!resp.is_push());
    }

    #[test]
    fn book_errors_map_to_codes() {
        let err: ErrorPayload = BookError::UnknownMatch { match_id: 4 }.into();
        assert_eq!(err.code, "unknown_match");
        assert!(err.message.contains('4'));
    }
}

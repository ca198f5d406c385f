// Integration tests for the matchpool server.
//
// These start the real WebSocket server and application loop on an
// ephemeral port and drive them with tokio-tungstenite clients.

use futures_util::{SinkExt, StreamExt};
use rust_decimal_macros::dec;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use matchpool_core::config::{
    Config, DatabaseSection, LoggingSection, PlatformConfig, ServerConfig, WebsocketSection,
};
use matchpool_core::db::Database;
use matchpool_core::market::outcome::Outcome;
use matchpool_core::market::state::{MatchStatus, UserId};
use matchpool_core::settlement::{SlotPolicy, UnclaimedPolicy};
use matchpool_server::app::{self, AppState};
use matchpool_server::protocol::*;
use matchpool_server::ws_server::{self, ConnectionListener, TungsteniteListener};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ===========================================================================
// Test helpers
// ===========================================================================

fn inline_config() -> Config {
    Config {
        platform: PlatformConfig {
            name: "Integration Pool".into(),
            currency: "ETB".into(),
            currency_scale: 2,
            house_commission: dec!(0.10),
            slot_policy: SlotPolicy::SingleSlot,
            unclaimed_pool: UnclaimedPolicy::House,
            starting_balance: dec!(1000),
            min_stake: dec!(1),
            max_stake: dec!(10000),
            admins: vec!["admin".into()],
        },
        server: ServerConfig {
            websocket: WebsocketSection {
                bind_address: "127.0.0.1".into(),
                port: 9100,
            },
            database: DatabaseSection {
                path: ":memory:".into(),
            },
            logging: LoggingSection {
                directory: "logs".into(),
                filter: "info".into(),
            },
        },
    }
}

/// Id the seeded admin account gets on a fresh server.
const ADMIN_ID: UserId = 1;

/// Start the server on a free port and return its `ws://` URL.
async fn start_server() -> String {
    let listener = TungsteniteListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (updates_tx, _) = broadcast::channel(64);
    let mut state = AppState::new(
        inline_config(),
        Database::open(":memory:").unwrap(),
        updates_tx.clone(),
    );
    assert_eq!(app::seed_admins(&mut state, chrono::Utc::now()).unwrap(), 1);
    assert_eq!(state.book.account(ADMIN_ID).map(|a| a.is_admin), Some(true));

    tokio::spawn(ws_server::run(listener, cmd_tx, updates_tx));
    tokio::spawn(app::run(cmd_rx, state));

    format!("ws://{addr}")
}

async fn connect(url: &str) -> Client {
    let (client, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    client
}

/// Send a request and return its reply, skipping pushed updates.
async fn request(client: &mut Client, req: &ClientRequest) -> ServerResponse {
    let json = serde_json::to_string(req).unwrap();
    client.send(Message::Text(json.into())).await.unwrap();
    loop {
        let resp = next_frame(client).await;
        if !resp.is_push() {
            return resp;
        }
    }
}

async fn next_frame(client: &mut Client) -> ServerResponse {
    loop {
        match client.next().await.expect("connection closed").unwrap() {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            _ => continue,
        }
    }
}

async fn register(client: &mut Client, username: &str) -> UserId {
    match request(
        client,
        &ClientRequest::RegisterUser {
            username: username.into(),
        },
    )
    .await
    {
        ServerResponse::Account(a) => a.id,
        other => panic!("expected Account, got {other:?}"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn full_round_over_websocket() {
    let url = start_server().await;
    let mut admin = connect(&url).await;

    let created = request(
        &mut admin,
        &ClientRequest::CreateMatches {
            admin_id: ADMIN_ID,
            matches: vec![NewMatch {
                home_team: "Saint George".into(),
                away_team: "Fasil Kenema".into(),
                stake_amount: dec!(20),
                kickoff: None,
            }],
        },
    )
    .await;
    let ServerResponse::Matches { matches } = created else {
        panic!("expected Matches, got {created:?}");
    };
    let template_id = matches[0].details.id;
    assert_eq!(matches[0].details.status, MatchStatus::Template);

    let abebe = register(&mut admin, "abebe").await;
    let kebede = register(&mut admin, "kebede").await;
    let almaz = register(&mut admin, "almaz").await;

    let game = match request(
        &mut admin,
        &ClientRequest::CreateGame {
            template_id,
            user_id: abebe,
            stake_amount: None,
        },
    )
    .await
    {
        ServerResponse::Match(view) => view.details.id,
        other => panic!("expected Match, got {other:?}"),
    };

    for (bettor_id, outcome) in [
        (abebe, Outcome::Home),
        (kebede, Outcome::Draw),
        (almaz, Outcome::Away),
    ] {
        let resp = request(
            &mut admin,
            &ClientRequest::PlaceBet {
                match_id: game,
                bettor_id,
                outcome,
            },
        )
        .await;
        assert!(matches!(resp, ServerResponse::BetPlaced { .. }), "{resp:?}");
    }

    match request(&mut admin, &ClientRequest::PoolSummary { match_id: game }).await {
        ServerResponse::PoolSummary { pool, .. } => {
            assert_eq!(pool.settlement.total_pool, dec!(60));
            assert_eq!(pool.settlement.distributable_pool, dec!(54));
        }
        other => panic!("expected PoolSummary, got {other:?}"),
    }

    let resp = request(
        &mut admin,
        &ClientRequest::DeclareResult {
            admin_id: ADMIN_ID,
            match_id: game,
            home_score: 0,
            away_score: 1,
        },
    )
    .await;
    let ServerResponse::ResultDeclared { resolution, .. } = resp else {
        panic!("expected ResultDeclared, got {resp:?}");
    };
    assert_eq!(resolution.winning_outcome, Outcome::Away);

    match request(&mut admin, &ClientRequest::GetAccount { user_id: almaz }).await {
        ServerResponse::Account(a) => assert_eq!(a.balance, dec!(1034)),
        other => panic!("expected Account, got {other:?}"),
    }
}

#[tokio::test]
async fn errors_come_back_as_error_frames() {
    let url = start_server().await;
    let mut client = connect(&url).await;

    client
        .send(Message::Text("{\"type\":\"PLACE_BET\"".into()))
        .await
        .unwrap();
    match next_frame(&mut client).await {
        ServerResponse::Error(e) => assert_eq!(e.code, "bad_request"),
        other => panic!("expected Error, got {other:?}"),
    }

    match request(&mut client, &ClientRequest::GetTemplate { match_id: 42 }).await {
        ServerResponse::Error(e) => assert_eq!(e.code, "unknown_match"),
        other => panic!("expected Error, got {other:?}"),
    }

    // Bettors cannot act as admins.
    let bettor = register(&mut client, "mulu").await;
    match request(
        &mut client,
        &ClientRequest::CreateMatches {
            admin_id: bettor,
            matches: vec![NewMatch {
                home_team: "Ethiopia Bunna".into(),
                away_team: "Shashemene City".into(),
                stake_amount: dec!(10),
                kickoff: None,
            }],
        },
    )
    .await
    {
        ServerResponse::Error(e) => assert_eq!(e.code, "forbidden"),
        other => panic!("expected Error, got {other:?}"),
    }
}

#[tokio::test]
async fn competing_bets_on_one_slot_admit_exactly_one() {
    let url = start_server().await;
    let mut setup = connect(&url).await;

    let ServerResponse::Matches { matches } = request(
        &mut setup,
        &ClientRequest::CreateMatches {
            admin_id: ADMIN_ID,
            matches: vec![NewMatch {
                home_team: "Adama City".into(),
                away_team: "Sidama Coffee".into(),
                stake_amount: dec!(10),
                kickoff: None,
            }],
        },
    )
    .await
    else {
        panic!("expected Matches");
    };
    let template_id = matches[0].details.id;
    let host = register(&mut setup, "host").await;
    let ServerResponse::Match(view) = request(
        &mut setup,
        &ClientRequest::CreateGame {
            template_id,
            user_id: host,
            stake_amount: Some(dec!(15)),
        },
    )
    .await
    else {
        panic!("expected Match");
    };
    let game = view.details.id;
    assert_eq!(view.details.stake_amount, dec!(15));

    let mut bettors = Vec::new();
    for i in 0..4 {
        bettors.push(register(&mut setup, &format!("racer{i}")).await);
    }

    // Every bettor races for the draw slot on its own connection.
    let mut tasks = Vec::new();
    for bettor_id in bettors {
        let url = url.clone();
        tasks.push(tokio::spawn(async move {
            let mut client = connect(&url).await;
            request(
                &mut client,
                &ClientRequest::PlaceBet {
                    match_id: game,
                    bettor_id,
                    outcome: Outcome::Draw,
                },
            )
            .await
        }));
    }

    let mut accepted = 0;
    let mut rejected = 0;
    for task in tasks {
        match task.await.unwrap() {
            ServerResponse::BetPlaced { .. } => accepted += 1,
            ServerResponse::Error(e) => {
                assert_eq!(e.code, "slot_taken");
                rejected += 1;
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(rejected, 3);
}

#[tokio::test]
async fn other_clients_receive_match_updates() {
    let url = start_server().await;
    let mut actor = connect(&url).await;
    let mut watcher = connect(&url).await;

    // Make sure the watcher's connection task is subscribed before acting.
    let _ = request(&mut watcher, &ClientRequest::ListTemplates).await;

    let _ = request(
        &mut actor,
        &ClientRequest::CreateMatches {
            admin_id: ADMIN_ID,
            matches: vec![NewMatch {
                home_team: "Dire Dawa City".into(),
                away_team: "Wolkite City".into(),
                stake_amount: dec!(5),
                kickoff: None,
            }],
        },
    )
    .await;

    match next_frame(&mut watcher).await {
        ServerResponse::MatchUpdated(view) => {
            assert_eq!(view.details.home_team, "Dire Dawa City");
        }
        other => panic!("expected MatchUpdated, got {other:?}"),
    }
}

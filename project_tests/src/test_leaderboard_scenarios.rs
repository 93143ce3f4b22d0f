//! End-to-end scenarios against a running leaderboard stack (server + Redis
//! + Postgres). Point it at the server with `--base-url` / `--ws-url` and it
//! walks the core flows: best-mode non-regression, increment accumulation,
//! reset, duplicate creation, around-windows, unknown players, and a
//! websocket subscribe/receive round trip.

use anyhow::{bail, Context, Result};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser, Debug)]
#[clap(name = "test_leaderboard_scenarios")]
struct Args {
    #[clap(long, env = "LEADERBOARD_BASE_URL", default_value = "http://127.0.0.1:8080")]
    base_url: String,

    #[clap(long, env = "LEADERBOARD_WS_URL", default_value = "ws://127.0.0.1:8080/ws")]
    ws_url: String,
}

struct Api {
    client: reqwest::Client,
    base_url: String,
}

impl Api {
    async fn post(&self, path: &str, body: Value) -> Result<(u16, Value)> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await?;
        let status = response.status().as_u16();
        Ok((status, response.json().await?))
    }

    async fn get(&self, path: &str) -> Result<(u16, Value)> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await?;
        let status = response.status().as_u16();
        Ok((status, response.json().await?))
    }

    async fn create_leaderboard(&self, id: &str, sort: &str, mode: &str) -> Result<Value> {
        let (status, body) = self
            .post(
                "/api/v1/leaderboards",
                json!({"id": id, "name": id, "sort_order": sort, "update_mode": mode}),
            )
            .await?;
        if status != 201 || body["success"] != true {
            bail!("creating {id} failed: status={status} body={body}");
        }
        Ok(body["data"].clone())
    }

    async fn submit(&self, leaderboard: &str, player: &str, score: i64) -> Result<()> {
        let (status, body) = self
            .post(
                "/api/v1/scores",
                json!({"player_id": player, "leaderboard_id": leaderboard, "score": score}),
            )
            .await?;
        if status != 200 || body["success"] != true {
            bail!("submit {player}={score} on {leaderboard} failed: {body}");
        }
        Ok(())
    }

    async fn player(&self, leaderboard: &str, player: &str) -> Result<(u16, Value)> {
        self.get(&format!("/api/v1/leaderboards/{leaderboard}/player/{player}"))
            .await
    }
}

fn run_id() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let api = Api {
        client: reqwest::Client::new(),
        base_url: args.base_url.clone(),
    };
    let run = run_id();

    let (status, health) = api.get("/health").await.context("is the server up?")?;
    assert_eq!(status, 200, "health probe failed: {health}");

    scenario_best_mode(&api, run).await?;
    println!("S1 best-mode non-regression: ok");

    scenario_increment_and_reset(&api, run).await?;
    println!("S2/S3 increment + reset: ok");

    scenario_duplicate_create(&api, run).await?;
    println!("S4 duplicate rejection: ok");

    scenario_around_window(&api, run).await?;
    println!("S5 around window: ok");

    scenario_unknown_player(&api, run).await?;
    println!("S6 unknown player: ok");

    scenario_websocket(&api, &args.ws_url, run).await?;
    println!("WS subscribe/receive: ok");

    println!("all scenarios passed");
    Ok(())
}

fn seed_batch(leaderboard: &str) -> Value {
    json!({"scores": [
        {"player_id": "p1", "leaderboard_id": leaderboard, "score": 1000},
        {"player_id": "p2", "leaderboard_id": leaderboard, "score": 2500},
        {"player_id": "p3", "leaderboard_id": leaderboard, "score": 1800},
        {"player_id": "p4", "leaderboard_id": leaderboard, "score": 3200},
        {"player_id": "p5", "leaderboard_id": leaderboard, "score": 950},
    ]})
}

async fn seed(api: &Api, leaderboard: &str) -> Result<()> {
    let (status, body) = api.post("/api/v1/scores/batch", seed_batch(leaderboard)).await?;
    if status != 200 || body["data"]["failed"] != 0 {
        bail!("seeding {leaderboard} failed: {body}");
    }
    Ok(())
}

async fn scenario_best_mode(api: &Api, run: u128) -> Result<()> {
    let lb = format!("itest-{run}-best");
    api.create_leaderboard(&lb, "desc", "best").await?;
    seed(api, &lb).await?;

    let (status, top) = api.get(&format!("/api/v1/leaderboards/{lb}/top?limit=5")).await?;
    assert_eq!(status, 200);
    let entries = top["data"].as_array().context("top data should be a list")?;
    let expected = [("p4", 3200), ("p2", 2500), ("p3", 1800), ("p1", 1000), ("p5", 950)];
    assert_eq!(entries.len(), expected.len(), "top(5) size: {top}");
    for (i, (player, score)) in expected.iter().enumerate() {
        assert_eq!(entries[i]["rank"], (i + 1) as i64, "rank at {i}: {top}");
        assert_eq!(entries[i]["player_id"], *player, "player at {i}: {top}");
        assert_eq!(entries[i]["score"], *score, "score at {i}: {top}");
    }

    // A worse score must not regress the stored best.
    api.submit(&lb, "p4", 2000).await?;
    let (_, p4) = api.player(&lb, "p4").await?;
    assert_eq!(p4["data"]["rank"], 1, "{p4}");
    assert_eq!(p4["data"]["score"], 3200, "{p4}");

    // A better one replaces it.
    api.submit(&lb, "p4", 5000).await?;
    let (_, p4) = api.player(&lb, "p4").await?;
    assert_eq!(p4["data"]["rank"], 1, "{p4}");
    assert_eq!(p4["data"]["score"], 5000, "{p4}");
    Ok(())
}

async fn scenario_increment_and_reset(api: &Api, run: u128) -> Result<()> {
    let lb = format!("itest-{run}-incr");
    let created = api.create_leaderboard(&lb, "desc", "increment").await?;

    api.submit(&lb, "p1", 100).await?;
    api.submit(&lb, "p1", 50).await?;
    let (_, p1) = api.player(&lb, "p1").await?;
    assert_eq!(p1["data"]["rank"], 1, "{p1}");
    assert_eq!(p1["data"]["score"], 150, "{p1}");

    // Reset clears the entries but keeps the configuration.
    let (status, _) = api.post(&format!("/api/v1/leaderboards/{lb}/reset"), json!({})).await?;
    assert_eq!(status, 200);

    let (_, top) = api.get(&format!("/api/v1/leaderboards/{lb}/top?limit=10")).await?;
    assert_eq!(top["data"], json!([]), "{top}");

    let (status, config) = api.get(&format!("/api/v1/leaderboards/{lb}")).await?;
    assert_eq!(status, 200);
    assert_eq!(config["data"]["id"], created["id"]);
    assert_eq!(config["data"]["name"], created["name"]);
    assert_eq!(config["data"]["update_mode"], "increment");
    assert_eq!(config["data"]["sort_order"], "desc");
    Ok(())
}

async fn scenario_duplicate_create(api: &Api, run: u128) -> Result<()> {
    let lb = format!("itest-{run}-dup");
    api.create_leaderboard(&lb, "desc", "replace").await?;

    let (status, body) = api
        .post(
            "/api/v1/leaderboards",
            json!({"id": lb, "name": "again"}),
        )
        .await?;
    assert_eq!(status, 409, "{body}");
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "leaderboard already exists");
    Ok(())
}

async fn scenario_around_window(api: &Api, run: u128) -> Result<()> {
    let lb = format!("itest-{run}-around");
    api.create_leaderboard(&lb, "desc", "best").await?;
    seed(api, &lb).await?;

    // p3 sits at rank 3 of 5; radius 2 covers the whole board.
    let (status, around) = api
        .get(&format!("/api/v1/leaderboards/{lb}/around/p3?range=2"))
        .await?;
    assert_eq!(status, 200);
    let entries = around["data"].as_array().context("around data")?;
    assert_eq!(entries.len(), 5, "{around}");
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry["rank"], (i + 1) as i64, "{around}");
    }
    assert_eq!(entries[2]["player_id"], "p3", "{around}");
    Ok(())
}

async fn scenario_unknown_player(api: &Api, run: u128) -> Result<()> {
    let lb = format!("itest-{run}-miss");
    api.create_leaderboard(&lb, "desc", "replace").await?;

    let (status, body) = api.player(&lb, "nobody").await?;
    assert_eq!(status, 404, "{body}");
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "player not found in leaderboard");
    Ok(())
}

async fn scenario_websocket(api: &Api, ws_url: &str, run: u128) -> Result<()> {
    let lb = format!("itest-{run}-ws");
    api.create_leaderboard(&lb, "desc", "replace").await?;

    let (mut socket, _) = connect_async(ws_url).await.context("websocket connect")?;
    socket
        .send(Message::Text(
            json!({"type": "subscribe", "leaderboard_id": lb}).to_string().into(),
        ))
        .await?;

    let ack = read_json_frame(&mut socket).await?;
    assert_eq!(ack["type"], "subscribed", "{ack}");
    assert_eq!(ack["leaderboard_id"], lb, "{ack}");

    // A write on the subscribed board must arrive as a snapshot.
    api.submit(&lb, "p1", 777).await?;
    let update = read_json_frame(&mut socket).await?;
    assert_eq!(update["type"], "leaderboard_update", "{update}");
    assert_eq!(update["data"]["total_players"], 1, "{update}");
    assert_eq!(update["data"]["entries"][0]["player_id"], "p1", "{update}");
    assert_eq!(update["data"]["entries"][0]["score"], 777, "{update}");

    // Ping/pong round trip.
    socket
        .send(Message::Text(json!({"type": "ping"}).to_string().into()))
        .await?;
    let pong = read_json_frame(&mut socket).await?;
    assert_eq!(pong["type"], "pong", "{pong}");

    socket.close(None).await.ok();
    Ok(())
}

async fn read_json_frame<S>(socket: &mut S) -> Result<Value>
where
    S: StreamExt<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let deadline = Duration::from_secs(5);
    loop {
        let frame = tokio::time::timeout(deadline, socket.next())
            .await
            .context("timed out waiting for websocket frame")?
            .context("websocket closed")??;
        match frame {
            Message::Text(text) => return Ok(serde_json::from_str(text.as_ref())?),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => bail!("unexpected websocket frame: {other:?}"),
        }
    }
}

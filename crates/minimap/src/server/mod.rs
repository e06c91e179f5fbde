//! Host server: websocket accept loop feeding the game state.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::context::AppContext;

pub mod command;
pub mod game;

pub use game::{GameState, run_game_loop};

/// Run the host server until the listener fails.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let ctx = AppContext::from_config(config.clone())?;
    let game_state = Arc::new(RwLock::new(GameState::new(config.clone(), ctx)));

    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on ws://{}", addr);

    let game_loop_state = Arc::clone(&game_state);
    let tick_interval = config.server.tick_interval_ms;
    tokio::spawn(async move {
        game::run_game_loop(game_loop_state, tick_interval).await;
    });

    let max_connections = config.server.max_connections;
    let connections = Arc::new(AtomicUsize::new(0));

    loop {
        let (stream, addr) = listener.accept().await?;
        if connections.fetch_add(1, Ordering::SeqCst) >= max_connections {
            connections.fetch_sub(1, Ordering::SeqCst);
            warn!("Connection rejected (limit reached): {}", addr);
            continue;
        }

        let game_state = Arc::clone(&game_state);
        let connections = Arc::clone(&connections);
        tokio::spawn(async move {
            let result = handle_connection(stream, addr, game_state).await;
            connections.fetch_sub(1, Ordering::SeqCst);
            if let Err(e) = result {
                error!("Connection error from {}: {}", addr, e);
            }
        });
    }
}

/// Handle a single WebSocket connection.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    game_state: Arc<RwLock<GameState>>,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut write, mut read) = ws_stream.split();

    // Everything the game sends this connection goes through its pipeline
    // and lands here.
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    let conn = {
        let mut state = game_state.write().await;
        state.connect(tx)
    };
    info!("New connection {} from {}", conn, addr);

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        let mut state = game_state.write().await;
                        if let Err(e) = state.handle_packet(conn, &data) {
                            warn!("Packet error from {}: {}", addr, e);
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client {} disconnected", addr);
                        break;
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error from {}: {}", addr, e);
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }
            out = rx.recv() => {
                let Some(packet) = out else {
                    // Transport closed the connection.
                    break;
                };
                if let Err(e) = write.send(Message::Binary(packet.to_vec().into())).await {
                    warn!("Failed to send to {}: {}", addr, e);
                    break;
                }
            }
        }
    }

    let mut state = game_state.write().await;
    state.disconnect(conn);
    Ok(())
}

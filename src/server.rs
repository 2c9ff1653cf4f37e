//! WebSocket server for broadcasting sync events to dashboard clients.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use oracle_sync_core::SyncService;
use oracle_sync_types::SyncEvent;
use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info};

/// Idle time before the first keepalive probe on client sockets.
const KEEPALIVE_IDLE: Duration = Duration::from_secs(60);

/// Run the WebSocket server for broadcasting sync events.
pub async fn run_server(addr: &str, event_rx: broadcast::Receiver<SyncEvent>, sync: SyncService) {
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind server to {}: {}", addr, e);
            return;
        }
    };

    info!("Oracle WebSocket server listening on {}", addr);
    serve(listener, event_rx, sync).await;
}

/// Accept clients on `listener` until the event channel closes.
pub async fn serve(
    listener: TcpListener,
    mut event_rx: broadcast::Receiver<SyncEvent>,
    sync: SyncService,
) {
    // Broadcast channel for clients
    let (client_tx, _) = broadcast::channel::<String>(256);
    let client_tx_clone = client_tx.clone();

    // Forward sync events to client broadcast
    let mut forwarder = tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event) => {
                    if let Ok(json) = serde_json::to_string(&event) {
                        let _ = client_tx_clone.send(json);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("Event forwarder lagged by {} events", n);
                    continue;
                }
            }
        }
    });

    loop {
        let (stream, peer_addr) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(s) => s,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            },
            _ = &mut forwarder => break,
        };

        if let Err(e) = configure_socket(&stream) {
            debug!("Failed to configure socket for {}: {}", peer_addr, e);
        }

        let mut client_rx = client_tx.subscribe();
        let snapshot = SyncEvent::Health(sync.get_health());

        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, peer_addr, snapshot, &mut client_rx).await {
                debug!("Client {} error: {}", peer_addr, e);
            }
        });
    }
}

fn configure_socket(stream: &TcpStream) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    SockRef::from(stream).set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEPALIVE_IDLE))
}

async fn handle_client(
    stream: TcpStream,
    peer_addr: SocketAddr,
    snapshot: SyncEvent,
    data_rx: &mut broadcast::Receiver<String>,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    debug!("Client {} connected", peer_addr);

    // New clients start from the current health counts
    ws_sender
        .send(Message::Text(serde_json::to_string(&snapshot)?))
        .await?;

    loop {
        tokio::select! {
            // Forward data to client
            data = data_rx.recv() => {
                match data {
                    Ok(json) => {
                        if ws_sender.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }

            // Handle incoming messages (ping/pong and close)
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    debug!("Client {} disconnected", peer_addr);
    Ok(())
}

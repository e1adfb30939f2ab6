use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::commands::{parse_command, DashboardCommand, DashboardEvent, UiMessage};

type ClientConnections = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<Message>>>>;

/// Local WebSocket endpoint the renderer connects to.
pub struct UiBridge {
    port: u16,
    pub clients: ClientConnections,
    commands: mpsc::UnboundedSender<DashboardCommand>,
}

impl UiBridge {
    pub fn new(port: u16, commands: mpsc::UnboundedSender<DashboardCommand>) -> Self {
        Self {
            port,
            clients: Arc::new(Mutex::new(HashMap::new())),
            commands,
        }
    }

    pub async fn bind(&self) -> anyhow::Result<TcpListener> {
        let addr = format!("127.0.0.1:{}", self.port);
        match TcpListener::bind(&addr).await {
            Ok(listener) => {
                info!("UI bridge listening on: {}", addr);
                Ok(listener)
            }
            Err(e) => {
                error!("Failed to bind to {}: {}", addr, e);
                error!("Another instance may be running, or the port is taken");
                Err(e.into())
            }
        }
    }

    /// Accepts renderer connections until `shutdown` fires.
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let clients = Arc::clone(&self.clients);
                        let commands = self.commands.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, addr, clients, commands).await {
                                error!("Error handling connection from {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => warn!("Failed to accept connection: {}", e),
                },
            }
        }
        info!("UI bridge stopped");
    }

    pub async fn client_count(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn broadcast(&self, event: &DashboardEvent) -> Result<(), String> {
        let message_text = serde_json::to_string(&event.to_message()).map_err(|e| e.to_string())?;
        broadcast_text(&self.clients, message_text).await;
        Ok(())
    }

    /// Forwards dashboard events to every renderer until the channel closes.
    pub async fn pump_events(&self, mut events: mpsc::UnboundedReceiver<DashboardEvent>) {
        while let Some(event) = events.recv().await {
            if let Err(e) = self.broadcast(&event).await {
                error!("Failed to encode {} event: {}", event.message_type(), e);
            }
        }
        debug!("Event channel closed");
    }
}

async fn broadcast_text(clients: &ClientConnections, message_text: String) {
    let mut clients = clients.lock().await;
    if clients.is_empty() {
        return;
    }

    let ws_message = Message::Text(message_text);
    let mut disconnected_clients = Vec::new();
    for (client_id, sender) in clients.iter() {
        if sender.send(ws_message.clone()).is_err() {
            disconnected_clients.push(client_id.clone());
        }
    }

    for client_id in disconnected_clients {
        clients.remove(&client_id);
        warn!("Removed disconnected client: {}", client_id);
    }
}

async fn handle_connection(
    raw_stream: TcpStream,
    addr: SocketAddr,
    clients: ClientConnections,
    commands: mpsc::UnboundedSender<DashboardCommand>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = accept_async(raw_stream).await?;
    let client_id = Uuid::new_v4().to_string();

    info!("New renderer connection: {} with ID: {}", addr, client_id);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let welcome_msg = UiMessage::new(
        "connected",
        json!({
            "client_id": client_id,
            "status": "ready"
        }),
    );
    ws_sender
        .send(Message::Text(serde_json::to_string(&welcome_msg)?))
        .await?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    {
        let mut clients_guard = clients.lock().await;
        clients_guard.insert(client_id.clone(), tx.clone());
        info!("Client {} added. Total clients: {}", client_id, clients_guard.len());
    }

    let client_id_for_sender = client_id.clone();
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = ws_sender.send(message).await {
                error!("Failed to send message to client {}: {}", client_id_for_sender, e);
                break;
            }
        }
        debug!("Message forwarding task ended for client {}", client_id_for_sender);
    });

    // A new renderer needs the full picture, not just future deltas.
    let dashboard_alive = commands.send(DashboardCommand::Sync).is_ok();
    if !dashboard_alive {
        warn!("Dashboard is gone, closing client {}", client_id);
    }

    while dashboard_alive {
        let Some(msg) = ws_receiver.next().await else {
            break;
        };
        match msg? {
            Message::Text(text) => match serde_json::from_str::<UiMessage>(&text) {
                Ok(ui_msg) if ui_msg.message_type == "ping" => {
                    let pong = UiMessage::new("pong", json!({}));
                    let _ = tx.send(Message::Text(serde_json::to_string(&pong)?));
                }
                Ok(ui_msg) => match parse_command(&ui_msg) {
                    Ok(command) => {
                        if commands.send(command).is_err() {
                            warn!("Dashboard is gone, closing client {}", client_id);
                            break;
                        }
                    }
                    Err(e) => debug!("Client {}: {}", client_id, e),
                },
                Err(_) => warn!("Failed to parse message: {}", text),
            },
            Message::Binary(_) => debug!("Received binary message (not supported)"),
            Message::Close(_) => {
                info!("Client {} disconnected", client_id);
                break;
            }
            _ => {}
        }
    }

    {
        let mut clients_guard = clients.lock().await;
        clients_guard.remove(&client_id);
        info!("Client {} removed. Total clients: {}", client_id, clients_guard.len());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::connect_async;

    async fn next_text<S>(stream: &mut S) -> UiMessage
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            if let Message::Text(text) = stream.next().await.unwrap().unwrap() {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn renderer_round_trip() {
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        let bridge = Arc::new(UiBridge::new(0, command_tx));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();

        let server = Arc::clone(&bridge);
        let token = shutdown.clone();
        tokio::spawn(async move { server.serve(listener, token).await });

        let (mut socket, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        assert_eq!(next_text(&mut socket).await.message_type, "connected");
        assert_eq!(command_rx.recv().await, Some(DashboardCommand::Sync));

        let ping = serde_json::to_string(&UiMessage::new("ping", json!({}))).unwrap();
        socket.send(Message::Text(ping)).await.unwrap();
        assert_eq!(next_text(&mut socket).await.message_type, "pong");

        let up = serde_json::to_string(&UiMessage::new("POINTER_UP", json!({}))).unwrap();
        socket.send(Message::Text(up)).await.unwrap();
        assert_eq!(command_rx.recv().await, Some(DashboardCommand::PointerUp));

        while bridge.client_count().await == 0 {
            tokio::task::yield_now().await;
        }
        bridge.broadcast(&DashboardEvent::TrackEnded).await.unwrap();
        assert_eq!(next_text(&mut socket).await.message_type, "TRACK_ENDED");

        shutdown.cancel();
    }

    #[tokio::test]
    async fn client_is_dropped_when_dashboard_is_gone() {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        drop(command_rx);
        let bridge = Arc::new(UiBridge::new(0, command_tx));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();

        let server = Arc::clone(&bridge);
        let token = shutdown.clone();
        tokio::spawn(async move { server.serve(listener, token).await });

        let (mut socket, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        assert_eq!(next_text(&mut socket).await.message_type, "connected");

        loop {
            match socket.next().await {
                Some(Ok(Message::Text(_))) => continue,
                _ => break,
            }
        }
        assert_eq!(bridge.client_count().await, 0);

        shutdown.cancel();
    }
}

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        Message as WsMessage,
        client::IntoClientRequest,
        http::{HeaderValue, header::COOKIE},
    },
};
use tracing::debug;

use crate::protocol::{ClientEvent, ServerEvent};

use super::ClientError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// The real-time channel of one client. Owned by whoever drives the room
/// view; it is connected when a room is opened and closed with it.
pub struct Connection {
    url: String,
    stream: Option<WsStream>,
}

impl Connection {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stream: None,
        }
    }

    /// Channel endpoint of the server at `base_url` (`http://host:port`).
    pub fn for_server(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        let url = match base.strip_prefix("http") {
            Some(rest) => format!("ws{rest}/ws"),
            None => format!("{base}/ws"),
        };
        Self::new(url)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Opens the channel, replacing any previous stream. `cookie` carries the
    /// session that identifies the user.
    pub async fn connect(&mut self, cookie: Option<HeaderValue>) -> Result<(), ClientError> {
        self.disconnect().await;

        let mut request = self.url.as_str().into_client_request()?;
        if let Some(cookie) = cookie {
            request.headers_mut().insert(COOKIE, cookie);
        }
        let (stream, _) = connect_async(request).await?;
        debug!(url = %self.url, "real-time channel open");
        self.stream = Some(stream);
        Ok(())
    }

    pub async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
            debug!(url = %self.url, "real-time channel closed");
        }
    }

    pub async fn send(&mut self, event: &ClientEvent) -> Result<(), ClientError> {
        let stream = self.stream.as_mut().ok_or(ClientError::NotConnected)?;
        let json = serde_json::to_string(event)?;
        if let Err(err) = stream.send(WsMessage::text(json)).await {
            self.stream = None;
            return Err(err.into());
        }
        Ok(())
    }

    /// Waits for the next server event. Any transport error drops the stream.
    pub async fn recv(&mut self) -> Result<ServerEvent, ClientError> {
        loop {
            let stream = self.stream.as_mut().ok_or(ClientError::NotConnected)?;
            match stream.next().await {
                Some(Ok(WsMessage::Text(text))) => return Ok(serde_json::from_str(text.as_str())?),
                Some(Ok(WsMessage::Close(_))) | None => {
                    self.stream = None;
                    return Err(ClientError::Disconnected);
                }
                Some(Ok(_)) => continue,
                Some(Err(err)) => {
                    self.stream = None;
                    return Err(err.into());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_url_follows_the_server_scheme() {
        assert_eq!(Connection::for_server("http://127.0.0.1:8080").url(), "ws://127.0.0.1:8080/ws");
        assert_eq!(Connection::for_server("https://chat.example/").url(), "wss://chat.example/ws");
    }
}

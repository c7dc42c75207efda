use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, Stream, StreamExt};
use shore_proto::{ClientMessage, Identity, ServerMessage};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, error};
use url::Url;

use crate::config::RelayConfig;

#[derive(Parser, Debug)]
#[command(name = "shore-relay")]
#[command(about = "Shore call signaling relay and probe client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the relay (default when no command is given)
    Serve {
        /// Address to bind (overrides SHORE_RELAY_BIND)
        #[arg(long)]
        bind: Option<String>,

        /// Port to listen on (overrides SHORE_RELAY_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Connect as an identity and print who is online
    Probe {
        /// Relay URL (e.g., ws://localhost:8080)
        #[arg(short, long, default_value = "ws://localhost:8080")]
        url: String,

        /// Identity to connect as
        #[arg(long, default_value = "probe")]
        user: String,
    },
}

impl Cli {
    /// Effective server configuration: env first, flags on top.
    pub fn relay_config(&self) -> RelayConfig {
        let mut config = RelayConfig::from_env();
        if let Some(Commands::Serve { bind, port }) = &self.command {
            if let Some(bind) = bind {
                config.bind = bind.clone();
            }
            if let Some(port) = port {
                config.port = *port;
            }
        }
        config
    }
}

/// `<base>/ws?user_id=<user>` with the identity query-encoded.
pub fn probe_url(base: &str, user: &str) -> Result<Url> {
    let mut url = Url::parse(base).map_err(|e| anyhow!("invalid relay url {}: {}", base, e))?;
    let path = url.path().trim_end_matches('/');
    let path = format!("{path}/ws");
    url.set_path(&path);
    url.set_fragment(None);
    url.query_pairs_mut().clear().append_pair("user_id", user);
    Ok(url)
}

pub async fn run_probe(url: String, user: String) -> Result<Vec<Identity>> {
    let ws_url = probe_url(&url, &user)?.to_string();
    debug!("probing {}", ws_url);

    let (ws_stream, _) = match timeout(Duration::from_secs(5), connect_async(&ws_url)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            error!("failed to connect to {}: {}", ws_url, e);
            return Err(anyhow!("connection failed: {}", e));
        }
        Err(_) => return Err(anyhow!("connection timeout - is the relay running?")),
    };
    let (mut write, mut read) = ws_stream.split();

    let ping = shore_proto::encode_client(&ClientMessage::Ping)?;
    write.send(Message::Text(ping.into())).await?;

    let users = timeout(Duration::from_secs(5), next_presence(&mut read))
        .await
        .map_err(|_| anyhow!("no presence snapshot within 5 seconds"))??;

    let _ = write.send(Message::Close(None)).await;
    Ok(users)
}

async fn next_presence<S>(read: &mut S) -> Result<Vec<Identity>>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(frame) = read.next().await {
        let text = match frame? {
            Message::Text(text) => text.to_string(),
            Message::Binary(data) => String::from_utf8(data.to_vec())?,
            Message::Close(_) => break,
            _ => continue,
        };
        if let ServerMessage::OnlineUsers { users } = shore_proto::decode_server(&text)? {
            return Ok(users);
        }
    }
    Err(anyhow!("relay closed before sending presence"))
}

//! Chat Gateway - Interactive Client
//!
//! Joins a room and relays stdin lines as text messages, printing whatever
//! the room sends back. Enter `:quit` or press Ctrl-C to leave.
//!
//! Usage: chat_client <room> [name] [addr]

use std::env;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as Frame;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use url::Url;

const DEFAULT_ADDR: &str = "localhost:8080";
const QUIT_COMMAND: &str = ":quit";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("chat_client=info")),
        )
        .init();

    let mut args = env::args().skip(1);
    let Some(room) = args.next() else {
        eprintln!("Usage: chat_client <room> [name] [addr]");
        std::process::exit(2);
    };
    let name = args.next().unwrap_or_default();
    let addr = args.next().unwrap_or_else(|| DEFAULT_ADDR.to_string());

    let mut url = Url::parse(&format!("ws://{}/chat", addr))?;
    url.query_pairs_mut()
        .append_pair("room", &room)
        .append_pair("name", &name);

    info!("Connecting to {}", url);
    let (ws, _) = connect_async(url.as_str()).await?;
    let (mut sink, mut stream) = ws.split();

    // Print everything the room delivers
    let reader = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Frame::Text(text)) => println!("{}", text),
                Ok(Frame::Binary(data)) => println!("<{} bytes>", data.len()),
                Ok(Frame::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    error!("Read error: {}", e);
                    break;
                }
            }
        }
        info!("Connection closed by server");
    });

    println!("Enter '{}' to exit", QUIT_COMMAND);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line == QUIT_COMMAND {
                    break;
                }
                if let Err(e) = sink.send(Frame::Text(line)).await {
                    error!("Write error: {}", e);
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received");
                break;
            }
        }
    }

    // Normal closure; the server removes us from the room
    let _ = sink.close().await;
    reader.abort();

    Ok(())
}

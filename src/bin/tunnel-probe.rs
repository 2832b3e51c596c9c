use std::io::Write;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use tunnel_relay::protocol::{encode_request_header, Command, TargetAddress, RESPONSE_HEADER_LEN};

#[derive(Parser)]
#[command(name = "tunnel-probe")]
#[command(about = "Open a TCP tunnel through a relay and print the reply", long_about = None)]
struct Cli {
    /// Relay WebSocket URL.
    #[arg(short, long, default_value = "ws://localhost:8080/")]
    url: String,

    /// Identity to authenticate with.
    #[arg(long)]
    uuid: Uuid,

    /// Destination as host:port ([v6]:port for IPv6).
    #[arg(short, long)]
    target: String,

    /// Payload sent with the header.
    #[arg(short, long, default_value = "")]
    payload: String,

    /// Send the first chunk as early data in Sec-WebSocket-Protocol.
    #[arg(long)]
    early_data: bool,

    /// Seconds to wait for the reply.
    #[arg(long, default_value_t = 10)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let (host, port) = cli
        .target
        .rsplit_once(':')
        .ok_or("target must be host:port")?;
    let port: u16 = port.parse()?;
    let address = TargetAddress::from(host.trim_start_matches('[').trim_end_matches(']'));

    let mut first = encode_request_header(&cli.uuid, Command::Tcp, port, &address);
    first.extend_from_slice(cli.payload.as_bytes());

    let mut request = cli.url.as_str().into_client_request()?;
    if cli.early_data {
        let encoded = URL_SAFE_NO_PAD.encode(&first);
        request
            .headers_mut()
            .insert("sec-websocket-protocol", HeaderValue::from_str(&encoded)?);
    }

    let (mut socket, _) = tokio_tungstenite::connect_async(request).await?;
    if !cli.early_data {
        socket.send(Message::binary(first)).await?;
    }

    let mut header_seen = false;
    let mut stdout = std::io::stdout();
    let reading = async {
        while let Some(message) = socket.next().await {
            let data = match message? {
                Message::Binary(data) => data,
                Message::Close(_) => break,
                _ => continue,
            };
            let body = if header_seen {
                &data[..]
            } else {
                header_seen = true;
                &data[RESPONSE_HEADER_LEN.min(data.len())..]
            };
            stdout.write_all(body)?;
            stdout.flush()?;
        }
        Ok::<_, Box<dyn std::error::Error>>(())
    };

    match tokio::time::timeout(Duration::from_secs(cli.timeout), reading).await {
        Ok(result) => result?,
        Err(_) => eprintln!("\nNo more data after {}s", cli.timeout),
    }

    if !header_seen {
        eprintln!("Relay closed the tunnel without a response");
        std::process::exit(1);
    }
    Ok(())
}

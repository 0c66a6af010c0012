use lifo_client::{ClientConfig, StackClient, fetch_diagnostics};
use std::net::SocketAddr;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

const DIAGNOSTIC_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn push(server_addr: &str, data: &str, input_hex: bool, timeout: Option<u64>) -> Result<()> {
    let payload = if input_hex {
        decode_hex(data)?
    } else {
        data.as_bytes().to_vec()
    };
    let len = payload.len();

    let client = StackClient::new(client_config(server_addr, timeout).await?);
    client.push(payload).await?;

    println!("Pushed {} byte(s)", len);
    Ok(())
}

pub async fn pop(server_addr: &str, output_hex: bool, timeout: Option<u64>) -> Result<()> {
    let client = StackClient::new(client_config(server_addr, timeout).await?);
    let data = client.pop().await?;

    if output_hex {
        print_hex(&data);
    } else {
        println!("{}", String::from_utf8_lossy(&data));
    }
    Ok(())
}

pub async fn stats(server_addr: &str, json: bool) -> Result<()> {
    let addr = resolve(server_addr).await?;
    let snapshot = fetch_diagnostics(addr, DIAGNOSTIC_TIMEOUT).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!("Live connections:         {}", snapshot.live_connections);
    println!("Stack depth:              {}", snapshot.stack_depth);
    println!(
        "Connections ever accepted: {}",
        snapshot.total_connections_ever_accepted
    );
    Ok(())
}

async fn client_config(server_addr: &str, timeout: Option<u64>) -> Result<ClientConfig> {
    let mut config = ClientConfig::new(resolve(server_addr).await?);
    if let Some(secs) = timeout {
        config = config.with_read_timeout(Duration::from_secs(secs));
    }
    Ok(config)
}

/// Accepts `host:port` as well as a literal socket address.
async fn resolve(server_addr: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(server_addr)
        .await?
        .next()
        .ok_or_else(|| format!("Could not resolve {}", server_addr).into())
}

fn decode_hex(input: &str) -> Result<Vec<u8>> {
    let digits: Vec<u8> = input
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();

    if digits.len() % 2 != 0 {
        return Err("Hex input must have an even number of digits".into());
    }

    digits
        .chunks(2)
        .map(|pair| -> Result<u8> {
            let text = std::str::from_utf8(pair)?;
            Ok(u8::from_str_radix(text, 16)?)
        })
        .collect()
}

fn print_hex(data: &[u8]) {
    if data.is_empty() {
        println!("(empty)");
        return;
    }

    for (i, chunk) in data.chunks(16).enumerate() {
        print!("{:08x}  ", i * 16);

        for (j, byte) in chunk.iter().enumerate() {
            print!("{:02x} ", byte);
            if j == 7 {
                print!(" ");
            }
        }

        for j in chunk.len()..16 {
            print!("   ");
            if j == 7 {
                print!(" ");
            }
        }

        let ascii: String = chunk
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();
        println!(" |{}|", ascii);
    }
}

// Snow-Owl XMODEM Client Binary

use anyhow::Context;
use clap::Parser;
use snow_owl_xmodem::protocol::{
    ACK, EOT, FILENAME_CONFIRM, FILENAME_FIELD_LEN, LINE_TERMINATOR, NAK, SUB, encode_block,
    next_block_number,
};
use snow_owl_xmodem::{BlockSize, Result, XmodemError};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Snow-Owl XMODEM Client
#[derive(Parser, Debug)]
#[command(name = "snow-owl-xmodem-client")]
#[command(about = "Send a file to a Snow-Owl XMODEM server", long_about = None)]
struct Cli {
    /// XMODEM server address (e.g., 192.168.1.100:53800)
    #[arg(short, long)]
    server: SocketAddr,

    /// Local file to send
    #[arg(short, long)]
    file: PathBuf,

    /// Name to store the file under (defaults to the local file name)
    #[arg(short, long)]
    name: Option<String>,

    /// Send 1024-byte blocks (STX) instead of 128-byte blocks (SOH)
    #[arg(short, long)]
    large: bool,

    /// Seconds to wait for each server reply
    #[arg(short, long, default_value_t = 10)]
    timeout: u64,

    /// Attempts per block before giving up on repeated NAKs
    #[arg(short, long, default_value_t = 10)]
    retries: u32,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(false)
        .init();

    let remote_name = match cli.name {
        Some(name) => name,
        None => cli
            .file
            .file_name()
            .and_then(|name| name.to_str())
            .map(String::from)
            .ok_or_else(|| XmodemError::Xmodem("Cannot derive a remote file name".into()))?,
    };

    let data = tokio::fs::read(&cli.file)
        .await
        .with_context(|| format!("Failed to read {}", cli.file.display()))?;
    if data.contains(&SUB) {
        warn!("File contains SUB (0x1A) bytes; the server truncates each block at the first one");
    }

    let size = if cli.large {
        BlockSize::Large
    } else {
        BlockSize::Standard
    };

    let mut sender = XmodemSender::connect(
        cli.server,
        size,
        Duration::from_secs(cli.timeout),
        cli.retries,
    )
    .await?;

    info!("Sending {:?} to {} as {}", cli.file, cli.server, remote_name);
    let start = Instant::now();
    sender.send_file(&remote_name, &data).await?;
    info!(
        "Sent {} bytes in {:.2}s",
        data.len(),
        start.elapsed().as_secs_f64()
    );

    Ok(())
}

/// XMODEM-CRC sender
struct XmodemSender {
    stream: TcpStream,
    size: BlockSize,
    reply_timeout: Duration,
    retries: u32,
}

impl XmodemSender {
    async fn connect(
        server: SocketAddr,
        size: BlockSize,
        reply_timeout: Duration,
        retries: u32,
    ) -> Result<Self> {
        let stream = timeout(reply_timeout, TcpStream::connect(server))
            .await
            .map_err(|_| XmodemError::Xmodem(format!("Timed out connecting to {}", server)))??;
        stream.set_nodelay(true)?;
        debug!("Connected to {}", server);

        Ok(Self {
            stream,
            size,
            reply_timeout,
            retries,
        })
    }

    async fn send_file(&mut self, remote_name: &str, data: &[u8]) -> Result<()> {
        self.send_filename(remote_name).await?;

        let mut number = 1u8;
        for (index, chunk) in data.chunks(self.size.payload_len()).enumerate() {
            self.send_block(number, chunk).await?;
            debug!("Block {} ({} of file) acknowledged", number, index + 1);
            number = next_block_number(number);
        }

        self.stream.write_all(&[EOT]).await?;
        match self.read_reply().await? {
            ACK => Ok(()),
            other => Err(XmodemError::Xmodem(format!(
                "Expected ACK after EOT, got {:#04x}",
                other
            ))),
        }
    }

    async fn send_filename(&mut self, remote_name: &str) -> Result<()> {
        let max_len = FILENAME_FIELD_LEN - LINE_TERMINATOR.len();
        if remote_name.is_empty() || remote_name.len() > max_len {
            return Err(XmodemError::Xmodem(format!(
                "Remote name must be 1-{} bytes",
                max_len
            )));
        }

        let mut request = Vec::with_capacity(remote_name.len() + LINE_TERMINATOR.len());
        request.extend_from_slice(remote_name.as_bytes());
        request.extend_from_slice(LINE_TERMINATOR);
        self.stream.write_all(&request).await?;

        match self.read_reply().await? {
            FILENAME_CONFIRM => Ok(()),
            other => Err(XmodemError::Xmodem(format!(
                "Server refused filename, replied {:#04x}",
                other
            ))),
        }
    }

    async fn send_block(&mut self, number: u8, chunk: &[u8]) -> Result<()> {
        let packet = encode_block(number, self.size, chunk)?;

        for attempt in 1..=self.retries {
            self.stream.write_all(&packet).await?;
            match self.read_reply().await? {
                ACK => return Ok(()),
                NAK => warn!("Block {} rejected (attempt {})", number, attempt),
                other => {
                    return Err(XmodemError::Xmodem(format!(
                        "Unexpected reply {:#04x} to block {}",
                        other, number
                    )));
                }
            }
        }

        Err(XmodemError::Xmodem(format!(
            "Block {} rejected {} times",
            number, self.retries
        )))
    }

    async fn read_reply(&mut self) -> Result<u8> {
        let mut reply = [0u8; 1];
        timeout(self.reply_timeout, self.stream.read_exact(&mut reply))
            .await
            .map_err(|_| XmodemError::Xmodem("Timed out waiting for server reply".into()))??;
        Ok(reply[0])
    }
}

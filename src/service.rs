use std::{
    io::{self, BufRead, Cursor, Write},
    sync::Arc,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
};
use tracing::{error, info};

use crate::{
    command::{self, Command, Request},
    error::{Error, Result},
    translator::{Translator, STATE_EOF},
};

/// Serves the line protocol on stdin/stdout: one command per line,
/// responses (when a command produces one) on stdout. A LOAD without a
/// filename reads its state block from the same input stream.
pub fn run_stdio(translator: &Translator) -> Result<()> {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let stdout = io::stdout();
    let mut output = stdout.lock();
    let mut line = String::new();
    loop {
        line.clear();
        if input.read_line(&mut line)? == 0 {
            return Ok(());
        }
        let line = line.trim_end_matches(&['\n', '\r'][..]).to_owned();
        if let Some(response) = translator.command_line(&line, &mut input) {
            writeln!(output, "{response}")?;
            output.flush()?;
        }
    }
}

/// Serves the line protocol to any number of concurrent TCP clients. Each
/// connection handles its own commands in order; cross-connection fairness
/// comes from the per-context ordered mutexes.
pub fn run_tcp(translator: Arc<Translator>, port: u16) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        info!(port, "listening for clients");
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupt received");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (socket, peer) = accepted?;
                    info!(%peer, "client connected");
                    let translator = Arc::clone(&translator);
                    tokio::spawn(async move {
                        if let Err(err) = serve_connection(translator, socket).await {
                            error!(error = %err, "connection failed");
                        }
                    });
                }
            }
        }
    })
}

async fn serve_connection(translator: Arc<Translator>, socket: TcpStream) -> Result<()> {
    let (read_half, mut write_half) = socket.into_split();
    let mut input = BufReader::new(read_half);
    let mut line = String::new();
    loop {
        line.clear();
        if input.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let request_line = line.trim_end_matches(&['\n', '\r'][..]).to_owned();
        // A LOAD without a filename streams its state block over the
        // connection; collect it here where the async reader lives.
        let payload = if wants_inline_state(&request_line) {
            collect_state_block(&mut input).await?
        } else {
            Vec::new()
        };
        let worker = {
            let translator = Arc::clone(&translator);
            tokio::task::spawn_blocking(move || {
                translator.command_line(&request_line, &mut Cursor::new(payload))
            })
        };
        let response = worker
            .await
            .map_err(|err| Error::Io(io::Error::new(io::ErrorKind::Other, err)))?;
        if let Some(response) = response {
            write_half.write_all(response.as_bytes()).await?;
            write_half.write_all(b"\n").await?;
        }
    }
}

fn wants_inline_state(line: &str) -> bool {
    matches!(
        command::parse(line),
        Ok(Request {
            command: Command::Load { path: None },
            ..
        })
    )
}

/// Reads lines up to and including the EOF marker. A stream that ends
/// early yields a truncated block; the translator's recovery handles it.
async fn collect_state_block<R: AsyncBufReadExt + Unpin>(input: &mut R) -> Result<Vec<u8>> {
    let mut block = Vec::new();
    let mut line = String::new();
    loop {
        line.clear();
        if input.read_line(&mut line).await? == 0 {
            return Ok(block);
        }
        block.extend_from_slice(line.as_bytes());
        if line.trim_end_matches(&['\n', '\r'][..]) == STATE_EOF {
            return Ok(block);
        }
    }
}

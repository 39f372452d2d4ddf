//! Pipe transport — newline-delimited JSON-RPC on stdin/stdout.
//!
//! One local client, strict FIFO: each line is dispatched to completion
//! and its response written before the next line is read. Logs must go
//! to stderr only; stdout belongs to the protocol.

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};

use crate::rpc;
use crate::AppContext;

pub async fn run(ctx: AppContext) -> Result<()> {
    info!("stdio transport ready");

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut lines = stdin.lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match rpc::dispatch_line(line, &ctx).await {
            Some(response) => {
                stdout.write_all(response.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
            None => debug!("notification — no response emitted"),
        }
    }

    info!("stdin closed — stdio transport stopping");
    Ok(())
}

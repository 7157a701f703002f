//! Interactive REPL over one persistent kernel session.
//!
//! Run with: CABLE_GATEWAY_URL=http://localhost:8888 cargo run -p cable-repl
//!
//! Each line is executed in the same kernel, so names bound by one line are
//! visible to the next. End a line with `\` to continue it. Commands:
//! `:state`, `:interrupt`, `:shutdown`, `:quit`. Ctrl-C interrupts a
//! running execution.

use std::{io::Write as _, sync::Arc};

use anyhow::Context as _;
use cable_core::{OutputRecord, RecordError};
use cable_session::{KernelSession, SessionConfig};
use cable_telemetry::{TelemetryClient, TelemetryOptions};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = SessionConfig::from_env().context("loading session configuration")?;
    let session = KernelSession::start(config)
        .await
        .context("starting kernel session")?;
    println!(
        "Connected to {} kernel {}",
        session.kernel_name(),
        session.kernel_id().map(|id| id.to_string()).unwrap_or_default()
    );

    let telemetry = start_telemetry(&session);
    let result = repl(&session).await;

    if session.is_open() {
        session.close().await?;
    }
    if let Some(client) = telemetry {
        if let Err(e) = client.flush().await {
            tracing::warn!("Telemetry flush failed: {e}");
        }
    }
    result
}

/// Mirror session output to telemetry when credentials are configured.
fn start_telemetry(session: &KernelSession) -> Option<Arc<TelemetryClient>> {
    let options = TelemetryOptions::from_env();
    if options.public_key.is_empty() {
        return None;
    }
    match TelemetryClient::new(options) {
        Ok(client) => {
            let client = Arc::new(client);
            cable_telemetry::observe(Arc::clone(&client), session.label(), session.listen());
            Some(client)
        }
        Err(e) => {
            tracing::warn!("Telemetry disabled: {e}");
            None
        }
    }
}

async fn repl(session: &KernelSession) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut code = String::new();

    loop {
        prompt(if code.is_empty() { ">>> " } else { "... " })?;
        let Some(line) = lines.next_line().await? else {
            return Ok(());
        };

        if let Some(partial) = line.strip_suffix('\\') {
            code.push_str(partial);
            code.push('\n');
            continue;
        }
        code.push_str(&line);
        let input = std::mem::take(&mut code);

        match input.trim() {
            "" => {}
            ":quit" => return Ok(()),
            ":state" => println!("{}", session.state()),
            ":interrupt" => session.interrupt().await?,
            ":shutdown" => {
                session.shutdown().await?;
                println!("Kernel shut down");
                return Ok(());
            }
            _ => run(session, &input).await?,
        }

        if !session.is_open() {
            anyhow::bail!("session closed");
        }
    }
}

async fn run(session: &KernelSession, code: &str) -> anyhow::Result<()> {
    let mut execution = session.execute(code).await?;
    loop {
        tokio::select! {
            record = execution.next() => {
                let Some(record) = record else {
                    return Ok(());
                };
                print_record(&record);
            }
            _ = tokio::signal::ctrl_c() => {
                println!("^C");
                session.interrupt().await?;
            }
        }
    }
}

fn print_record(record: &OutputRecord) {
    match &record.error {
        Some(RecordError::Kernel(err)) => {
            eprintln!("{}", err.render());
            return;
        }
        Some(RecordError::Fault { message }) => {
            eprintln!("session fault: {message}");
            return;
        }
        None => {}
    }

    if record.name.as_deref() == Some("stderr") {
        eprint!("{}", record.text);
    } else if let Some(text) = record.display_text() {
        print!("{text}");
        if record.text.is_empty() {
            println!();
        }
    } else if let Some(data) = &record.data {
        match data.binary() {
            Ok(Some(payload)) => println!("[{} {} bytes]", payload.mime_type, payload.bytes.len()),
            Ok(None) => {}
            Err(e) => tracing::warn!("Undecodable display payload: {e}"),
        }
    }
    if let Some(count) = record.execution_count.filter(|_| record.is_terminal()) {
        tracing::debug!("Execution {count} finished: {}", record.status);
    }
}

fn prompt(text: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    stdout.write_all(text.as_bytes())?;
    stdout.flush()
}

mod api;
mod authz;
mod config;
mod db;
mod error;
mod hierarchy;
mod session;
mod timetable;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::ServiceConfig;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Parser)]
#[command(name = "timetabled", version, about = "Timetable scheduling service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP API (default).
    Serve,
    /// Print a signed credential for an existing, enabled user.
    IssueToken {
        #[arg(long)]
        user_id: i64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing()?;
    let config = ServiceConfig::load().context("failed to load configuration")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(Arc::new(config)),
        Command::IssueToken { user_id } => issue_token(&config, user_id),
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_env("TIMETABLED_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}

fn busy_timeout(config: &ServiceConfig) -> Duration {
    Duration::from_millis(config.database.busy_timeout_ms)
}

fn issue_token(config: &ServiceConfig, user_id: i64) -> anyhow::Result<()> {
    let conn = db::open_db(&config.database.path, busy_timeout(config))?;
    let user = hierarchy::resolve_user(&conn, user_id)?;
    let Some(role) = user.role.filter(|_| user.enabled) else {
        anyhow::bail!("user {user_id} is disabled or has an unknown role");
    };
    let identity = session::Identity {
        user_id: user.id,
        email: user.email,
        name: user.name,
        role,
    };
    let token = session::issue_token(&config.auth, &identity)?;
    println!("{token}");
    Ok(())
}

fn serve(config: Arc<ServiceConfig>) -> anyhow::Result<()> {
    // Create or migrate the schema once before any worker starts.
    db::open_db(&config.database.path, busy_timeout(&config)).with_context(|| {
        format!(
            "failed to open database at {}",
            config.database.path.display()
        )
    })?;

    let server = tiny_http::Server::http(config.server.bind.as_str())
        .map_err(|e| anyhow::anyhow!("failed to bind {}: {e}", config.server.bind))?;
    let server = Arc::new(server);
    let addr = server
        .server_addr()
        .to_ip()
        .context("server is not listening on an IP address")?;

    // Readiness line for supervisors and tests; logs go to stderr.
    let mut stdout = std::io::stdout();
    writeln!(stdout, "{}", serde_json::json!({ "listening": addr.to_string() }))?;
    stdout.flush()?;
    tracing::info!(%addr, workers = config.server.workers, "timetable service listening");

    let mut workers = Vec::with_capacity(config.server.workers);
    for n in 0..config.server.workers {
        let conn = db::open_db(&config.database.path, busy_timeout(&config))?;
        let mut state = api::AppState {
            config: Arc::clone(&config),
            db: conn,
        };
        let server = Arc::clone(&server);
        let handle = std::thread::Builder::new()
            .name(format!("timetabled-worker-{n}"))
            .spawn(move || {
                for rq in server.incoming_requests() {
                    serve_one(&mut state, rq);
                }
            })?;
        workers.push(handle);
    }

    for handle in workers {
        if handle.join().is_err() {
            tracing::error!("worker thread panicked");
        }
    }
    Ok(())
}

fn serve_one(state: &mut api::AppState, mut rq: tiny_http::Request) {
    let started = Instant::now();
    let (path, query) = split_url(rq.url());
    let authorization = rq
        .headers()
        .iter()
        .find(|h| h.field.equiv("Authorization"))
        .map(|h| h.value.as_str().to_string());

    let mut body = String::new();
    let req = api::ApiRequest {
        id: uuid::Uuid::new_v4().to_string(),
        method: rq.method().as_str().to_ascii_uppercase(),
        path,
        query,
        authorization,
        body: String::new(),
    };
    let resp = match rq.as_reader().read_to_string(&mut body) {
        Ok(_) => {
            let method = req.method.clone();
            let path = req.path.clone();
            let resp = api::handle_request(state, api::ApiRequest { body, ..req });
            tracing::debug!(
                %method,
                %path,
                status = resp.status,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "request handled"
            );
            resp
        }
        Err(e) => api::ApiResponse {
            status: 400,
            body: serde_json::json!({
                "id": req.id,
                "ok": false,
                "error": { "code": "bad_body", "message": e.to_string() }
            }),
        },
    };

    let payload = serde_json::to_string(&resp.body).unwrap_or_else(|_| "{\"ok\":false}".to_string());
    let mut response = tiny_http::Response::from_string(payload).with_status_code(resp.status);
    if let Ok(header) = tiny_http::Header::from_bytes("Content-Type", "application/json") {
        response = response.with_header(header);
    }
    if let Err(e) = rq.respond(response) {
        tracing::warn!(error = %e, "failed to write response");
    }
}

fn split_url(url: &str) -> (String, HashMap<String, String>) {
    let (path, raw_query) = url.split_once('?').unwrap_or((url, ""));
    let query = raw_query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (decode(k), decode(v))
        })
        .collect();
    let path = path.trim_end_matches('/');
    let path = if path.is_empty() { "/" } else { path };
    (path.to_string(), query)
}

fn decode(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_url_decodes_query() {
        let (path, query) = split_url("/timetable/?batchId=1&sectionId=2&day=Mon%64ay&room=Lab+1");
        assert_eq!(path, "/timetable");
        assert_eq!(query.get("batchId").map(String::as_str), Some("1"));
        assert_eq!(query.get("sectionId").map(String::as_str), Some("2"));
        assert_eq!(query.get("day").map(String::as_str), Some("Monday"));
        assert_eq!(query.get("room").map(String::as_str), Some("Lab 1"));
    }

    #[test]
    fn split_url_without_query() {
        let (path, query) = split_url("/health");
        assert_eq!(path, "/health");
        assert!(query.is_empty());
    }
}

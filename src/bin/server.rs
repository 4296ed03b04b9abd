//! HTTP server for the NL-to-SQL pipeline
//! Minimal HTTP/1.1 handling on a tokio TcpListener

use nl2sql::api::{handle_generate, ErrorResponse, GenerateRequest};
use nl2sql::Nl2SqlPipeline;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const MAX_BODY_BYTES: usize = 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let pipeline = Arc::new(Nl2SqlPipeline::from_env()?);
    let bind = std::env::var("NL2SQL_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    let listener = TcpListener::bind(&bind).await?;
    info!("NL2SQL API server listening on http://{}", bind);

    loop {
        let (stream, addr) = listener.accept().await?;
        info!(%addr, "New connection");
        tokio::spawn(handle_connection(stream, Arc::clone(&pipeline)));
    }
}

async fn handle_connection(mut stream: TcpStream, pipeline: Arc<Nl2SqlPipeline>) {
    let response = match read_request(&mut stream).await {
        Ok(Some((head, body))) => handle_request(&head, &body, &pipeline).await,
        Ok(None) => create_response(400, "Bad Request", r#"{"error":"malformed request"}"#),
        Err(e) => {
            error!("Failed to read from stream: {}", e);
            return;
        }
    };

    if let Err(e) = stream.write_all(response.as_bytes()).await {
        error!("Failed to write response: {}", e);
    }
}

/// Read the request head, then exactly `Content-Length` body bytes.
async fn read_request(stream: &mut TcpStream) -> std::io::Result<Option<(String, String)>> {
    let mut data = Vec::new();
    let mut buffer = [0u8; 4096];

    let head_end = loop {
        if let Some(pos) = find_subsequence(&data, b"\r\n\r\n") {
            break pos;
        }
        let n = stream.read(&mut buffer).await?;
        if n == 0 || data.len() > MAX_BODY_BYTES {
            return Ok(None);
        }
        data.extend_from_slice(&buffer[..n]);
    };

    let head = String::from_utf8_lossy(&data[..head_end]).to_string();
    let content_length = parse_headers(&head)
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    if content_length > MAX_BODY_BYTES {
        return Ok(None);
    }

    let body_start = head_end + 4;
    while data.len() < body_start + content_length {
        let n = stream.read(&mut buffer).await?;
        if n == 0 {
            return Ok(None);
        }
        data.extend_from_slice(&buffer[..n]);
    }

    let body = String::from_utf8_lossy(&data[body_start..body_start + content_length]).to_string();
    Ok(Some((head, body)))
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_headers(head: &str) -> HashMap<String, String> {
    head.lines()
        .skip(1)
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_lowercase(), value.trim().to_string()))
        .collect()
}

async fn handle_request(head: &str, body: &str, pipeline: &Nl2SqlPipeline) -> String {
    let parts: Vec<&str> = head.lines().next().unwrap_or("").split_whitespace().collect();
    if parts.len() < 2 {
        return create_response(400, "Bad Request", r#"{"error":"malformed request line"}"#);
    }

    let method = parts[0];
    let path = parts[1].split('?').next().unwrap_or("/").trim_end_matches('/');
    info!(method, path, "Request");

    match (method, path) {
        ("OPTIONS", _) => create_response(204, "No Content", ""),
        ("GET", "/api/health") => {
            create_response(200, "OK", r#"{"status":"ok","service":"nl2sql-api"}"#)
        }
        ("POST", "/api/generate") => {
            let request: GenerateRequest = match serde_json::from_str(body) {
                Ok(request) => request,
                Err(e) => {
                    warn!("Rejected request body: {}", e);
                    let error = ErrorResponse {
                        stage: None,
                        error: format!("invalid request body: {}", e),
                    };
                    return json_response(400, &error);
                }
            };

            match handle_generate(pipeline, request).await {
                Ok(response) => json_response(200, &response),
                Err(error) => json_response(error.http_status(), &error),
            }
        }
        _ => create_response(404, "Not Found", r#"{"error":"not found"}"#),
    }
}

fn json_response<T: serde::Serialize>(status: u16, value: &T) -> String {
    match serde_json::to_string(value) {
        Ok(body) => create_response(status, status_text(status), &body),
        Err(e) => {
            error!("Failed to serialize response: {}", e);
            create_response(500, "Internal Server Error", r#"{"error":"failed to serialize response"}"#)
        }
    }
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        502 => "Bad Gateway",
        _ => "Internal Server Error",
    }
}

fn create_response(status: u16, status_text: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: Content-Type\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        status_text,
        body.len(),
        body
    )
}

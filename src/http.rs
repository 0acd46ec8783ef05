//! HTTP front end
//!
//! A small HTTP/1.1 server on a raw tokio `TcpListener`: one request per
//! connection, JSON in and out. Routes:
//!
//! - `GET /health`
//! - `GET /metrics/monthly-revenue?limit=N`
//! - `POST /nl/query` with `{"question": "..."}`
//! - `POST /nl/intent` with `{"question": "..."}`
//!
//! CORS headers are only sent back to configured origins.

use crate::db::QueryExecutor;
use crate::error::{GatewayError, Result};
use crate::gateway::Gateway;
use crate::llm::SqlGenerator;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

const MAX_HEAD_BYTES: usize = 16 * 1024;
const MAX_BODY_BYTES: usize = 1024 * 1024;
const DEFAULT_MONTHLY_LIMIT: i64 = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn json<T: Serialize>(status: u16, value: &T) -> Self {
        let body = serde_json::to_string(value)
            .unwrap_or_else(|e| json!({ "detail": e.to_string() }).to_string());
        Self {
            status,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body,
        }
    }

    pub fn detail(status: u16, detail: impl Into<String>) -> Self {
        Self::json(status, &json!({ "detail": detail.into() }))
    }

    pub fn no_content() -> Self {
        Self {
            status: 204,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn from_error(err: &GatewayError) -> Self {
        let status = if err.is_client_error() { 400 } else { 500 };
        Self::detail(status, err.to_string())
    }

    fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, reason_phrase(self.status));
        for (name, value) in &self.headers {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        head.push_str("Connection: close\r\n\r\n");

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(self.body.as_bytes());
        bytes
    }
}

#[derive(Debug, Deserialize)]
struct QuestionBody {
    question: String,
}

/// Routes requests to a [`Gateway`].
pub struct Router<G, E> {
    gateway: Gateway<G, E>,
    cors_origins: Vec<String>,
}

impl<G: SqlGenerator, E: QueryExecutor> Router<G, E> {
    pub fn new(gateway: Gateway<G, E>, cors_origins: Vec<String>) -> Self {
        Self {
            gateway,
            cors_origins,
        }
    }

    pub async fn handle(&self, request: &HttpRequest) -> HttpResponse {
        debug!(method = %request.method, path = %request.path, "request");
        let response = match (request.method.as_str(), request.path.as_str()) {
            ("OPTIONS", _) => HttpResponse::no_content(),
            ("GET", "/health") => HttpResponse::json(200, &json!({ "status": "ok" })),
            ("GET", "/metrics/monthly-revenue") => self.monthly_revenue(request).await,
            ("POST", "/nl/query") => match question(request) {
                Ok(question) => respond(self.gateway.ask(&question).await),
                Err(response) => response,
            },
            ("POST", "/nl/intent") => match question(request) {
                Ok(question) => respond(self.gateway.ask_intent(&question).await),
                Err(response) => response,
            },
            _ => HttpResponse::detail(404, "Not Found"),
        };
        self.apply_cors(request, response)
    }

    async fn monthly_revenue(&self, request: &HttpRequest) -> HttpResponse {
        let limit = match request.query.get("limit") {
            None => DEFAULT_MONTHLY_LIMIT,
            Some(raw) => match raw.parse::<i64>() {
                Ok(limit) => limit,
                Err(_) => return HttpResponse::detail(400, "limit must be an integer"),
            },
        };
        match self.gateway.monthly_revenue(limit).await {
            Ok(result) => HttpResponse::json(200, &result.rows),
            Err(err) => HttpResponse::from_error(&err),
        }
    }

    fn apply_cors(&self, request: &HttpRequest, response: HttpResponse) -> HttpResponse {
        let Some(origin) = request.header("origin") else {
            return response;
        };
        if !self.cors_origins.iter().any(|allowed| allowed == origin) {
            return response;
        }

        let mut response = response
            .with_header("Access-Control-Allow-Origin", origin)
            .with_header("Access-Control-Allow-Credentials", "true")
            .with_header("Vary", "Origin");
        if request.method == "OPTIONS" {
            let requested = request
                .header("access-control-request-headers")
                .unwrap_or("Content-Type");
            response = response
                .with_header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
                .with_header("Access-Control-Allow-Headers", requested);
        }
        response
    }
}

fn respond<T: Serialize>(result: Result<T>) -> HttpResponse {
    match result {
        Ok(value) => HttpResponse::json(200, &value),
        Err(err) => {
            warn!(error = %err, "request failed");
            HttpResponse::from_error(&err)
        }
    }
}

fn question(request: &HttpRequest) -> std::result::Result<String, HttpResponse> {
    serde_json::from_slice::<QuestionBody>(&request.body)
        .map(|body| body.question)
        .map_err(|e| HttpResponse::detail(400, format!("Invalid request body: {}", e)))
}

/// Parse a request head plus whatever body bytes follow it.
pub fn parse_request(raw: &[u8]) -> Option<HttpRequest> {
    let head_end = find_head_end(raw)?;
    let head = std::str::from_utf8(&raw[..head_end]).ok()?;
    let mut lines = head.split("\r\n");

    let mut parts = lines.next()?.split_whitespace();
    let method = parts.next()?.to_ascii_uppercase();
    let target = parts.next()?;

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, parse_query(query)),
        None => (target, HashMap::new()),
    };
    let path = match path.trim_end_matches('/') {
        "" => "/".to_string(),
        trimmed => trimmed.to_string(),
    };

    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect();

    Some(HttpRequest {
        method,
        path,
        query,
        headers,
        body: raw[head_end + 4..].to_vec(),
    })
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

fn find_head_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|window| window == b"\r\n\r\n")
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// Declared body length, refused with 413 past [`MAX_BODY_BYTES`].
pub fn content_length(request: &HttpRequest) -> std::result::Result<usize, HttpResponse> {
    let length = match request.header("content-length") {
        None => 0,
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| HttpResponse::detail(400, "Invalid Content-Length"))?,
    };
    if length > MAX_BODY_BYTES {
        return Err(HttpResponse::detail(
            413,
            format!("Request body exceeds {} bytes", MAX_BODY_BYTES),
        ));
    }
    Ok(length)
}

/// Read one request, honouring `Content-Length`. Requests that cannot be
/// served come back as the error response to send.
async fn read_request(
    stream: &mut TcpStream,
) -> std::io::Result<std::result::Result<HttpRequest, HttpResponse>> {
    let bad_request = || HttpResponse::detail(400, "Bad Request");
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        if let Some(end) = find_head_end(&buffer) {
            break end;
        }
        if buffer.len() > MAX_HEAD_BYTES {
            return Ok(Err(bad_request()));
        }
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            return Ok(Err(bad_request()));
        }
        buffer.extend_from_slice(&chunk[..read]);
    };

    let Some(mut request) = parse_request(&buffer) else {
        return Ok(Err(bad_request()));
    };
    let length = match content_length(&request) {
        Ok(length) => length,
        Err(response) => return Ok(Err(response)),
    };

    let mut body = buffer.split_off(head_end + 4);
    while body.len() < length {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }
    body.truncate(length);
    request.body = body;
    Ok(Ok(request))
}

async fn handle_connection<G, E>(mut stream: TcpStream, router: Arc<Router<G, E>>)
where
    G: SqlGenerator + 'static,
    E: QueryExecutor + 'static,
{
    let response = match read_request(&mut stream).await {
        Ok(Ok(request)) => router.handle(&request).await,
        Ok(Err(response)) => response,
        Err(e) => {
            warn!(error = %e, "failed to read request");
            return;
        }
    };
    if let Err(e) = stream.write_all(&response.to_bytes()).await {
        warn!(error = %e, "failed to write response");
    }
}

/// Accept connections forever, one task per connection.
pub async fn serve<G, E>(listener: TcpListener, router: Arc<Router<G, E>>) -> Result<()>
where
    G: SqlGenerator + 'static,
    E: QueryExecutor + 'static,
{
    info!(addr = %listener.local_addr()?, "listening");
    loop {
        let (stream, addr) = listener.accept().await?;
        debug!(%addr, "connection");
        tokio::spawn(handle_connection(stream, Arc::clone(&router)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::QueryRows;
    use crate::guard::AcceptedSql;
    use crate::intent::{IntentClassification, IntentStatement};
    use crate::policy::Policy;
    use async_trait::async_trait;
    use serde_json::{Map, Value};

    struct FixedGenerator(&'static str);

    #[async_trait]
    impl SqlGenerator for FixedGenerator {
        async fn generate_sql(&self, _: &str, _: &Policy, _: Option<&str>) -> Result<String> {
            Ok(self.0.to_string())
        }

        async fn classify_intent(&self, _: &str) -> Result<IntentClassification> {
            Ok(IntentClassification {
                intent: "monthly_revenue".to_string(),
                params: Map::new(),
            })
        }
    }

    struct EmptyExecutor;

    #[async_trait]
    impl QueryExecutor for EmptyExecutor {
        async fn run_accepted(&self, _: &AcceptedSql) -> Result<QueryRows> {
            Ok(QueryRows {
                columns: vec!["n".to_string()],
                rows: Vec::new(),
            })
        }

        async fn run_intent(&self, _: &IntentStatement) -> Result<QueryRows> {
            Ok(QueryRows::default())
        }
    }

    fn router(sql: &'static str) -> Router<FixedGenerator, EmptyExecutor> {
        let policy = Arc::new(Policy::analytics_default().unwrap());
        Router::new(
            Gateway::new(FixedGenerator(sql), EmptyExecutor, policy),
            vec!["http://localhost:5173".to_string()],
        )
    }

    fn request(raw: &str) -> HttpRequest {
        parse_request(raw.as_bytes()).unwrap()
    }

    fn body(response: &HttpResponse) -> Value {
        serde_json::from_str(&response.body).unwrap()
    }

    #[test]
    fn test_parse_request() {
        let req = request(
            "GET /metrics/monthly-revenue/?limit=5&x HTTP/1.1\r\nHost: a\r\nOrigin: null\r\n\r\n",
        );
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/metrics/monthly-revenue");
        assert_eq!(req.query.get("limit").map(String::as_str), Some("5"));
        assert_eq!(req.query.get("x").map(String::as_str), Some(""));
        assert_eq!(req.header("Origin"), Some("null"));
        assert!(req.body.is_empty());
    }

    #[test]
    fn test_parse_incomplete_head() {
        assert!(parse_request(b"GET / HTTP/1.1\r\nHost: a\r\n").is_none());
        assert!(parse_request(b"\r\n\r\n").is_none());
    }

    #[test]
    fn test_response_bytes() {
        let bytes = HttpResponse::json(200, &json!({"status": "ok"})).to_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 15\r\n"));
        assert!(text.ends_with("\r\n\r\n{\"status\":\"ok\"}"));
    }

    #[test]
    fn test_content_length_limits() {
        let small = request("POST /nl/query HTTP/1.1\r\nContent-Length: 17\r\n\r\n");
        assert_eq!(content_length(&small), Ok(17));

        let none = request("GET /health HTTP/1.1\r\n\r\n");
        assert_eq!(content_length(&none), Ok(0));

        let huge = request("POST /nl/query HTTP/1.1\r\nContent-Length: 2000000\r\n\r\n");
        let response = content_length(&huge).unwrap_err();
        assert_eq!(response.status, 413);
        assert!(String::from_utf8(response.to_bytes())
            .unwrap()
            .starts_with("HTTP/1.1 413 Payload Too Large\r\n"));

        let junk = request("POST /nl/query HTTP/1.1\r\nContent-Length: lots\r\n\r\n");
        assert_eq!(content_length(&junk).unwrap_err().status, 400);
    }

    #[tokio::test]
    async fn test_health_and_not_found() {
        let router = router("SELECT 1");
        let health = router.handle(&request("GET /health HTTP/1.1\r\n\r\n")).await;
        assert_eq!(health.status, 200);
        assert_eq!(body(&health), json!({"status": "ok"}));

        let missing = router.handle(&request("GET /nope HTTP/1.1\r\n\r\n")).await;
        assert_eq!(missing.status, 404);
    }

    #[tokio::test]
    async fn test_nl_query_rejection_is_400() {
        let router = router("DELETE FROM analytics.monthly_revenue");
        let response = router
            .handle(&request(
                "POST /nl/query HTTP/1.1\r\nContent-Type: application/json\r\n\r\n{\"question\":\"wipe it\"}",
            ))
            .await;
        assert_eq!(response.status, 400);
        assert_eq!(
            body(&response)["detail"],
            "Generated SQL rejected: Forbidden SQL operation detected: delete"
        );
    }

    #[tokio::test]
    async fn test_nl_query_success() {
        let router = router("SELECT month FROM analytics.monthly_revenue");
        let response = router
            .handle(&request("POST /nl/query HTTP/1.1\r\n\r\n{\"question\":\"months\"}"))
            .await;
        assert_eq!(response.status, 200);
        let value = body(&response);
        assert_eq!(value["sql"], "SELECT month FROM analytics.monthly_revenue LIMIT 200");
        assert_eq!(value["columns"], json!(["n"]));
    }

    #[tokio::test]
    async fn test_monthly_revenue_returns_bare_rows() {
        let router = router("SELECT 1");
        let response = router
            .handle(&request("GET /metrics/monthly-revenue?limit=3 HTTP/1.1\r\n\r\n"))
            .await;
        assert_eq!(response.status, 200);
        assert_eq!(body(&response), json!([]));
    }

    #[tokio::test]
    async fn test_bad_body_and_bad_limit() {
        let router = router("SELECT 1");
        let response = router
            .handle(&request("POST /nl/query HTTP/1.1\r\n\r\nnot json"))
            .await;
        assert_eq!(response.status, 400);

        let response = router
            .handle(&request("GET /metrics/monthly-revenue?limit=abc HTTP/1.1\r\n\r\n"))
            .await;
        assert_eq!(response.status, 400);
    }

    #[tokio::test]
    async fn test_cors_only_for_configured_origins() {
        let router = router("SELECT 1");
        let allowed = router
            .handle(&request(
                "OPTIONS /nl/query HTTP/1.1\r\nOrigin: http://localhost:5173\r\n\r\n",
            ))
            .await;
        assert_eq!(allowed.status, 204);
        assert!(allowed
            .headers
            .contains(&("Access-Control-Allow-Origin".to_string(), "http://localhost:5173".to_string())));

        let foreign = router
            .handle(&request("GET /health HTTP/1.1\r\nOrigin: https://evil.test\r\n\r\n"))
            .await;
        assert!(foreign
            .headers
            .iter()
            .all(|(name, _)| name != "Access-Control-Allow-Origin"));
    }
}

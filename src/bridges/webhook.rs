use std::io;

use serde_json::Value;
use tiny_http::{Header, Method, Response, Server};
use tracing::{error, info};

use crate::bridges::discord::Notifier;
use crate::http::HtmlFetcher;
use crate::pipeline::{HandlerResponse, JoinPartyHandler};
use crate::util::Clock;

pub(crate) fn parse_json_body(request: &mut tiny_http::Request) -> Result<Value, String> {
    let mut body = String::new();
    request
        .as_reader()
        .read_to_string(&mut body)
        .map_err(|e| format!("read body: {e}"))?;
    Ok(parse_json_text(&body))
}

/// Non-JSON bodies are kept as a plain string so they simply yield no lines.
pub(crate) fn parse_json_text(body: &str) -> Value {
    if body.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()))
}

/// Log lines carried by a log-shipper payload. Accepts a bare record
/// (`{"line": ..}`), a tagged record (`{"record": {"line": ..}}`), a batch
/// (`{"records": [..]}`) or a top-level array, recursively.
pub(crate) fn extract_lines(payload: &Value) -> Vec<String> {
    if let Some(line) = payload.get("line").and_then(|v| v.as_str()) {
        return vec![line.to_string()];
    }
    if let Some(line) = payload
        .get("record")
        .and_then(|v| v.get("line"))
        .and_then(|v| v.as_str())
    {
        return vec![line.to_string()];
    }
    if let Some(items) = payload.as_array() {
        return items.iter().flat_map(extract_lines).collect();
    }
    if let Some(items) = payload.get("records").and_then(|v| v.as_array()) {
        return items.iter().flat_map(extract_lines).collect();
    }
    Vec::new()
}

fn json_response(response: &HandlerResponse) -> io::Result<Response<io::Cursor<Vec<u8>>>> {
    let header = Header::from_bytes("Content-Type", "application/json; charset=utf-8")
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "invalid header"))?;
    Ok(Response::from_string(response.body.to_string())
        .with_status_code(response.status)
        .with_header(header))
}

pub(crate) fn run_intake_server<F: HtmlFetcher, C: Clock, N: Notifier>(
    bind: &str,
    port: u16,
    handler: &JoinPartyHandler<'_, F, C, N>,
) -> crate::error::Result<()> {
    let addr = format!("{bind}:{port}");
    let server = Server::http(&addr)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("server: {e}")))?;
    info!(%addr, "intake listening");

    for mut request in server.incoming_requests() {
        if *request.method() != Method::Post {
            let _ = request.respond(Response::from_string("ok"));
            continue;
        }
        let payload = match parse_json_body(&mut request) {
            Ok(payload) => payload,
            Err(err) => {
                error!(%err, "failed to read request body");
                let _ = request.respond(Response::from_string("bad request").with_status_code(400));
                continue;
            }
        };
        let result = handler.handle(&payload);
        match json_response(&result) {
            Ok(response) => {
                let _ = request.respond(response);
            }
            Err(err) => {
                error!(%err, "failed to build response");
                let _ = request.respond(Response::from_string("error").with_status_code(500));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_record() {
        assert_eq!(extract_lines(&json!({"line": "a"})), vec!["a"]);
    }

    #[test]
    fn tagged_record() {
        assert_eq!(
            extract_lines(&json!({"tag": "act", "time": 1, "record": {"line": "a"}})),
            vec!["a"]
        );
    }

    #[test]
    fn batches_are_flattened_in_order() {
        let payload = json!({
            "records": [
                {"line": "a"},
                {"record": {"line": "b"}},
                [{"line": "c"}, {"nope": 1}],
                {"records": [{"line": "d"}]}
            ]
        });
        assert_eq!(extract_lines(&payload), vec!["a", "b", "c", "d"]);
        assert_eq!(extract_lines(&json!([{"line": "x"}, {"line": "y"}])), vec!["x", "y"]);
    }

    #[test]
    fn unknown_shapes_yield_nothing() {
        assert!(extract_lines(&Value::Null).is_empty());
        assert!(extract_lines(&json!({"line": 5})).is_empty());
        assert!(extract_lines(&json!("plain text")).is_empty());
    }

    #[test]
    fn body_parsing_is_lenient() {
        assert_eq!(parse_json_text("  "), Value::Null);
        assert_eq!(parse_json_text("{\"line\":\"a\"}"), json!({"line": "a"}));
        assert_eq!(parse_json_text("not json"), json!("not json"));
    }
}

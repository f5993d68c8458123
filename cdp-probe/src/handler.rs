// Probe request handling
//
// Turns one line of input into one command against the target, and the
// outcome into one JSON line of output.

use cdp_client::{CdpConnection, CdpError, CdpResult, Evaluation, Reply};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

/// A raw protocol command typed on one line
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawCommand {
    pub method: String,
    #[serde(default = "empty_params")]
    pub params: Value,
}

fn empty_params() -> Value {
    json!({})
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProbeInput {
    Command(RawCommand),
    Expression(String),
}

impl ProbeInput {
    /// A JSON object with a `method` field is a raw command; anything else is JavaScript
    pub fn parse(line: &str) -> Self {
        if line.starts_with('{') {
            if let Ok(command) = serde_json::from_str::<RawCommand>(line) {
                return ProbeInput::Command(command);
            }
        }

        ProbeInput::Expression(line.to_string())
    }
}

pub struct RequestHandler {
    connection: CdpConnection,
    await_promise: bool,
    decode_json: bool,
}

impl RequestHandler {
    /// Commands wait for the connection's configured timeout
    pub fn new(connection: CdpConnection, await_promise: bool, decode_json: bool) -> Self {
        Self {
            connection,
            await_promise,
            decode_json,
        }
    }

    pub async fn handle_line(&self, line: &str) -> Value {
        match ProbeInput::parse(line) {
            ProbeInput::Command(command) => {
                debug!("Raw command {}", command.method);
                let result = self
                    .connection
                    .send(&command.method, &command.params)
                    .await;
                render_reply(result)
            }
            ProbeInput::Expression(expression) => {
                let result = self
                    .connection
                    .evaluate(&expression, self.await_promise)
                    .await;
                render_evaluation(result, self.decode_json)
            }
        }
    }
}

pub fn render_evaluation(result: CdpResult<Evaluation>, decode_json: bool) -> Value {
    match result {
        Ok(evaluation @ Evaluation::Value(_)) => {
            let value = if decode_json {
                evaluation.decode_json()
            } else {
                evaluation.into_value()
            };
            json!({ "outcome": "value", "value": value })
        }
        Ok(Evaluation::Absent) => json!({ "outcome": "absent" }),
        Ok(Evaluation::Error(message)) => json!({ "outcome": "error", "message": message }),
        Err(e) => render_failure(&e),
    }
}

pub fn render_reply(result: CdpResult<Reply>) -> Value {
    match result {
        Ok(Reply {
            error: Some(error), ..
        }) => json!({ "outcome": "error", "code": error.code, "message": error.message }),
        Ok(reply) => json!({ "outcome": "reply", "result": reply.result() }),
        Err(e) => render_failure(&e),
    }
}

fn render_failure(error: &CdpError) -> Value {
    let outcome = if error.is_timeout() {
        "timeout"
    } else {
        "transport_failure"
    };
    json!({ "outcome": outcome, "message": error.to_string() })
}

// Runtime domain commands
//
// Expression evaluation inside the target's main execution context, plus the
// couple of Runtime helpers investigative sessions lean on.

use crate::connection::CdpConnection;
use crate::protocol::{CdpError, CdpResult, Reply};
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

pub const EVALUATE: &str = "Runtime.evaluate";
pub const GLOBAL_LEXICAL_SCOPE_NAMES: &str = "Runtime.globalLexicalScopeNames";

/// Parameters for Runtime.evaluate
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateParams<'a> {
    pub expression: &'a str,
    pub return_by_value: bool,
    pub await_promise: bool,
}

/// What an evaluation produced on the remote side
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// A fully serialized value (JSON null included)
    Value(Value),
    /// The expression ran but left nothing serializable behind, e.g. `undefined`
    Absent,
    /// The command was rejected, or the expression threw
    Error(String),
}

impl Evaluation {
    /// Classify a Runtime.evaluate reply
    pub fn from_reply(reply: &Reply) -> Self {
        if let Some(err) = &reply.error {
            return Evaluation::Error(err.message.clone());
        }

        let result = reply.result();

        if let Some(details) = result.get("exceptionDetails") {
            return Evaluation::Error(exception_message(details));
        }

        match result.get("result").and_then(|remote| remote.get("value")) {
            Some(value) => Evaluation::Value(value.clone()),
            None => Evaluation::Absent,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Evaluation::Absent)
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Evaluation::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Evaluation::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Value with `JSON.stringify` output parsed back; other values pass through
    pub fn decode_json(&self) -> Option<Value> {
        match self.value()? {
            Value::String(text) => Some(
                serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.clone())),
            ),
            other => Some(other.clone()),
        }
    }
}

// exceptionDetails.exception.description carries "ReferenceError: ..." plus a
// stack; text alone is usually just "Uncaught".
fn exception_message(details: &Value) -> String {
    details
        .get("exception")
        .and_then(|exception| exception.get("description"))
        .and_then(Value::as_str)
        .and_then(|description| description.lines().next())
        .or_else(|| details.get("text").and_then(Value::as_str))
        .unwrap_or("Evaluation threw an exception")
        .to_string()
}

impl CdpConnection {
    /// Evaluate an expression with the configured timeout (Runtime.evaluate)
    pub async fn evaluate(&self, expression: &str, await_promise: bool) -> CdpResult<Evaluation> {
        self.evaluate_with_timeout(expression, await_promise, self.config().command_timeout)
            .await
    }

    /// Evaluate an expression, waiting at most `timeout` for the reply
    pub async fn evaluate_with_timeout(
        &self,
        expression: &str,
        await_promise: bool,
        timeout: Duration,
    ) -> CdpResult<Evaluation> {
        let params = EvaluateParams {
            expression,
            return_by_value: true,
            await_promise,
        };

        let reply = self.send_with_timeout(EVALUATE, params, timeout).await?;
        let evaluation = Evaluation::from_reply(&reply);
        debug!("Evaluation id={} -> {:?}", reply.id, evaluation);

        Ok(evaluation)
    }

    /// Names declared with let/const/class at the top level of the page
    pub async fn global_lexical_scope_names(&self) -> CdpResult<Vec<String>> {
        let reply = self.send(GLOBAL_LEXICAL_SCOPE_NAMES, json!({})).await?;
        let result = reply.into_result()?;

        let names = result
            .get("names")
            .cloned()
            .ok_or_else(|| CdpError::Protocol("Missing names in reply".to_string()))?;

        Ok(serde_json::from_value(names)?)
    }

    /// Turn on a domain's notifications, e.g. `enable_domain("Network")`
    pub async fn enable_domain(&self, domain: &str) -> CdpResult<()> {
        let method = format!("{}.enable", domain);
        self.send(&method, json!({})).await?.check_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(text: &str) -> Reply {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn test_evaluate_params_wire_names() {
        let params = EvaluateParams {
            expression: "document.title",
            return_by_value: true,
            await_promise: false,
        };
        let encoded = serde_json::to_value(params).unwrap();

        assert_eq!(
            encoded,
            json!({
                "expression": "document.title",
                "returnByValue": true,
                "awaitPromise": false
            })
        );
    }

    #[test]
    fn test_value_reply() {
        let evaluation = Evaluation::from_reply(&reply(
            r#"{"id":1,"result":{"result":{"type":"number","value":2,"description":"2"}}}"#,
        ));
        assert_eq!(evaluation, Evaluation::Value(json!(2)));
    }

    #[test]
    fn test_null_is_a_value() {
        let evaluation = Evaluation::from_reply(&reply(
            r#"{"id":1,"result":{"result":{"type":"object","subtype":"null","value":null}}}"#,
        ));
        assert_eq!(evaluation, Evaluation::Value(Value::Null));
    }

    #[test]
    fn test_undefined_is_absent() {
        let evaluation =
            Evaluation::from_reply(&reply(r#"{"id":1,"result":{"result":{"type":"undefined"}}}"#));
        assert!(evaluation.is_absent());

        let evaluation = Evaluation::from_reply(&reply(r#"{"id":1,"result":{}}"#));
        assert!(evaluation.is_absent());
    }

    #[test]
    fn test_error_reply_is_not_absent() {
        let evaluation = Evaluation::from_reply(&reply(
            r#"{"id":1,"error":{"message":"ReferenceError: x is not defined"}}"#,
        ));
        assert_eq!(
            evaluation,
            Evaluation::Error("ReferenceError: x is not defined".to_string())
        );
    }

    #[test]
    fn test_thrown_exception() {
        let evaluation = Evaluation::from_reply(&reply(
            r#"{"id":4,"result":{
                "result":{"type":"object","subtype":"error"},
                "exceptionDetails":{
                    "text":"Uncaught",
                    "exception":{"description":"ReferenceError: nim is not defined\n    at <anonymous>:1:1"}
                }}}"#,
        ));
        assert_eq!(
            evaluation,
            Evaluation::Error("ReferenceError: nim is not defined".to_string())
        );

        let evaluation = Evaluation::from_reply(&reply(
            r#"{"id":5,"result":{"exceptionDetails":{"text":"SyntaxError"}}}"#,
        ));
        assert_eq!(evaluation, Evaluation::Error("SyntaxError".to_string()));
    }

    #[test]
    fn test_decode_json() {
        let stringified = Evaluation::Value(json!(r#"{"nickName":"bot","nimId":"42"}"#));
        assert_eq!(
            stringified.decode_json(),
            Some(json!({ "nickName": "bot", "nimId": "42" }))
        );

        let plain = Evaluation::Value(json!("hello"));
        assert_eq!(plain.decode_json(), Some(json!("hello")));

        assert_eq!(Evaluation::Absent.decode_json(), None);
    }
}

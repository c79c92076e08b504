//! Job tracker (§4.9): submit a job and collect minion returns without
//! racing the `jid`'s assignment.
//!
//! The `jid` is not known until the `submit_response` round-trip
//! completes, so the tracker subscribes to the events socket with an
//! empty (match-everything) prefix *before* sending the submit request,
//! then filters client-side for `{jid}/ret/` once the jid is in hand. A
//! fast minion that returns between submit and the jid becoming known is
//! still observed, because the subscription was already open.

use std::collections::BTreeMap;
use std::time::Duration;

use saltcore_wire::{GatherMode, SubmitRequest, SubmitResponse, TargetKind};
use tokio::time::Instant;

use crate::config::RunArgs;
use crate::error::ClientError;
use crate::{events_client, request_client};

#[derive(Debug, Clone, serde::Serialize)]
pub struct RunOutcome {
    pub jid: String,
    pub returns: BTreeMap<String, serde_json::Value>,
    pub missing: Vec<String>,
}

/// Submit the job described by `args` and collect returns until every
/// targeted minion has replied or the deadline elapses.
pub async fn run(args: &RunArgs) -> Result<RunOutcome, ClientError> {
    let mut events = events_client::subscribe(&args.events_socket_path(), "").await?;

    let request = build_request(args)?;
    let response = request_client::submit(&args.request_addr(), request).await?;
    let (jid, mut targets) = match response {
        SubmitResponse::Accepted { jid, targets } => (jid, targets),
        SubmitResponse::Rejected { reason } => return Err(ClientError::Rejected(reason)),
    };
    targets.sort();

    let ret_prefix = format!("{jid}/ret/");
    let deadline = Instant::now() + Duration::from_secs(args.timeout_secs);
    let mut returns = BTreeMap::new();

    while returns.len() < targets.len() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::time::sleep(remaining) => None,
        };
        let Some(event) = event else { break };
        let Some(minion_id) = event.tag.strip_prefix(&ret_prefix) else { continue };
        returns.insert(minion_id.to_string(), event.data);
    }

    let missing: Vec<String> = targets.iter().filter(|id| !returns.contains_key(*id)).cloned().collect();
    let gather_mode: GatherMode = args.gather_mode.into();
    if gather_mode == GatherMode::FailOnAnyMissing && !missing.is_empty() {
        return Err(ClientError::MissingMinions(missing));
    }

    Ok(RunOutcome { jid, returns, missing })
}

fn build_request(args: &RunArgs) -> Result<SubmitRequest, ClientError> {
    let target_kind: TargetKind = args.target_kind.into();
    let parsed_args = args.args.iter().map(|raw| parse_value(raw)).collect();
    let mut kwargs = BTreeMap::new();
    for raw in &args.kwargs {
        let (key, value) = raw.split_once('=').unwrap_or((raw.as_str(), ""));
        kwargs.insert(key.to_string(), parse_value(value));
    }
    Ok(SubmitRequest {
        user: args.user.clone(),
        credential: args.credential.clone(),
        target_expr: args.target.clone(),
        target_kind,
        func: args.func.clone(),
        args: parsed_args,
        kwargs,
        timeout_secs: args.timeout_secs,
        gather_mode: args.gather_mode.into(),
    })
}

fn parse_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GatherModeArg, TargetKindArg};
    use std::path::PathBuf;

    #[test]
    fn parse_value_prefers_json_then_falls_back_to_string() {
        assert_eq!(parse_value("42"), serde_json::json!(42));
        assert_eq!(parse_value("true"), serde_json::json!(true));
        assert_eq!(parse_value("[1,2]"), serde_json::json!([1, 2]));
        assert_eq!(parse_value("hello"), serde_json::json!("hello"));
    }

    fn sample_args() -> RunArgs {
        RunArgs {
            master_host: "127.0.0.1".to_string(),
            request_port: 4506,
            runtime_dir: PathBuf::from("/tmp/saltcore-run"),
            target: "web-*".to_string(),
            target_kind: TargetKindArg::Glob,
            func: "ping".to_string(),
            args: vec!["1".to_string(), "not-json".to_string()],
            kwargs: vec!["color=blue".to_string()],
            user: "root".to_string(),
            credential: None,
            timeout_secs: 5,
            gather_mode: GatherModeArg::List,
        }
    }

    #[test]
    fn build_request_parses_positional_and_keyword_arguments() {
        let request = build_request(&sample_args()).expect("build");
        assert_eq!(request.target_expr, "web-*");
        assert_eq!(request.args, vec![serde_json::json!(1), serde_json::json!("not-json")]);
        assert_eq!(request.kwargs.get("color"), Some(&serde_json::json!("blue")));
    }

    #[test]
    fn events_socket_path_is_under_runtime_dir() {
        let args = sample_args();
        assert_eq!(args.events_socket_path(), PathBuf::from("/tmp/saltcore-run/events.sock"));
    }
}

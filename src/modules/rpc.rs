//! JSON-RPC client for the signing gateway that fronts the game ledger.
//!
//! The gateway holds the agent's key, so this side only names the identity
//! it acts for. Reads are retried with jitter; submissions are not, since a
//! resend could double-spend.

use std::cell::Cell;
use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::modules::economy::Amount;
use crate::modules::grid::CubeId;
use crate::modules::ledger::{
    CubeOccupancy, EncodedAction, EventFeed, Finality, LedgerError, LedgerEvent, LedgerReader,
    LedgerWriter, SubmissionRef, SubmitReceipt, quantity,
};
use crate::modules::subgraph::SubgraphFeed;

const MAX_READ_ATTEMPTS: u32 = 3;

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

pub struct RpcLedger {
    endpoint: String,
    http: Client,
    headers: HeaderMap,
    read_chunk: usize,
    next_id: Cell<u64>,
    events: Option<SubgraphFeed>,
}

impl RpcLedger {
    pub fn new(
        endpoint: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
        read_chunk: usize,
    ) -> Result<Self, LedgerError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        Ok(Self {
            endpoint: endpoint.into(),
            http,
            headers: build_headers(token.as_deref())?,
            read_chunk: read_chunk.max(1),
            next_id: Cell::new(1),
            events: None,
        })
    }

    pub fn with_event_feed(mut self, feed: SubgraphFeed) -> Self {
        self.events = Some(feed);
        self
    }

    fn call_once(&self, method: &str, params: &Value) -> Result<Value, LedgerError> {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let resp = self
            .http
            .post(&self.endpoint)
            .headers(self.headers.clone())
            .json(&body)
            .send()
            .map_err(|e| LedgerError::Transport(format!("http: {}", e)))?;
        let status = resp.status();
        let raw = resp
            .text()
            .map_err(|e| LedgerError::Transport(format!("read body: {}", e)))?;
        if !status.is_success() {
            return Err(LedgerError::Transport(format!("status {}: {}", status, raw)));
        }

        let parsed: RpcResponse = serde_json::from_str(&raw)
            .map_err(|e| LedgerError::Decode(format!("{} response: {}", method, e)))?;
        if let Some(err) = parsed.error {
            return Err(LedgerError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        parsed
            .result
            .ok_or_else(|| LedgerError::Decode(format!("{} returned no result", method)))
    }

    /// Idempotent calls only.
    fn call_with_retry(&self, method: &str, params: Value) -> Result<Value, LedgerError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            if attempts > 1 {
                // simple jitter: 50-150ms
                let jitter_ms = 50 + (rand::random::<u64>() % 100);
                thread::sleep(Duration::from_millis(jitter_ms));
            }
            match self.call_once(method, &params) {
                Ok(value) => return Ok(value),
                Err(LedgerError::Transport(msg)) if attempts < MAX_READ_ATTEMPTS => {
                    warn!(method, attempt = attempts, error = %msg, "rpc transport error, retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn read<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, LedgerError> {
        let value = self.call_with_retry(method, params)?;
        serde_json::from_value(value).map_err(|e| LedgerError::Decode(format!("{}: {}", method, e)))
    }

    fn read_quantity(&self, method: &str, params: Value) -> Result<Amount, LedgerError> {
        let value = self.call_with_retry(method, params)?;
        quantity::parse(&value).map_err(|e| LedgerError::Decode(format!("{}: {}", method, e)))
    }
}

fn build_headers(token: Option<&str>) -> Result<HeaderMap, LedgerError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Some(token) = token {
        let value = format!("Bearer {}", token);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&value).map_err(|e| LedgerError::Transport(e.to_string()))?,
        );
    }
    Ok(headers)
}

/// Re-keys chunked results into the caller's order; a missing cube is a decode error.
fn arrange_in_order(
    requested: &[CubeId],
    returned: Vec<CubeOccupancy>,
) -> Result<Vec<CubeOccupancy>, LedgerError> {
    let mut by_cube: HashMap<CubeId, CubeOccupancy> =
        returned.into_iter().map(|c| (c.cube, c)).collect();
    requested
        .iter()
        .map(|cube| {
            by_cube
                .remove(cube)
                .ok_or_else(|| LedgerError::Decode(format!("cube {} missing from read", cube)))
        })
        .collect()
}

impl LedgerReader for RpcLedger {
    fn batch_read(&self, cubes: &[CubeId]) -> Result<Vec<CubeOccupancy>, LedgerError> {
        let mut returned = Vec::with_capacity(cubes.len());
        for chunk in cubes.chunks(self.read_chunk) {
            let mut part: Vec<CubeOccupancy> =
                self.read("kill_getFullStacks", json!([chunk]))?;
            debug!(requested = chunk.len(), returned = part.len(), "read chunk");
            returned.append(&mut part);
        }
        arrange_in_order(cubes, returned)
    }

    fn cost_per_unit(&self) -> Result<Amount, LedgerError> {
        self.read_quantity("kill_spawnCost", json!([]))
    }

    fn burn_bps(&self) -> Result<u32, LedgerError> {
        let raw = self.read_quantity("kill_burnBps", json!([]))?;
        u32::try_from(raw).map_err(|_| LedgerError::Decode(format!("burn bps {} out of range", raw)))
    }

    fn balance_of(&self, identity: &str) -> Result<Amount, LedgerError> {
        self.read_quantity("token_balanceOf", json!([identity]))
    }

    fn allowance_of(&self, identity: &str) -> Result<Amount, LedgerError> {
        self.read_quantity("token_allowance", json!([identity]))
    }
}

impl LedgerWriter for RpcLedger {
    fn submit(
        &mut self,
        identity: &str,
        actions: &[EncodedAction],
    ) -> Result<SubmitReceipt, LedgerError> {
        let value = self.call_once("kill_submit", &json!([identity, actions]))?;
        serde_json::from_value(value).map_err(|e| LedgerError::Decode(format!("kill_submit: {}", e)))
    }

    fn await_finality(&mut self, reference: &SubmissionRef) -> Result<Finality, LedgerError> {
        self.read("kill_awaitReceipt", json!([reference]))
    }
}

impl EventFeed for RpcLedger {
    fn recent_events(&self, first: usize) -> Result<Vec<LedgerEvent>, LedgerError> {
        match &self.events {
            Some(feed) => feed.recent_kills(first),
            None => Err(LedgerError::Unavailable("no event feed configured".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::ledger::StackRecord;

    fn occupancy(cube: CubeId) -> CubeOccupancy {
        CubeOccupancy {
            cube,
            stacks: vec![StackRecord {
                occupant: "0xabc".into(),
                units: cube as u64,
                reapers: 0,
                spawn_age: 0,
                pending_bounty: None,
            }],
        }
    }

    #[test]
    fn results_are_reordered_to_request_order() {
        let out = arrange_in_order(&[9, 1, 4], vec![occupancy(1), occupancy(4), occupancy(9)]).unwrap();
        let cubes: Vec<_> = out.iter().map(|c| c.cube).collect();
        assert_eq!(cubes, vec![9, 1, 4]);
    }

    #[test]
    fn missing_cube_fails_the_whole_read() {
        let err = arrange_in_order(&[1, 2], vec![occupancy(1)]).unwrap_err();
        assert!(matches!(err, LedgerError::Decode(_)));
    }

    #[test]
    fn headers_carry_bearer_token_when_present() {
        let headers = build_headers(Some("abc")).unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer abc");
        let headers = build_headers(None).unwrap();
        assert!(headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn error_body_decodes() {
        let parsed: RpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"boom"}}"#)
                .unwrap();
        assert!(parsed.result.is_none());
        assert_eq!(parsed.error.unwrap().code, -32000);
    }
}

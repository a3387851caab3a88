//! Recent-kill feed backed by a GraphQL indexer.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::modules::grid::CubeId;
use crate::modules::ledger::{EventKind, LedgerError, LedgerEvent, normalize_identity, quantity};

pub struct SubgraphFeed {
    url: String,
    http: Client,
}

#[derive(Deserialize)]
struct GraphResponse {
    #[serde(default)]
    data: Option<KillsData>,
    #[serde(default)]
    errors: Option<Vec<GraphError>>,
}

#[derive(Deserialize)]
struct GraphError {
    message: String,
}

#[derive(Deserialize)]
struct KillsData {
    killeds: Vec<KillRow>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct KillRow {
    id: String,
    stack_id: Value,
    attacker: String,
    target: String,
    attacker_bounty: Value,
    #[serde(default)]
    attacker_units_sent: Option<Value>,
    #[serde(default)]
    attacker_units_lost: Option<Value>,
    #[serde(default)]
    attacker_reaper_sent: Option<Value>,
    #[serde(default)]
    attacker_reaper_lost: Option<Value>,
    #[serde(rename = "block_number")]
    block_number: Value,
}

fn kills_query(first: usize) -> String {
    format!(
        "{{ killeds(orderBy: block_number, orderDirection: desc, first: {}) {{ \
         id stackId attacker target attackerBounty \
         attackerUnitsSent attackerUnitsLost attackerReaperSent attackerReaperLost \
         block_number }} }}",
        first
    )
}

impl SubgraphFeed {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, LedgerError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            http,
        })
    }

    /// Latest kills, newest first.
    pub fn recent_kills(&self, first: usize) -> Result<Vec<LedgerEvent>, LedgerError> {
        let resp = self
            .http
            .post(&self.url)
            .json(&json!({ "query": kills_query(first) }))
            .send()
            .map_err(|e| LedgerError::Transport(format!("subgraph: {}", e)))?;
        let status = resp.status();
        let raw = resp
            .text()
            .map_err(|e| LedgerError::Transport(format!("subgraph body: {}", e)))?;
        if !status.is_success() {
            return Err(LedgerError::Unavailable(format!("subgraph status {}", status)));
        }
        decode_kills(&raw)
    }
}

fn decode_kills(raw: &str) -> Result<Vec<LedgerEvent>, LedgerError> {
    let parsed: GraphResponse =
        serde_json::from_str(raw).map_err(|e| LedgerError::Decode(format!("subgraph: {}", e)))?;
    if let Some(errors) = parsed.errors.filter(|e| !e.is_empty()) {
        let joined: Vec<_> = errors.into_iter().map(|e| e.message).collect();
        return Err(LedgerError::Unavailable(joined.join("; ")));
    }
    let data = parsed
        .data
        .ok_or_else(|| LedgerError::Decode("subgraph returned no data".into()))?;
    data.killeds.into_iter().map(to_event).collect()
}

fn to_event(row: KillRow) -> Result<LedgerEvent, LedgerError> {
    let num = |v: &Value| quantity::parse(v).map_err(LedgerError::Decode);
    let opt = |v: &Option<Value>| -> Result<Option<u128>, LedgerError> {
        v.as_ref().filter(|v| !v.is_null()).map(num).transpose()
    };

    let cube = CubeId::try_from(num(&row.stack_id)?)
        .map_err(|_| LedgerError::Decode(format!("stack id out of range in {}", row.id)))?;
    let id = &row.id;
    let remaining = |sent: Option<u128>, lost: Option<u128>| -> Result<Option<u64>, LedgerError> {
        match (sent, lost) {
            (Some(s), Some(l)) => u64::try_from(s.saturating_sub(l))
                .map(Some)
                .map_err(|_| LedgerError::Decode(format!("survivor count out of range in {}", id))),
            _ => Ok(None),
        }
    };
    let block = u64::try_from(num(&row.block_number)?)
        .map_err(|_| LedgerError::Decode(format!("block number out of range in {}", row.id)))?;
    let remaining_units = remaining(opt(&row.attacker_units_sent)?, opt(&row.attacker_units_lost)?)?;
    let remaining_reapers = remaining(
        opt(&row.attacker_reaper_sent)?,
        opt(&row.attacker_reaper_lost)?,
    )?;

    Ok(LedgerEvent {
        block,
        cube,
        kind: EventKind::Killed {
            attacker: normalize_identity(&row.attacker),
            defender: normalize_identity(&row.target),
            bounty: num(&row.attacker_bounty)?,
            remaining_units,
            remaining_reapers,
        },
        id: row.id,
    })
}

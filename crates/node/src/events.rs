//! Newline-delimited JSON chain event feed.
//!
//! ```text
//! {"type":"block","hash":"<hex>","height":100,"txs":[{"txid":"<hex>",
//!   "inputs":[{"txid":"<hex>","vout":0}],
//!   "outputs":[{"value":1000000000,"script_pubkey":"76a914...88ac"}]}]}
//! {"type":"rollback","max_valid_height":99,"best_block_hash":"<hex>"}
//! ```
//!
//! Hashes are in display order. An output may carry `address` instead of
//! (or as well as) `script_pubkey`.

use std::fmt;
use std::io::BufRead;
use std::thread;

use crossbeam_channel::Sender;
use dogeledger_ledger::{BlockTx, BlockTxOut, ChainBlock, ChainEvent};
use dogeledger_log::{log_debug, log_warn};
use dogeledger_primitives::{hash256_from_hex, Address, Hash256, OutPoint};
use serde::Deserialize;

#[derive(Debug)]
pub enum EventError {
    Json(serde_json::Error),
    Hex(&'static str, String),
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventError::Json(err) => write!(f, "invalid event json: {err}"),
            EventError::Hex(field, value) => write!(f, "invalid hex in {field}: '{value}'"),
        }
    }
}

impl std::error::Error for EventError {}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        EventError::Json(err)
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    Block {
        hash: String,
        height: i64,
        #[serde(default)]
        txs: Vec<WireTx>,
    },
    Rollback {
        max_valid_height: i64,
        best_block_hash: String,
    },
}

#[derive(Debug, Deserialize)]
struct WireTx {
    txid: String,
    #[serde(default)]
    inputs: Vec<WireOutPoint>,
    #[serde(default)]
    outputs: Vec<WireOutput>,
}

#[derive(Debug, Deserialize)]
struct WireOutPoint {
    txid: String,
    vout: u32,
}

#[derive(Debug, Deserialize)]
struct WireOutput {
    value: i64,
    #[serde(default)]
    script_pubkey: Option<String>,
    #[serde(default)]
    address: Option<String>,
}

fn parse_hash(field: &'static str, value: &str) -> Result<Hash256, EventError> {
    hash256_from_hex(value).map_err(|_| EventError::Hex(field, value.to_string()))
}

pub fn parse_event(line: &str) -> Result<ChainEvent, EventError> {
    let event = match serde_json::from_str::<WireEvent>(line)? {
        WireEvent::Block { hash, height, txs } => {
            let txs = txs
                .into_iter()
                .map(convert_tx)
                .collect::<Result<Vec<_>, _>>()?;
            ChainEvent::Block(ChainBlock {
                hash: parse_hash("hash", &hash)?,
                height,
                txs,
            })
        }
        WireEvent::Rollback {
            max_valid_height,
            best_block_hash,
        } => ChainEvent::Rollback {
            max_valid_height,
            best_block_hash: parse_hash("best_block_hash", &best_block_hash)?,
        },
    };
    Ok(event)
}

fn convert_tx(tx: WireTx) -> Result<BlockTx, EventError> {
    let inputs = tx
        .inputs
        .iter()
        .map(|input| Ok(OutPoint::new(parse_hash("inputs.txid", &input.txid)?, input.vout)))
        .collect::<Result<Vec<_>, EventError>>()?;
    let mut outputs = Vec::with_capacity(tx.outputs.len());
    for output in tx.outputs {
        let script_pubkey = match output.script_pubkey {
            Some(raw) => hex::decode(raw.trim())
                .map_err(|_| EventError::Hex("outputs.script_pubkey", raw.clone()))?,
            None => Vec::new(),
        };
        outputs.push(BlockTxOut {
            value: output.value,
            script_pubkey,
            address: output.address.map(Address::new),
        });
    }
    Ok(BlockTx {
        txid: parse_hash("txid", &tx.txid)?,
        inputs,
        outputs,
    })
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReaderStats {
    pub lines: u64,
    pub sent: u64,
    pub skipped: u64,
}

/// Parses `reader` line by line on its own thread and forwards events until
/// the input ends or the receiving side goes away. Malformed lines are
/// logged and skipped.
pub fn spawn_reader<R>(reader: R, sender: Sender<ChainEvent>) -> thread::JoinHandle<ReaderStats>
where
    R: BufRead + Send + 'static,
{
    thread::spawn(move || {
        let mut stats = ReaderStats::default();
        for (index, line) in reader.lines().enumerate() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    log_warn!("event feed read failed: {err}");
                    break;
                }
            };
            stats.lines += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let event = match parse_event(trimmed) {
                Ok(event) => event,
                Err(err) => {
                    log_warn!("skipping event on line {}: {err}", index + 1);
                    stats.skipped += 1;
                    continue;
                }
            };
            if sender.send(event).is_err() {
                log_debug!("event receiver closed; stopping reader");
                break;
            }
            stats.sent += 1;
        }
        stats
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dogeledger_primitives::hash256_to_hex;

    #[test]
    fn parses_block_event() {
        let txid = [0x11; 32];
        let prev = [0x22; 32];
        let line = format!(
            r#"{{"type":"block","hash":"{}","height":100,"txs":[{{"txid":"{}","inputs":[{{"txid":"{}","vout":3}}],"outputs":[{{"value":5,"script_pubkey":"76a914{}88ac"}},{{"value":7,"address":"DLegacy"}}]}}]}}"#,
            hash256_to_hex(&[0xab; 32]),
            hash256_to_hex(&txid),
            hash256_to_hex(&prev),
            "00".repeat(20)
        );
        let ChainEvent::Block(block) = parse_event(&line).expect("parse") else {
            panic!("expected block");
        };
        assert_eq!(block.hash, [0xab; 32]);
        assert_eq!(block.height, 100);
        assert_eq!(block.txs.len(), 1);
        let tx = &block.txs[0];
        assert_eq!(tx.txid, txid);
        assert_eq!(tx.inputs, vec![OutPoint::new(prev, 3)]);
        assert_eq!(tx.outputs[0].script_pubkey.len(), 25);
        assert!(tx.outputs[0].address.is_none());
        assert!(tx.outputs[1].script_pubkey.is_empty());
        assert_eq!(tx.outputs[1].address, Some(Address::new("DLegacy")));
    }

    #[test]
    fn parses_rollback_event() {
        let line = format!(
            r#"{{"type":"rollback","max_valid_height":99,"best_block_hash":"{}"}}"#,
            hash256_to_hex(&[0x99; 32])
        );
        assert_eq!(
            parse_event(&line).expect("parse"),
            ChainEvent::Rollback {
                max_valid_height: 99,
                best_block_hash: [0x99; 32],
            }
        );
    }

    #[test]
    fn rejects_malformed_events() {
        assert!(matches!(parse_event("{"), Err(EventError::Json(_))));
        assert!(matches!(
            parse_event(r#"{"type":"reorg","height":1}"#),
            Err(EventError::Json(_))
        ));
        assert!(matches!(
            parse_event(r#"{"type":"block","hash":"zz","height":1}"#),
            Err(EventError::Hex("hash", _))
        ));
    }

    #[test]
    fn reader_skips_bad_lines_and_forwards_the_rest() {
        let rollback = format!(
            r#"{{"type":"rollback","max_valid_height":5,"best_block_hash":"{}"}}"#,
            hash256_to_hex(&[0x05; 32])
        );
        let input = format!("# comment\n\nnot json\n{rollback}\n");
        let (sender, receiver) = crossbeam_channel::unbounded();
        let stats = spawn_reader(std::io::Cursor::new(input), sender)
            .join()
            .expect("reader");
        assert_eq!(
            stats,
            ReaderStats {
                lines: 4,
                sent: 1,
                skipped: 1,
            }
        );
        let events: Vec<ChainEvent> = receiver.iter().collect();
        assert_eq!(events.len(), 1);
    }
}

use serde::{Deserialize, Serialize};

/// A connected block as delivered by the chain client.
///
/// `hash` is kept in internal byte order; `hash_hex` renders the usual
/// byte-reversed display form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEntry {
    pub height: u32,
    /// Block header time, unix seconds
    pub time: u32,
    pub hash: [u8; 32],
}

impl BlockEntry {
    pub fn new(height: u32, time: u32, hash: [u8; 32]) -> Self {
        Self { height, time, hash }
    }

    pub fn hash_hex(&self) -> String {
        display_hex(&self.hash)
    }
}

/// Height and hash of the most recent block known to a chain client or wallet store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainTip {
    pub height: u32,
    pub hash: [u8; 32],
}

impl ChainTip {
    pub fn hash_hex(&self) -> String {
        display_hex(&self.hash)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: String,
    pub vout: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: Option<String>,
    /// Value in satoshis
    pub value: u64,
}

/// Transaction as far as a watch-only wallet cares: spent outpoints and new outputs.
/// Coinbase inputs carry no outpoint and are omitted from `inputs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    pub txid: String,
    pub inputs: Vec<OutPoint>,
    pub outputs: Vec<TxOutput>,
}

/// Events published by the chain client's subscription stream
#[derive(Debug, Clone)]
pub enum BlockEvent {
    /// A newly connected block on the live path
    Connect { entry: BlockEntry, txs: Vec<Tx> },
    /// A historical block replayed during a rescan
    Rescan { entry: BlockEntry, txs: Vec<Tx> },
}

impl BlockEvent {
    pub fn entry(&self) -> &BlockEntry {
        match self {
            BlockEvent::Connect { entry, .. } | BlockEvent::Rescan { entry, .. } => entry,
        }
    }
}

/// Parse a display-order hex hash into internal byte order.
pub fn parse_display_hash(hex_hash: &str) -> Result<[u8; 32], String> {
    let bytes = hex::decode(hex_hash).map_err(|e| format!("Invalid block hash {}: {}", hex_hash, e))?;
    let mut hash: [u8; 32] = bytes
        .try_into()
        .map_err(|_| format!("Block hash {} is not 32 bytes", hex_hash))?;
    hash.reverse();
    Ok(hash)
}

fn display_hex(hash: &[u8; 32]) -> String {
    let mut reversed = *hash;
    reversed.reverse();
    hex::encode(reversed)
}

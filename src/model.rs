//! Record types stored by the index and the contracts of the objects that
//! flow through it.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants;

/// Size in bytes of a raw outpoint: 32-byte hash plus little-endian index.
pub const OUTPOINT_SIZE: usize = 36;

const COIN_HEADER_SIZE: usize = 18;
const ADDRESS_SIZE: usize = 20;

/// Failed decoding of a persisted record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("truncated coin record")]
    TruncatedCoin,
    #[error("truncated outpoint record")]
    TruncatedOutpoint,
    #[error("outpoint list length {0} is not a multiple of {OUTPOINT_SIZE}")]
    BadListLength(usize),
    #[error("bad hash: {0}")]
    Hash(String),
}

/// A transaction id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct TxId(pub [u8; 32]);

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for TxId {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| DecodeError::Hash(s.to_string()))?;
        if bytes.len() != 32 {
            return Err(DecodeError::Hash(s.to_string()));
        }
        let mut id = [0u8; 32];
        id.copy_from_slice(&bytes);
        Ok(TxId(id))
    }
}

/// A block id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId(pub [u8; 32]);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// The 20-byte hash of an address controlled by some wallet account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressHash(pub [u8; 20]);

/// `(transaction hash, output index)` pair identifying an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Outpoint {
    pub hash: TxId,
    pub index: u32,
}

impl Outpoint {
    pub fn new(hash: TxId, index: u32) -> Self {
        Self { hash, index }
    }

    /// Raw 36-byte form persisted in spend records and orphan lists.
    pub fn to_bytes(&self) -> [u8; OUTPOINT_SIZE] {
        let mut buf = [0u8; OUTPOINT_SIZE];
        buf[0..32].copy_from_slice(&self.hash.0);
        LittleEndian::write_u32(&mut buf[32..36], self.index);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < OUTPOINT_SIZE {
            return Err(DecodeError::TruncatedOutpoint);
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes[0..32]);
        Ok(Self {
            hash: TxId(hash),
            index: LittleEndian::read_u32(&bytes[32..36]),
        })
    }

    /// Parse a concatenation of raw outpoints, as stored in orphan lists.
    pub fn parse_list(bytes: &[u8]) -> Result<Vec<Self>, DecodeError> {
        if bytes.len() % OUTPOINT_SIZE != 0 {
            return Err(DecodeError::BadListLength(bytes.len()));
        }
        bytes.chunks_exact(OUTPOINT_SIZE).map(Self::from_bytes).collect()
    }
}

impl fmt::Display for Outpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.hash, self.index)
    }
}

/// One transaction input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    pub prevout: Outpoint,
    /// Address hash recovered from the input script, if any. For inputs that
    /// spend a wallet coin this is the address of the consumed output.
    pub address: Option<AddressHash>,
}

/// One transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub value: u64,
    pub address: Option<AddressHash>,
    pub script: Vec<u8>,
}

impl Output {
    /// Whether the output can never be spent (data carrier scripts).
    pub fn is_unspendable(&self) -> bool {
        self.script.first() == Some(&0x6a)
    }
}

/// The parsed transaction contract the index operates on. Parsing and script
/// construction live outside the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub txid: TxId,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
}

impl Transaction {
    pub fn is_coinbase(&self) -> bool {
        self.inputs.is_empty()
    }
}

/// The canonical storage form of a transaction: the transaction itself plus
/// its inclusion metadata. This is the value stored under `t/<hash>`.
///
/// `ts == 0` iff the transaction is unconfirmed iff `height == -1`; once
/// `ts != 0`, `height >= 0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRecord {
    pub tx: Transaction,
    pub height: i32,
    pub block: Option<BlockId>,
    pub index: i32,
    /// Block timestamp; zero while unconfirmed.
    pub ts: u64,
    /// Timestamp at which the wallet first saw the transaction.
    pub ps: u64,
}

impl TxRecord {
    /// A record for a transaction not yet included in a block.
    pub fn unconfirmed(tx: Transaction, ps: u64) -> Self {
        Self {
            tx,
            height: constants::UNCONFIRMED_HEIGHT,
            block: None,
            index: -1,
            ts: 0,
            ps,
        }
    }

    /// A record for a transaction included in a block.
    pub fn confirmed(tx: Transaction, height: u32, block: BlockId, index: u32, ts: u64, ps: u64) -> Self {
        Self {
            tx,
            height: height as i32,
            block: Some(block),
            index: index as i32,
            ts,
            ps,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.ts != 0
    }

    /// Force the unconfirmed invariant: a record without a block timestamp
    /// carries no height, block id, or block index.
    pub fn normalize(&mut self) {
        if self.ts == 0 {
            self.height = constants::UNCONFIRMED_HEIGHT;
            self.block = None;
            self.index = -1;
        }
    }

    pub fn txid(&self) -> TxId {
        self.tx.txid
    }
}

/// One unspent output owned by the wallet. The value stored under
/// `c/<hash>/<vout>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coin {
    pub version: u32,
    /// Inclusion height; [`constants::UNCONFIRMED_HEIGHT`] while unconfirmed.
    pub height: i32,
    pub value: u64,
    pub script: Vec<u8>,
    pub address: AddressHash,
}

impl Coin {
    /// Build the coin minted by output `vout` of `record`, if the output
    /// carries an address.
    pub fn from_output(record: &TxRecord, vout: u32) -> Option<Self> {
        let output = record.tx.outputs.get(vout as usize)?;
        let address = output.address?;
        Some(Self {
            version: record.tx.version,
            height: record.height,
            value: output.value,
            script: output.script.clone(),
            address,
        })
    }

    /// Fixed byte layout: little-endian version/flags, height (with the
    /// unconfirmed sentinel), value, then the length-prefixed script and the
    /// address hash.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; COIN_HEADER_SIZE + self.script.len() + ADDRESS_SIZE];
        LittleEndian::write_u32(&mut buf[0..4], self.version);
        LittleEndian::write_u32(&mut buf[4..8], self.height_word());
        LittleEndian::write_u64(&mut buf[8..16], self.value);
        LittleEndian::write_u16(&mut buf[16..18], self.script.len() as u16);
        buf[COIN_HEADER_SIZE..COIN_HEADER_SIZE + self.script.len()].copy_from_slice(&self.script);
        buf[COIN_HEADER_SIZE + self.script.len()..].copy_from_slice(&self.address.0);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < COIN_HEADER_SIZE {
            return Err(DecodeError::TruncatedCoin);
        }
        let script_len = LittleEndian::read_u16(&bytes[16..18]) as usize;
        if bytes.len() < COIN_HEADER_SIZE + script_len + ADDRESS_SIZE {
            return Err(DecodeError::TruncatedCoin);
        }
        let height_word = LittleEndian::read_u32(&bytes[4..8]);
        let height = if height_word == constants::UNCONFIRMED_COIN_HEIGHT {
            constants::UNCONFIRMED_HEIGHT
        } else {
            height_word as i32
        };
        let mut address = [0u8; ADDRESS_SIZE];
        address.copy_from_slice(&bytes[COIN_HEADER_SIZE + script_len..COIN_HEADER_SIZE + script_len + ADDRESS_SIZE]);
        Ok(Self {
            version: LittleEndian::read_u32(&bytes[0..4]),
            height,
            value: LittleEndian::read_u64(&bytes[8..16]),
            script: bytes[COIN_HEADER_SIZE..COIN_HEADER_SIZE + script_len].to_vec(),
            address: AddressHash(address),
        })
    }

    /// Read only the height word out of serialized coin bytes.
    pub fn height_of(bytes: &[u8]) -> Result<u32, DecodeError> {
        if bytes.len() < 8 {
            return Err(DecodeError::TruncatedCoin);
        }
        Ok(LittleEndian::read_u32(&bytes[4..8]))
    }

    /// Read only the value field out of serialized coin bytes.
    pub fn value_of(bytes: &[u8]) -> Result<u64, DecodeError> {
        if bytes.len() < 16 {
            return Err(DecodeError::TruncatedCoin);
        }
        Ok(LittleEndian::read_u64(&bytes[8..16]))
    }

    fn height_word(&self) -> u32 {
        if self.height < 0 {
            constants::UNCONFIRMED_COIN_HEIGHT
        } else {
            self.height as u32
        }
    }
}

/// The account a single address belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Path {
    pub account: u32,
}

/// The mapping, for one transaction, from each involved address hash to the
/// wallet account that owns it. Computed by the outer wallet and passed in.
#[derive(Debug, Clone, Default)]
pub struct PathInfo {
    paths: HashMap<AddressHash, Path>,
}

impl PathInfo {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn insert(&mut self, address: AddressHash, path: Path) {
        self.paths.insert(address, path);
    }

    pub fn get_path(&self, address: &AddressHash) -> Option<&Path> {
        self.paths.get(address)
    }

    pub fn has_path(&self, address: &AddressHash) -> bool {
        self.paths.contains_key(address)
    }

    /// Sorted set of account ids touched by the transaction.
    pub fn accounts(&self) -> Vec<u32> {
        let set: BTreeSet<u32> = self.paths.values().map(|path| path.account).collect();
        set.into_iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl std::iter::FromIterator<(AddressHash, u32)> for PathInfo {
    fn from_iter<I: IntoIterator<Item = (AddressHash, u32)>>(iter: I) -> Self {
        let paths = iter
            .into_iter()
            .map(|(address, account)| (address, Path { account }))
            .collect();
        Self { paths }
    }
}

/// Wallet balance partitioned by confirmation state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Balance {
    pub confirmed: u64,
    pub unconfirmed: u64,
}

impl Balance {
    pub fn total(&self) -> u64 {
        self.confirmed.saturating_add(self.unconfirmed)
    }
}

/// Bounds for a ranged query over one of the ordered indexes.
#[derive(Debug, Clone, Copy)]
pub struct RangeOpts {
    pub start: u64,
    pub end: u64,
    pub limit: Option<usize>,
    pub reverse: bool,
}

impl Default for RangeOpts {
    fn default() -> Self {
        Self {
            start: 0,
            end: constants::MAX_KEY_TIME,
            limit: None,
            reverse: false,
        }
    }
}

/// Result of an [`add`](crate::repository::TxIndex::add) call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The transaction was inserted.
    Added,
    /// The transaction was already present; it may have been confirmed in
    /// place, but nothing was re-inserted.
    Existing,
    /// The transaction was not added: verification failed or conflict
    /// arbitration kept the existing spender. Not an error.
    Rejected,
}

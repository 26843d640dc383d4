//! Vertex serialization and the concrete vertex decision.
//!
//! Wire layout (big-endian):
//!
//! ```text
//! u16 codec=0 | 32B chainID | u64 height | u32 epoch=0
//! u32 numParents | numParents x 32B parentID
//! u32 numTxs    | numTxs x (u32 txLen | tx bytes)
//! ```
//!
//! The vertex id is the SHA-256 of the whole encoding. Parent ids must be
//! sorted ascending and unique; transactions must be sorted by id ascending
//! and unique. Violations are permanent errors.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use serac_codec::{Packer, UnpackError, Unpacker};
use serac_ids::{Id, ID_LEN};
use serac_utils::Set;

use crate::choices::{check_transition, Decision, Status};
use crate::error::Result;
use crate::tx::Tx;
use crate::vm::{TxSource, VerifyError};

/// Maximum encoded vertex size.
pub const MAX_VERTEX_SIZE: usize = 1 << 20;

/// Maximum number of parents.
pub const MAX_PARENTS: usize = 128;

/// Maximum number of transactions.
pub const MAX_TXS_PER_VERTEX: usize = 128;

const CODEC_VERSION: u16 = 0;

/// Errors building or decoding a vertex. All are permanent.
#[derive(Debug, Error)]
pub enum VertexError {
    /// The codec version is not recognized.
    #[error("invalid codec version: {0}")]
    BadCodec(u16),

    /// The epoch field must be zero.
    #[error("invalid epoch: {0}")]
    BadEpoch(u32),

    /// More parents than allowed.
    #[error("vertex has {0} parents but max is {max}", max = MAX_PARENTS)]
    TooManyParents(usize),

    /// More transactions than allowed.
    #[error("vertex has {0} txs but max is {max}", max = MAX_TXS_PER_VERTEX)]
    TooManyTxs(usize),

    /// A vertex must carry at least one transaction.
    #[error("vertex contains no transactions")]
    NoTxs,

    /// Parent ids are unsorted or duplicated.
    #[error("vertex contains non-sorted or duplicated parent ids")]
    InvalidParents,

    /// Transactions are unsorted or duplicated.
    #[error("vertex contains non-sorted or duplicated transactions")]
    InvalidTxs,

    /// Two transactions in the vertex consume the same input.
    #[error("vertex contains conflicting transactions")]
    ConflictingTxs,

    /// The encoding exceeds the size limit.
    #[error("vertex encoding of {0} bytes exceeds max {max}", max = MAX_VERTEX_SIZE)]
    Oversize(usize),

    /// Bytes remained after decoding.
    #[error("trailing buffer space")]
    TrailingBytes,

    /// The buffer ended early or held malformed fields.
    #[error("malformed vertex: {0}")]
    Unpack(#[from] UnpackError),

    /// A carried transaction failed to parse.
    #[error("invalid transaction: {0}")]
    Tx(String),
}

impl From<VertexError> for VerifyError {
    fn from(err: VertexError) -> Self {
        VerifyError::Permanent(err.to_string())
    }
}

fn is_sorted_unique(ids: &[Id]) -> bool {
    ids.windows(2).all(|w| w[0] < w[1])
}

/// A DAG vertex: a batch of transactions with parent references.
pub struct Vertex {
    id: Id,
    chain_id: Id,
    height: u64,
    parent_ids: Vec<Id>,
    txs: Vec<Arc<dyn Tx>>,
    bytes: Vec<u8>,
    status: Mutex<Status>,
}

impl Vertex {
    /// Builds and encodes a new vertex. Parents and transactions are
    /// sorted; structural limits are enforced.
    pub fn build(
        chain_id: Id,
        height: u64,
        mut parent_ids: Vec<Id>,
        mut txs: Vec<Arc<dyn Tx>>,
    ) -> std::result::Result<Self, VertexError> {
        parent_ids.sort_unstable();
        parent_ids.dedup();
        txs.sort_unstable_by_key(|tx| tx.id());
        txs.dedup_by_key(|tx| tx.id());

        let bytes = Self::marshal(chain_id, height, &parent_ids, &txs)?;
        let vertex = Self {
            id: Id::from_hash(&bytes),
            chain_id,
            height,
            parent_ids,
            txs,
            bytes,
            status: Mutex::new(Status::Processing),
        };
        vertex.check()?;
        Ok(vertex)
    }

    fn marshal(
        chain_id: Id,
        height: u64,
        parent_ids: &[Id],
        txs: &[Arc<dyn Tx>],
    ) -> std::result::Result<Vec<u8>, VertexError> {
        if parent_ids.len() > MAX_PARENTS {
            return Err(VertexError::TooManyParents(parent_ids.len()));
        }
        if txs.len() > MAX_TXS_PER_VERTEX {
            return Err(VertexError::TooManyTxs(txs.len()));
        }

        let mut packer = Packer::with_max_size(1024, MAX_VERTEX_SIZE);
        packer.pack_short(CODEC_VERSION);
        packer.pack_fixed_bytes(chain_id.as_bytes());
        packer.pack_long(height);
        packer.pack_int(0);

        packer.pack_int(parent_ids.len() as u32);
        for parent in parent_ids {
            packer.pack_fixed_bytes(parent.as_bytes());
        }

        packer.pack_int(txs.len() as u32);
        for tx in txs {
            packer.pack_bytes(&tx.bytes());
        }

        let len = packer.len();
        packer.finish().map_err(|_| VertexError::Oversize(len))
    }

    /// Decodes a vertex, parsing its transactions through `txs`.
    pub fn parse(
        bytes: &[u8],
        txs: &dyn TxSource,
    ) -> std::result::Result<Self, VertexError> {
        if bytes.len() > MAX_VERTEX_SIZE {
            return Err(VertexError::Oversize(bytes.len()));
        }
        let mut unpacker = Unpacker::new(bytes);

        let codec = unpacker.unpack_short()?;
        if codec != CODEC_VERSION {
            return Err(VertexError::BadCodec(codec));
        }
        let chain_id = Id::from_bytes(unpacker.unpack_fixed_bytes::<ID_LEN>()?);
        let height = unpacker.unpack_long()?;
        let epoch = unpacker.unpack_int()?;
        if epoch != 0 {
            return Err(VertexError::BadEpoch(epoch));
        }

        let num_parents = unpacker.unpack_int()? as usize;
        if num_parents > MAX_PARENTS {
            return Err(VertexError::TooManyParents(num_parents));
        }
        let mut parent_ids = Vec::with_capacity(num_parents);
        for _ in 0..num_parents {
            parent_ids.push(Id::from_bytes(unpacker.unpack_fixed_bytes::<ID_LEN>()?));
        }

        let num_txs = unpacker.unpack_int()? as usize;
        if num_txs > MAX_TXS_PER_VERTEX {
            return Err(VertexError::TooManyTxs(num_txs));
        }
        let mut parsed = Vec::with_capacity(num_txs);
        for _ in 0..num_txs {
            let tx_bytes = unpacker.unpack_bytes()?;
            let tx = txs
                .parse_tx(&tx_bytes)
                .map_err(|e| VertexError::Tx(e.to_string()))?;
            parsed.push(tx);
        }

        if !unpacker.is_empty() {
            return Err(VertexError::TrailingBytes);
        }

        Ok(Self {
            id: Id::from_hash(bytes),
            chain_id,
            height,
            parent_ids,
            txs: parsed,
            bytes: bytes.to_vec(),
            status: Mutex::new(Status::Processing),
        })
    }

    /// The chain this vertex belongs to.
    #[must_use]
    pub fn chain_id(&self) -> Id {
        self.chain_id
    }

    fn check(&self) -> std::result::Result<(), VertexError> {
        if !is_sorted_unique(&self.parent_ids) {
            return Err(VertexError::InvalidParents);
        }
        if self.txs.is_empty() {
            return Err(VertexError::NoTxs);
        }
        let tx_ids: Vec<Id> = self.txs.iter().map(|tx| tx.id()).collect();
        if !is_sorted_unique(&tx_ids) {
            return Err(VertexError::InvalidTxs);
        }

        let mut consumed: Set<Id> = Set::new();
        for tx in &self.txs {
            for input in tx.input_ids() {
                if !consumed.add(input) {
                    return Err(VertexError::ConflictingTxs);
                }
            }
        }
        Ok(())
    }
}

impl Decision for Vertex {
    fn id(&self) -> Id {
        self.id
    }

    fn parents(&self) -> Vec<Id> {
        self.parent_ids.clone()
    }

    fn height(&self) -> u64 {
        self.height
    }

    fn bytes(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    fn status(&self) -> Status {
        *self.status.lock()
    }

    fn txs(&self) -> Vec<Arc<dyn Tx>> {
        self.txs.clone()
    }

    fn verify(&self) -> std::result::Result<(), VerifyError> {
        self.check().map_err(VerifyError::from)
    }

    fn accept(&self) -> Result<()> {
        let mut status = self.status.lock();
        check_transition(self.id, *status, Status::Accepted)?;
        *status = Status::Accepted;
        Ok(())
    }

    fn reject(&self) -> Result<()> {
        let mut status = self.status.lock();
        check_transition(self.id, *status, Status::Rejected)?;
        *status = Status::Rejected;
        Ok(())
    }
}

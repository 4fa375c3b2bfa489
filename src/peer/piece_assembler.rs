//! Accumulates the blocks of a single piece as they arrive on one session,
//! verifies the assembled buffer against the expected SHA-1, and reports the
//! outcome to the caller.
//!
//! One [`PieceAssembler`] lives for the lifetime of a single in-flight piece
//! download: it is created when a piece is scheduled on a session and
//! destroyed either when the piece completes or when it is reassigned after
//! a hash failure or peer loss.

use bitvec::prelude::BitVec;
use sha1::{Digest, Sha1};

use crate::{blockinfo::block_len, Sha1Hash, BLOCK_LEN};

/// The result of feeding a block to a [`PieceAssembler`].
#[derive(Debug, PartialEq, Eq)]
pub enum BlockOutcome {
    /// The block was accepted but the piece isn't complete yet.
    Pending,
    /// The block was rejected; discarded, the assembler remains valid.
    Rejected(BlockRejection),
    /// All blocks arrived and the assembled buffer matches the expected
    /// hash. The assembler should be dropped after this.
    Completed(Vec<u8>),
    /// All blocks arrived but the assembled buffer's hash did not match.
    /// The assembler has been reset to empty and may be reused.
    HashMismatch,
}

/// Why a block was rejected by [`PieceAssembler::add_block`].
#[derive(Debug, PartialEq, Eq)]
pub enum BlockRejection {
    /// `begin` was not a multiple of the block length.
    Misaligned,
    /// The block's length didn't match what was expected for its position
    /// (the fixed block length for all but the final block, and the
    /// remainder length for the final block).
    WrongLength,
    /// The block index was already received; this is an idempotent drop and
    /// not itself an error condition, but the caller may want to know.
    Duplicate,
}

/// In-progress state for a single piece's worth of blocks.
pub struct PieceAssembler {
    /// The expected length of the whole piece.
    piece_len: u32,
    /// The expected SHA-1 hash of the assembled piece.
    expected_hash: Sha1Hash,
    /// The buffer into which blocks are written as they arrive.
    buf: Vec<u8>,
    /// Which block indices have been received so far.
    received: BitVec,
}

impl PieceAssembler {
    pub fn new(piece_len: u32, expected_hash: Sha1Hash) -> Self {
        let block_count = crate::blockinfo::block_count(piece_len);
        Self {
            piece_len,
            expected_hash,
            buf: vec![0; piece_len as usize],
            received: BitVec::repeat(false, block_count),
        }
    }

    /// The number of block slots this assembler expects.
    pub fn block_count(&self) -> usize {
        self.received.len()
    }

    /// Feeds a block at byte offset `begin` into the assembler.
    pub fn add_block(&mut self, begin: u32, data: &[u8]) -> BlockOutcome {
        if begin % BLOCK_LEN != 0 {
            return BlockOutcome::Rejected(BlockRejection::Misaligned);
        }
        let block_index = (begin / BLOCK_LEN) as usize;
        if block_index >= self.block_count() {
            return BlockOutcome::Rejected(BlockRejection::Misaligned);
        }

        let expected_len = block_len(self.piece_len, block_index);
        if data.len() as u32 != expected_len {
            return BlockOutcome::Rejected(BlockRejection::WrongLength);
        }

        if self.received[block_index] {
            return BlockOutcome::Rejected(BlockRejection::Duplicate);
        }

        let start = begin as usize;
        let end = start + data.len();
        self.buf[start..end].copy_from_slice(data);
        self.received.set(block_index, true);

        if !self.received.all() {
            return BlockOutcome::Pending;
        }

        let mut hasher = Sha1::new();
        hasher.update(&self.buf);
        let digest = hasher.finalize();

        if digest.as_slice() == self.expected_hash {
            BlockOutcome::Completed(std::mem::take(&mut self.buf))
        } else {
            self.reset();
            BlockOutcome::HashMismatch
        }
    }

    /// Clears all received blocks, keeping the assembler usable for a
    /// re-request of the whole piece.
    pub fn reset(&mut self) {
        self.buf = vec![0; self.piece_len as usize];
        self.received.fill(false);
    }

    /// Clears a single received block, used to re-request just that block
    /// after a [`BlockRejection`].
    pub fn reset_block(&mut self, block_index: usize) {
        if block_index < self.received.len() {
            self.received.set(block_index, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha1::{Digest, Sha1};

    fn hash_of(data: &[u8]) -> Sha1Hash {
        let mut hasher = Sha1::new();
        hasher.update(data);
        let digest = hasher.finalize();
        let mut hash = [0; 20];
        hash.copy_from_slice(&digest);
        hash
    }

    #[test]
    fn completes_on_matching_hash() {
        let data = vec![7u8; BLOCK_LEN as usize * 2 + 100];
        let hash = hash_of(&data);
        let mut assembler = PieceAssembler::new(data.len() as u32, hash);
        assert_eq!(assembler.block_count(), 3);

        for (i, chunk) in data.chunks(BLOCK_LEN as usize).enumerate() {
            let begin = i as u32 * BLOCK_LEN;
            let outcome = assembler.add_block(begin, chunk);
            if i < 2 {
                assert_eq!(outcome, BlockOutcome::Pending);
            } else {
                assert_eq!(outcome, BlockOutcome::Completed(data.clone()));
            }
        }
    }

    #[test]
    fn rejects_misaligned_begin() {
        let mut assembler = PieceAssembler::new(BLOCK_LEN, [0; 20]);
        let outcome = assembler.add_block(1, &[0; 10]);
        assert_eq!(outcome, BlockOutcome::Rejected(BlockRejection::Misaligned));
    }

    #[test]
    fn rejects_wrong_length_for_non_final_block() {
        let mut assembler = PieceAssembler::new(BLOCK_LEN * 2, [0; 20]);
        let outcome = assembler.add_block(0, &[0; 10]);
        assert_eq!(
            outcome,
            BlockOutcome::Rejected(BlockRejection::WrongLength)
        );
    }

    #[test]
    fn final_block_length_is_remainder() {
        // piece length 16384*2 + 2 -> final block length is 2
        let piece_len = BLOCK_LEN * 2 + 2;
        let mut assembler = PieceAssembler::new(piece_len, [0; 20]);
        assert_eq!(assembler.block_count(), 3);
        let outcome = assembler.add_block(BLOCK_LEN * 2, &[0; 2]);
        assert_eq!(outcome, BlockOutcome::Pending);
        let outcome = assembler.add_block(BLOCK_LEN * 2, &[0; 1]);
        assert_eq!(
            outcome,
            BlockOutcome::Rejected(BlockRejection::WrongLength)
        );
    }

    #[test]
    fn duplicate_block_is_idempotent_drop() {
        let data = vec![1u8; BLOCK_LEN as usize];
        let hash = hash_of(&data);
        let mut assembler = PieceAssembler::new(data.len() as u32, hash);
        let first = assembler.add_block(0, &data);
        assert_eq!(first, BlockOutcome::Completed(data.clone()));

        // a fresh duplicate arriving after completion (simulating the spec's
        // idempotent-drop rule) is exercised directly against a non-complete
        // assembler instead, since `add_block` consumes state on completion.
        let mut assembler = PieceAssembler::new(BLOCK_LEN * 2, [0; 20]);
        assert_eq!(
            assembler.add_block(0, &vec![0; BLOCK_LEN as usize]),
            BlockOutcome::Pending
        );
        assert_eq!(
            assembler.add_block(0, &vec![0; BLOCK_LEN as usize]),
            BlockOutcome::Rejected(BlockRejection::Duplicate)
        );
    }

    #[test]
    fn hash_mismatch_resets_and_allows_rerequest() {
        let data = vec![9u8; BLOCK_LEN as usize];
        let mut assembler = PieceAssembler::new(data.len() as u32, [0; 20]);
        let outcome = assembler.add_block(0, &data);
        assert_eq!(outcome, BlockOutcome::HashMismatch);

        // assembler was reset, so the block can be re-added
        let hash = hash_of(&data);
        let mut assembler = PieceAssembler::new(data.len() as u32, hash);
        assembler.reset();
        let outcome = assembler.add_block(0, &data);
        assert_eq!(outcome, BlockOutcome::Completed(data));
    }
}

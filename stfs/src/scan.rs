//! The two scanning primitives every other layer is built on.
//!
//! Neither primitive ever looks inside the reserved block — by invariant 5
//! it only ever holds Empty chunks, so skipping it is both an optimization
//! and a correctness requirement (allocating into the reserved block even
//! transiently would break vacuum's atomic-swap property).

use crate::error::Result;
use stfs_api::device::Flash;
use stfs_api::geometry::{ANY_SEQ, CHUNKS_PER_BLOCK, NO_OID};
use stfs_api::types::{Chunk, DataRecord, InodeRecord, Oid, Seq};

/// A scan position: a block index and a chunk index within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    /// Erase block index.
    pub block: u32,
    /// Chunk index within the block.
    pub chunk: u32,
}

impl Cursor {
    /// The position one past this one: advance within the block, or move to
    /// the next block index and reset to its first chunk once the current
    /// block is exhausted. Does not wrap back to block 0 past the last
    /// block, and does not itself skip the reserved block — `find_chunk`
    /// skips it on the next call. A caller that keeps re-entering
    /// `find_chunk` with the advanced cursor (`readdir`) relies on this: a
    /// wrap would let the scan circle back and re-match an already-visited
    /// chunk, looping forever instead of terminating at the device's end.
    pub fn advance(self) -> Cursor {
        if self.chunk + 1 >= CHUNKS_PER_BLOCK as u32 {
            Cursor {
                block: self.block + 1,
                chunk: 0,
            }
        } else {
            Cursor {
                block: self.block,
                chunk: self.chunk + 1,
            }
        }
    }
}

/// What `find_chunk` should match against, mirroring the reference
/// signature `find_chunk(type, oid, parent, seq, &block, &chunk)`.
#[derive(Debug, Clone, Copy)]
pub enum ChunkQuery {
    /// Match an Inode chunk. `oid != 0` constrains by self-OID; otherwise
    /// `parent != 0` constrains by parent OID; if both are `0`, any inode matches.
    Inode {
        /// Self OID to match, or `NO_OID` for "don't care".
        oid: Oid,
        /// Parent OID to match, or `NO_OID` for "don't care".
        parent: Oid,
    },
    /// Match a Data chunk owned by `oid`. `seq == ANY_SEQ` matches any sequence number.
    Data {
        /// Owning file OID.
        oid: Oid,
        /// Sequence number to match, or `ANY_SEQ` for "don't care".
        seq: Seq,
    },
    /// Match the first Empty chunk.
    Empty,
    /// Match the first Deleted chunk.
    Deleted,
}

impl ChunkQuery {
    fn early_stops_on_empty(&self) -> bool {
        !matches!(self, ChunkQuery::Empty)
    }

    fn matches(&self, chunk: &Chunk) -> bool {
        match (self, chunk) {
            (ChunkQuery::Empty, Chunk::Empty) => true,
            (ChunkQuery::Deleted, Chunk::Deleted) => true,
            (ChunkQuery::Inode { oid, parent }, Chunk::Inode(inode)) => {
                if *oid != NO_OID {
                    inode.oid == *oid
                } else if *parent != NO_OID {
                    inode.parent == *parent
                } else {
                    true
                }
            }
            (ChunkQuery::Data { oid, seq }, Chunk::Data(data)) => {
                data.oid == *oid && (*seq == ANY_SEQ || data.seq == *seq)
            }
            _ => false,
        }
    }
}

/// Scan forward from `from` (row-major, skipping the reserved block) for
/// the first chunk matching `query`. Runs a single forward pass from
/// `from.block` to the last block and does not wrap back to block 0 —
/// callers that re-enter with the returned cursor (notably `readdir`) rely
/// on the scan terminating with `None` once it runs off the end rather than
/// circling back and re-matching an earlier chunk.
///
/// Scanning within a block stops at the first Empty chunk when `query` is
/// not itself an Empty search, exploiting the invariant that live chunks
/// densely prefix a block.
pub fn find_chunk(
    flash: &Flash,
    reserved_block: u32,
    query: &ChunkQuery,
    from: Cursor,
) -> Result<Option<(Cursor, Chunk)>> {
    let nblocks = flash.geometry().nblocks();
    let mut start_chunk = from.chunk;
    for block in from.block..nblocks {
        if block != reserved_block {
            for chunk_idx in start_chunk..CHUNKS_PER_BLOCK as u32 {
                let bytes = flash.read_chunk(block, chunk_idx)?;
                let parsed = Chunk::from_bytes(&bytes)?;
                if matches!(parsed, Chunk::Empty) && query.early_stops_on_empty() {
                    break;
                }
                if query.matches(&parsed) {
                    return Ok(Some((
                        Cursor {
                            block,
                            chunk: chunk_idx,
                        },
                        parsed,
                    )));
                }
            }
        }
        start_chunk = 0;
    }
    Ok(None)
}

/// Iterate every block (skipping reserved), with no early stop, and return
/// the first live Inode chunk whose `parent` and name match exactly.
/// Tolerates sparse directories where a block's dense-prefix assumption
/// doesn't hold.
pub fn find_inode_by_parent_name(
    flash: &Flash,
    reserved_block: u32,
    parent: Oid,
    name: &str,
) -> Result<Option<(Cursor, InodeRecord)>> {
    let nblocks = flash.geometry().nblocks();
    let name_bytes = name.as_bytes();
    for block in 0..nblocks {
        if block == reserved_block {
            continue;
        }
        for chunk_idx in 0..CHUNKS_PER_BLOCK as u32 {
            let bytes = flash.read_chunk(block, chunk_idx)?;
            if let Chunk::Inode(inode) = Chunk::from_bytes(&bytes)? {
                if inode.parent == parent && inode.name_bytes() == name_bytes {
                    return Ok(Some((
                        Cursor {
                            block,
                            chunk: chunk_idx,
                        },
                        inode,
                    )));
                }
            }
        }
    }
    Ok(None)
}

/// Look up the live Inode chunk with self-OID `oid`, wherever it is.
pub fn find_inode_by_oid(
    flash: &Flash,
    reserved_block: u32,
    oid: Oid,
) -> Result<Option<(Cursor, InodeRecord)>> {
    let query = ChunkQuery::Inode {
        oid,
        parent: NO_OID,
    };
    match find_chunk(flash, reserved_block, &query, Cursor { block: 0, chunk: 0 })? {
        Some((cursor, Chunk::Inode(inode))) => Ok(Some((cursor, inode))),
        _ => Ok(None),
    }
}

/// Collect every live Data chunk owned by `oid`, in physical scan order.
pub fn all_data_for_oid(
    flash: &Flash,
    reserved_block: u32,
    oid: Oid,
) -> Result<Vec<(Cursor, DataRecord)>> {
    let nblocks = flash.geometry().nblocks();
    let mut found = Vec::new();
    for block in 0..nblocks {
        if block == reserved_block {
            continue;
        }
        for chunk_idx in 0..CHUNKS_PER_BLOCK as u32 {
            let bytes = flash.read_chunk(block, chunk_idx)?;
            if let Chunk::Data(data) = Chunk::from_bytes(&bytes)? {
                if data.oid == oid {
                    found.push((
                        Cursor {
                            block,
                            chunk: chunk_idx,
                        },
                        data,
                    ));
                }
            }
        }
    }
    Ok(found)
}

/// Collect every live Inode chunk in the device, in physical scan order.
pub fn all_inodes(flash: &Flash, reserved_block: u32) -> Result<Vec<(Cursor, InodeRecord)>> {
    let nblocks = flash.geometry().nblocks();
    let mut found = Vec::new();
    for block in 0..nblocks {
        if block == reserved_block {
            continue;
        }
        for chunk_idx in 0..CHUNKS_PER_BLOCK as u32 {
            let bytes = flash.read_chunk(block, chunk_idx)?;
            if let Chunk::Inode(inode) = Chunk::from_bytes(&bytes)? {
                found.push((
                    Cursor {
                        block,
                        chunk: chunk_idx,
                    },
                    inode,
                ));
            }
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stfs_api::geometry::{Geometry, MAX_NAME};
    use stfs_api::types::InodeKind;

    fn flash() -> Flash {
        Flash::in_ram(Geometry::new(3).unwrap())
    }

    fn inode(oid: Oid, parent: Oid, name: &str, kind: InodeKind) -> Chunk {
        let mut name_buf = [0u8; MAX_NAME];
        name_buf[..name.len()].copy_from_slice(name.as_bytes());
        Chunk::Inode(InodeRecord {
            kind,
            name_len: name.len() as u8,
            size: 0,
            parent,
            oid,
            name: name_buf,
        })
    }

    #[test]
    fn find_chunk_skips_reserved_block() {
        let mut f = flash();
        f.program_chunk(1, 0, &inode(2, 1, "a", InodeKind::Directory).to_bytes())
            .unwrap();
        // block 0 is reserved in this test.
        let result = find_chunk(
            &f,
            0,
            &ChunkQuery::Inode { oid: 2, parent: NO_OID },
            Cursor { block: 0, chunk: 0 },
        )
        .unwrap();
        assert_eq!(result.unwrap().0, Cursor { block: 1, chunk: 0 });
    }

    #[test]
    fn find_chunk_early_stops_at_empty() {
        let mut f = flash();
        f.program_chunk(1, 1, &inode(3, 1, "b", InodeKind::Directory).to_bytes())
            .unwrap();
        // chunk 0 of block 1 is still Empty, so a dense-prefix scan never reaches chunk 1.
        let result = find_chunk(
            &f,
            0,
            &ChunkQuery::Inode { oid: 3, parent: NO_OID },
            Cursor { block: 0, chunk: 0 },
        )
        .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn find_inode_by_parent_name_tolerates_sparse_blocks() {
        let mut f = flash();
        f.program_chunk(1, 5, &inode(4, 1, "c", InodeKind::Directory).to_bytes())
            .unwrap();
        let found = find_inode_by_parent_name(&f, 0, 1, "c").unwrap();
        assert_eq!(found.unwrap().1.oid, 4);
    }

    #[test]
    fn find_chunk_does_not_wrap_past_the_last_block() {
        let mut f = flash();
        // The only matching inode lives in block 0, which is *not* the
        // reserved block here (block 2 is). Starting the scan at block 1, a
        // wrapping implementation would circle back through block 0 after
        // exhausting blocks 1 and 2 and find it; a forward-only scan must
        // run off the end of the device and return `None` instead.
        f.program_chunk(0, 0, &inode(2, 1, "a", InodeKind::Directory).to_bytes())
            .unwrap();
        let result = find_chunk(
            &f,
            2,
            &ChunkQuery::Inode { oid: 2, parent: NO_OID },
            Cursor { block: 1, chunk: 0 },
        )
        .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn cursor_advance_does_not_wrap_block_count() {
        let last_chunk_of_block = Cursor {
            block: 2,
            chunk: CHUNKS_PER_BLOCK as u32 - 1,
        };
        let advanced = last_chunk_of_block.advance();
        assert_eq!(advanced, Cursor { block: 3, chunk: 0 });
    }
}

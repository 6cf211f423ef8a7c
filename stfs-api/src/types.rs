//! The on-flash chunk record types and their byte-exact codec.
//!
//! Every mutation STFS ever makes to flash is either "write a fresh chunk"
//! or "overwrite 1-bits with 0-bits in place"; this module is the only
//! place that knows the packed byte layout those writes must produce. The
//! layout is normative: two implementations that perform the same sequence
//! of mutations must produce bit-identical images (modulo allocator
//! placement, which is observable but tolerated nondeterminism).

use crate::error::{ApiError, Result};
use crate::geometry::{CHUNK_SIZE, DATA_PER_CHUNK, MAX_NAME};
use bit_field::BitField;

/// Object identifier: a 32-bit integer naming an inode. Root is `1`, `0` means "none".
pub type Oid = u32;

/// 16-bit sequence number indexing a Data chunk within its owning file.
pub type Seq = u16;

const TAG_DELETED: u8 = 0x00;
const TAG_INODE: u8 = 0xAA;
const TAG_DATA: u8 = 0xCC;
const TAG_EMPTY: u8 = 0xFF;

/// Discriminant of a chunk record, independent of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkType {
    /// Post-erase state: all-ones.
    Empty,
    /// Directory or file metadata.
    Inode,
    /// A numbered slice of one file's content.
    Data,
    /// Tombstoned: all-zeros.
    Deleted,
}

/// Whether an inode names a directory or a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeKind {
    /// A directory: holds no data chunks of its own, only child inodes.
    Directory,
    /// A regular file: `size` bytes addressed by Data chunks.
    File,
}

impl InodeKind {
    fn from_bit(bit: bool) -> InodeKind {
        if bit {
            InodeKind::File
        } else {
            InodeKind::Directory
        }
    }

    fn as_bit(self) -> bool {
        matches!(self, InodeKind::File)
    }
}

/// An inode record: directory or file metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeRecord {
    /// Directory or file.
    pub kind: InodeKind,
    /// Byte length of `name` that is meaningful, 1..=32.
    pub name_len: u8,
    /// File byte length; directories always carry 0.
    pub size: u16,
    /// OID of the containing directory.
    pub parent: Oid,
    /// This inode's own OID.
    pub oid: Oid,
    /// Name bytes; only the first `name_len` are meaningful.
    pub name: [u8; MAX_NAME],
}

impl InodeRecord {
    /// Borrow the meaningful prefix of `name` as a byte slice.
    pub fn name_bytes(&self) -> &[u8] {
        &self.name[..self.name_len as usize]
    }
}

/// A data record: one numbered slice of a file's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRecord {
    /// 0-based index of this slice within its file.
    pub seq: Seq,
    /// OID of the owning file.
    pub oid: Oid,
    /// Payload bytes, always `DATA_PER_CHUNK` long; unused tail is padded with `0xFF`.
    pub data: [u8; DATA_PER_CHUNK],
}

/// One physical chunk record, in any of its four lifecycle states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// Post-erase: all-ones.
    Empty,
    /// Tombstoned: all-zeros.
    Deleted,
    /// Directory or file metadata.
    Inode(InodeRecord),
    /// A numbered slice of file content.
    Data(DataRecord),
}

impl Chunk {
    /// The [`ChunkType`] of this record.
    pub fn chunk_type(&self) -> ChunkType {
        match self {
            Chunk::Empty => ChunkType::Empty,
            Chunk::Deleted => ChunkType::Deleted,
            Chunk::Inode(_) => ChunkType::Inode,
            Chunk::Data(_) => ChunkType::Data,
        }
    }

    /// Pack this record into exactly `CHUNK_SIZE` bytes, little-endian.
    pub fn to_bytes(&self) -> [u8; CHUNK_SIZE] {
        match self {
            Chunk::Empty => [0xFFu8; CHUNK_SIZE],
            Chunk::Deleted => [0x00u8; CHUNK_SIZE],
            Chunk::Inode(inode) => {
                let mut buf = [0u8; CHUNK_SIZE];
                buf[0] = TAG_INODE;
                let mut flags: u8 = 0;
                flags.set_bit(0, inode.kind.as_bit());
                flags.set_bits(1..7, inode.name_len & 0x3F);
                buf[1] = flags;
                buf[2..4].copy_from_slice(&inode.size.to_le_bytes());
                buf[4..8].copy_from_slice(&inode.parent.to_le_bytes());
                buf[8..12].copy_from_slice(&inode.oid.to_le_bytes());
                buf[12..12 + MAX_NAME].copy_from_slice(&inode.name);
                // Bytes 44.. are slack, unused by this layout; left zeroed so a
                // freshly stored inode chunk is always a valid program over an
                // Empty (all-ones) chunk.
                buf
            }
            Chunk::Data(data) => {
                let mut buf = [0xFFu8; CHUNK_SIZE];
                buf[0] = TAG_DATA;
                buf[1..3].copy_from_slice(&data.seq.to_le_bytes());
                buf[3..7].copy_from_slice(&data.oid.to_le_bytes());
                buf[7..CHUNK_SIZE].copy_from_slice(&data.data);
                buf
            }
        }
    }

    /// Unpack a chunk record from exactly `CHUNK_SIZE` bytes.
    ///
    /// Rejects buffers whose length is not `CHUNK_SIZE` and buffers whose
    /// first byte does not match a known chunk type tag.
    pub fn from_bytes(bytes: &[u8]) -> Result<Chunk> {
        if bytes.len() != CHUNK_SIZE {
            return Err(ApiError::BadChunkSize {
                actual: bytes.len(),
                expected: CHUNK_SIZE,
            });
        }
        match bytes[0] {
            TAG_EMPTY => Ok(Chunk::Empty),
            TAG_DELETED => Ok(Chunk::Deleted),
            TAG_INODE => {
                let flags = bytes[1];
                let kind = InodeKind::from_bit(flags.get_bit(0));
                let name_len = flags.get_bits(1..7);
                let size = u16::from_le_bytes([bytes[2], bytes[3]]);
                let parent = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
                let oid = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
                let mut name = [0u8; MAX_NAME];
                name.copy_from_slice(&bytes[12..12 + MAX_NAME]);
                Ok(Chunk::Inode(InodeRecord {
                    kind,
                    name_len,
                    size,
                    parent,
                    oid,
                    name,
                }))
            }
            TAG_DATA => {
                let seq = u16::from_le_bytes([bytes[1], bytes[2]]);
                let oid = u32::from_le_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]);
                let mut data = [0u8; DATA_PER_CHUNK];
                data.copy_from_slice(&bytes[7..CHUNK_SIZE]);
                Ok(Chunk::Data(DataRecord { seq, oid, data }))
            }
            other => Err(ApiError::BadChunkTag(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_inode() -> InodeRecord {
        let mut name = [0u8; MAX_NAME];
        name[..5].copy_from_slice(b"hello");
        InodeRecord {
            kind: InodeKind::File,
            name_len: 5,
            size: 42,
            parent: 1,
            oid: 7,
            name,
        }
    }

    fn sample_data() -> DataRecord {
        let mut data = [0xFFu8; DATA_PER_CHUNK];
        data[0] = 1;
        data[1] = 2;
        DataRecord {
            seq: 3,
            oid: 7,
            data,
        }
    }

    #[test]
    fn round_trips_empty_and_deleted() {
        assert_eq!(Chunk::from_bytes(&Chunk::Empty.to_bytes()).unwrap(), Chunk::Empty);
        assert_eq!(
            Chunk::from_bytes(&Chunk::Deleted.to_bytes()).unwrap(),
            Chunk::Deleted
        );
    }

    #[test]
    fn round_trips_inode() {
        let chunk = Chunk::Inode(sample_inode());
        let bytes = chunk.to_bytes();
        assert_eq!(bytes.len(), CHUNK_SIZE);
        assert_eq!(Chunk::from_bytes(&bytes).unwrap(), chunk);
    }

    #[test]
    fn round_trips_data() {
        let chunk = Chunk::Data(sample_data());
        let bytes = chunk.to_bytes();
        assert_eq!(Chunk::from_bytes(&bytes).unwrap(), chunk);
    }

    #[test]
    fn rejects_wrong_size() {
        let short = vec![0xAA; CHUNK_SIZE - 1];
        assert!(matches!(
            Chunk::from_bytes(&short),
            Err(ApiError::BadChunkSize { .. })
        ));
    }

    #[test]
    fn rejects_unknown_tag() {
        let mut bytes = [0x11u8; CHUNK_SIZE];
        bytes[0] = 0x11;
        assert!(matches!(
            Chunk::from_bytes(&bytes),
            Err(ApiError::BadChunkTag(0x11))
        ));
    }

    #[test]
    fn directory_kind_round_trips() {
        let mut inode = sample_inode();
        inode.kind = InodeKind::Directory;
        inode.size = 0;
        let chunk = Chunk::Inode(inode);
        assert_eq!(Chunk::from_bytes(&chunk.to_bytes()).unwrap(), chunk);
    }

    #[test]
    fn name_len_is_six_bits() {
        let mut inode = sample_inode();
        inode.name_len = 32;
        let chunk = Chunk::Inode(inode);
        match Chunk::from_bytes(&chunk.to_bytes()).unwrap() {
            Chunk::Inode(i) => assert_eq!(i.name_len, 32),
            _ => panic!("expected inode"),
        }
    }
}

//! Absolute-path resolution.
//!
//! Splits the input `&str` into borrowed segments up front instead of
//! mutating caller-owned memory to insert temporary terminators — the fix
//! the original reference implementation's own design notes call for.

use crate::error::{Result, StfsError};
use crate::scan::{find_inode_by_parent_name, Cursor};
use stfs_api::device::Flash;
use stfs_api::geometry::{MAX_NAME, ROOT_OID};
use stfs_api::types::{InodeRecord, Oid};

/// The outcome of resolving a path: the object's OID, plus its on-flash
/// location and inode record, unless the path named the virtual root.
pub struct Resolved {
    /// The resolved object's OID.
    pub oid: Oid,
    /// `None` for the virtual root; otherwise the inode's chunk location and record.
    pub location: Option<(Cursor, InodeRecord)>,
}

fn trimmed(path: &str) -> &str {
    if path.len() > 1 && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    }
}

/// Split `path` into its `/`-separated segments, validating each is 1..=32 bytes.
fn segments(path: &str) -> Result<Vec<&str>> {
    let trimmed_path = trimmed(path);
    if trimmed_path.is_empty() || trimmed_path == "/" {
        return Ok(Vec::new());
    }
    let rest = &trimmed_path[1..]; // drop the leading '/'
    let mut out = Vec::new();
    for seg in rest.split('/') {
        if seg.is_empty() || seg.len() > MAX_NAME {
            return Err(StfsError::BadNameSize);
        }
        out.push(seg);
    }
    Ok(out)
}

/// Resolve an absolute path to an object, walking from root through
/// `find_inode_by_parent_name` at each segment.
pub fn resolve(flash: &Flash, reserved_block: u32, path: &str) -> Result<Resolved> {
    if path.is_empty() || path == "/" {
        return Ok(Resolved {
            oid: ROOT_OID,
            location: None,
        });
    }
    if !path.starts_with('/') {
        return Err(StfsError::RelativePath);
    }
    let segs = segments(path)?;
    let mut parent = ROOT_OID;
    let mut location = None;
    for seg in segs {
        match find_inode_by_parent_name(flash, reserved_block, parent, seg)? {
            Some((cursor, inode)) => {
                parent = inode.oid;
                location = Some((cursor, inode));
            }
            None => return Err(StfsError::NotFound),
        }
    }
    Ok(Resolved {
        oid: parent,
        location,
    })
}

/// Validate a single path component for object creation: not `.`/`..`/empty,
/// and no longer than `MAX_NAME`. Shared by `mkdir` and `open(..., CREATE)`,
/// which the reference implementation documents as using identical validation.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(StfsError::InvalidName);
    }
    if name.len() > MAX_NAME {
        return Err(StfsError::BadNameSize);
    }
    Ok(())
}

/// Pack `name` into a fixed `MAX_NAME`-byte buffer plus its true length.
pub fn packed_name(name: &str) -> (u8, [u8; MAX_NAME]) {
    let mut buf = [0u8; MAX_NAME];
    buf[..name.len()].copy_from_slice(name.as_bytes());
    (name.len() as u8, buf)
}

/// Split `path` into its parent directory path and final component name,
/// for operations that create or remove a single entry (`mkdir`, `open`).
pub fn split_parent_and_name(path: &str) -> Result<(String, &str)> {
    if !path.starts_with('/') {
        return Err(StfsError::RelativePath);
    }
    let trimmed_path = trimmed(path);
    let slash_pos = trimmed_path.rfind('/').ok_or(StfsError::BadNameSize)?;
    let name = &trimmed_path[slash_pos + 1..];
    if name.is_empty() || name.len() > MAX_NAME {
        return Err(StfsError::BadNameSize);
    }
    let parent_path = if slash_pos == 0 {
        "/".to_string()
    } else {
        trimmed_path[..slash_pos].to_string()
    };
    Ok((parent_path, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stfs_api::geometry::Geometry;
    use stfs_api::types::{Chunk, InodeKind};

    fn flash_with_root_child(name: &str, oid: Oid) -> Flash {
        let mut f = Flash::in_ram(Geometry::new(3).unwrap());
        let mut name_buf = [0u8; MAX_NAME];
        name_buf[..name.len()].copy_from_slice(name.as_bytes());
        let chunk = Chunk::Inode(InodeRecord {
            kind: InodeKind::Directory,
            name_len: name.len() as u8,
            size: 0,
            parent: ROOT_OID,
            oid,
            name: name_buf,
        });
        f.program_chunk(1, 0, &chunk.to_bytes()).unwrap();
        f
    }

    #[test]
    fn empty_and_root_resolve_to_root() {
        let f = flash_with_root_child("a", 2);
        assert_eq!(resolve(&f, 0, "").unwrap().oid, ROOT_OID);
        assert_eq!(resolve(&f, 0, "/").unwrap().oid, ROOT_OID);
    }

    #[test]
    fn resolves_single_segment() {
        let f = flash_with_root_child("a", 2);
        assert_eq!(resolve(&f, 0, "/a").unwrap().oid, 2);
    }

    #[test]
    fn trailing_slash_is_accepted() {
        let f = flash_with_root_child("a", 2);
        assert_eq!(resolve(&f, 0, "/a/").unwrap().oid, 2);
    }

    #[test]
    fn relative_path_is_rejected() {
        let f = flash_with_root_child("a", 2);
        assert!(matches!(resolve(&f, 0, "a"), Err(StfsError::RelativePath)));
    }

    #[test]
    fn missing_segment_is_not_found() {
        let f = flash_with_root_child("a", 2);
        assert!(matches!(resolve(&f, 0, "/b"), Err(StfsError::NotFound)));
    }

    #[test]
    fn split_parent_and_name_works() {
        let (parent, name) = split_parent_and_name("/a/b").unwrap();
        assert_eq!(parent, "/a");
        assert_eq!(name, "b");
        let (parent, name) = split_parent_and_name("/a").unwrap();
        assert_eq!(parent, "/");
        assert_eq!(name, "a");
    }
}

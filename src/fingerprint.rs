// Entry metadata fingerprinting.
//
// A fingerprint is a fixed-length digest over an entry's header fields and
// its PAX extended attributes. Two entries fingerprint equal iff all of
// those are identical. Keys are fed to the hasher in sorted order, so the
// digest never depends on field or attribute ordering.
//
// The digest is used for change detection only, not integrity, so a fast
// general-purpose hash (BLAKE3) is sufficient.

use std::collections::BTreeMap;
use std::fmt;

/// Length in bytes of a [`Fingerprint`].
pub const FINGERPRINT_LEN: usize = 32;

/// Fixed-length digest of one entry's metadata state.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// Compute the fingerprint of an entry metadata record.
    ///
    /// Deterministic pure function of the record's field set and extended
    /// attribute set.
    pub fn compute(meta: &EntryMeta) -> Self {
        let mut hasher = blake3::Hasher::new();

        let mut fields = meta.canonical_fields();
        fields.sort_by(|a, b| a.0.cmp(b.0));
        for (key, value) in fields {
            hasher.update(key.as_bytes());
            value.digest_into(&mut hasher);
        }

        // BTreeMap iterates in key order already.
        for (key, value) in &meta.pax {
            hasher.update(key.as_bytes());
            FieldValue::Bytes(value).digest_into(&mut hasher);
        }

        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0[..8] {
            write!(f, "{b:02x}")?;
        }
        write!(f, "..")
    }
}

/// Closed set of value kinds a metadata field may carry.
///
/// Dispatch over this enum is exhaustive: a field kind outside this set is
/// a compile error, never a silently skipped value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    /// Raw bytes, hashed as-is.
    Bytes(&'a [u8]),
    /// Unsigned integer, hashed as its minimal big-endian representation
    /// (zero hashes as a single zero byte).
    Int(u64),
    /// Text, hashed as UTF-8.
    Text(&'a str),
    /// Boolean, hashed as one byte.
    Bool(bool),
}

impl FieldValue<'_> {
    fn digest_into(&self, hasher: &mut blake3::Hasher) {
        match *self {
            FieldValue::Bytes(b) => {
                hasher.update(b);
            }
            FieldValue::Int(i) => {
                hasher.update(&encode_int(i));
            }
            FieldValue::Text(s) => {
                hasher.update(s.as_bytes());
            }
            FieldValue::Bool(b) => {
                hasher.update(&[b as u8]);
            }
        }
    }
}

/// Minimal big-endian encoding of an integer. Zero encodes as one zero byte.
fn encode_int(value: u64) -> Vec<u8> {
    if value == 0 {
        return vec![0];
    }
    let bytes = value.to_be_bytes();
    let skip = value.leading_zeros() as usize / 8;
    bytes[skip..].to_vec()
}

/// Kind of one archive member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Regular,
    Directory,
    Symlink,
    Hardlink,
    CharDevice,
    BlockDevice,
    Fifo,
    /// Anything else, carrying the raw tar type flag byte.
    Other(u8),
}

impl EntryKind {
    /// Stable single-byte code fed into the fingerprint.
    pub fn code(self) -> u8 {
        match self {
            EntryKind::Regular => b'0',
            EntryKind::Hardlink => b'1',
            EntryKind::Symlink => b'2',
            EntryKind::CharDevice => b'3',
            EntryKind::BlockDevice => b'4',
            EntryKind::Directory => b'5',
            EntryKind::Fifo => b'6',
            EntryKind::Other(raw) => raw,
        }
    }

    pub fn is_regular(self) -> bool {
        matches!(self, EntryKind::Regular)
    }
}

/// One archive member's metadata, immutable once decoded from a header.
///
/// Path, name, and link target are kept as raw bytes: tar headers carry no
/// encoding declaration, and hashing the bytes directly keeps fingerprints
/// independent of any decode step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMeta {
    pub path: Vec<u8>,
    pub kind: EntryKind,
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
    pub uname: Option<Vec<u8>>,
    pub gname: Option<Vec<u8>>,
    pub mtime: u64,
    pub size: u64,
    pub link_name: Option<Vec<u8>>,
    pub dev_major: Option<u32>,
    pub dev_minor: Option<u32>,
    /// PAX extended attributes, key-sorted by construction.
    pub pax: BTreeMap<String, Vec<u8>>,
}

impl EntryMeta {
    /// The canonical header fields that participate in the fingerprint.
    ///
    /// Absent optional fields contribute their neutral value (empty bytes,
    /// zero) so presence/absence of a default never flips the digest.
    fn canonical_fields(&self) -> Vec<(&'static str, FieldValue<'_>)> {
        vec![
            ("name", FieldValue::Bytes(&self.path)),
            ("type", FieldValue::Int(u64::from(self.kind.code()))),
            ("mode", FieldValue::Int(u64::from(self.mode))),
            ("uid", FieldValue::Int(self.uid)),
            ("gid", FieldValue::Int(self.gid)),
            (
                "uname",
                FieldValue::Bytes(self.uname.as_deref().unwrap_or(b"")),
            ),
            (
                "gname",
                FieldValue::Bytes(self.gname.as_deref().unwrap_or(b"")),
            ),
            ("mtime", FieldValue::Int(self.mtime)),
            ("size", FieldValue::Int(self.size)),
            (
                "linkname",
                FieldValue::Bytes(self.link_name.as_deref().unwrap_or(b"")),
            ),
            (
                "devmajor",
                FieldValue::Int(u64::from(self.dev_major.unwrap_or(0))),
            ),
            (
                "devminor",
                FieldValue::Int(u64::from(self.dev_minor.unwrap_or(0))),
            ),
        ]
    }

    /// A regular file record with everything else defaulted, for building
    /// records programmatically.
    pub fn regular(path: impl Into<Vec<u8>>, size: u64) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Regular,
            mode: 0o644,
            uid: 0,
            gid: 0,
            uname: None,
            gname: None,
            mtime: 0,
            size,
            link_name: None,
            dev_major: None,
            dev_minor: None,
            pax: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EntryMeta {
        let mut meta = EntryMeta::regular("etc/passwd", 1234);
        meta.mode = 0o600;
        meta.uid = 1000;
        meta.gid = 1000;
        meta.uname = Some(b"root".to_vec());
        meta.mtime = 1_700_000_000;
        meta
    }

    #[test]
    fn deterministic() {
        let meta = sample();
        assert_eq!(Fingerprint::compute(&meta), Fingerprint::compute(&meta));
    }

    #[test]
    fn field_change_changes_digest() {
        let meta = sample();
        let base = Fingerprint::compute(&meta);

        let mut changed = meta.clone();
        changed.mtime += 1;
        assert_ne!(base, Fingerprint::compute(&changed));

        let mut changed = meta.clone();
        changed.mode = 0o644;
        assert_ne!(base, Fingerprint::compute(&changed));

        let mut changed = meta.clone();
        changed.path = b"etc/shadow".to_vec();
        assert_ne!(base, Fingerprint::compute(&changed));
    }

    #[test]
    fn entry_kind_participates() {
        let file = sample();
        let mut link = file.clone();
        link.kind = EntryKind::Symlink;
        link.link_name = Some(b"target".to_vec());
        assert_ne!(Fingerprint::compute(&file), Fingerprint::compute(&link));

        // Kind alone, with identical remaining fields, is enough.
        let mut dir = file.clone();
        dir.kind = EntryKind::Directory;
        assert_ne!(Fingerprint::compute(&file), Fingerprint::compute(&dir));
    }

    #[test]
    fn pax_attributes_participate() {
        let plain = sample();
        let mut attributed = plain.clone();
        attributed
            .pax
            .insert("SCHILY.xattr.user.comment".into(), b"hello".to_vec());
        assert_ne!(
            Fingerprint::compute(&plain),
            Fingerprint::compute(&attributed)
        );

        let mut other_value = attributed.clone();
        other_value
            .pax
            .insert("SCHILY.xattr.user.comment".into(), b"world".to_vec());
        assert_ne!(
            Fingerprint::compute(&attributed),
            Fingerprint::compute(&other_value)
        );
    }

    #[test]
    fn pax_insertion_order_is_irrelevant() {
        let mut a = sample();
        a.pax.insert("alpha".into(), b"1".to_vec());
        a.pax.insert("beta".into(), b"2".to_vec());

        let mut b = sample();
        b.pax.insert("beta".into(), b"2".to_vec());
        b.pax.insert("alpha".into(), b"1".to_vec());

        assert_eq!(Fingerprint::compute(&a), Fingerprint::compute(&b));
    }

    #[test]
    fn minimal_big_endian_integers() {
        assert_eq!(encode_int(0), vec![0]);
        assert_eq!(encode_int(1), vec![1]);
        assert_eq!(encode_int(255), vec![255]);
        assert_eq!(encode_int(256), vec![1, 0]);
        assert_eq!(encode_int(0x0102_0304), vec![1, 2, 3, 4]);
        assert_eq!(encode_int(u64::MAX), vec![0xFF; 8]);
    }

    #[test]
    fn absent_optionals_match_neutral_values() {
        let implicit = sample();
        let mut explicit = implicit.clone();
        explicit.gname = Some(Vec::new());
        explicit.dev_major = Some(0);
        explicit.dev_minor = Some(0);
        assert_eq!(
            Fingerprint::compute(&implicit),
            Fingerprint::compute(&explicit)
        );
    }
}

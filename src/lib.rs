//! Tardelta: tarball delta generation.
//!
//! Computes a minimal delta archive holding only the entries of a derived
//! tarball that are new or changed relative to a base tarball, in derived
//! order. Entries are compared by a fingerprint over their metadata and
//! PAX extended attributes; changed regular files are copied whole (no
//! content diffing), streaming, with memory bounded by one fingerprint
//! per base entry.
//!
//! The crate provides:
//! - Metadata fingerprinting (`fingerprint`)
//! - A pluggable base index (`index`)
//! - The two-pass delta engine (`engine`)
//! - Tar read/write adapters with extension-derived compression
//!   (`archive`)
//! - An external-compressor pipe sink (`pipe`)
//! - An optional CLI (`cli` feature)
//!
//! # Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use tardelta::archive::{ArchiveReader, ArchiveWriter, DeltaSink, TarFormat, TextEncoding};
//! use tardelta::engine::{self, NoopObserver};
//! use tardelta::index::MemoryIndex;
//!
//! let mut base = ArchiveReader::open(Path::new("base.tar"), "base").unwrap();
//! let mut derived = ArchiveReader::open(Path::new("derived.tar"), "derived").unwrap();
//! let sink = DeltaSink::create(Path::new("delta.tar")).unwrap();
//! let mut writer = ArchiveWriter::new(sink, TarFormat::Pax, TextEncoding::Utf8);
//! let mut index = MemoryIndex::new();
//!
//! let stats = engine::delta(&mut base, &mut derived, &mut index, &mut writer, &mut NoopObserver)
//!     .unwrap();
//! writer.finish().unwrap().finish().unwrap();
//! println!("{} of {} entries changed", stats.delta_entries, stats.derived_entries);
//! ```

pub mod archive;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod index;
pub mod pipe;

#[cfg(feature = "cli")]
pub mod cli;

pub use error::DeltaError;
pub use fingerprint::{EntryKind, EntryMeta, Fingerprint};

#[cfg(test)]
pub(crate) mod tests_support {
    //! Shared helpers for unit tests: tiny in-memory tar archives.

    /// Build a tar stream of regular files with the given names and
    /// contents.
    pub fn tar_of(files: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, content) in files {
            let mut header = tar::Header::new_ustar();
            header.set_entry_type(tar::EntryType::Regular);
            header.set_mode(0o644);
            header.set_uid(0);
            header.set_gid(0);
            header.set_mtime(1_600_000_000);
            header.set_size(content.len() as u64);
            builder
                .append_data(&mut header, name, content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap()
    }
}

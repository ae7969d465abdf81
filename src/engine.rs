// Delta engine: ties fingerprinting and the base index to archive I/O.
//
// Two strictly sequential streaming passes:
//   - build_index: fingerprint every base entry (metadata only) into the
//     index
//   - write_delta: walk the derived archive in order, emitting entries
//     that are new or whose fingerprint differs
//
// The index must be fully populated before the delta pass starts; it is
// read-only from then on. Memory stays bounded by the index (one digest
// per base entry) plus one in-flight entry.

use std::io::Write;

use log::{debug, info, trace};

use crate::archive::{ArchiveReader, ArchiveWriter};
use crate::error::DeltaError;
use crate::fingerprint::Fingerprint;
use crate::index::BaseIndex;

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Entry counts accumulated over a delta run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeltaStats {
    /// Entries fingerprinted from the base archive.
    pub base_entries: u64,
    /// Entries visited in the derived archive.
    pub derived_entries: u64,
    /// Entries written to the delta archive.
    pub delta_entries: u64,
}

impl DeltaStats {
    /// Delta size as a percentage of derived entries (100·K/N; zero for an
    /// empty derived archive).
    pub fn ratio(&self) -> f64 {
        if self.derived_entries == 0 {
            0.0
        } else {
            100.0 * self.delta_entries as f64 / self.derived_entries as f64
        }
    }
}

// ---------------------------------------------------------------------------
// Progress observer
// ---------------------------------------------------------------------------

/// Pipeline phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    IndexBase,
    WriteDelta,
}

/// Injected progress callback. Receives phase transitions and entry
/// counts; the engine itself holds no ambient reporting state.
pub trait Observer {
    fn phase_started(&mut self, phase: Phase);
    fn phase_finished(&mut self, phase: Phase, entries: u64);
}

/// Observer that forwards progress to the `log` facade.
#[derive(Debug, Default)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn phase_started(&mut self, phase: Phase) {
        match phase {
            Phase::IndexBase => info!("digesting base entries..."),
            Phase::WriteDelta => info!("reading derived and writing delta..."),
        }
    }

    fn phase_finished(&mut self, phase: Phase, entries: u64) {
        match phase {
            Phase::IndexBase => info!("number of base entries: {entries}"),
            Phase::WriteDelta => info!("number of derived entries: {entries}"),
        }
    }
}

/// Observer that discards all progress.
#[derive(Debug, Default)]
pub struct NoopObserver;

impl Observer for NoopObserver {
    fn phase_started(&mut self, _phase: Phase) {}
    fn phase_finished(&mut self, _phase: Phase, _entries: u64) {}
}

// ---------------------------------------------------------------------------
// Base index build
// ---------------------------------------------------------------------------

/// Fingerprint every entry of the base archive into `index`, in archive
/// order, reading metadata only. Returns the entry count.
///
/// A malformed base archive aborts the build; the partially filled index
/// must not be used afterwards.
pub fn build_index(
    base: &mut ArchiveReader,
    index: &mut dyn BaseIndex,
    observer: &mut dyn Observer,
) -> Result<u64, DeltaError> {
    observer.phase_started(Phase::IndexBase);
    let mut count = 0u64;
    for entry in base.entries()? {
        let entry = entry?;
        let meta = entry.meta();
        trace!("indexing {}", String::from_utf8_lossy(&meta.path));
        index.insert(&meta.path, Fingerprint::compute(meta));
        count += 1;
    }
    observer.phase_finished(Phase::IndexBase, count);
    Ok(count)
}

// ---------------------------------------------------------------------------
// Delta pass
// ---------------------------------------------------------------------------

/// Walk the derived archive in order and write every new or changed entry
/// to `writer`, consulting the (complete, read-only) `index`.
///
/// An entry is unchanged iff its path is present in the index with an
/// identical fingerprint; unchanged entries are skipped entirely. Output
/// order is the changed subsequence of derived order. Regular-file
/// content streams through in bounded chunks; non-regular entries carry
/// no content.
pub fn write_delta<W: Write>(
    derived: &mut ArchiveReader,
    index: &dyn BaseIndex,
    writer: &mut ArchiveWriter<W>,
    observer: &mut dyn Observer,
) -> Result<DeltaStats, DeltaError> {
    observer.phase_started(Phase::WriteDelta);
    let mut stats = DeltaStats::default();

    for entry in derived.entries()? {
        let mut entry = entry?;
        stats.derived_entries += 1;

        let fingerprint = Fingerprint::compute(entry.meta());
        if index.get(&entry.meta().path) == Some(fingerprint) {
            trace!("unchanged: {}", String::from_utf8_lossy(&entry.meta().path));
            continue;
        }

        stats.delta_entries += 1;
        debug!("changed: {}", String::from_utf8_lossy(&entry.meta().path));

        let meta = entry.meta().clone();
        if meta.kind.is_regular() {
            writer.append(&meta, Some(&mut entry))?;
        } else {
            writer.append(&meta, None)?;
        }
    }

    observer.phase_finished(Phase::WriteDelta, stats.derived_entries);
    Ok(stats)
}

// ---------------------------------------------------------------------------
// Full pipeline
// ---------------------------------------------------------------------------

/// Run both phases back to back: index the base archive, then stream the
/// delta. The index build always completes before the first lookup.
pub fn delta<W: Write>(
    base: &mut ArchiveReader,
    derived: &mut ArchiveReader,
    index: &mut dyn BaseIndex,
    writer: &mut ArchiveWriter<W>,
    observer: &mut dyn Observer,
) -> Result<DeltaStats, DeltaError> {
    let base_entries = build_index(base, index, observer)?;
    let mut stats = write_delta(derived, index, writer, observer)?;
    stats.base_entries = base_entries;
    Ok(stats)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{TarFormat, TextEncoding};
    use crate::index::MemoryIndex;
    use crate::tests_support::tar_of;
    use std::io::Cursor;

    #[test]
    fn ratio_is_percentage_of_derived() {
        let stats = DeltaStats {
            base_entries: 10,
            derived_entries: 8,
            delta_entries: 2,
        };
        assert_eq!(stats.ratio(), 25.0);
    }

    #[test]
    fn ratio_of_empty_derived_is_zero() {
        assert_eq!(DeltaStats::default().ratio(), 0.0);
    }

    #[test]
    fn observer_receives_phases_in_order() {
        struct Recorder(Vec<(Phase, Option<u64>)>);
        impl Observer for Recorder {
            fn phase_started(&mut self, phase: Phase) {
                self.0.push((phase, None));
            }
            fn phase_finished(&mut self, phase: Phase, entries: u64) {
                self.0.push((phase, Some(entries)));
            }
        }

        let base = tar_of(&[("a", "1")]);
        let derived = tar_of(&[("a", "1"), ("b", "2")]);

        let mut base_reader = ArchiveReader::from_reader(Box::new(Cursor::new(base)), "base");
        let mut derived_reader =
            ArchiveReader::from_reader(Box::new(Cursor::new(derived)), "derived");
        let mut index = MemoryIndex::new();
        let mut writer = ArchiveWriter::new(Vec::new(), TarFormat::Pax, TextEncoding::Utf8);
        let mut recorder = Recorder(Vec::new());

        let stats = delta(
            &mut base_reader,
            &mut derived_reader,
            &mut index,
            &mut writer,
            &mut recorder,
        )
        .unwrap();

        assert_eq!(stats.base_entries, 1);
        assert_eq!(stats.derived_entries, 2);
        assert_eq!(stats.delta_entries, 1);
        assert_eq!(
            recorder.0,
            vec![
                (Phase::IndexBase, None),
                (Phase::IndexBase, Some(1)),
                (Phase::WriteDelta, None),
                (Phase::WriteDelta, Some(2)),
            ]
        );
    }

    #[test]
    fn index_build_never_reads_content() {
        // A base entry whose content is large still indexes fine; only
        // headers are decoded.
        let big = "x".repeat(64 * 1024);
        let base = tar_of(&[("big", big.as_str())]);
        let mut reader = ArchiveReader::from_reader(Box::new(Cursor::new(base)), "base");
        let mut index = MemoryIndex::new();
        let count = build_index(&mut reader, &mut index, &mut NoopObserver).unwrap();
        assert_eq!(count, 1);
        assert_eq!(index.len(), 1);
        assert!(index.get(b"big").is_some());
    }
}

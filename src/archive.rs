// Tar reader/writer adapters.
//
// This module is the boundary between the delta engine and the tar format:
// it decodes tar headers (plus PAX extended attributes) into `EntryMeta`
// records on the way in, and rebuilds headers for the configured format
// variant on the way out. Input and output compression is inferred from
// the file extension when no external compressor is in use.

use std::borrow::Cow;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use tar::{EntryType, Header};

use crate::error::DeltaError;
use crate::fingerprint::{EntryKind, EntryMeta};
use crate::pipe::CompressorPipe;

const BUF_SIZE: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Format variant
// ---------------------------------------------------------------------------

/// Tar format variant used when writing the delta archive.
///
/// Affects header layout and extended-attribute support only; the
/// comparison algorithm is identical for all three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum TarFormat {
    /// GNU tar header layout (long names via GNU extensions).
    Gnu,
    /// POSIX pax interchange format. The only variant that carries
    /// extended attributes on write.
    #[default]
    Pax,
    /// Plain POSIX ustar headers.
    Ustar,
}

// ---------------------------------------------------------------------------
// Text encoding
// ---------------------------------------------------------------------------

/// Character encoding applied to textual metadata (user/group names) when
/// reading and writing archives. Unencodable input is replaced, never an
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum TextEncoding {
    #[default]
    Utf8,
    Latin1,
}

impl TextEncoding {
    /// Decode raw header bytes to text. Invalid UTF-8 sequences are
    /// replaced with U+FFFD; Latin-1 decoding cannot fail.
    pub fn decode<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str> {
        match self {
            TextEncoding::Utf8 => String::from_utf8_lossy(bytes),
            TextEncoding::Latin1 => {
                if bytes.is_ascii() {
                    // ASCII is valid in both; borrow.
                    Cow::Borrowed(std::str::from_utf8(bytes).unwrap_or_default())
                } else {
                    Cow::Owned(bytes.iter().map(|&b| b as char).collect())
                }
            }
        }
    }

    /// Encode text to header bytes. Characters outside the target
    /// encoding are replaced with `?`.
    pub fn encode<'a>(&self, text: &'a str) -> Cow<'a, [u8]> {
        match self {
            TextEncoding::Utf8 => Cow::Borrowed(text.as_bytes()),
            TextEncoding::Latin1 => {
                if text.is_ascii() {
                    Cow::Borrowed(text.as_bytes())
                } else {
                    Cow::Owned(
                        text.chars()
                            .map(|c| if (c as u32) < 256 { c as u8 } else { b'?' })
                            .collect(),
                    )
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Extension-derived compression
// ---------------------------------------------------------------------------

/// Stream compression mode derived from a file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
    Xz,
}

impl Compression {
    /// Infer the compression mode from a path's extension.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("gz" | "tgz") => Compression::Gzip,
            Some("bz2" | "tbz2") => Compression::Bzip2,
            Some("xz" | "txz") => Compression::Xz,
            _ => Compression::None,
        }
    }

    fn unsupported(self) -> io::Error {
        io::Error::new(
            io::ErrorKind::Unsupported,
            format!("compression mode {self:?} not enabled in this build"),
        )
    }

    fn reader(self, file: File) -> io::Result<Box<dyn Read>> {
        let buffered = BufReader::with_capacity(BUF_SIZE, file);
        match self {
            Compression::None => Ok(Box::new(buffered)),
            #[cfg(feature = "gzip")]
            Compression::Gzip => Ok(Box::new(flate2::read::GzDecoder::new(buffered))),
            #[cfg(feature = "bzip2")]
            Compression::Bzip2 => Ok(Box::new(bzip2::read::BzDecoder::new(buffered))),
            #[cfg(feature = "xz")]
            Compression::Xz => Ok(Box::new(xz2::read::XzDecoder::new(buffered))),
            #[allow(unreachable_patterns)]
            other => Err(other.unsupported()),
        }
    }
}

// ---------------------------------------------------------------------------
// Archive reading
// ---------------------------------------------------------------------------

/// Streaming reader over one tar archive.
pub struct ArchiveReader {
    archive: tar::Archive<Box<dyn Read>>,
    label: &'static str,
}

impl ArchiveReader {
    /// Open a tar file for streaming, decompressing according to its
    /// extension. `label` names the archive in format errors ("base",
    /// "derived").
    pub fn open(path: &Path, label: &'static str) -> Result<Self, DeltaError> {
        let file = File::open(path)?;
        let reader = Compression::from_path(path).reader(file)?;
        Ok(Self::from_reader(reader, label))
    }

    /// Wrap an already-open byte stream.
    pub fn from_reader(reader: Box<dyn Read>, label: &'static str) -> Self {
        Self {
            archive: tar::Archive::new(reader),
            label,
        }
    }

    /// Iterate the archive's entries in stream order. Each entry's
    /// metadata is decoded eagerly; file content stays lazy.
    pub fn entries(&mut self) -> Result<Entries<'_>, DeltaError> {
        let label = self.label;
        let inner = self
            .archive
            .entries()
            .map_err(|e| DeltaError::format(label, e))?;
        Ok(Entries { inner, label })
    }
}

/// Iterator over archive entries.
pub struct Entries<'a> {
    inner: tar::Entries<'a, Box<dyn Read>>,
    label: &'static str,
}

impl<'a> Iterator for Entries<'a> {
    type Item = Result<ArchiveEntry<'a>, DeltaError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(DeltaError::format(self.label, e))),
            };
            // Metadata-carrier entries are folded into their successor by
            // the tar reader; never surface one as a member of its own.
            match entry.header().entry_type() {
                EntryType::XHeader
                | EntryType::XGlobalHeader
                | EntryType::GNULongName
                | EntryType::GNULongLink => continue,
                _ => {}
            }
            return Some(decode_entry(entry, self.label));
        }
    }
}

/// One archive member: decoded metadata plus its (lazy) content stream.
pub struct ArchiveEntry<'a> {
    meta: EntryMeta,
    entry: tar::Entry<'a, Box<dyn Read>>,
}

impl ArchiveEntry<'_> {
    pub fn meta(&self) -> &EntryMeta {
        &self.meta
    }

    pub fn into_meta(self) -> EntryMeta {
        self.meta
    }
}

impl Read for ArchiveEntry<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.entry.read(buf)
    }
}

fn decode_entry<'a>(
    mut entry: tar::Entry<'a, Box<dyn Read>>,
    label: &'static str,
) -> Result<ArchiveEntry<'a>, DeltaError> {
    let fmt = |e| DeltaError::format(label, e);

    let path = entry.path_bytes().into_owned();
    let link_name = entry.link_name_bytes().map(|b| b.into_owned());

    let mut pax = std::collections::BTreeMap::new();
    if let Some(extensions) = entry.pax_extensions().map_err(fmt)? {
        for extension in extensions {
            let extension = extension.map_err(fmt)?;
            pax.insert(
                String::from_utf8_lossy(extension.key_bytes()).into_owned(),
                extension.value_bytes().to_vec(),
            );
        }
    }

    let header = entry.header();
    let meta = EntryMeta {
        path,
        kind: entry_kind(header.entry_type()),
        mode: header.mode().map_err(fmt)?,
        uid: header.uid().map_err(fmt)?,
        gid: header.gid().map_err(fmt)?,
        uname: header.username_bytes().map(<[u8]>::to_vec),
        gname: header.groupname_bytes().map(<[u8]>::to_vec),
        mtime: header.mtime().map_err(fmt)?,
        // Entry::size honors a pax `size` record; the raw header field is
        // stale for entries whose length overflows it.
        size: entry.size(),
        link_name,
        dev_major: header.device_major().unwrap_or(None),
        dev_minor: header.device_minor().unwrap_or(None),
        pax,
    };

    Ok(ArchiveEntry { meta, entry })
}

fn entry_kind(entry_type: EntryType) -> EntryKind {
    match entry_type {
        EntryType::Regular => EntryKind::Regular,
        EntryType::Directory => EntryKind::Directory,
        EntryType::Symlink => EntryKind::Symlink,
        EntryType::Link => EntryKind::Hardlink,
        EntryType::Char => EntryKind::CharDevice,
        EntryType::Block => EntryKind::BlockDevice,
        EntryType::Fifo => EntryKind::Fifo,
        other => EntryKind::Other(other.as_byte()),
    }
}

// ---------------------------------------------------------------------------
// Archive writing
// ---------------------------------------------------------------------------

/// Streaming writer producing the delta archive.
pub struct ArchiveWriter<W: Write> {
    builder: tar::Builder<W>,
    format: TarFormat,
    encoding: TextEncoding,
}

impl<W: Write> ArchiveWriter<W> {
    pub fn new(sink: W, format: TarFormat, encoding: TextEncoding) -> Self {
        Self {
            builder: tar::Builder::new(sink),
            format,
            encoding,
        }
    }

    /// Append one entry, preserving all original metadata. Regular files
    /// stream their content through in bounded chunks; everything else is
    /// written with no content.
    pub fn append(
        &mut self,
        meta: &EntryMeta,
        content: Option<&mut dyn Read>,
    ) -> Result<(), DeltaError> {
        if self.format == TarFormat::Pax && !meta.pax.is_empty() {
            self.builder
                .append_pax_extensions(meta.pax.iter().map(|(k, v)| (k.as_str(), v.as_slice())))?;
        }

        let mut header = match self.format {
            TarFormat::Gnu => Header::new_gnu(),
            TarFormat::Pax | TarFormat::Ustar => Header::new_ustar(),
        };
        header.set_entry_type(EntryType::new(meta.kind.code()));
        header.set_mode(meta.mode);
        header.set_uid(meta.uid);
        header.set_gid(meta.gid);
        header.set_mtime(meta.mtime);
        if let Some(uname) = &meta.uname {
            let text = self.encoding.decode(uname);
            let name = self.encoding.encode(&text);
            if let Some(gnu) = header.as_gnu_mut() {
                write_name_field(&mut gnu.uname, &name);
            } else if let Some(ustar) = header.as_ustar_mut() {
                write_name_field(&mut ustar.uname, &name);
            }
        }
        if let Some(gname) = &meta.gname {
            let text = self.encoding.decode(gname);
            let name = self.encoding.encode(&text);
            if let Some(gnu) = header.as_gnu_mut() {
                write_name_field(&mut gnu.gname, &name);
            } else if let Some(ustar) = header.as_ustar_mut() {
                write_name_field(&mut ustar.gname, &name);
            }
        }
        if let Some(major) = meta.dev_major {
            header.set_device_major(major)?;
        }
        if let Some(minor) = meta.dev_minor {
            header.set_device_minor(minor)?;
        }

        let path = bytes_to_path(&meta.path);
        match (&meta.link_name, content) {
            (Some(target), _) if !meta.kind.is_regular() => {
                header.set_size(0);
                self.builder
                    .append_link(&mut header, path, bytes_to_path(target))?;
            }
            (_, Some(content)) if meta.kind.is_regular() => {
                header.set_size(meta.size);
                self.builder.append_data(&mut header, path, content)?;
            }
            _ => {
                header.set_size(0);
                self.builder.append_data(&mut header, path, io::empty())?;
            }
        }
        Ok(())
    }

    /// Finalize the archive (terminating zero blocks) and return the sink.
    pub fn finish(self) -> Result<W, DeltaError> {
        let mut sink = self.builder.into_inner()?;
        sink.flush()?;
        Ok(sink)
    }
}

// Raw uname/gname slot: NUL-terminated, over-long names truncated the way
// historic tar implementations do.
fn write_name_field(field: &mut [u8; 32], value: &[u8]) {
    *field = [0; 32];
    let len = value.len().min(field.len() - 1);
    field[..len].copy_from_slice(&value[..len]);
}

#[cfg(unix)]
fn bytes_to_path(bytes: &[u8]) -> Cow<'_, Path> {
    use std::os::unix::ffi::OsStrExt;
    Cow::Borrowed(Path::new(std::ffi::OsStr::from_bytes(bytes)))
}

#[cfg(not(unix))]
fn bytes_to_path(bytes: &[u8]) -> Cow<'_, Path> {
    match String::from_utf8_lossy(bytes) {
        Cow::Borrowed(s) => Cow::Borrowed(Path::new(s)),
        Cow::Owned(s) => Cow::Owned(std::path::PathBuf::from(s)),
    }
}

// ---------------------------------------------------------------------------
// Delta output sink
// ---------------------------------------------------------------------------

/// Byte sink for the delta archive: a plain file, an extension-selected
/// built-in encoder, or the stdin pipe of an external compressor.
pub enum DeltaSink {
    Plain(BufWriter<File>),
    #[cfg(feature = "gzip")]
    Gzip(flate2::write::GzEncoder<BufWriter<File>>),
    #[cfg(feature = "bzip2")]
    Bzip2(bzip2::write::BzEncoder<BufWriter<File>>),
    #[cfg(feature = "xz")]
    Xz(xz2::write::XzEncoder<BufWriter<File>>),
    Pipe(CompressorPipe),
}

impl DeltaSink {
    /// Create the destination file, selecting a built-in encoder from its
    /// extension.
    pub fn create(path: &Path) -> Result<Self, DeltaError> {
        let file = BufWriter::with_capacity(BUF_SIZE, File::create(path)?);
        let mode = Compression::from_path(path);
        match mode {
            Compression::None => Ok(DeltaSink::Plain(file)),
            #[cfg(feature = "gzip")]
            Compression::Gzip => Ok(DeltaSink::Gzip(flate2::write::GzEncoder::new(
                file,
                flate2::Compression::default(),
            ))),
            #[cfg(feature = "bzip2")]
            Compression::Bzip2 => Ok(DeltaSink::Bzip2(bzip2::write::BzEncoder::new(
                file,
                bzip2::Compression::default(),
            ))),
            #[cfg(feature = "xz")]
            Compression::Xz => Ok(DeltaSink::Xz(xz2::write::XzEncoder::new(file, 6))),
            #[allow(unreachable_patterns)]
            other => Err(DeltaError::Io(other.unsupported())),
        }
    }

    /// Finish the stream: flush encoder trailers or close the compressor
    /// pipe and reap the process.
    pub fn finish(self) -> Result<(), DeltaError> {
        match self {
            DeltaSink::Plain(mut file) => {
                file.flush()?;
                Ok(())
            }
            #[cfg(feature = "gzip")]
            DeltaSink::Gzip(encoder) => {
                encoder.finish()?.flush()?;
                Ok(())
            }
            #[cfg(feature = "bzip2")]
            DeltaSink::Bzip2(encoder) => {
                encoder.finish()?.flush()?;
                Ok(())
            }
            #[cfg(feature = "xz")]
            DeltaSink::Xz(encoder) => {
                encoder.finish()?.flush()?;
                Ok(())
            }
            DeltaSink::Pipe(pipe) => pipe.finish(),
        }
    }
}

impl Write for DeltaSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            DeltaSink::Plain(w) => w.write(buf),
            #[cfg(feature = "gzip")]
            DeltaSink::Gzip(w) => w.write(buf),
            #[cfg(feature = "bzip2")]
            DeltaSink::Bzip2(w) => w.write(buf),
            #[cfg(feature = "xz")]
            DeltaSink::Xz(w) => w.write(buf),
            DeltaSink::Pipe(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            DeltaSink::Plain(w) => w.flush(),
            #[cfg(feature = "gzip")]
            DeltaSink::Gzip(w) => w.flush(),
            #[cfg(feature = "bzip2")]
            DeltaSink::Bzip2(w) => w.flush(),
            #[cfg(feature = "xz")]
            DeltaSink::Xz(w) => w.flush(),
            DeltaSink::Pipe(w) => w.flush(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

// External compressor pipe adapter.
//
// Wraps the stdin of a spawned compressor process as the delta archive's
// byte sink, with the process's stdout redirected to the destination file.
// Back-pressure from the pipe naturally throttles the delta writer to the
// compressor's consumption rate.

use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::process::{Child, ChildStdin, Command, Stdio};

use crate::error::DeltaError;

/// Writable stream feeding an external compressor's stdin.
///
/// Also implements [`Seek`], but only as a current-position query: the
/// pipe has no true offset, so the reported position is the running count
/// of bytes written (zero at stream start). That is exactly the contract
/// archive writers that query their position once, at open time, rely on;
/// a writer seeking mid-stream is not supported.
pub struct CompressorPipe {
    child: Child,
    stdin: Option<ChildStdin>,
    command: String,
    position: u64,
}

impl CompressorPipe {
    /// Shell-split `command`, spawn it with stdin piped and stdout
    /// connected to `destination`.
    pub fn spawn(command: &str, destination: File) -> Result<Self, DeltaError> {
        let argv = shlex::split(command)
            .filter(|argv| !argv.is_empty())
            .ok_or_else(|| {
                DeltaError::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("invalid compressor command: {command}"),
                ))
            })?;

        log::debug!("spawning compressor: {argv:?}");
        let mut child = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::from(destination))
            .spawn()?;
        let stdin = child.stdin.take();

        Ok(Self {
            child,
            stdin,
            command: command.to_string(),
            position: 0,
        })
    }

    /// Close the write end (signaling end-of-input), then reap the
    /// process. A non-zero exit is fatal and reported with the command
    /// line used.
    pub fn finish(mut self) -> Result<(), DeltaError> {
        // Drop stdin first so the compressor reaches EOF and exits.
        drop(self.stdin.take());
        let status = self.child.wait()?;
        if status.success() {
            Ok(())
        } else {
            Err(DeltaError::Compression {
                command: self.command,
                code: status.code().unwrap_or(-1),
            })
        }
    }
}

impl Write for CompressorPipe {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "compressor stdin closed"))?;
        let written = stdin.write(buf)?;
        self.position += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.stdin.as_mut() {
            Some(stdin) => stdin.flush(),
            None => Ok(()),
        }
    }
}

impl Seek for CompressorPipe {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            // Position query only; never an actual reposition.
            SeekFrom::Current(0) => Ok(self.position),
            SeekFrom::Start(offset) if offset == self.position => Ok(self.position),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "compressor pipe cannot seek",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_out(name: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        (dir, path)
    }

    #[test]
    fn passthrough_compressor_writes_destination() {
        let (dir, path) = temp_out("out.bin");
        let dest = File::create(&path).unwrap();

        let mut pipe = CompressorPipe::spawn("cat", dest).unwrap();
        pipe.write_all(b"delta bytes").unwrap();
        pipe.finish().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"delta bytes");
        drop(dir);
    }

    #[test]
    fn position_query_contract() {
        let (dir, path) = temp_out("out.bin");
        let dest = File::create(&path).unwrap();

        let mut pipe = CompressorPipe::spawn("cat", dest).unwrap();
        // Zero at stream start, before any write.
        assert_eq!(pipe.seek(SeekFrom::Current(0)).unwrap(), 0);
        pipe.write_all(b"12345").unwrap();
        assert_eq!(pipe.seek(SeekFrom::Current(0)).unwrap(), 5);
        // Anything that would actually move the cursor is refused.
        assert!(pipe.seek(SeekFrom::Start(0)).is_err());
        assert!(pipe.seek(SeekFrom::End(0)).is_err());
        pipe.finish().unwrap();
        drop(dir);
    }

    #[test]
    fn nonzero_exit_is_compression_error() {
        let (dir, path) = temp_out("out.bin");
        let dest = File::create(&path).unwrap();

        let pipe = CompressorPipe::spawn("sh -c 'exit 7'", dest).unwrap();
        let err = pipe.finish().unwrap_err();
        match err {
            DeltaError::Compression { command, code } => {
                assert_eq!(command, "sh -c 'exit 7'");
                assert_eq!(code, 7);
            }
            other => panic!("expected Compression error, got: {other}"),
        }
        drop(dir);
    }

    #[test]
    fn bad_command_string_is_rejected() {
        let (dir, path) = temp_out("out.bin");
        let dest = File::create(&path).unwrap();
        // Unbalanced quote fails shell splitting.
        assert!(CompressorPipe::spawn("gzip '", dest).is_err());
        drop(dir);
    }
}

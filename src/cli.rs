// Command-line interface for tardelta.
//
// Three positional paths (base, derived, delta output) plus flags for the
// external compressor, text encoding, tar format variant, and repeatable
// verbosity. Exit code 0 on success, 1 on any failure including a failing
// compressor.

use std::fs::File;
use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Parser, ValueHint};
use log::{error, info, LevelFilter};

use crate::archive::{ArchiveReader, ArchiveWriter, DeltaSink, TarFormat, TextEncoding};
use crate::engine::{self, DeltaStats, LogObserver};
use crate::error::DeltaError;
use crate::index::MemoryIndex;
use crate::pipe::CompressorPipe;

/// Generate a tarball of differences between two tarballs.
#[derive(Parser, Debug)]
#[command(name = "tardelta", version, about = "Generate a tarball of differences between two tarballs")]
struct Cli {
    /// Base input tar file.
    #[arg(value_name = "BASE", value_hint = ValueHint::FilePath)]
    base: PathBuf,

    /// Derived input tar file.
    #[arg(value_name = "DERIV", value_hint = ValueHint::FilePath)]
    derived: PathBuf,

    /// Delta output tar file.
    #[arg(value_name = "DELTA", value_hint = ValueHint::FilePath)]
    delta: PathBuf,

    /// Use the specified command for compression via stdio.
    #[arg(long, value_name = "COMMAND")]
    compressor: Option<String>,

    /// Tar file text encoding.
    #[arg(long, value_enum, default_value_t = TextEncoding::Utf8)]
    encoding: TextEncoding,

    /// Tar format variant.
    #[arg(long, value_enum, default_value_t = TarFormat::Pax)]
    format: TarFormat,

    /// Verbose logging (each occurrence increases verbosity).
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,

    /// Output stats as JSON to stderr.
    #[arg(long = "json")]
    json_output: bool,
}

fn run_delta(cli: &Cli) -> Result<DeltaStats, DeltaError> {
    let mut base = ArchiveReader::open(&cli.base, "base")?;
    let mut derived = ArchiveReader::open(&cli.derived, "derived")?;

    // With an external compressor the destination extension is ignored;
    // the raw tar stream goes to the process's stdin instead.
    let sink = match &cli.compressor {
        Some(command) => {
            let destination = File::create(&cli.delta)?;
            DeltaSink::Pipe(CompressorPipe::spawn(command, destination)?)
        }
        None => DeltaSink::create(&cli.delta)?,
    };

    let mut writer = ArchiveWriter::new(sink, cli.format, cli.encoding);
    let mut index = MemoryIndex::new();
    let mut observer = LogObserver;

    let stats = engine::delta(
        &mut base,
        &mut derived,
        &mut index,
        &mut writer,
        &mut observer,
    )?;

    writer.finish()?.finish()?;
    Ok(stats)
}

/// Main CLI entry point. Parses arguments, configures logging, runs the
/// delta pipeline.
pub fn run() -> ! {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::from_env(env_logger::Env::default())
        .filter_level(level)
        .format_timestamp(None)
        .format_target(false)
        .init();

    match run_delta(&cli) {
        Ok(stats) => {
            info!(
                "number of delta entries: {} ({:.0}% of derived entries)",
                stats.delta_entries,
                stats.ratio()
            );
            if cli.json_output {
                let json = serde_json::json!({
                    "base_entries": stats.base_entries,
                    "derived_entries": stats.derived_entries,
                    "delta_entries": stats.delta_entries,
                    "ratio": stats.ratio(),
                });
                eprintln!("{json}");
            }
            process::exit(0);
        }
        Err(e) => {
            error!("{e}");
            eprintln!("tardelta: {e}");
            process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let argv: Vec<String> = std::iter::once("tardelta".to_string())
            .chain(args.iter().map(|s| s.to_string()))
            .collect();
        Cli::try_parse_from(argv).expect("cli parse failed")
    }

    #[test]
    fn positional_paths_map() {
        let cli = parse(&["base.tar", "deriv.tar", "delta.tar"]);
        assert_eq!(cli.base, PathBuf::from("base.tar"));
        assert_eq!(cli.derived, PathBuf::from("deriv.tar"));
        assert_eq!(cli.delta, PathBuf::from("delta.tar"));
        assert_eq!(cli.format, TarFormat::Pax);
        assert_eq!(cli.encoding, TextEncoding::Utf8);
        assert!(cli.compressor.is_none());
    }

    #[test]
    fn flags_parse() {
        let cli = parse(&[
            "base.tar",
            "deriv.tar",
            "delta.tar",
            "--compressor",
            "zstd -19",
            "--format",
            "gnu",
            "--encoding",
            "latin1",
            "-vv",
            "--json",
        ]);
        assert_eq!(cli.compressor.as_deref(), Some("zstd -19"));
        assert_eq!(cli.format, TarFormat::Gnu);
        assert_eq!(cli.encoding, TextEncoding::Latin1);
        assert_eq!(cli.verbose, 2);
        assert!(cli.json_output);
    }

    #[test]
    fn missing_positionals_fail() {
        let argv = ["tardelta", "base.tar"].map(str::to_string);
        assert!(Cli::try_parse_from(argv).is_err());
    }
}

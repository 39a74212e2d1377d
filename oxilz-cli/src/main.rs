//! oxilz - a pure Rust lzip compressor/decompressor.
//!
//! Command-line interface in the style of gzip and lzip: compression is
//! the default operation, `-d` decompresses, `-t` tests, `-l` lists.
//!
//! Exit status: 0 for a normal exit, 1 for environmental problems (file
//! not found, invalid options, I/O errors), 2 for a corrupt or invalid
//! input file, 3 for an internal consistency error.

mod driver;
mod list;
mod numtools;

use clap::{ArgAction, CommandFactory, Parser};
use clap_complete::Shell;
use driver::{Config, Mode};
use oxilz_stream::{
    CompressionOptions, DecodeOptions, MAX_MEMBER_SIZE, MAX_VOLUME_SIZE, MIN_MEMBER_SIZE,
    MIN_VOLUME_SIZE,
};
use oxilz_lzma::{MAX_MATCH_LEN, MIN_MATCH_LEN_LIMIT};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "oxilz")]
#[command(version, about = "Pure Rust lzip (LZMA) compressor and decompressor")]
#[command(after_help = "If no file names are given, or if a file is '-', oxilz compresses or\n\
decompresses from standard input to standard output.\n\
Numbers may be followed by a multiplier: k = 10^3, Ki = 2^10, M = 10^6,\n\
Mi = 2^20, G = 10^9, Gi = 2^30, etc. Dictionary sizes 12 to 29 are\n\
interpreted as powers of two.\n\n\
Exit status: 0 for a normal exit, 1 for environmental problems, 2 to\n\
indicate a corrupt or invalid input file, 3 for an internal error.")]
struct Cli {
    /// Exit with error status if trailing data
    #[arg(short = 'a', long = "trailing-error")]
    trailing_error: bool,

    /// Set member size limit in bytes
    #[arg(short = 'b', long = "member-size", value_name = "BYTES")]
    member_size: Option<String>,

    /// Write to standard output, keep input files
    #[arg(short = 'c', long = "stdout")]
    to_stdout: bool,

    /// Decompress
    #[arg(short = 'd', long, group = "operation")]
    decompress: bool,

    /// Overwrite existing output files
    #[arg(short = 'f', long)]
    force: bool,

    /// Force re-compression of compressed files
    #[arg(short = 'F', long = "recompress")]
    recompress: bool,

    /// Keep (don't delete) input files
    #[arg(short = 'k', long)]
    keep: bool,

    /// Print (un)compressed file sizes
    #[arg(short = 'l', long, group = "operation")]
    list: bool,

    /// Print the listing as JSON
    #[arg(long, requires = "list")]
    json: bool,

    /// Set match length limit in bytes [36]
    #[arg(short = 'm', long = "match-length", value_name = "BYTES")]
    match_length: Option<String>,

    /// Set number of threads; accepted for compatibility, single-threaded
    #[arg(short = 'n', long = "threads", value_name = "N", hide = true)]
    threads: Option<String>,

    /// Write output to FILE, keep input files
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    output: Option<PathBuf>,

    /// Suppress all messages
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Set dictionary size limit in bytes [8 MiB]
    #[arg(short = 's', long = "dictionary-size", value_name = "BYTES")]
    dictionary_size: Option<String>,

    /// Set volume size limit in bytes
    #[arg(short = 'S', long = "volume-size", value_name = "BYTES")]
    volume_size: Option<String>,

    /// Test compressed file integrity
    #[arg(short = 't', long, group = "operation")]
    test: bool,

    /// Be verbose (a second -v gives more)
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,

    /// Allow trailing data seeming corrupt header
    #[arg(long = "loose-trailing")]
    loose_trailing: bool,

    /// Compression level 0 (fastest)
    #[arg(short = '0', long = "fast", group = "level")]
    level0: bool,
    #[arg(short = '1', hide = true, group = "level")]
    level1: bool,
    #[arg(short = '2', hide = true, group = "level")]
    level2: bool,
    #[arg(short = '3', hide = true, group = "level")]
    level3: bool,
    #[arg(short = '4', hide = true, group = "level")]
    level4: bool,
    #[arg(short = '5', hide = true, group = "level")]
    level5: bool,
    #[arg(short = '6', hide = true, group = "level")]
    level6: bool,
    #[arg(short = '7', hide = true, group = "level")]
    level7: bool,
    #[arg(short = '8', hide = true, group = "level")]
    level8: bool,
    /// Compression level 9 (best)
    #[arg(short = '9', long = "best", group = "level")]
    level9: bool,

    /// Generate shell completions and exit
    #[arg(long = "completion", value_enum, value_name = "SHELL", hide = true)]
    completion: Option<Shell>,

    /// Files to process ('-' means standard input)
    files: Vec<String>,
}

impl Cli {
    fn level(&self) -> u8 {
        let flags = [
            self.level0,
            self.level1,
            self.level2,
            self.level3,
            self.level4,
            self.level5,
            self.level6,
            self.level7,
            self.level8,
            self.level9,
        ];
        flags
            .iter()
            .rposition(|&set| set)
            .map(|i| i as u8)
            .unwrap_or(6)
    }
}

fn fail(msg: &str) -> ExitCode {
    eprintln!("oxilz: {msg}");
    eprintln!("Try 'oxilz --help' for more information.");
    ExitCode::from(1)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(shell) = cli.completion {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "oxilz", &mut std::io::stdout());
        return ExitCode::SUCCESS;
    }

    let verbosity: i8 = if cli.quiet { -1 } else { cli.verbose as i8 };

    let mut options = CompressionOptions::from_level(cli.level());
    if let Some(arg) = &cli.dictionary_size {
        match numtools::get_dict_size(arg) {
            Ok(size) => {
                options.dict_size = size;
                options.fast = false;
            }
            Err(msg) => return fail(&msg),
        }
    }
    if let Some(arg) = &cli.match_length {
        match numtools::getnum(arg, MIN_MATCH_LEN_LIMIT as u64, MAX_MATCH_LEN as u64) {
            Ok(len) => {
                options.match_len_limit = len as usize;
                options.fast = false;
            }
            Err(msg) => return fail(&msg),
        }
    }

    let member_size = match &cli.member_size {
        Some(arg) => match numtools::getnum(arg, MIN_MEMBER_SIZE, MAX_MEMBER_SIZE) {
            Ok(size) => size,
            Err(msg) => return fail(&msg),
        },
        None => MAX_MEMBER_SIZE,
    };
    let volume_size = match &cli.volume_size {
        Some(arg) => match numtools::getnum(arg, MIN_VOLUME_SIZE, MAX_VOLUME_SIZE) {
            Ok(size) => size,
            Err(msg) => return fail(&msg),
        },
        None => 0,
    };
    // The codec is single-threaded; '-n' parses for lzip compatibility.
    if let Some(arg) = &cli.threads {
        if let Err(msg) = numtools::getnum(arg, 1, 1 << 16) {
            return fail(&msg);
        }
    }

    let mode = if cli.decompress {
        Mode::Decompress
    } else if cli.test {
        Mode::Test
    } else {
        Mode::Compress
    };

    let files = if cli.files.is_empty() {
        vec!["-".to_string()]
    } else {
        cli.files.clone()
    };

    if cli.list {
        return exit_code(list::list_files(&files, cli.json, verbosity));
    }

    if cli.output.is_some() && files.len() > 1 {
        return fail("Only one file can be processed when using '-o'.");
    }

    if volume_size > 0 {
        if mode != Mode::Compress {
            return fail("Option '-S' is only valid when compressing.");
        }
        if cli.to_stdout {
            return fail("Can't use '-S' when writing to standard output.");
        }
        if cli.output.is_none() && files.iter().any(|f| f == "-") {
            return fail("Can't use '-S' when reading from standard input without '-o'.");
        }
    }

    let cfg = Config {
        mode,
        options,
        member_size,
        volume_size,
        to_stdout: cli.to_stdout,
        output: cli.output.clone(),
        force: cli.force,
        keep: cli.keep || cli.to_stdout || cli.output.is_some(),
        recompress: cli.recompress,
        decode_options: DecodeOptions {
            ignore_trailing: !cli.trailing_error,
            loose_trailing: cli.loose_trailing,
        },
        verbosity,
    };

    driver::install_signal_handler();
    exit_code(driver::run(&cfg, &files))
}

fn exit_code(status: i32) -> ExitCode {
    ExitCode::from(status.clamp(0, 255) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("oxilz").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_default_level() {
        assert_eq!(parse(&[]).level(), 6);
    }

    #[test]
    fn test_level_flags() {
        assert_eq!(parse(&["-0"]).level(), 0);
        assert_eq!(parse(&["--fast"]).level(), 0);
        assert_eq!(parse(&["-9"]).level(), 9);
        assert_eq!(parse(&["--best"]).level(), 9);
        assert_eq!(parse(&["-3"]).level(), 3);
    }

    #[test]
    fn test_operations_are_exclusive() {
        assert!(
            Cli::try_parse_from(["oxilz", "-d", "-t"]).is_err(),
            "only one operation can be specified"
        );
        assert!(Cli::try_parse_from(["oxilz", "-l", "-d"]).is_err());
    }

    #[test]
    fn test_threads_option_is_accepted() {
        let cli = parse(&["-n", "4", "file"]);
        assert_eq!(cli.threads.as_deref(), Some("4"));
        assert_eq!(cli.files, vec!["file"]);
    }

    #[test]
    fn test_trailing_policy_flags() {
        let cli = parse(&["-a", "--loose-trailing"]);
        assert!(cli.trailing_error);
        assert!(cli.loose_trailing);
    }
}

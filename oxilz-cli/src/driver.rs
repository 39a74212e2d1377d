//! Per-file driver: opens inputs, derives output names, runs the codec,
//! replicates metadata, rotates volume files, and cleans up partial
//! output on failure or interrupt.

use oxilz_core::error::LzipError;
use oxilz_stream::{CompressionOptions, DecodeOptions, MemberEncoder, decode_stream};
use std::fs::{self, File};
use std::io::{self, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Output file to delete if the process is interrupted or fails.
static DELETE_ON_INTERRUPT: Mutex<Option<PathBuf>> = Mutex::new(None);

const PROGRAM_NAME: &str = "oxilz";

/// What to do with the inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Compress (the default).
    Compress,
    /// Decompress.
    Decompress,
    /// Decode and verify without writing output.
    Test,
}

/// Resolved command-line configuration.
#[derive(Debug)]
pub struct Config {
    /// Operation to perform.
    pub mode: Mode,
    /// Codec options for compression.
    pub options: CompressionOptions,
    /// Member size limit.
    pub member_size: u64,
    /// Volume size limit; 0 disables volume splitting.
    pub volume_size: u64,
    /// Write to standard output.
    pub to_stdout: bool,
    /// Explicit output file name.
    pub output: Option<PathBuf>,
    /// Overwrite existing output files.
    pub force: bool,
    /// Keep input files.
    pub keep: bool,
    /// Compress files that already have a `.lz` suffix.
    pub recompress: bool,
    /// Trailing-data policy for decoding.
    pub decode_options: DecodeOptions,
    /// -1 quiet, 0 normal, 1.. verbose.
    pub verbosity: i8,
}

/// Register the interrupt handler that removes the current partial
/// output file. Call once at startup.
pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(|| {
        if let Ok(mut guard) = DELETE_ON_INTERRUPT.lock() {
            if let Some(path) = guard.take() {
                let _ = fs::remove_file(path);
            }
        }
        eprintln!("{PROGRAM_NAME}: Control-C or similar caught, quitting.");
        std::process::exit(1);
    });
}

fn set_delete_on_interrupt(path: Option<PathBuf>) {
    if let Ok(mut guard) = DELETE_ON_INTERRUPT.lock() {
        *guard = path;
    }
}

pub(crate) fn show_error(msg: &str, verbosity: i8) {
    if verbosity >= 0 {
        eprintln!("{PROGRAM_NAME}: {msg}");
    }
}

pub(crate) fn show_file_error(name: &str, msg: &str, verbosity: i8) {
    if verbosity >= 0 {
        eprintln!("{PROGRAM_NAME}: {name}: {msg}");
    }
}

/// Known suffix substitutions for decompression.
const KNOWN_EXTENSIONS: [(&str, &str); 2] = [(".lz", ""), (".tlz", ".tar")];

fn extension_index(name: &str) -> Option<usize> {
    KNOWN_EXTENSIONS
        .iter()
        .position(|(from, _)| name.len() > from.len() && name.ends_with(from))
}

/// Output name for compression: `name[00001][.lz]`. One-to-one outputs
/// always get the suffix; an explicit `-o` name is kept as given unless
/// volume counters are in play.
pub(crate) fn compressed_name(name: &str, multifile: bool, force_ext: bool) -> String {
    let mut out = String::from(name);
    if multifile {
        out.push_str("00001");
    }
    if force_ext || multifile {
        out.push_str(".lz");
    }
    out
}

/// Output name for decompression: strip the known suffix, or add `.out`.
pub(crate) fn decompressed_name(name: &str, verbosity: i8) -> String {
    if let Some(index) = extension_index(name) {
        let (from, to) = KNOWN_EXTENSIONS[index];
        let mut out = String::from(&name[..name.len() - from.len()]);
        out.push_str(to);
        return out;
    }
    let out = format!("{name}.out");
    if verbosity >= 1 {
        eprintln!("{PROGRAM_NAME}: Can't guess original name for '{name}' -- using '{out}'");
    }
    out
}

/// Advance the 5-digit volume counter embedded before the suffix:
/// `foo00001.lz` becomes `foo00002.lz`.
pub(crate) fn next_volume_name(name: &str) -> Option<String> {
    let stem = name.strip_suffix(".lz")?;
    if stem.len() < 5 {
        return None;
    }
    let mut bytes = stem.as_bytes().to_vec();
    let digits = bytes.len() - 5..bytes.len();
    if !bytes[digits.clone()].iter().all(u8::is_ascii_digit) {
        return None;
    }
    for i in digits.rev() {
        if bytes[i] < b'9' {
            bytes[i] += 1;
            let mut out = String::from_utf8(bytes).ok()?;
            out.push_str(".lz");
            return Some(out);
        }
        bytes[i] = b'0';
    }
    None
}

fn open_output(path: &Path, force: bool, verbosity: i8) -> Option<File> {
    let result = if force {
        File::create(path)
    } else {
        File::create_new(path)
    };
    match result {
        Ok(file) => {
            set_delete_on_interrupt(Some(path.to_path_buf()));
            Some(file)
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            show_file_error(
                &path.display().to_string(),
                "Output file already exists, skipping.",
                verbosity,
            );
            None
        }
        Err(e) => {
            show_file_error(
                &path.display().to_string(),
                &format!("Can't create output file: {e}"),
                verbosity,
            );
            None
        }
    }
}

/// Copy permissions and times from the input to the finished output.
fn replicate_metadata(input: &Path, output: &Path, verbosity: i8) {
    let Ok(meta) = fs::metadata(input) else {
        return;
    };
    let mut warned = false;
    if fs::set_permissions(output, meta.permissions()).is_err() {
        warned = true;
    }
    let mtime = filetime::FileTime::from_last_modification_time(&meta);
    let atime = filetime::FileTime::from_last_access_time(&meta);
    if filetime::set_file_times(output, atime, mtime).is_err() {
        warned = true;
    }
    if warned && verbosity >= 1 {
        show_error("Can't change output file attributes.", verbosity);
    }
}

fn error_exit_code(err: &LzipError) -> i32 {
    err.exit_code()
}

enum Sink {
    File(File),
    Stdout(io::Stdout),
    Null,
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::File(f) => f.write(buf),
            Self::Stdout(s) => s.write(buf),
            Self::Null => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::File(f) => f.flush(),
            Self::Stdout(s) => s.flush(),
            Self::Null => Ok(()),
        }
    }
}

fn open_input(name: &str, verbosity: i8) -> Option<Box<dyn Read>> {
    if name == "-" {
        return Some(Box::new(io::stdin()));
    }
    match File::open(name) {
        Ok(file) => Some(Box::new(file)),
        Err(e) => {
            show_file_error(name, &format!("Can't open input file: {e}"), verbosity);
            None
        }
    }
}

fn compress_one(cfg: &Config, name: &str) -> i32 {
    let one_to_one = !cfg.to_stdout && cfg.output.is_none() && name != "-";
    if one_to_one && !cfg.recompress && extension_index(name).is_some() {
        show_file_error(name, "Input file already has '.lz' suffix.", cfg.verbosity);
        return 1;
    }

    let Some(reader) = open_input(name, cfg.verbosity) else {
        return 1;
    };

    let multifile = cfg.volume_size > 0;
    let mut out_name: Option<String> = if cfg.to_stdout {
        None
    } else if let Some(path) = &cfg.output {
        Some(compressed_name(&path.display().to_string(), multifile, false))
    } else if one_to_one {
        Some(compressed_name(name, multifile, true))
    } else {
        // Reading stdin without -c or -o writes next to nothing useful;
        // fall back to stdout like lzip does.
        None
    };

    let sink = match &out_name {
        Some(path) => match open_output(Path::new(path), cfg.force, cfg.verbosity) {
            Some(file) => Sink::File(file),
            None => return 1,
        },
        None => {
            let stdout = io::stdout();
            if stdout.is_terminal() {
                show_error("I won't write compressed data to a terminal.", cfg.verbosity);
                return 1;
            }
            Sink::Stdout(stdout)
        }
    };

    let result = (|| -> Result<(u64, u64), LzipError> {
        let mut encoder = MemberEncoder::new(reader, sink, cfg.options)?;
        let mut in_size = 0u64;
        let mut out_size = 0u64;
        let mut partial_volume = 0u64;
        loop {
            let member_limit = if cfg.volume_size > 0 {
                cfg.member_size.min(cfg.volume_size - partial_volume)
            } else {
                cfg.member_size
            };
            let member = encoder.encode_member(member_limit)?;
            in_size += member.in_size;
            out_size += member.out_size;
            if encoder.data_finished() {
                break;
            }
            if cfg.volume_size > 0 {
                partial_volume += member.out_size;
                if partial_volume >= cfg.volume_size - oxilz_lzma::MIN_DICT_SIZE as u64 {
                    partial_volume = 0;
                    let current = out_name.take().expect("volumes need named output");
                    if name != "-" {
                        replicate_metadata(Path::new(name), Path::new(&current), cfg.verbosity);
                    }
                    let next = next_volume_name(&current).ok_or_else(|| {
                        LzipError::Io(io::Error::other("too many volume files"))
                    })?;
                    let file = open_output(Path::new(&next), cfg.force, cfg.verbosity)
                        .ok_or_else(|| LzipError::Io(io::Error::other("can't open volume")))?;
                    out_name = Some(next);
                    encoder.swap_sink(Sink::File(file))?;
                }
            }
            encoder.reset_member()?;
        }
        Ok((in_size, out_size))
    })();

    match result {
        Ok((in_size, out_size)) => {
            if cfg.verbosity >= 1 {
                if in_size == 0 || out_size == 0 {
                    eprintln!("  {name}: no data compressed.");
                } else {
                    let ratio = in_size as f64 / out_size as f64;
                    let pct = 100.0 * out_size as f64 / in_size as f64;
                    eprintln!(
                        "  {name}: {ratio:6.3}:1, {pct:5.2}% ratio, {:5.2}% saved, {in_size} in, {out_size} out.",
                        100.0 - pct
                    );
                }
            }
            if let Some(path) = &out_name {
                if name != "-" {
                    replicate_metadata(Path::new(name), Path::new(path), cfg.verbosity);
                }
                set_delete_on_interrupt(None);
                if name != "-" && !cfg.keep && cfg.volume_size == 0 {
                    let _ = fs::remove_file(name);
                }
            }
            0
        }
        Err(err) => {
            show_file_error(name, &err.to_string(), cfg.verbosity);
            if let Ok(mut guard) = DELETE_ON_INTERRUPT.lock() {
                if let Some(path) = guard.take() {
                    let _ = fs::remove_file(path);
                }
            }
            error_exit_code(&err)
        }
    }
}

fn decompress_one(cfg: &Config, name: &str, testing: bool) -> i32 {
    let Some(reader) = open_input(name, cfg.verbosity) else {
        return 1;
    };
    if name == "-" && io::stdin().is_terminal() {
        show_error("I won't read compressed data from a terminal.", cfg.verbosity);
        return 1;
    }

    let one_to_one = !cfg.to_stdout && cfg.output.is_none() && name != "-";
    let out_name: Option<String> = if testing || cfg.to_stdout {
        None
    } else if let Some(path) = &cfg.output {
        Some(path.display().to_string())
    } else if name == "-" {
        None
    } else {
        Some(decompressed_name(name, cfg.verbosity))
    };

    let mut sink = if testing {
        Sink::Null
    } else {
        match &out_name {
            Some(path) => match open_output(Path::new(path), cfg.force, cfg.verbosity) {
                Some(file) => Sink::File(file),
                None => return 1,
            },
            None => Sink::Stdout(io::stdout()),
        }
    };

    match decode_stream(reader, &mut sink, cfg.decode_options) {
        Ok(stats) => {
            if stats.trailing_data && cfg.verbosity >= 1 {
                show_file_error(name, "Ignoring trailing data.", cfg.verbosity);
            }
            if cfg.verbosity >= 1 {
                eprintln!("  {name}: {}", if testing { "ok" } else { "done" });
            }
            if let Some(path) = &out_name {
                if name != "-" {
                    replicate_metadata(Path::new(name), Path::new(path), cfg.verbosity);
                }
                set_delete_on_interrupt(None);
                if one_to_one && !cfg.keep {
                    let _ = fs::remove_file(name);
                }
            }
            0
        }
        Err(err) => {
            show_file_error(name, &err.to_string(), cfg.verbosity);
            if !testing {
                if let Ok(mut guard) = DELETE_ON_INTERRUPT.lock() {
                    if let Some(path) = guard.take() {
                        let _ = fs::remove_file(path);
                    }
                }
            }
            error_exit_code(&err)
        }
    }
}

/// Process every input file, returning the process exit status.
pub fn run(cfg: &Config, files: &[String]) -> i32 {
    let mut retval = 0;
    let mut failed_tests = 0u32;
    for name in files {
        let code = match cfg.mode {
            Mode::Compress => compress_one(cfg, name),
            Mode::Decompress => decompress_one(cfg, name, false),
            Mode::Test => decompress_one(cfg, name, true),
        };
        if code > retval {
            retval = code;
        }
        if code != 0 && cfg.mode == Mode::Test {
            failed_tests += 1;
        }
    }
    if failed_tests > 0 && cfg.verbosity >= 1 && files.len() > 1 {
        eprintln!(
            "{PROGRAM_NAME}: warning: {failed_tests} file(s) failed the test.",
        );
    }
    retval
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compressed_name() {
        assert_eq!(compressed_name("foo", false, true), "foo.lz");
        assert_eq!(compressed_name("foo", true, true), "foo00001.lz");
        assert_eq!(compressed_name("dir/foo.tar", false, true), "dir/foo.tar.lz");
        // An explicit output name is kept as given.
        assert_eq!(compressed_name("out.bin", false, false), "out.bin");
        assert_eq!(compressed_name("out", true, false), "out00001.lz");
    }

    #[test]
    fn test_decompressed_name() {
        assert_eq!(decompressed_name("foo.lz", -1), "foo");
        assert_eq!(decompressed_name("foo.tlz", -1), "foo.tar");
        assert_eq!(decompressed_name("foo.gz", -1), "foo.gz.out");
        assert_eq!(decompressed_name("noext", -1), "noext.out");
    }

    #[test]
    fn test_next_volume_name() {
        assert_eq!(next_volume_name("foo00001.lz").unwrap(), "foo00002.lz");
        assert_eq!(next_volume_name("foo00009.lz").unwrap(), "foo00010.lz");
        assert_eq!(next_volume_name("foo09999.lz").unwrap(), "foo10000.lz");
        assert_eq!(next_volume_name("foo99999.lz"), None);
        assert_eq!(next_volume_name("fooabcde.lz"), None);
        assert_eq!(next_volume_name("x.lz"), None);
    }

    #[test]
    fn test_extension_index() {
        assert_eq!(extension_index("a.lz"), Some(0));
        assert_eq!(extension_index("a.tlz"), Some(1));
        assert_eq!(extension_index(".lz"), None);
        assert_eq!(extension_index("a.txt"), None);
    }
}

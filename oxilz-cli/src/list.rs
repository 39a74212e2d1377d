//! The `-l` listing: per-member sizes read by walking the member chain
//! backwards from the end of the file, using the member sizes stored in
//! the trailers.

use crate::driver::show_file_error;
use oxilz_core::error::{LzipError, Result};
use oxilz_stream::{HEADER_SIZE, LzipHeader, LzipTrailer, TRAILER_SIZE};
use serde::Serialize;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

/// Smallest possible member: header, empty payload, marker, trailer.
const MIN_MEMBER_SIZE: u64 = 36;

/// One member's vital statistics.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MemberInfo {
    /// Uncompressed data size.
    pub data_size: u64,
    /// Member size including header and trailer.
    pub member_size: u64,
    /// Dictionary size from the member header.
    pub dict_size: u32,
    /// CRC-32 of the uncompressed data.
    pub crc: u32,
}

/// Scan a seekable lzip file from its end, following the stored member
/// sizes, and return the members in file order.
pub fn scan_members(file: &mut File) -> Result<Vec<MemberInfo>> {
    let file_size = file.seek(SeekFrom::End(0))?;
    let mut pos = file_size;
    let mut members = Vec::new();

    while pos > 0 {
        if pos < MIN_MEMBER_SIZE {
            return Err(LzipError::data(pos, "member shorter than a valid member"));
        }
        let mut tbuf = [0u8; TRAILER_SIZE];
        file.seek(SeekFrom::Start(pos - TRAILER_SIZE as u64))?;
        file.read_exact(&mut tbuf)?;
        let trailer = LzipTrailer::parse(&tbuf);
        if trailer.member_size < MIN_MEMBER_SIZE || trailer.member_size > pos {
            return Err(LzipError::data(pos, "bad member size in trailer"));
        }
        let member_start = pos - trailer.member_size;
        let mut hbuf = [0u8; HEADER_SIZE];
        file.seek(SeekFrom::Start(member_start))?;
        file.read_exact(&mut hbuf)?;
        let header = LzipHeader::parse(&hbuf)?;
        members.push(MemberInfo {
            data_size: trailer.data_size,
            member_size: trailer.member_size,
            dict_size: header.dict_size,
            crc: trailer.data_crc,
        });
        pos = member_start;
    }
    members.reverse();
    Ok(members)
}

fn saved_percent(data_size: u64, member_size: u64) -> f64 {
    if data_size == 0 {
        0.0
    } else {
        100.0 * (1.0 - member_size as f64 / data_size as f64)
    }
}

/// List the given files. Returns the process exit status.
pub fn list_files(files: &[String], json: bool, verbosity: i8) -> i32 {
    let mut retval = 0;
    let mut first = true;
    for name in files {
        if name == "-" {
            show_file_error(name, "Can't list from standard input.", verbosity);
            retval = retval.max(1);
            continue;
        }
        let mut file = match File::open(name) {
            Ok(f) => f,
            Err(e) => {
                show_file_error(name, &format!("Can't open input file: {e}"), verbosity);
                retval = retval.max(1);
                continue;
            }
        };
        match scan_members(&mut file) {
            Ok(members) => {
                if json {
                    match serde_json::to_string_pretty(&members) {
                        Ok(text) => println!("{text}"),
                        Err(e) => {
                            show_file_error(name, &format!("JSON error: {e}"), verbosity);
                            retval = retval.max(1);
                        }
                    }
                } else {
                    print_table(name, &members, verbosity, first);
                    first = false;
                }
            }
            Err(err) => {
                show_file_error(name, &err.to_string(), verbosity);
                retval = retval.max(err.exit_code());
            }
        }
    }
    retval
}

fn print_table(name: &str, members: &[MemberInfo], verbosity: i8, first: bool) {
    if verbosity < 0 {
        return;
    }
    if first {
        println!("   uncompressed      compressed   saved  name");
    }
    let data_size: u64 = members.iter().map(|m| m.data_size).sum();
    let member_size: u64 = members.iter().map(|m| m.member_size).sum();
    println!(
        "{data_size:15} {member_size:15}  {:5.1}%  {name}",
        saved_percent(data_size, member_size)
    );
    if verbosity >= 1 {
        for (i, m) in members.iter().enumerate() {
            println!(
                "    member {:3}: {:12} in, {:12} out, dict {:9}, crc {:08X}",
                i + 1,
                m.data_size,
                m.member_size,
                m.dict_size,
                m.crc
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saved_percent() {
        assert_eq!(saved_percent(0, 36), 0.0);
        assert!((saved_percent(1000, 250) - 75.0).abs() < 1e-9);
        assert!(saved_percent(100, 200) < 0.0);
    }
}

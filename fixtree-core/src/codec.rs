//! Binary manifest stream.
//!
//! Everything is little-endian.
//!
//! ```text
//! header  : magic [u8; 8] = "RSPCHECK", version u16
//! record* : name_len u16, info_len u16, name [u8; name_len], info [u8; info_len]
//! info    : os u8, arch u8, mode u16, digest [u8; 20], <newer fields>
//! ```
//!
//! There is no overall length; the stream ends at EOF on a record boundary.
//! A producer may append fields to `info`; readers skip whatever follows the
//! layout they know.

use crate::error::CodecError;
use crate::hash::{Digest, DIGEST_LEN};
use crate::manifest::{Manifest, ManifestEntry};
use crate::path_safety::check_relative;
use crate::platform::PlatformFilter;
use std::io::{ErrorKind, Read, Write};

pub const MAGIC: [u8; 8] = *b"RSPCHECK";
/// Bump when the format breaks compatibility.
pub const FORMAT_VERSION: u16 = 0;

const HEADER_LEN: usize = MAGIC.len() + 2;
const RECORD_HEADER_LEN: usize = 2 + 2;
/// os + arch + mode + digest
pub const INFO_LEN: u16 = 1 + 1 + 2 + DIGEST_LEN as u16;

pub fn encode<W: Write>(manifest: &Manifest, mut w: W) -> Result<(), CodecError> {
    let mut header = [0u8; HEADER_LEN];
    header[..MAGIC.len()].copy_from_slice(&MAGIC);
    header[MAGIC.len()..].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
    w.write_all(&header)?;
    for (name, entry) in manifest {
        write_record(&mut w, name, entry)?;
    }
    w.flush()?;
    Ok(())
}

fn write_record<W: Write>(w: &mut W, name: &str, entry: &ManifestEntry) -> Result<(), CodecError> {
    let name_len = u16::try_from(name.len())
        .map_err(|_| CodecError::NameTooLong { name: name.to_string(), max: u16::MAX as usize })?;
    let mut rec = Vec::with_capacity(RECORD_HEADER_LEN + name.len() + INFO_LEN as usize);
    rec.extend_from_slice(&name_len.to_le_bytes());
    rec.extend_from_slice(&INFO_LEN.to_le_bytes());
    rec.extend_from_slice(name.as_bytes());
    rec.push(entry.platform.os);
    rec.push(entry.platform.arch);
    // wire keeps the low 16 bits, which covers the permission and setid bits
    rec.extend_from_slice(&(entry.mode as u16).to_le_bytes());
    rec.extend_from_slice(entry.digest.as_bytes());
    w.write_all(&rec)?;
    Ok(())
}

/// Decode a whole stream. On error nothing partial is returned.
pub fn decode<R: Read>(mut r: R) -> Result<Manifest, CodecError> {
    let mut header = [0u8; HEADER_LEN];
    read_exact_or(&mut r, &mut header, "stream header")?;
    let mut found = [0u8; 8];
    found.copy_from_slice(&header[..MAGIC.len()]);
    if found != MAGIC {
        return Err(CodecError::BadMagic { found });
    }
    let version = u16::from_le_bytes([header[8], header[9]]);
    if version != FORMAT_VERSION {
        return Err(CodecError::BadVersion { found: version, expected: FORMAT_VERSION });
    }

    let mut manifest = Manifest::new();
    while let Some((name, entry)) = read_record(&mut r)? {
        // duplicate names: last record wins
        manifest.insert(name, entry);
    }
    Ok(manifest)
}

fn read_record<R: Read>(r: &mut R) -> Result<Option<(String, ManifestEntry)>, CodecError> {
    let mut rh = [0u8; RECORD_HEADER_LEN];
    if !fill_or_eof(r, &mut rh)? {
        return Ok(None);
    }
    let name_len = u16::from_le_bytes([rh[0], rh[1]]);
    let info_len = u16::from_le_bytes([rh[2], rh[3]]);

    let mut name = vec![0u8; name_len as usize];
    read_exact_or(r, &mut name, "entry name")?;
    let name = String::from_utf8(name).map_err(|_| CodecError::InvalidName)?;
    check_relative(&name)?;

    if info_len < INFO_LEN {
        return Err(CodecError::InfoTooShort { name, declared: info_len, expected: INFO_LEN });
    }
    // reading the full declared block also skips any fields appended by newer producers
    let mut info = vec![0u8; info_len as usize];
    read_exact_or(r, &mut info, "entry info")?;

    let platform = PlatformFilter::new(info[0], info[1]);
    let mode = u32::from(u16::from_le_bytes([info[2], info[3]]));
    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&info[4..4 + DIGEST_LEN]);
    Ok(Some((name, ManifestEntry { platform, mode, digest: Digest(digest) })))
}

/// Fill `buf` completely. `Ok(false)` means EOF before the first byte,
/// i.e. a clean end of stream.
fn fill_or_eof<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<bool, CodecError> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(CodecError::Truncated { what: "record header" }),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

fn read_exact_or<R: Read>(r: &mut R, buf: &mut [u8], what: &'static str) -> Result<(), CodecError> {
    r.read_exact(buf).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            CodecError::Truncated { what }
        } else {
            CodecError::Io(e)
        }
    })
}

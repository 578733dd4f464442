use serde::{Serialize, Serializer};
use sha1::{Digest as _, Sha1};
use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;

pub const DIGEST_LEN: usize = 20;

/// SHA-1 of a file's full content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Digest(pub [u8; DIGEST_LEN]);

impl Digest {
    pub fn of_bytes(data: &[u8]) -> Self {
        let mut out = [0u8; DIGEST_LEN];
        out.copy_from_slice(&Sha1::digest(data));
        Digest(out)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex(&self.0)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

pub fn hex(bytes: &[u8]) -> String {
    const LUT: &[u8; 16] = b"0123456789abcdef";
    let mut s = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        s.push(LUT[(b >> 4) as usize] as char);
        s.push(LUT[(b & 0xF) as usize] as char);
    }
    s
}

/// Stream the whole file through SHA-1.
pub fn hash_file(path: &Path) -> io::Result<Digest> {
    let mut f = File::open(path)?;
    let mut sha = Sha1::new();
    io::copy(&mut f, &mut sha)?;
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&sha.finalize());
    Ok(Digest(out))
}

/// Unreadable files never match.
pub fn digest_matches(path: &Path, expected: &Digest) -> bool {
    matches!(hash_file(path), Ok(d) if d == *expected)
}

use crate::error::PlatformError;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Mask value meaning "every OS" or "every architecture".
pub const ALL: u8 = 0xff;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Os {
    Unix,
    Windows,
}

impl Os {
    pub const KNOWN: [Os; 2] = [Os::Unix, Os::Windows];

    pub const fn bit(self) -> u8 {
        match self {
            Os::Unix => 1 << 0,
            Os::Windows => 1 << 1,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Os::Unix => "unix",
            Os::Windows => "windows",
        }
    }

    /// Token as written in platform specs.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "windows" => Some(Os::Windows),
            "unix" | "linux" | "darwin" | "openbsd" | "freebsd" => Some(Os::Unix),
            _ => None,
        }
    }

    /// Rust target OS name (`std::env::consts::OS`).
    pub fn from_target(name: &str) -> Option<Self> {
        match name {
            "windows" => Some(Os::Windows),
            "linux" | "macos" | "freebsd" | "openbsd" | "netbsd" | "dragonfly" => Some(Os::Unix),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Arch {
    I386,
    Amd64,
    Arm,
}

impl Arch {
    pub const KNOWN: [Arch; 3] = [Arch::I386, Arch::Amd64, Arch::Arm];

    pub const fn bit(self) -> u8 {
        match self {
            Arch::I386 => 1 << 0,
            Arch::Amd64 => 1 << 1,
            Arch::Arm => 1 << 2,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Arch::I386 => "386",
            Arch::Amd64 => "amd64",
            Arch::Arm => "arm",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Self::KNOWN.into_iter().find(|a| a.name() == token)
    }

    /// Rust target arch name (`std::env::consts::ARCH`).
    pub fn from_target(name: &str) -> Option<Self> {
        match name {
            "x86" => Some(Arch::I386),
            "x86_64" => Some(Arch::Amd64),
            "arm" => Some(Arch::Arm),
            _ => None,
        }
    }
}

/// Which (OS, architecture) combinations a manifest entry applies to.
///
/// A zero mask on either axis matches nothing; it marks an entry as excluded
/// everywhere rather than unrestricted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct PlatformFilter {
    pub os: u8,
    pub arch: u8,
}

impl Default for PlatformFilter {
    fn default() -> Self {
        Self::ANY
    }
}

impl PlatformFilter {
    pub const ANY: Self = Self { os: ALL, arch: ALL };
    pub const NONE: Self = Self { os: 0, arch: 0 };

    pub const fn new(os: u8, arch: u8) -> Self {
        Self { os, arch }
    }

    /// The running host. An axis we do not recognize becomes "all" so unknown
    /// hosts are treated permissively.
    pub fn host() -> Self {
        Self::from_target(std::env::consts::OS, std::env::consts::ARCH)
    }

    pub fn from_target(os: &str, arch: &str) -> Self {
        Self {
            os: Os::from_target(os).map_or(ALL, Os::bit),
            arch: Arch::from_target(arch).map_or(ALL, Arch::bit),
        }
    }

    /// `self` is the host, `target` the entry's filter.
    pub fn matches(&self, target: &PlatformFilter) -> bool {
        self.os & target.os != 0 && self.arch & target.arch != 0
    }

    pub fn is_excluded(&self) -> bool {
        self.os == 0 || self.arch == 0
    }
}

fn os_token_bits(token: &str) -> u8 {
    if token.is_empty() {
        return ALL;
    }
    Os::from_token(token).map_or(0, Os::bit)
}

fn arch_token_bits(token: &str) -> u8 {
    if token.is_empty() {
        return ALL;
    }
    Arch::from_token(token).map_or(0, Arch::bit)
}

fn parse_flags(expr: &str, resolve: fn(&str) -> u8) -> Result<u8, PlatformError> {
    let (expr, complement) = match expr.strip_prefix('^') {
        Some(rest) => (rest, true),
        None => (expr, false),
    };
    let mut flags = 0u8;
    for token in expr.split('|') {
        let ored = flags | resolve(token);
        // unknown tokens resolve to 0, so they land here too
        if !token.is_empty() && ored == flags {
            return Err(PlatformError::InvalidPattern { token: token.to_string() });
        }
        flags = ored;
    }
    Ok(if complement { !flags } else { flags })
}

/// Parse `<os-expr>:<arch-expr>`, e.g. `unix`, `:386`, `^windows:^arm`,
/// `:arm|amd64`. Either side may be empty, meaning any.
pub fn parse_platform(spec: &str) -> Result<PlatformFilter, PlatformError> {
    let mut halves = spec.split(':');
    let os = halves.next().unwrap_or("");
    let arch = halves.next().unwrap_or("");
    Ok(PlatformFilter { os: parse_flags(os, os_token_bits)?, arch: parse_flags(arch, arch_token_bits)? })
}

impl FromStr for PlatformFilter {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_platform(s)
    }
}

fn fmt_mask(f: &mut fmt::Formatter<'_>, mask: u8, known: &[(u8, &str)]) -> fmt::Result {
    let known_bits = known.iter().fold(0u8, |acc, (bit, _)| acc | bit);
    let names = |m: u8| -> String {
        known.iter().filter(|(bit, _)| m & bit != 0).map(|(_, n)| *n).collect::<Vec<_>>().join("|")
    };
    if mask == ALL {
        Ok(())
    } else if mask == 0 {
        f.write_str("^")
    } else if !mask & !known_bits == 0 {
        write!(f, "^{}", names(!mask))
    } else if mask & !known_bits == 0 {
        f.write_str(&names(mask))
    } else {
        write!(f, "#{mask:02x}")
    }
}

impl fmt::Display for PlatformFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let os: Vec<(u8, &str)> = Os::KNOWN.iter().map(|o| (o.bit(), o.name())).collect();
        let arch: Vec<(u8, &str)> = Arch::KNOWN.iter().map(|a| (a.bit(), a.name())).collect();
        fmt_mask(f, self.os, &os)?;
        if self.arch != ALL {
            f.write_str(":")?;
            fmt_mask(f, self.arch, &arch)?;
        }
        Ok(())
    }
}

pub mod codec;
pub mod error;
pub mod fsutil;
pub mod generate;
pub mod hash;
pub mod manifest;
pub mod path_safety;
pub mod platform;
pub mod repair;
pub mod retrieve;
pub mod verify;

pub use error::{CodecError, FetchError, PathError, PlatformError, ResolveError};
pub use hash::Digest;
pub use manifest::{Manifest, ManifestEntry};
pub use platform::{parse_platform, PlatformFilter};
pub use verify::{BadFile, Reason};

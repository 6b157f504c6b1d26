//! Safe persistence of Figma assets.
//!
//! Turns a user-supplied destination into a validated absolute directory,
//! creates it, writes rendered images through a staging directory, and
//! verifies every file afterwards. Protected system locations are refused
//! before any write; files that land somewhere unexpected are found and moved
//! back into place or reported as failures.

pub mod download;
pub mod env;
pub mod guard;
pub mod mover;
pub mod naming;
pub mod provision;
pub mod recovery;
pub mod resolve;
pub mod source;
pub mod workspace;

pub use download::{
    DownloadError, DownloadOptions, DownloadReport, DownloadResult, DownloadSettings,
    DownloadSummary, Downloader, WorkspaceEnforcement,
};
pub use env::Environment;
pub use guard::{PathGuard, Platform};
pub use mover::{MoveError, MoveTier, Mover};
pub use naming::{ExportSpec, FilenameAllocator};
pub use provision::{ProvisionError, ensure_directory};
pub use recovery::{BatchOutcome, RecoveryEngine, RecoveryReport, SearchLocations};
pub use resolve::{PathError, PathResolver, ResolvedPath};
pub use source::AssetSource;
pub use workspace::{Confidence, WorkspaceCandidate, WorkspaceLocator};

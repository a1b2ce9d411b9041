//! Container handles, load flags and load status.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Identifies one load request. Slots are reused; the generation tells a
/// stale handle from the current occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PakHandle {
    slot: u16,
    generation: u16,
}

impl PakHandle {
    pub(crate) const fn new(slot: u16, generation: u16) -> Self {
        Self { slot, generation }
    }

    #[inline]
    pub const fn slot(self) -> u16 {
        self.slot
    }

    #[inline]
    pub const fn generation(self) -> u16 {
        self.generation
    }
}

impl fmt::Display for PakHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pak#{}.{}", self.slot, self.generation)
    }
}

/// Options for a single load request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LoadFlags(u32);

impl LoadFlags {
    pub const NONE: Self = Self(0);
    /// Never open the optional streaming set.
    pub const SKIP_OPTIONAL_STREAMING: Self = Self(0x1);
    /// Open no streaming files at all.
    pub const SKIP_STREAMING: Self = Self(0x2);

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for LoadFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for LoadFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Where a container is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PakStatus {
    Pending = 0,
    Starting = 1,
    ReadingHeader = 2,
    ApplyingPatchChain = 3,
    CopyingPages = 4,
    DispatchingAssetJobs = 5,
    ResolvingDependencies = 6,
    Loaded = 7,
    Error = 8,
    Canceling = 9,
    UnloadPending = 10,
    Freed = 11,
    /// The handle does not name a live container.
    InvalidHandle = 12,
}

impl PakStatus {
    const ALL: [Self; 13] = [
        Self::Pending,
        Self::Starting,
        Self::ReadingHeader,
        Self::ApplyingPatchChain,
        Self::CopyingPages,
        Self::DispatchingAssetJobs,
        Self::ResolvingDependencies,
        Self::Loaded,
        Self::Error,
        Self::Canceling,
        Self::UnloadPending,
        Self::Freed,
        Self::InvalidHandle,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PAK_STATUS_PENDING",
            Self::Starting => "PAK_STATUS_STARTING",
            Self::ReadingHeader => "PAK_STATUS_READING_HEADER",
            Self::ApplyingPatchChain => "PAK_STATUS_APPLYING_PATCH_CHAIN",
            Self::CopyingPages => "PAK_STATUS_COPYING_PAGES",
            Self::DispatchingAssetJobs => "PAK_STATUS_DISPATCHING_ASSET_JOBS",
            Self::ResolvingDependencies => "PAK_STATUS_RESOLVING_DEPENDENCIES",
            Self::Loaded => "PAK_STATUS_LOADED",
            Self::Error => "PAK_STATUS_ERROR",
            Self::Canceling => "PAK_STATUS_CANCELING",
            Self::UnloadPending => "PAK_STATUS_UNLOAD_PENDING",
            Self::Freed => "PAK_STATUS_FREED",
            Self::InvalidHandle => "PAK_STATUS_INVALID_HANDLE",
        }
    }

    /// Still making its way towards `Loaded`.
    pub const fn is_loading(self) -> bool {
        matches!(
            self,
            Self::Pending
                | Self::Starting
                | Self::ReadingHeader
                | Self::ApplyingPatchChain
                | Self::CopyingPages
                | Self::DispatchingAssetJobs
                | Self::ResolvingDependencies
        )
    }

    /// No further progress happens without a new request.
    pub const fn is_settled(self) -> bool {
        matches!(
            self,
            Self::Loaded | Self::Error | Self::UnloadPending | Self::Freed | Self::InvalidHandle
        )
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        Self::ALL.get(value as usize).copied().unwrap_or(Self::InvalidHandle)
    }
}

impl fmt::Display for PakStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//! Requested access capabilities for a mapping.

use bitflags::bitflags;

bitflags! {
    /// Capability set requested for a mapping.
    ///
    /// `READ` is always granted by the backends whether or not it is set.
    /// `WRITE`, `COPY` and `EXEC` add to it. `COPY` selects a private
    /// copy-on-write mapping in place of the default shared one.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Protection: u8 {
        /// Readable mapping.
        const READ = 1 << 0;
        /// Writable mapping; writes reach the backing file.
        const WRITE = 1 << 1;
        /// Private copy-on-write mapping; writes stay in this process.
        const COPY = 1 << 2;
        /// Executable mapping.
        const EXEC = 1 << 3;
    }
}

impl Protection {
    /// Read and write access, the protection used by `MappedRegion::create`.
    pub const READ_WRITE: Self = Self::READ.union(Self::WRITE);

    /// Whether writes through the mapping are permitted.
    #[must_use]
    pub fn is_writable(self) -> bool {
        self.intersects(Self::WRITE | Self::COPY)
    }

    /// Whether writes stay private to this process.
    #[must_use]
    pub fn is_private(self) -> bool {
        self.contains(Self::COPY)
    }
}

impl Default for Protection {
    fn default() -> Self {
        Self::READ_WRITE
    }
}

use crate::DirEntryType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// Inode number
    pub inode: u32,
    pub mode: DirEntryType,
    /// Hard links
    pub links: u16,
    /// Occupying data blocks
    pub blocks: u32,
    /// File size
    pub size: u32,
}

use derive_more::{Display, From, Into};

/// 对象编号
///
/// 索引节点与数据块共用一个编号空间，按区间区分：
/// - `[0, 0x8000_0000)`：索引节点，`0` 为根目录；
/// - `[0x8000_0000, 0xFFFF_FFFF)`：数据块；
/// - `0xFFFF_FFFF`：空编号。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into, Display)]
#[display(fmt = "{:#x}", _0)]
#[repr(transparent)]
pub struct ObjectId(u32);

impl ObjectId {
    pub const ROOT: Self = Self(0);

    /// 最小的数据块编号
    pub const BLOCK_MIN: Self = Self(0x8000_0000);

    pub const NONE: Self = Self(u32::MAX);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn is_inode(self) -> bool {
        self < Self::BLOCK_MIN
    }

    #[inline]
    pub fn is_block(self) -> bool {
        self >= Self::BLOCK_MIN && self != Self::NONE
    }

    #[inline]
    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    /// 空编号映射为 `None`
    #[inline]
    pub fn some(self) -> Option<Self> {
        (!self.is_none()).then_some(self)
    }

    #[inline]
    pub(crate) fn succ(self) -> Self {
        Self(self.0 + 1)
    }
}

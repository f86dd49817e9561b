//! # 闪存设备接口层
//!
//! 闪存与块设备不同：写入只能把擦除态（全 `0xFF`）的字节编程为其它值，
//! 想要重写就必须以擦除单元为粒度整体擦除。
//! [`FlashDevice`] 就是对这类介质读、写、擦除的抽象，
//! 实现了此特质的类型称为**闪存驱动**。
//!
//! 一台设备上可能挂有多片闪存，由 `flash_id` 区分。

#![no_std]

use core::any::Any;
use core::fmt;

/// 擦除后的字节值
pub const ERASED: u8 = 0xFF;

/// 闪存驱动特质
///
/// 地址均为所在闪存片内的绝对字节地址。
pub trait FlashDevice: Send + Sync + Any {
    fn read(&self, flash_id: u8, address: u32, buf: &mut [u8]) -> Result<(), FlashError>;

    /// 驱动可以拒绝向非擦除态字节写入
    fn write(&self, flash_id: u8, address: u32, buf: &[u8]) -> Result<(), FlashError>;

    fn erase(&self, flash_id: u8, address: u32, len: u32) -> Result<(), FlashError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashError {
    /// 不存在的闪存片
    NoSuchFlash,
    /// 访问越过闪存片边界
    OutOfBounds,
    /// 目标字节并非擦除态
    NotErased,
    /// 底层读写失败，包括掉电
    Io,
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::NoSuchFlash => "no such flash",
            Self::OutOfBounds => "access out of flash bounds",
            Self::NotErased => "write to non-erased bytes",
            Self::Io => "flash I/O failure",
        };
        f.write_str(msg)
    }
}

/// 判断一段字节是否处于擦除态
#[inline]
pub fn is_erased(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| b == ERASED)
}

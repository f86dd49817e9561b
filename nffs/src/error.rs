use core::fmt;

use flash_dev::FlashError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// 闪存驱动报告的读写擦除失败
    Media(FlashError),
    /// 记录校验失败或对象图不一致
    CorruptRecord,
    NotFound,
    /// 垃圾回收后仍没有足够的空闲空间
    OutOfSpace,
    /// 对象表或句柄池已满
    ResourceExhausted,
    /// 闪存上没有可识别的文件系统
    InvalidFormat,
    AlreadyExists,
    NotADirectory,
    IsADirectory,
    DirectoryNotEmpty,
    InvalidName,
    InvalidArgument,
    InvalidHandle,
    /// 句柄的访问模式不允许该操作
    AccessDenied,
    /// 偏移超出文件长度
    OutOfRange,
    /// 文件系统不处于就绪状态
    NotReady,
}

impl From<FlashError> for Error {
    fn from(err: FlashError) -> Self {
        Self::Media(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Media(err) => write!(f, "media error: {err}"),
            Self::CorruptRecord => f.write_str("corrupt record"),
            Self::NotFound => f.write_str("no such file or directory"),
            Self::OutOfSpace => f.write_str("no space left on flash"),
            Self::ResourceExhausted => f.write_str("resource exhausted"),
            Self::InvalidFormat => f.write_str("no valid file system found"),
            Self::AlreadyExists => f.write_str("file exists"),
            Self::NotADirectory => f.write_str("not a directory"),
            Self::IsADirectory => f.write_str("is a directory"),
            Self::DirectoryNotEmpty => f.write_str("directory not empty"),
            Self::InvalidName => f.write_str("invalid file name"),
            Self::InvalidArgument => f.write_str("invalid argument"),
            Self::InvalidHandle => f.write_str("invalid handle"),
            Self::AccessDenied => f.write_str("access denied"),
            Self::OutOfRange => f.write_str("offset out of range"),
            Self::NotReady => f.write_str("file system not ready"),
        }
    }
}

impl core::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;

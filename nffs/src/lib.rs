//! 面向裸闪存的日志结构文件系统。
//!
//! 闪存被划分为若干**区域**（area），每个区域只追加写入带校验的对象记录，
//! 记录通过编号与版本号互相关联；内存中的一切结构都可以通过扫描闪存重建。

#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

/* nffs 的整体架构，自上而下 */

// 对外接口层：生命周期、文件与目录句柄
mod fs;
pub use fs::{AreaInfo, Nffs, State};
mod handle;
pub use handle::{Access, DirHandle, FileHandle};

// 命名空间层：路径解析与目录树
mod namespace;
mod path;

// 文件数据层：数据块链的读写与截断
mod file;

// 卷管理层：区域分配、垃圾回收与掉电恢复
mod volume;
mod gc;
mod restore;

// 对象索引层：对象编号到最新记录位置的映射
mod index;

// 对象缓存层：内存上的对象元数据缓存
mod object_cache;

// 闪存数据结构层：区域头与对象记录的编解码
mod layout;
pub use layout::InodeFlag;

// 闪存区域层：以区域为单位读写擦除闪存
mod area;
pub use area::{AreaDesc, AreaRole};

mod config;
pub use config::Config;
mod error;
pub use error::{Error, Result};
mod id;
pub use id::ObjectId;

pub use flash_dev::{FlashDevice, FlashError};
pub use vfs::{DirEntry, DirEntryType, Stat};

/// 文件名的最大字节数
pub const MAX_NAME_LEN: usize = 256;
/// 可管理的区域数上限
pub const MAX_AREAS: usize = 256;

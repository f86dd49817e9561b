use crate::{Error, Result};

/// 文件系统实例的资源配置，在 [`Nffs::init`](crate::Nffs::init) 时给定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// 同时存活的索引节点数上限
    pub max_inodes: usize,
    /// 同时存活的数据块数上限
    pub max_blocks: usize,
    /// 文件句柄池大小
    pub max_open_files: usize,
    /// 目录句柄池大小
    pub max_open_dirs: usize,
    /// 索引节点缓存容量，`0` 表示不缓存
    pub inode_cache_size: usize,
    /// 数据块缓存容量，`0` 表示不缓存
    pub block_cache_size: usize,
    /// 单个数据块记录承载的最大数据字节数
    pub block_max_data: u16,
    /// 读与擦除失败后的重试次数
    pub media_retries: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_inodes: 1024,
            max_blocks: 4096,
            max_open_files: 4,
            max_open_dirs: 4,
            inode_cache_size: 4,
            block_cache_size: 64,
            block_max_data: 2048,
            media_retries: 0,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        // 至少要容纳根目录
        if self.max_inodes == 0 || self.block_max_data == 0 {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }
}

//! 文件系统与使用者之间交换的值类型

#![no_std]

extern crate alloc;

mod dirent;
mod stat;

pub use self::{
    dirent::{DirEntry, DirEntryType},
    stat::Stat,
};

use alloc::vec::Vec;

use crate::{Error, MAX_NAME_LEN, Result};

pub(crate) trait Path {
    fn is_absolute(&self) -> bool;

    /// 返回根目录下逐级的名字，根目录本身为空。
    ///
    /// 只接受绝对路径；重复的`/`被忽略，不支持`.`与`..`。
    fn components(&self) -> Result<Vec<&str>>;
}

impl Path for str {
    fn is_absolute(&self) -> bool {
        self.starts_with('/')
    }

    fn components(&self) -> Result<Vec<&str>> {
        if !self.is_absolute() {
            return Err(Error::InvalidName);
        }

        self.split('/')
            .filter(|cmp| !cmp.is_empty())
            .map(|cmp| match cmp {
                "." | ".." => Err(Error::InvalidName),
                cmp if cmp.len() > MAX_NAME_LEN => Err(Error::InvalidName),
                cmp => Ok(cmp),
            })
            .collect()
    }
}

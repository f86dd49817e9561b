mod common;

use std::sync::Arc;

use common::*;
use nffs::{AreaDesc, AreaRole, Config, Error, Nffs};

fn name(i: usize) -> String {
    format!("/f{i:02}")
}

fn content(i: usize) -> Vec<u8> {
    pattern(200, i as u8)
}

/// 写满区域 0 的前半段并删除其中一半文件，留下可回收的垃圾
fn make_garbage(fs: &Nffs) {
    for i in 0..12 {
        write_file(fs, &name(i), &content(i)).unwrap();
    }
    for i in (0..12).step_by(2) {
        fs.unlink(&name(i)).unwrap();
    }
}

/// 继续写入小文件直到区域 0 被回收，返回触发回收的文件编号
fn fill_until_gc(fs: &Nffs) -> usize {
    for i in 12..64 {
        write_file(fs, &name(i), &content(i)).unwrap();
        if fs.areas().unwrap()[0].role == AreaRole::Scratch {
            return i;
        }
    }
    panic!("area 0 was never collected");
}

fn erased(flash: &Arc<RamFlash>, desc: AreaDesc) -> bool {
    flash.bytes(desc).iter().all(|&b| b == 0xFF)
}

#[test]
fn gc_moves_live_objects() {
    let flash = RamFlash::new(2 * 4096);
    let descs = areas(2, 4096);
    let fs = formatted(&flash, &descs, Config::default());
    let before = fs.areas().unwrap();
    assert_eq!(AreaRole::Data, before[0].role);
    assert_eq!(AreaRole::Scratch, before[1].role);

    make_garbage(&fs);
    let last = fill_until_gc(&fs);

    let after = fs.areas().unwrap();
    // 源区域被擦除，序号增大，不带区域头
    assert_eq!(AreaRole::Scratch, after[0].role);
    assert!(after[0].seq > before[0].seq);
    assert!(after[0].seq > after[1].seq);
    assert!(erased(&flash, descs[0]));
    // 目标区域继承源区域的逻辑区域号
    assert_eq!(AreaRole::Data, after[1].role);
    assert_eq!(before[0].id, after[1].id);

    for i in 0..=last {
        if i < 12 && i % 2 == 0 {
            assert_eq!(Err(Error::NotFound), fs.stat(&name(i)).map(|_| ()));
        } else {
            assert_eq!(content(i), read_file(&fs, &name(i)).unwrap(), "{}", name(i));
        }
    }

    // 回收前后的树在重启后一致
    let tree_before = tree(&fs);
    let fs = reboot(&flash, &descs, Config::default());
    assert_eq!(tree_before, tree(&fs));
    assert_eq!(after, fs.areas().unwrap());
}

#[test]
fn repeated_gc_round_trip() {
    let flash = RamFlash::new(3 * 4096);
    let descs = areas(3, 4096);
    let fs = formatted(&flash, &descs, Config::default());
    fs.mkdir("/keep").unwrap();
    write_file(&fs, "/keep/a", &pattern(1000, 1)).unwrap();

    // 反复改写同一个文件，旧版本不断变成垃圾
    for round in 0..40u8 {
        write_file(&fs, "/churn", &pattern(900, round)).unwrap();
    }
    assert_eq!(pattern(900, 39), read_file(&fs, "/churn").unwrap());
    assert_eq!(pattern(1000, 1), read_file(&fs, "/keep/a").unwrap());

    let info = fs.areas().unwrap();
    let scratch: Vec<_> = info
        .iter()
        .zip(&descs)
        .filter(|(area, _)| area.role == AreaRole::Scratch)
        .collect();
    assert_eq!(1, scratch.len());
    assert!(erased(&flash, *scratch[0].1));

    let tree_before = tree(&fs);
    let fs = reboot(&flash, &descs, Config::default());
    assert_eq!(tree_before, tree(&fs));
}

#[test]
fn interrupted_gc_is_rolled_back() {
    let descs = areas(2, 4096);

    let sizing = RamFlash::new(2 * 4096);
    let fs = formatted(&sizing, &descs, Config::default());
    make_garbage(&fs);
    let trigger = fill_until_gc(&fs);

    for budget in [0, 10, 24, 30, 200, 1000] {
        let flash = RamFlash::new(2 * 4096);
        let fs = formatted(&flash, &descs, Config::default());
        make_garbage(&fs);
        for i in 12..trigger {
            write_file(&fs, &name(i), &content(i)).unwrap();
        }
        write_file(&fs, &name(trigger), b"").unwrap();
        let expected = tree(&fs);

        // 数据块放不下，回收途中掉电
        flash.cut_power_after(budget);
        assert!(append_file(&fs, &name(trigger), &content(trigger)).is_err());
        drop(fs);

        let fs = reboot(&flash, &descs, Config::default());
        assert_eq!(expected, tree(&fs), "power cut after {budget} bytes");
        let info = fs.areas().unwrap();
        let scratch = info
            .iter()
            .position(|area| area.role == AreaRole::Scratch)
            .unwrap();
        // 区域头只写了一半时暂存区留有残迹，下次回收前才擦除
        if !(1..24).contains(&budget) {
            assert!(erased(&flash, descs[scratch]));
        }

        // 重新回收后写入成功
        append_file(&fs, &name(trigger), &content(trigger)).unwrap();
        assert_eq!(content(trigger), read_file(&fs, &name(trigger)).unwrap());
        let fs = reboot(&flash, &descs, Config::default());
        assert_eq!(content(trigger), read_file(&fs, &name(trigger)).unwrap());
    }
}

#[test]
fn full_volume_reports_out_of_space() {
    let flash = RamFlash::new(2 * 4096);
    let descs = areas(2, 4096);
    let fs = formatted(&flash, &descs, Config::default());

    let mut written = Vec::new();
    let err = (0..64)
        .map(|i| {
            let result = write_file(&fs, &name(i), &content(i));
            if result.is_ok() {
                written.push(i);
            }
            result
        })
        .find_map(Result::err)
        .unwrap();
    assert_eq!(Error::OutOfSpace, err);
    assert!(fs.ready());

    // 失败的写入不影响已有文件，删除后空间可以再利用
    for &i in &written {
        assert_eq!(content(i), read_file(&fs, &name(i)).unwrap());
    }
    for &i in &written[..4] {
        fs.unlink(&name(i)).unwrap();
    }
    write_file(&fs, "/again", &content(99)).unwrap();

    let fs = reboot(&flash, &descs, Config::default());
    assert_eq!(content(99), read_file(&fs, "/again").unwrap());
}

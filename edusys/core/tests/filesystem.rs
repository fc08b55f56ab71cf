//! File system driver behavior over the simulated block device.

use edusys_core::{BlockDevice, FileRecord, FileStatus, FsDriver, FsError, MachineSpec};

fn driver() -> FsDriver {
    let mut fs = FsDriver::new(BlockDevice::in_memory(&MachineSpec::default()));
    fs.format().expect("format");
    fs
}

/// Count the data-region cells currently marked available.
fn free_data_cells(fs: &FsDriver) -> usize {
    let mut free = 0;
    for sectors in fs.get_contents().iter().skip(1) {
        for blocks in sectors {
            for cell in blocks {
                let record = FileRecord::from_record_string(cell).expect("parse cell");
                if record.is_available() {
                    free += 1;
                }
            }
        }
    }
    free
}

#[test]
fn create_write_read_delete_round_trip() {
    let mut fs = driver();
    fs.create_file("notes.txt").unwrap();
    fs.write_file("notes.txt", b"hello disk", false).unwrap();
    assert_eq!(fs.read_file("notes.txt").unwrap(), b"hello disk");

    fs.delete_file("notes.txt").unwrap();
    assert_eq!(
        fs.read_file("notes.txt"),
        Err(FsError::FileNotFound("notes.txt".into()))
    );
}

#[test]
fn reading_an_unwritten_file_is_empty() {
    let mut fs = driver();
    fs.create_file("empty").unwrap();
    assert_eq!(fs.read_file("empty").unwrap(), Vec::<u8>::new());
}

#[test]
fn multi_block_files_chain_across_cells() {
    let mut fs = driver();
    // 150 bytes spans three 60-byte cells.
    let data: Vec<u8> = (0..150u8).map(|i| i.wrapping_mul(3).wrapping_add(1)).collect();
    let before = free_data_cells(&fs);
    fs.create_file("big").unwrap();
    fs.write_file("big", &data, false).unwrap();
    assert_eq!(fs.read_file("big").unwrap(), data);
    assert_eq!(
        before - free_data_cells(&fs),
        3,
        "150 bytes plus the terminator occupy exactly three cells"
    );

    fs.delete_file("big").unwrap();
    assert_eq!(free_data_cells(&fs), before, "deletion frees the whole chain");
}

#[test]
fn overwriting_replaces_the_old_chain() {
    let mut fs = driver();
    fs.create_file("file").unwrap();
    fs.write_file("file", &[0x11; 100], false).unwrap();
    let after_first = free_data_cells(&fs);
    fs.write_file("file", b"short", false).unwrap();
    assert_eq!(fs.read_file("file").unwrap(), b"short");
    assert!(
        free_data_cells(&fs) > after_first,
        "shrinking a file must release its extra cells"
    );
}

#[test]
fn binary_reads_preserve_interior_zeros() {
    let mut fs = driver();
    fs.create_file("bin").unwrap();
    let data = vec![0x01, 0x00, 0x02];
    fs.write_file("bin", &data, true).unwrap();
    let read = fs.read_file("bin").unwrap();
    assert_eq!(&read[..3], &data[..]);
}

#[test]
fn directory_exhaustion_is_an_explicit_error() {
    let mut fs = driver();
    // Track 0 holds the directory; (0,0,0) is the master record, leaving
    // 63 entries.
    for i in 0..63 {
        fs.create_file(&format!("file{i}")).unwrap();
    }
    assert_eq!(
        fs.create_file("one-too-many"),
        Err(FsError::DirectoryFull)
    );
}

#[test]
fn disk_exhaustion_aborts_without_partial_commit() {
    let mut fs = driver();
    fs.create_file("huge").unwrap();
    let before = free_data_cells(&fs);
    // 192 data cells x 60 bytes: this payload plus its terminator cannot fit.
    let data = vec![0xAB; 192 * 60];
    assert_eq!(
        fs.write_file("huge", &data, false),
        Err(FsError::InsufficientSpace)
    );
    assert_eq!(
        free_data_cells(&fs),
        before,
        "a failed write must not reserve any cells"
    );
    assert_eq!(fs.read_file("huge").unwrap(), Vec::<u8>::new());
}

#[test]
fn largest_fitting_file_round_trips() {
    let mut fs = driver();
    fs.create_file("max").unwrap();
    // 192 cells can hold 192 * 60 - 1 payload bytes plus the terminator.
    let data: Vec<u8> = (0..192 * 60 - 1).map(|i| (i % 251) as u8 + 1).collect();
    fs.write_file("max", &data, false).unwrap();
    assert_eq!(fs.read_file("max").unwrap(), data);
    assert_eq!(free_data_cells(&fs), 0);
}

#[test]
fn file_names_are_capacity_bounded() {
    let mut fs = driver();
    let long = "x".repeat(61);
    assert_eq!(fs.create_file(&long), Err(FsError::NameTooLarge));
    let exact = "y".repeat(60);
    fs.create_file(&exact).unwrap();
    assert!(fs.find_file(&exact).is_ok());
}

#[test]
fn status_codes_round_trip_on_disk() {
    let mut fs = driver();
    fs.create_file("text").unwrap();
    fs.write_file("text", b"abc", false).unwrap();
    fs.create_file("blob").unwrap();
    fs.write_file("blob", &[1, 2, 3], true).unwrap();

    let contents = fs.get_contents();
    let mut text_cells = 0;
    let mut binary_cells = 0;
    for sectors in contents.iter().skip(1) {
        for blocks in sectors {
            for cell in blocks {
                match FileRecord::from_record_string(cell).unwrap().status {
                    FileStatus::OccupiedText => text_cells += 1,
                    FileStatus::OccupiedBinary => binary_cells += 1,
                    FileStatus::Available => {}
                }
            }
        }
    }
    assert_eq!(text_cells, 1);
    assert_eq!(binary_cells, 1);
}

//! Kernel-mode device drivers.
//!
//! Every driver implements the same capability interface: an entry routine
//! run at load time and a typed interrupt service routine. The keyboard
//! driver turns raw key events into characters; the disk driver services
//! file commands against the file system driver.

use crate::fs::FsDriver;
use crate::interrupt::KeyEvent;
use once_cell::sync::Lazy;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverStatus {
    Unloaded,
    Loaded,
}

/// The base contract all device drivers share.
pub trait DeviceDriver {
    type Request;
    type Response;

    /// Initialization routine, called when the driver is loaded.
    fn driver_entry(&mut self) -> crate::Result<()>;

    /// Interrupt service routine.
    fn isr(&mut self, request: Self::Request) -> crate::Result<Self::Response>;
}

/// Shifted forms of the non-letter keys.
static SHIFTED_SYMBOLS: Lazy<HashMap<char, char>> = Lazy::new(|| {
    [
        ('`', '~'),
        ('0', ')'),
        ('1', '!'),
        ('2', '@'),
        ('3', '#'),
        ('4', '$'),
        ('5', '%'),
        ('6', '^'),
        ('7', '&'),
        ('8', '*'),
        ('9', '('),
        ('-', '_'),
        ('=', '+'),
        ('[', '{'),
        (']', '}'),
        (';', ':'),
        ('\'', '"'),
        ('"', '\''),
        (',', '<'),
        ('.', '>'),
        ('/', '?'),
        ('\\', '|'),
    ]
    .into_iter()
    .collect()
});

/// The keyboard device driver: key codes in, characters out.
#[derive(Debug)]
pub struct KeyboardDriver {
    status: DriverStatus,
}

impl KeyboardDriver {
    pub fn new() -> Self {
        Self {
            status: DriverStatus::Unloaded,
        }
    }

    pub fn status(&self) -> DriverStatus {
        self.status
    }
}

impl Default for KeyboardDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceDriver for KeyboardDriver {
    type Request = KeyEvent;
    /// The decoded character, or `None` for keys the system ignores.
    type Response = Option<char>;

    fn driver_entry(&mut self) -> crate::Result<()> {
        self.status = DriverStatus::Loaded;
        log::debug!("keyboard driver loaded");
        Ok(())
    }

    fn isr(&mut self, event: KeyEvent) -> crate::Result<Option<char>> {
        log::trace!("key code {} shifted {}", event.code, event.shifted);
        let chr = match event.code {
            // A..Z
            65..=90 => Some(if event.shifted {
                event.code as char
            } else {
                (event.code + 32) as char
            }),
            // a..z
            97..=122 => Some(if event.shifted {
                (event.code - 32) as char
            } else {
                event.code as char
            }),
            // Digits and punctuation, with their shifted forms.
            48..=57 | 96 | 45 | 61 | 91 | 93 | 59 | 39 | 44 | 46 | 47 | 92 => {
                let c = event.code as char;
                if event.shifted {
                    SHIFTED_SYMBOLS.get(&c).copied()
                } else {
                    Some(c)
                }
            }
            32 => Some(' '),
            13 => Some('\n'),
            8 => Some('\u{0008}'),
            _ => None,
        };
        Ok(chr)
    }
}

/// File commands serviced by the disk driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskRequest {
    Create { name: String },
    Read { name: String },
    Write { name: String, data: Vec<u8>, binary: bool },
    Delete { name: String },
    Format,
}

/// A completed disk command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskResponse {
    Done,
    Data(Vec<u8>),
}

/// The disk device driver: thin command dispatch over the file system.
#[derive(Debug)]
pub struct DiskDriver {
    fs: FsDriver,
    status: DriverStatus,
}

impl DiskDriver {
    pub fn new(fs: FsDriver) -> Self {
        Self {
            fs,
            status: DriverStatus::Unloaded,
        }
    }

    pub fn status(&self) -> DriverStatus {
        self.status
    }

    pub fn fs(&self) -> &FsDriver {
        &self.fs
    }

    pub fn fs_mut(&mut self) -> &mut FsDriver {
        &mut self.fs
    }
}

impl DeviceDriver for DiskDriver {
    type Request = DiskRequest;
    type Response = DiskResponse;

    fn driver_entry(&mut self) -> crate::Result<()> {
        self.status = DriverStatus::Loaded;
        log::debug!("disk driver loaded");
        Ok(())
    }

    fn isr(&mut self, request: DiskRequest) -> crate::Result<DiskResponse> {
        match request {
            DiskRequest::Create { name } => {
                self.fs.create_file(&name)?;
                Ok(DiskResponse::Done)
            }
            DiskRequest::Read { name } => {
                let data = self.fs.read_file(&name)?;
                Ok(DiskResponse::Data(data))
            }
            DiskRequest::Write { name, data, binary } => {
                self.fs.write_file(&name, &data, binary)?;
                Ok(DiskResponse::Done)
            }
            DiskRequest::Delete { name } => {
                self.fs.delete_file(&name)?;
                Ok(DiskResponse::Done)
            }
            DiskRequest::Format => {
                self.fs.format()?;
                Ok(DiskResponse::Done)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::BlockDevice;
    use crate::MachineSpec;

    fn keyboard() -> KeyboardDriver {
        let mut kb = KeyboardDriver::new();
        kb.driver_entry().unwrap();
        kb
    }

    #[test]
    fn letters_respect_shift() {
        let mut kb = keyboard();
        assert_eq!(kb.isr(KeyEvent::new(65, false)).unwrap(), Some('a'));
        assert_eq!(kb.isr(KeyEvent::new(65, true)).unwrap(), Some('A'));
        assert_eq!(kb.isr(KeyEvent::new(122, true)).unwrap(), Some('Z'));
    }

    #[test]
    fn digits_shift_to_symbols() {
        let mut kb = keyboard();
        assert_eq!(kb.isr(KeyEvent::new(49, false)).unwrap(), Some('1'));
        assert_eq!(kb.isr(KeyEvent::new(49, true)).unwrap(), Some('!'));
        assert_eq!(kb.isr(KeyEvent::new(57, true)).unwrap(), Some('('));
    }

    #[test]
    fn whitespace_and_control_keys_map_through() {
        let mut kb = keyboard();
        assert_eq!(kb.isr(KeyEvent::new(32, false)).unwrap(), Some(' '));
        assert_eq!(kb.isr(KeyEvent::new(13, false)).unwrap(), Some('\n'));
        assert_eq!(kb.isr(KeyEvent::new(8, false)).unwrap(), Some('\u{0008}'));
    }

    #[test]
    fn unmapped_codes_are_ignored() {
        let mut kb = keyboard();
        assert_eq!(kb.isr(KeyEvent::new(200, false)).unwrap(), None);
        assert_eq!(kb.isr(KeyEvent::new(0, true)).unwrap(), None);
    }

    #[test]
    fn disk_driver_dispatches_file_commands() {
        let spec = MachineSpec::default();
        let mut driver = DiskDriver::new(FsDriver::new(BlockDevice::in_memory(&spec)));
        driver.driver_entry().unwrap();
        driver.isr(DiskRequest::Format).unwrap();
        driver
            .isr(DiskRequest::Create {
                name: "notes".into(),
            })
            .unwrap();
        driver
            .isr(DiskRequest::Write {
                name: "notes".into(),
                data: b"hello".to_vec(),
                binary: false,
            })
            .unwrap();
        let response = driver
            .isr(DiskRequest::Read {
                name: "notes".into(),
            })
            .unwrap();
        assert_eq!(response, DiskResponse::Data(b"hello".to_vec()));
        driver
            .isr(DiskRequest::Delete {
                name: "notes".into(),
            })
            .unwrap();
        assert!(driver
            .isr(DiskRequest::Read {
                name: "notes".into()
            })
            .is_err());
    }
}

//! Byte layouts for WASI preview-1 structs
//!
//! Every struct the guest exchanges through pointers has a fixed
//! little-endian layout. The codecs here are written against raw byte
//! buffers so the same code serves guest linear memory and the transfer
//! buffer of the cross-thread call frame. Out-of-bounds access returns
//! `Errno::Fault`, never panics.

use super::abi::{Errno, Eventrwflags, Eventtype, Fdflags, Filetype, Rights, Subclockflags};

/// Checked fixed-width reads and writes over a raw byte buffer.
pub struct MemoryView<'a> {
    bytes: &'a mut [u8],
}

impl<'a> MemoryView<'a> {
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn range(&self, offset: u32, len: usize) -> Result<std::ops::Range<usize>, Errno> {
        let start = offset as usize;
        let end = start.checked_add(len).ok_or(Errno::Fault)?;
        if end > self.bytes.len() {
            return Err(Errno::Fault);
        }
        Ok(start..end)
    }

    pub fn read_u8(&self, offset: u32) -> Result<u8, Errno> {
        let r = self.range(offset, 1)?;
        Ok(self.bytes[r.start])
    }

    pub fn read_u16(&self, offset: u32) -> Result<u16, Errno> {
        let r = self.range(offset, 2)?;
        Ok(u16::from_le_bytes(self.bytes[r].try_into().unwrap()))
    }

    pub fn read_u32(&self, offset: u32) -> Result<u32, Errno> {
        let r = self.range(offset, 4)?;
        Ok(u32::from_le_bytes(self.bytes[r].try_into().unwrap()))
    }

    pub fn read_u64(&self, offset: u32) -> Result<u64, Errno> {
        let r = self.range(offset, 8)?;
        Ok(u64::from_le_bytes(self.bytes[r].try_into().unwrap()))
    }

    pub fn read_bytes(&self, offset: u32, len: u32) -> Result<&[u8], Errno> {
        let r = self.range(offset, len as usize)?;
        Ok(&self.bytes[r])
    }

    pub fn write_u8(&mut self, offset: u32, value: u8) -> Result<(), Errno> {
        let r = self.range(offset, 1)?;
        self.bytes[r.start] = value;
        Ok(())
    }

    pub fn write_u16(&mut self, offset: u32, value: u16) -> Result<(), Errno> {
        let r = self.range(offset, 2)?;
        self.bytes[r].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn write_u32(&mut self, offset: u32, value: u32) -> Result<(), Errno> {
        let r = self.range(offset, 4)?;
        self.bytes[r].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn write_u64(&mut self, offset: u32, value: u64) -> Result<(), Errno> {
        let r = self.range(offset, 8)?;
        self.bytes[r].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn write_bytes(&mut self, offset: u32, data: &[u8]) -> Result<(), Errno> {
        let r = self.range(offset, data.len())?;
        self.bytes[r].copy_from_slice(data);
        Ok(())
    }
}

/// An `iovec` / `ciovec` entry (8 bytes: buf pointer, buf length)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Iovec {
    pub buf: u32,
    pub buf_len: u32,
}

impl Iovec {
    pub const SIZE: u32 = 8;

    /// Decode `count` iovec entries starting at `ptr`.
    pub fn decode_array(view: &MemoryView<'_>, ptr: u32, count: u32) -> Result<Vec<Iovec>, Errno> {
        let mut iovs = Vec::with_capacity(count as usize);
        for i in 0..count {
            let base = ptr
                .checked_add(i.checked_mul(Self::SIZE).ok_or(Errno::Fault)?)
                .ok_or(Errno::Fault)?;
            iovs.push(Iovec {
                buf: view.read_u32(base)?,
                buf_len: view.read_u32(base + 4)?,
            });
        }
        Ok(iovs)
    }
}

/// `fdstat` (24 bytes)
#[derive(Debug, Clone, Copy)]
pub struct Fdstat {
    pub filetype: Filetype,
    pub flags: Fdflags,
    pub rights_base: Rights,
    pub rights_inheriting: Rights,
}

impl Fdstat {
    pub const SIZE: usize = 24;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.filetype.code();
        buf[2..4].copy_from_slice(&self.flags.bits().to_le_bytes());
        buf[8..16].copy_from_slice(&self.rights_base.bits().to_le_bytes());
        buf[16..24].copy_from_slice(&self.rights_inheriting.bits().to_le_bytes());
        buf
    }
}

/// `filestat` (64 bytes)
#[derive(Debug, Clone, Copy)]
pub struct Filestat {
    pub dev: u64,
    pub ino: u64,
    pub filetype: Filetype,
    pub nlink: u64,
    pub size: u64,
    pub atim: u64,
    pub mtim: u64,
    pub ctim: u64,
}

impl Filestat {
    pub const SIZE: usize = 64;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..8].copy_from_slice(&self.dev.to_le_bytes());
        buf[8..16].copy_from_slice(&self.ino.to_le_bytes());
        buf[16] = self.filetype.code();
        buf[24..32].copy_from_slice(&self.nlink.to_le_bytes());
        buf[32..40].copy_from_slice(&self.size.to_le_bytes());
        buf[40..48].copy_from_slice(&self.atim.to_le_bytes());
        buf[48..56].copy_from_slice(&self.mtim.to_le_bytes());
        buf[56..64].copy_from_slice(&self.ctim.to_le_bytes());
        buf
    }
}

/// `dirent` header (24 bytes, followed by the entry name)
#[derive(Debug, Clone)]
pub struct Dirent {
    pub next_cookie: u64,
    pub ino: u64,
    pub filetype: Filetype,
    pub name: String,
}

impl Dirent {
    pub const HEADER_SIZE: usize = 24;

    /// Encoded size of this entry including the trailing name bytes.
    pub fn encoded_size(&self) -> usize {
        Self::HEADER_SIZE + self.name.len()
    }

    /// Append the encoded entry to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let mut header = [0u8; Self::HEADER_SIZE];
        header[0..8].copy_from_slice(&self.next_cookie.to_le_bytes());
        header[8..16].copy_from_slice(&self.ino.to_le_bytes());
        header[16..20].copy_from_slice(&(self.name.len() as u32).to_le_bytes());
        header[20] = self.filetype.code();
        out.extend_from_slice(&header);
        out.extend_from_slice(self.name.as_bytes());
    }
}

/// `prestat` (8 bytes): tag + directory-name length
#[derive(Debug, Clone, Copy)]
pub struct Prestat {
    pub name_len: u32,
}

impl Prestat {
    pub const SIZE: usize = 8;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = super::abi::PREOPENTYPE_DIR;
        buf[4..8].copy_from_slice(&self.name_len.to_le_bytes());
        buf
    }
}

/// A decoded poll subscription (wire size 48 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    pub userdata: u64,
    pub u: SubscriptionU,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionU {
    Clock {
        id: u32,
        timeout_ns: u64,
        precision_ns: u64,
        flags: Subclockflags,
    },
    FdRead {
        fd: u32,
    },
    FdWrite {
        fd: u32,
    },
}

impl Subscription {
    pub const SIZE: u32 = 48;

    pub fn decode(view: &MemoryView<'_>, ptr: u32) -> Result<Self, Errno> {
        let userdata = view.read_u64(ptr)?;
        let tag = view.read_u8(ptr + 8)?;
        let u = match tag {
            0 => SubscriptionU::Clock {
                id: view.read_u32(ptr + 16)?,
                timeout_ns: view.read_u64(ptr + 24)?,
                precision_ns: view.read_u64(ptr + 32)?,
                flags: Subclockflags::from_bits_truncate(view.read_u16(ptr + 40)?),
            },
            1 => SubscriptionU::FdRead {
                fd: view.read_u32(ptr + 16)?,
            },
            2 => SubscriptionU::FdWrite {
                fd: view.read_u32(ptr + 16)?,
            },
            _ => return Err(Errno::Inval),
        };
        Ok(Subscription { userdata, u })
    }

    pub fn decode_array(
        view: &MemoryView<'_>,
        ptr: u32,
        count: u32,
    ) -> Result<Vec<Subscription>, Errno> {
        let mut subs = Vec::with_capacity(count as usize);
        for i in 0..count {
            let base = ptr
                .checked_add(i.checked_mul(Self::SIZE).ok_or(Errno::Fault)?)
                .ok_or(Errno::Fault)?;
            subs.push(Self::decode(view, base)?);
        }
        Ok(subs)
    }

    /// Re-encode for the transfer buffer of the slow-path round trip.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let mut buf = [0u8; Self::SIZE as usize];
        buf[0..8].copy_from_slice(&self.userdata.to_le_bytes());
        match self.u {
            SubscriptionU::Clock {
                id,
                timeout_ns,
                precision_ns,
                flags,
            } => {
                buf[8] = 0;
                buf[16..20].copy_from_slice(&id.to_le_bytes());
                buf[24..32].copy_from_slice(&timeout_ns.to_le_bytes());
                buf[32..40].copy_from_slice(&precision_ns.to_le_bytes());
                buf[40..42].copy_from_slice(&flags.bits().to_le_bytes());
            }
            SubscriptionU::FdRead { fd } => {
                buf[8] = 1;
                buf[16..20].copy_from_slice(&fd.to_le_bytes());
            }
            SubscriptionU::FdWrite { fd } => {
                buf[8] = 2;
                buf[16..20].copy_from_slice(&fd.to_le_bytes());
            }
        }
        out.extend_from_slice(&buf);
    }
}

/// A poll event (wire size 32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub userdata: u64,
    pub errno: Errno,
    pub kind: Eventtype,
    /// Bytes available for fd_read/fd_write events
    pub nbytes: u64,
    pub flags: Eventrwflags,
}

impl Event {
    pub const SIZE: usize = 32;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..8].copy_from_slice(&self.userdata.to_le_bytes());
        buf[8..10].copy_from_slice(&self.errno.code().to_le_bytes());
        buf[10] = self.kind.code();
        buf[16..24].copy_from_slice(&self.nbytes.to_le_bytes());
        buf[24..26].copy_from_slice(&self.flags.bits().to_le_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Errno> {
        if bytes.len() < Self::SIZE {
            return Err(Errno::Fault);
        }
        let kind = match bytes[10] {
            0 => Eventtype::Clock,
            1 => Eventtype::FdRead,
            2 => Eventtype::FdWrite,
            _ => return Err(Errno::Badmsg),
        };
        Ok(Event {
            userdata: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            errno: Errno::from_raw(u16::from_le_bytes(bytes[8..10].try_into().unwrap())),
            kind,
            nbytes: u64::from_le_bytes(bytes[16..24].try_into().unwrap()),
            flags: Eventrwflags::from_bits_truncate(u16::from_le_bytes(
                bytes[24..26].try_into().unwrap(),
            )),
        })
    }
}

//! Core types for the file protocol.

use super::packet::{DecodeError, EncodeError, PacketReader, PacketWriter};

/// The only protocol version spoken.
pub const PROTOCOL_VERSION: u32 = 3;

/// Largest READ a client issues in one request.
pub const MAX_READ_BLOCK_LENGTH: u32 = 32 * 1024;

/// Largest WRITE a client issues in one request.
pub const MAX_WRITE_BLOCK_LENGTH: u32 = 32 * 1024;

/// Extension names.
pub mod extension {
    pub const HARDLINK: &str = "hardlink@openssh.com";
    pub const POSIX_RENAME: &str = "posix-rename@openssh.com";
    pub const STATVFS: &str = "statvfs@openssh.com";
    pub const COPY_DATA: &str = "copy-data";
    pub const CHECK_FILE_HANDLE: &str = "check-file-handle";

    /// Advertised in VERSION, each with value "1".
    pub const ADVERTISED: [&str; 5] = [HARDLINK, POSIX_RENAME, STATVFS, COPY_DATA, CHECK_FILE_HANDLE];
}

/// Status codes carried in STATUS packets.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok = 0,
    Eof = 1,
    NoSuchFile = 2,
    PermissionDenied = 3,
    Failure = 4,
    BadMessage = 5,
    NoConnection = 6,
    ConnectionLost = 7,
    OpUnsupported = 8,
}

impl StatusCode {
    /// Unknown codes collapse to `Failure`.
    pub fn from_u32(v: u32) -> Self {
        match v {
            0 => StatusCode::Ok,
            1 => StatusCode::Eof,
            2 => StatusCode::NoSuchFile,
            3 => StatusCode::PermissionDenied,
            4 => StatusCode::Failure,
            5 => StatusCode::BadMessage,
            6 => StatusCode::NoConnection,
            7 => StatusCode::ConnectionLost,
            8 => StatusCode::OpUnsupported,
            _ => StatusCode::Failure,
        }
    }

    /// Default human-readable message.
    pub fn message(self) -> &'static str {
        match self {
            StatusCode::Ok => "Success",
            StatusCode::Eof => "End of file",
            StatusCode::NoSuchFile => "No such file",
            StatusCode::PermissionDenied => "Permission denied",
            StatusCode::Failure => "Failure",
            StatusCode::BadMessage => "Bad message",
            StatusCode::NoConnection => "No connection",
            StatusCode::ConnectionLost => "Connection lost",
            StatusCode::OpUnsupported => "Operation unsupported",
        }
    }
}

/// Attribute flag bits (protocol version 3).
pub mod attr_flags {
    pub const SIZE: u32 = 0x0000_0001;
    pub const UIDGID: u32 = 0x0000_0002;
    pub const PERMISSIONS: u32 = 0x0000_0004;
    pub const ACMODTIME: u32 = 0x0000_0008;
    pub const EXTENDED: u32 = 0x8000_0000;
}

/// Extended attribute pair carrying the 512-byte block count.
pub const BLOCKS_EXTENSION: &str = "blocks";

/// File attributes. Every field is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAttrs {
    pub size: Option<u64>,
    /// Owner as (uid, gid); the protocol only carries both together.
    pub owner: Option<(u32, u32)>,
    /// Full st_mode, including the file type bits.
    pub permissions: Option<u32>,
    /// (atime, mtime) in seconds since the epoch.
    pub times: Option<(u32, u32)>,
    pub extended: Vec<(String, String)>,
}

impl FileAttrs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_permissions(mut self, mode: u32) -> Self {
        self.permissions = Some(mode);
        self
    }

    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.owner = Some((uid, gid));
        self
    }

    pub fn with_times(mut self, atime: u32, mtime: u32) -> Self {
        self.times = Some((atime, mtime));
        self
    }

    /// Block count from the `blocks` extended pair, if present.
    pub fn blocks(&self) -> Option<u64> {
        self.extended
            .iter()
            .find(|(name, _)| name == BLOCKS_EXTENSION)
            .and_then(|(_, value)| value.parse().ok())
    }

    pub fn set_blocks(&mut self, blocks: u64) {
        self.extended.retain(|(name, _)| name != BLOCKS_EXTENSION);
        self.extended
            .push((BLOCKS_EXTENSION.to_string(), blocks.to_string()));
    }

    pub fn file_type(&self) -> u8 {
        self.permissions.map(file_type::from_mode).unwrap_or(file_type::UNKNOWN)
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == file_type::DIR
    }

    pub fn is_file(&self) -> bool {
        self.file_type() == file_type::REG
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == file_type::LNK
    }

    pub fn flags(&self) -> u32 {
        let mut flags = 0;
        if self.size.is_some() {
            flags |= attr_flags::SIZE;
        }
        if self.owner.is_some() {
            flags |= attr_flags::UIDGID;
        }
        if self.permissions.is_some() {
            flags |= attr_flags::PERMISSIONS;
        }
        if self.times.is_some() {
            flags |= attr_flags::ACMODTIME;
        }
        if !self.extended.is_empty() {
            flags |= attr_flags::EXTENDED;
        }
        flags
    }

    /// Encoded size in bytes.
    pub fn wire_len(&self) -> usize {
        let mut len = 4;
        if self.size.is_some() {
            len += 8;
        }
        if self.owner.is_some() {
            len += 8;
        }
        if self.permissions.is_some() {
            len += 4;
        }
        if self.times.is_some() {
            len += 8;
        }
        if !self.extended.is_empty() {
            len += 4;
            len += self
                .extended
                .iter()
                .map(|(name, value)| 8 + name.len() + value.len())
                .sum::<usize>();
        }
        len
    }

    pub fn encode(&self, w: &mut PacketWriter) -> Result<(), EncodeError> {
        w.write_u32(self.flags())?;
        if let Some(size) = self.size {
            w.write_u64(size)?;
        }
        if let Some((uid, gid)) = self.owner {
            w.write_u32(uid)?;
            w.write_u32(gid)?;
        }
        if let Some(mode) = self.permissions {
            w.write_u32(mode)?;
        }
        if let Some((atime, mtime)) = self.times {
            w.write_u32(atime)?;
            w.write_u32(mtime)?;
        }
        if !self.extended.is_empty() {
            w.write_u32(self.extended.len() as u32)?;
            for (name, value) in &self.extended {
                w.write_string(name)?;
                w.write_string(value)?;
            }
        }
        Ok(())
    }

    pub fn decode(r: &mut PacketReader<'_>) -> Result<Self, DecodeError> {
        let flags = r.read_u32()?;
        let mut attrs = FileAttrs::default();
        if flags & attr_flags::SIZE != 0 {
            attrs.size = Some(r.read_u64()?);
        }
        if flags & attr_flags::UIDGID != 0 {
            attrs.owner = Some((r.read_u32()?, r.read_u32()?));
        }
        if flags & attr_flags::PERMISSIONS != 0 {
            attrs.permissions = Some(r.read_u32()?);
        }
        if flags & attr_flags::ACMODTIME != 0 {
            attrs.times = Some((r.read_u32()?, r.read_u32()?));
        }
        if flags & attr_flags::EXTENDED != 0 {
            let count = r.read_u32()?;
            for _ in 0..count {
                let name = r.read_string()?;
                let value = r.read_string()?;
                attrs.extended.push((name, value));
            }
        }
        Ok(attrs)
    }
}

/// One directory entry in a NAME response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub filename: String,
    pub longname: String,
    pub attrs: FileAttrs,
}

impl Item {
    /// Build an entry with an `ls -l` style long name.
    pub fn new(filename: impl Into<String>, attrs: FileAttrs) -> Self {
        let filename = filename.into();
        let longname = longname(&filename, &attrs);
        Self {
            filename,
            longname,
            attrs,
        }
    }

    /// Encoded size in bytes.
    pub fn wire_len(&self) -> usize {
        8 + self.filename.len() + self.longname.len() + self.attrs.wire_len()
    }

    pub fn encode(&self, w: &mut PacketWriter) -> Result<(), EncodeError> {
        w.write_string(&self.filename)?;
        w.write_string(&self.longname)?;
        self.attrs.encode(w)
    }

    pub fn decode(r: &mut PacketReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            filename: r.read_string()?,
            longname: r.read_string()?,
            attrs: FileAttrs::decode(r)?,
        })
    }
}

fn longname(filename: &str, attrs: &FileAttrs) -> String {
    let mode = attrs.permissions.unwrap_or(0);
    let kind = match file_type::from_mode(mode) {
        file_type::DIR => 'd',
        file_type::LNK => 'l',
        file_type::CHR => 'c',
        file_type::BLK => 'b',
        file_type::FIFO => 'p',
        file_type::SOCK => 's',
        _ => '-',
    };
    let mut perms = String::with_capacity(10);
    perms.push(kind);
    for shift in [6u32, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        perms.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        perms.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        perms.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    let (uid, gid) = attrs.owner.unwrap_or((0, 0));
    format!(
        "{} 1 {} {} {} {}",
        perms,
        uid,
        gid,
        attrs.size.unwrap_or(0),
        filename
    )
}

/// Filesystem statistics (statvfs extension).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VfsStats {
    pub bsize: u64,
    pub frsize: u64,
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub favail: u64,
    pub fsid: u64,
    pub flag: u64,
    pub namemax: u64,
}

impl VfsStats {
    pub fn encode(&self, w: &mut PacketWriter) -> Result<(), EncodeError> {
        for v in [
            self.bsize,
            self.frsize,
            self.blocks,
            self.bfree,
            self.bavail,
            self.files,
            self.ffree,
            self.favail,
            self.fsid,
            self.flag,
            self.namemax,
        ] {
            w.write_u64(v)?;
        }
        Ok(())
    }

    pub fn decode(r: &mut PacketReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            bsize: r.read_u64()?,
            frsize: r.read_u64()?,
            blocks: r.read_u64()?,
            bfree: r.read_u64()?,
            bavail: r.read_u64()?,
            files: r.read_u64()?,
            ffree: r.read_u64()?,
            favail: r.read_u64()?,
            fsid: r.read_u64()?,
            flag: r.read_u64()?,
            namemax: r.read_u64()?,
        })
    }
}

/// SFTP open flags (`pflags`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct OpenFlags(u32);

impl OpenFlags {
    pub const READ: OpenFlags = OpenFlags(0x01);
    pub const WRITE: OpenFlags = OpenFlags(0x02);
    pub const APPEND: OpenFlags = OpenFlags(0x04);
    pub const CREATE: OpenFlags = OpenFlags(0x08);
    pub const TRUNC: OpenFlags = OpenFlags(0x10);
    pub const EXCL: OpenFlags = OpenFlags(0x20);
    const ALL: u32 = 0x3f;

    pub const fn empty() -> Self {
        OpenFlags(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        OpenFlags(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: OpenFlags) -> Self {
        OpenFlags(self.0 | other.0)
    }

    pub const fn remove(self, other: OpenFlags) -> Self {
        OpenFlags(self.0 & !other.0)
    }

    /// Translate POSIX `open(2)` flags.
    pub fn from_posix(flags: i32) -> Self {
        let mut out = match flags & libc::O_ACCMODE {
            libc::O_WRONLY => OpenFlags::WRITE,
            libc::O_RDWR => OpenFlags::READ | OpenFlags::WRITE,
            _ => OpenFlags::READ,
        };
        if flags & libc::O_APPEND != 0 {
            out = out | OpenFlags::APPEND;
        }
        if flags & libc::O_CREAT != 0 {
            out = out | OpenFlags::CREATE;
        }
        if flags & libc::O_TRUNC != 0 {
            out = out | OpenFlags::TRUNC;
        }
        if flags & libc::O_EXCL != 0 {
            out = out | OpenFlags::EXCL;
        }
        out
    }
}

impl std::ops::BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        self.union(rhs)
    }
}

/// Backend open modes, in `fopen` terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpenMode {
    /// `r`
    Read,
    /// `r+`
    ReadWrite,
    /// `w`
    WriteTruncate,
    /// `wx`
    WriteCreateNew,
    /// `w+`
    ReadWriteTruncate,
    /// `wx+`
    ReadWriteCreateNew,
    /// `a`
    Append,
    /// `ax`
    AppendCreateNew,
    /// `a+`
    ReadAppend,
    /// `ax+`
    ReadAppendCreateNew,
}

impl OpenMode {
    pub fn as_str(self) -> &'static str {
        match self {
            OpenMode::Read => "r",
            OpenMode::ReadWrite => "r+",
            OpenMode::WriteTruncate => "w",
            OpenMode::WriteCreateNew => "wx",
            OpenMode::ReadWriteTruncate => "w+",
            OpenMode::ReadWriteCreateNew => "wx+",
            OpenMode::Append => "a",
            OpenMode::AppendCreateNew => "ax",
            OpenMode::ReadAppend => "a+",
            OpenMode::ReadAppendCreateNew => "ax+",
        }
    }

    pub fn is_writable(self) -> bool {
        !matches!(self, OpenMode::Read)
    }

    /// Backend modes that together realize `flags`.
    ///
    /// The server opens with each mode in turn, closing the handle between
    /// attempts, and hands the last one to the client. An earlier mode only
    /// exists for its side effect (creating or truncating the file). An empty
    /// list means the combination cannot be expressed.
    pub fn candidates(flags: OpenFlags) -> Vec<OpenMode> {
        use OpenMode::*;

        if flags.bits() & !OpenFlags::ALL != 0 {
            return Vec::new();
        }

        let mut f = flags;
        // Exclusive creation never truncates; truncation overrides append.
        if f.contains(OpenFlags::EXCL) {
            f = f.remove(OpenFlags::TRUNC);
        }
        if f.contains(OpenFlags::TRUNC) {
            f = f.remove(OpenFlags::APPEND);
        }
        if !f.contains(OpenFlags::READ) && !f.contains(OpenFlags::WRITE) {
            f = f | OpenFlags::READ;
        }

        let read = f.contains(OpenFlags::READ);
        let write = f.contains(OpenFlags::WRITE);
        let append = f.contains(OpenFlags::APPEND);
        let create = f.contains(OpenFlags::CREATE);
        let trunc = f.contains(OpenFlags::TRUNC);
        let excl = f.contains(OpenFlags::EXCL);

        if !write {
            return match (create, excl) {
                (false, _) => vec![Read],
                (true, false) => vec![Append, Read],
                (true, true) => vec![AppendCreateNew, Read],
            };
        }

        match (create, excl, trunc, append) {
            (true, true, _, false) => vec![if read { ReadWriteCreateNew } else { WriteCreateNew }],
            (true, true, _, true) => vec![if read { ReadAppendCreateNew } else { AppendCreateNew }],
            (true, false, true, _) => vec![if read { ReadWriteTruncate } else { WriteTruncate }],
            (true, false, false, true) => vec![if read { ReadAppend } else { Append }],
            (true, false, false, false) => vec![if read { ReadAppend } else { Append }, ReadWrite],
            // Without CREATE a missing file must fail, so open r+ first.
            (false, _, true, _) => vec![ReadWrite, if read { ReadWriteTruncate } else { WriteTruncate }],
            (false, _, false, _) => vec![ReadWrite],
        }
    }
}

/// File type constants matching dirent d_type values.
pub mod file_type {
    pub const UNKNOWN: u8 = 0;
    pub const FIFO: u8 = 1;
    pub const CHR: u8 = 2;
    pub const DIR: u8 = 4;
    pub const BLK: u8 = 6;
    pub const REG: u8 = 8;
    pub const LNK: u8 = 10;
    pub const SOCK: u8 = 12;

    /// Convert from stat mode to file type.
    pub fn from_mode(mode: u32) -> u8 {
        match mode & libc::S_IFMT as u32 {
            x if x == libc::S_IFDIR as u32 => DIR,
            x if x == libc::S_IFREG as u32 => REG,
            x if x == libc::S_IFLNK as u32 => LNK,
            x if x == libc::S_IFCHR as u32 => CHR,
            x if x == libc::S_IFBLK as u32 => BLK,
            x if x == libc::S_IFIFO as u32 => FIFO,
            x if x == libc::S_IFSOCK as u32 => SOCK,
            _ => UNKNOWN,
        }
    }
}

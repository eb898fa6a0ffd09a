//! Client-to-server requests.

use super::packet::{frame, DecodeError, EncodeError, Packet, PacketKind, PacketType, PacketWriter};
use super::types::{extension, FileAttrs, OpenFlags};

/// Requests from client to server.
///
/// Each variant corresponds to one opcode or one named extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Init {
        version: u32,
    },
    Open {
        path: String,
        flags: OpenFlags,
        attrs: FileAttrs,
    },
    Close {
        handle: u32,
    },
    Read {
        handle: u32,
        offset: u64,
        len: u32,
    },
    Write {
        handle: u32,
        offset: u64,
        data: Vec<u8>,
    },
    Lstat {
        path: String,
    },
    Fstat {
        handle: u32,
    },
    Setstat {
        path: String,
        attrs: FileAttrs,
    },
    Fsetstat {
        handle: u32,
        attrs: FileAttrs,
    },
    Opendir {
        path: String,
    },
    Readdir {
        handle: u32,
    },
    Remove {
        path: String,
    },
    Mkdir {
        path: String,
        attrs: FileAttrs,
    },
    Rmdir {
        path: String,
    },
    Realpath {
        path: String,
    },
    Stat {
        path: String,
    },
    /// Plain rename: fails if `new_path` exists.
    Rename {
        old_path: String,
        new_path: String,
    },
    Readlink {
        path: String,
    },
    Symlink {
        link_path: String,
        target_path: String,
    },
    /// `hardlink@openssh.com`
    Link {
        old_path: String,
        new_path: String,
    },
    /// `posix-rename@openssh.com`: replaces `new_path`.
    PosixRename {
        old_path: String,
        new_path: String,
    },
    /// `statvfs@openssh.com`
    Statvfs {
        path: String,
    },
    /// `copy-data`
    CopyData {
        from_handle: u32,
        from_offset: u64,
        len: u64,
        to_handle: u32,
        to_offset: u64,
    },
    /// `check-file-handle`
    CheckFileHandle {
        handle: u32,
        algorithms: String,
        offset: u64,
        len: u64,
        block_size: u32,
    },
    /// An extension we do not implement.
    Unsupported {
        name: String,
    },
}

impl Request {
    /// Get the operation name for logging.
    pub fn op_name(&self) -> &'static str {
        match self {
            Request::Init { .. } => "init",
            Request::Open { .. } => "open",
            Request::Close { .. } => "close",
            Request::Read { .. } => "read",
            Request::Write { .. } => "write",
            Request::Lstat { .. } => "lstat",
            Request::Fstat { .. } => "fstat",
            Request::Setstat { .. } => "setstat",
            Request::Fsetstat { .. } => "fsetstat",
            Request::Opendir { .. } => "opendir",
            Request::Readdir { .. } => "readdir",
            Request::Remove { .. } => "remove",
            Request::Mkdir { .. } => "mkdir",
            Request::Rmdir { .. } => "rmdir",
            Request::Realpath { .. } => "realpath",
            Request::Stat { .. } => "stat",
            Request::Rename { .. } => "rename",
            Request::Readlink { .. } => "readlink",
            Request::Symlink { .. } => "symlink",
            Request::Link { .. } => "link",
            Request::PosixRename { .. } => "posix_rename",
            Request::Statvfs { .. } => "statvfs",
            Request::CopyData { .. } => "copy_data",
            Request::CheckFileHandle { .. } => "check_file_handle",
            Request::Unsupported { .. } => "unsupported",
        }
    }

    /// Packet kind this request travels as.
    pub fn kind(&self) -> PacketKind {
        use PacketType as T;
        let builtin = |t| PacketKind::Builtin(t);
        let ext = |name: &str| PacketKind::Extended(name.to_string());
        match self {
            Request::Init { .. } => builtin(T::Init),
            Request::Open { .. } => builtin(T::Open),
            Request::Close { .. } => builtin(T::Close),
            Request::Read { .. } => builtin(T::Read),
            Request::Write { .. } => builtin(T::Write),
            Request::Lstat { .. } => builtin(T::Lstat),
            Request::Fstat { .. } => builtin(T::Fstat),
            Request::Setstat { .. } => builtin(T::Setstat),
            Request::Fsetstat { .. } => builtin(T::Fsetstat),
            Request::Opendir { .. } => builtin(T::Opendir),
            Request::Readdir { .. } => builtin(T::Readdir),
            Request::Remove { .. } => builtin(T::Remove),
            Request::Mkdir { .. } => builtin(T::Mkdir),
            Request::Rmdir { .. } => builtin(T::Rmdir),
            Request::Realpath { .. } => builtin(T::Realpath),
            Request::Stat { .. } => builtin(T::Stat),
            Request::Rename { .. } => builtin(T::Rename),
            Request::Readlink { .. } => builtin(T::Readlink),
            Request::Symlink { .. } => builtin(T::Symlink),
            Request::Link { .. } => ext(extension::HARDLINK),
            Request::PosixRename { .. } => ext(extension::POSIX_RENAME),
            Request::Statvfs { .. } => ext(extension::STATVFS),
            Request::CopyData { .. } => ext(extension::COPY_DATA),
            Request::CheckFileHandle { .. } => ext(extension::CHECK_FILE_HANDLE),
            Request::Unsupported { name } => ext(name),
        }
    }

    /// Frame this request. `id` is ignored for INIT.
    pub fn encode(&self, id: u32, max_size: usize) -> Result<Vec<u8>, EncodeError> {
        let kind = self.kind();
        let id = kind.opcode().has_request_id().then_some(id);
        frame(&kind, id, max_size, |w| self.encode_body(w))
    }

    fn encode_body(&self, w: &mut PacketWriter) -> Result<(), EncodeError> {
        match self {
            Request::Init { version } => w.write_u32(*version),
            Request::Open { path, flags, attrs } => {
                w.write_string(path)?;
                w.write_u32(flags.bits())?;
                attrs.encode(w)
            }
            Request::Close { handle }
            | Request::Fstat { handle }
            | Request::Readdir { handle } => w.write_handle(*handle),
            Request::Read {
                handle,
                offset,
                len,
            } => {
                w.write_handle(*handle)?;
                w.write_u64(*offset)?;
                w.write_u32(*len)
            }
            Request::Write {
                handle,
                offset,
                data,
            } => {
                w.write_handle(*handle)?;
                w.write_u64(*offset)?;
                w.write_data(data)
            }
            Request::Lstat { path }
            | Request::Opendir { path }
            | Request::Remove { path }
            | Request::Rmdir { path }
            | Request::Realpath { path }
            | Request::Stat { path }
            | Request::Readlink { path }
            | Request::Statvfs { path } => w.write_string(path),
            Request::Setstat { path, attrs } | Request::Mkdir { path, attrs } => {
                w.write_string(path)?;
                attrs.encode(w)
            }
            Request::Fsetstat { handle, attrs } => {
                w.write_handle(*handle)?;
                attrs.encode(w)
            }
            Request::Rename { old_path, new_path }
            | Request::Link { old_path, new_path }
            | Request::PosixRename { old_path, new_path } => {
                w.write_string(old_path)?;
                w.write_string(new_path)
            }
            Request::Symlink {
                link_path,
                target_path,
            } => {
                w.write_string(link_path)?;
                w.write_string(target_path)
            }
            Request::CopyData {
                from_handle,
                from_offset,
                len,
                to_handle,
                to_offset,
            } => {
                w.write_handle(*from_handle)?;
                w.write_u64(*from_offset)?;
                w.write_u64(*len)?;
                w.write_handle(*to_handle)?;
                w.write_u64(*to_offset)
            }
            Request::CheckFileHandle {
                handle,
                algorithms,
                offset,
                len,
                block_size,
            } => {
                w.write_handle(*handle)?;
                w.write_string(algorithms)?;
                w.write_u64(*offset)?;
                w.write_u64(*len)?;
                w.write_u32(*block_size)
            }
            Request::Unsupported { .. } => Ok(()),
        }
    }

    /// Decode the payload of a request packet.
    pub fn decode(packet: &Packet) -> Result<Self, DecodeError> {
        let mut r = packet.reader();
        let request = match &packet.kind {
            PacketKind::Extended(name) => match name.as_str() {
                extension::HARDLINK => Request::Link {
                    old_path: r.read_string()?,
                    new_path: r.read_string()?,
                },
                extension::POSIX_RENAME => Request::PosixRename {
                    old_path: r.read_string()?,
                    new_path: r.read_string()?,
                },
                extension::STATVFS => Request::Statvfs {
                    path: r.read_string()?,
                },
                extension::COPY_DATA => Request::CopyData {
                    from_handle: r.read_handle()?,
                    from_offset: r.read_u64()?,
                    len: r.read_u64()?,
                    to_handle: r.read_handle()?,
                    to_offset: r.read_u64()?,
                },
                extension::CHECK_FILE_HANDLE => Request::CheckFileHandle {
                    handle: r.read_handle()?,
                    algorithms: r.read_string()?,
                    offset: r.read_u64()?,
                    len: r.read_u64()?,
                    block_size: r.read_u32()?,
                },
                other => Request::Unsupported {
                    name: other.to_string(),
                },
            },
            PacketKind::Builtin(t) => match t {
                PacketType::Init => Request::Init {
                    version: r.read_u32()?,
                },
                PacketType::Open => Request::Open {
                    path: r.read_string()?,
                    flags: OpenFlags::from_bits(r.read_u32()?),
                    attrs: FileAttrs::decode(&mut r)?,
                },
                PacketType::Close => Request::Close {
                    handle: r.read_handle()?,
                },
                PacketType::Read => Request::Read {
                    handle: r.read_handle()?,
                    offset: r.read_u64()?,
                    len: r.read_u32()?,
                },
                PacketType::Write => Request::Write {
                    handle: r.read_handle()?,
                    offset: r.read_u64()?,
                    data: r.read_data_owned()?,
                },
                PacketType::Lstat => Request::Lstat {
                    path: r.read_string()?,
                },
                PacketType::Fstat => Request::Fstat {
                    handle: r.read_handle()?,
                },
                PacketType::Setstat => Request::Setstat {
                    path: r.read_string()?,
                    attrs: FileAttrs::decode(&mut r)?,
                },
                PacketType::Fsetstat => Request::Fsetstat {
                    handle: r.read_handle()?,
                    attrs: FileAttrs::decode(&mut r)?,
                },
                PacketType::Opendir => Request::Opendir {
                    path: r.read_string()?,
                },
                PacketType::Readdir => Request::Readdir {
                    handle: r.read_handle()?,
                },
                PacketType::Remove => Request::Remove {
                    path: r.read_string()?,
                },
                PacketType::Mkdir => Request::Mkdir {
                    path: r.read_string()?,
                    attrs: FileAttrs::decode(&mut r)?,
                },
                PacketType::Rmdir => Request::Rmdir {
                    path: r.read_string()?,
                },
                PacketType::Realpath => Request::Realpath {
                    path: r.read_string()?,
                },
                PacketType::Stat => Request::Stat {
                    path: r.read_string()?,
                },
                PacketType::Rename => Request::Rename {
                    old_path: r.read_string()?,
                    new_path: r.read_string()?,
                },
                PacketType::Readlink => Request::Readlink {
                    path: r.read_string()?,
                },
                PacketType::Symlink => Request::Symlink {
                    link_path: r.read_string()?,
                    target_path: r.read_string()?,
                },
                other => {
                    return Err(DecodeError::InvalidPacket(format!(
                        "{:?} is not a request",
                        other
                    )))
                }
            },
        };
        Ok(request)
    }
}

//! Typed references to server handles.

/// What a handle denotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    File,
    Directory,
}

/// An open file or directory on the server.
///
/// Valid from the `open`/`opendir` that produced it until `close`. Using it
/// afterwards fails locally with [`SftpError::InvalidHandle`].
///
/// [`SftpError::InvalidHandle`]: super::SftpError::InvalidHandle
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Handle {
    raw: u32,
    kind: HandleKind,
}

impl Handle {
    pub(crate) fn new(raw: u32, kind: HandleKind) -> Self {
        Self { raw, kind }
    }

    /// The server-assigned id.
    pub fn raw(&self) -> u32 {
        self.raw
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    pub fn is_directory(&self) -> bool {
        self.kind == HandleKind::Directory
    }

    /// Synthetic descriptor number for the OS integration layer.
    ///
    /// Server handles are unique per connection, so the raw id doubles as
    /// the descriptor.
    pub fn to_file_descriptor(&self) -> u64 {
        u64::from(self.raw)
    }
}

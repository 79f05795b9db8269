//! Large object handles.
//!
//! A handle is only meaningful inside the transaction that opened it. It
//! snapshots the connection's generation counter at open time; once the
//! connection commits or rolls back the counter moves on and every
//! operation on the handle fails, without a server round trip.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use bytes::{Bytes, BytesMut};

use super::connection::{Connection, ConnectionState};
use super::protocol::{LargeObjectBackend, Whence, INV_READ, INV_WRITE};
use super::types::Oid;
use crate::error::{Error, Result};

const READ_CHUNK: usize = 8192;

/// Open mode of a large object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoMode {
    Read,
    Write,
    ReadWrite,
    /// Create or reference the object without opening a descriptor.
    New,
}

impl LoMode {
    /// Flags passed to `lo_open`; 0 for [`LoMode::New`].
    pub fn flags(self) -> i32 {
        match self {
            LoMode::Read => INV_READ,
            LoMode::Write => INV_WRITE,
            LoMode::ReadWrite => INV_READ | INV_WRITE,
            LoMode::New => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LoMode::Read => "r",
            LoMode::Write => "w",
            LoMode::ReadWrite => "rw",
            LoMode::New => "n",
        }
    }
}

impl FromStr for LoMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "r" => Ok(LoMode::Read),
            "w" => Ok(LoMode::Write),
            "rw" | "wr" => Ok(LoMode::ReadWrite),
            "n" => Ok(LoMode::New),
            _ => Err(Error::programming(format!("invalid large object mode: {s:?}"))),
        }
    }
}

impl fmt::Display for LoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An open server-side large object.
pub struct LargeObject {
    conn: Connection,
    oid: Oid,
    /// `None` for mode `"n"`.
    fd: Option<i32>,
    mode: LoMode,
    closed: bool,
    /// Connection generation at open time.
    mark: u64,
}

impl LargeObject {
    /// Open or create a large object.
    ///
    /// With `oid` set the existing object is opened. Otherwise a new one is
    /// created: imported from `import_path` when given, else with the id
    /// `new_oid` (or one the server picks). Mode `"n"` stops after creation
    /// without opening a descriptor.
    ///
    /// Fails with an interface error on a connection in autocommit mode.
    pub fn open(
        conn: &Connection,
        oid: Option<Oid>,
        mode: &str,
        new_oid: Option<Oid>,
        import_path: Option<&Path>,
    ) -> Result<Self> {
        let mut state = conn.lock();
        state.ensure_open()?;
        if state.isolation_level.is_autocommit() {
            return Err(Error::interface(
                "can't use a large object outside of transactions",
            ));
        }
        let mode: LoMode = mode.parse()?;
        state.begin_if_needed()?;

        let oid = match (oid, import_path) {
            (Some(oid), _) => oid,
            (None, Some(path)) => state.backend.lo_import(path)?,
            (None, None) => state.backend.lo_create(new_oid)?,
        };
        let fd = match mode {
            LoMode::New => None,
            _ => Some(state.backend.lo_open(oid, mode.flags())?),
        };
        let mark = state.generation;
        tracing::debug!(oid = %oid, mode = mode.as_str(), ?fd, mark, "Large object opened");

        Ok(Self {
            conn: conn.clone(),
            oid,
            fd,
            mode,
            closed: false,
            mark,
        })
    }

    pub fn oid(&self) -> Oid {
        self.oid
    }

    pub fn mode(&self) -> LoMode {
        self.mode
    }

    /// Generation of the transaction this handle belongs to.
    pub fn mark(&self) -> u64 {
        self.mark
    }

    /// Closed explicitly, or its connection is closed.
    pub fn is_closed(&self) -> bool {
        self.closed || self.conn.is_closed()
    }

    /// Open, and the transaction that opened it is still current.
    pub fn is_valid(&self) -> bool {
        let state = self.conn.lock();
        self.check(&state).is_ok()
    }

    fn check(&self, state: &ConnectionState) -> Result<()> {
        if self.closed || state.closed {
            return Err(Error::interface("large object already closed"));
        }
        if state.generation != self.mark {
            return Err(Error::interface("large object isn't valid anymore"));
        }
        Ok(())
    }

    fn descriptor(&self) -> Result<i32> {
        self.fd
            .ok_or_else(|| Error::interface("large object not opened for I/O"))
    }

    /// Run `op` on the descriptor after the validity checks.
    fn with_descriptor<T>(
        &self,
        op: impl FnOnce(&mut ConnectionState, i32) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.conn.lock();
        self.check(&state)?;
        let fd = self.descriptor()?;
        op(&mut *state, fd)
    }

    /// Read up to `len` bytes from the current position.
    pub fn read(&self, len: usize) -> Result<Bytes> {
        self.with_descriptor(|state, fd| Ok(state.backend.lo_read(fd, len)?))
    }

    /// Read from the current position to the end of the object.
    pub fn read_to_end(&self) -> Result<Bytes> {
        self.with_descriptor(|state, fd| {
            let mut out = BytesMut::new();
            loop {
                let chunk = state.backend.lo_read(fd, READ_CHUNK)?;
                if chunk.is_empty() {
                    break;
                }
                out.extend_from_slice(&chunk);
            }
            Ok(out.freeze())
        })
    }

    /// Write `data` at the current position; returns the bytes written.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        self.with_descriptor(|state, fd| Ok(state.backend.lo_write(fd, data)?))
    }

    /// Move the position; returns the new absolute position.
    pub fn seek(&self, offset: i64, whence: Whence) -> Result<i64> {
        self.with_descriptor(|state, fd| Ok(state.backend.lo_lseek(fd, offset, whence)?))
    }

    pub fn tell(&self) -> Result<i64> {
        self.with_descriptor(|state, fd| Ok(state.backend.lo_tell(fd)?))
    }

    /// Close the descriptor. Idempotent; the object itself is kept.
    ///
    /// A handle whose transaction already ended has nothing left to close
    /// on the server, so no round trip is made.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut state = self.conn.lock();
        if state.closed || state.generation != self.mark {
            tracing::trace!(oid = %self.oid, "Large object closed after its transaction ended");
            return Ok(());
        }
        if let Some(fd) = self.fd.take() {
            state.backend.lo_close(fd)?;
        }
        tracing::debug!(oid = %self.oid, "Large object closed");
        Ok(())
    }

    /// Delete the object on the server and close the handle.
    pub fn unlink(&mut self) -> Result<()> {
        {
            let mut state = self.conn.lock();
            self.check(&state)?;
            if let Some(fd) = self.fd.take() {
                state.backend.lo_close(fd)?;
            }
            state.backend.lo_unlink(self.oid)?;
        }
        self.closed = true;
        tracing::debug!(oid = %self.oid, "Large object unlinked");
        Ok(())
    }

    /// Write the object's whole content to a client-side file.
    pub fn export(&self, path: &Path) -> Result<()> {
        let mut state = self.conn.lock();
        self.check(&state)?;
        state.backend.lo_export(self.oid, path)?;
        tracing::debug!(oid = %self.oid, path = %path.display(), "Large object exported");
        Ok(())
    }
}

impl Drop for LargeObject {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(oid = %self.oid, error = %err, "Failed to close large object");
        }
    }
}

impl fmt::Debug for LargeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LargeObject")
            .field("oid", &self.oid)
            .field("mode", &self.mode)
            .field("closed", &self.closed)
            .field("mark", &self.mark)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_strings_and_flags() {
        for (s, mode, flags) in [
            ("r", LoMode::Read, INV_READ),
            ("w", LoMode::Write, INV_WRITE),
            ("rw", LoMode::ReadWrite, INV_READ | INV_WRITE),
            ("n", LoMode::New, 0),
        ] {
            let parsed: LoMode = s.parse().unwrap();
            assert_eq!(parsed, mode);
            assert_eq!(parsed.flags(), flags);
            assert_eq!(parsed.as_str(), s);
        }
        assert_eq!("wr".parse::<LoMode>().unwrap(), LoMode::ReadWrite);
        assert!(matches!("x".parse::<LoMode>(), Err(Error::ProgrammingError(_))));
    }
}

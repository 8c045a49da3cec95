//! Trigger command channel
//!
//! A narrow capability for firing opaque payloads at print boundaries,
//! typically backed by a serial connection to a relay box. The core performs
//! no framing; payloads are forwarded verbatim.

use std::io::Write;

use log::debug;

use crate::error::Result;

/// Outbound command channel to the external trigger controller
pub trait Commander: Send {
    fn send_command(&mut self, payload: &[u8]) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// Discards every command; used when no trigger box is attached
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCommander;

impl Commander for NullCommander {
    fn send_command(&mut self, _payload: &[u8]) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Commander over any byte sink (serial port handle, TCP socket, pipe)
pub struct StreamCommander<W: Write + Send> {
    inner: W,
}

impl<W: Write + Send> StreamCommander<W> {
    pub fn new(inner: W) -> Self {
        StreamCommander { inner }
    }
}

impl<W: Write + Send> Commander for StreamCommander<W> {
    fn send_command(&mut self, payload: &[u8]) -> Result<()> {
        self.inner.write_all(payload)?;
        self.inner.flush()?;
        debug!("Sent trigger command ({} bytes)", payload.len());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}

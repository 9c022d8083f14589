//! Progressive download buffer
//!
//! A streaming track is decoded while it downloads. The download task
//! appends to [`ProgressiveBytes`]; the decoder reads through a
//! [`ProgressiveReader`] that blocks until the bytes it needs have arrived.

use crate::fetch;
use reqwest::Client;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use symphonia::core::io::MediaSource;

/// How long a blocked reader sleeps before re-checking for cancellation
const READ_WAIT: Duration = Duration::from_millis(100);

#[derive(Default)]
struct Download {
    data: Vec<u8>,
    content_type: Option<String>,
    complete: bool,
    failed: Option<String>,
    cancelled: bool,
}

impl Download {
    /// Nothing more will arrive
    fn is_settled(&self) -> bool {
        self.complete || self.failed.is_some() || self.cancelled
    }
}

/// Growing byte buffer shared by a download task and its readers
#[derive(Default)]
pub struct ProgressiveBytes {
    state: Mutex<Download>,
    changed: Condvar,
}

impl ProgressiveBytes {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Download> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn append(&self, chunk: &[u8]) {
        self.lock().data.extend_from_slice(chunk);
        self.changed.notify_all();
    }

    pub fn set_content_type(&self, content_type: Option<String>) {
        self.lock().content_type = content_type;
    }

    pub fn content_type(&self) -> Option<String> {
        self.lock().content_type.clone()
    }

    /// The download finished successfully
    pub fn finish(&self) {
        self.lock().complete = true;
        self.changed.notify_all();
    }

    /// The download failed; readers past the received bytes get an error
    pub fn fail(&self, message: impl Into<String>) {
        self.lock().failed = Some(message.into());
        self.changed.notify_all();
    }

    /// Stop the download and release every blocked reader
    pub fn cancel(&self) {
        self.lock().cancelled = true;
        self.changed.notify_all();
    }

    /// Wake blocked readers so they re-check their cancel flags
    pub fn wake(&self) {
        let _state = self.lock();
        self.changed.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_complete(&self) -> bool {
        self.lock().complete
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    pub fn error(&self) -> Option<String> {
        self.lock().failed.clone()
    }

    /// Block until the first bytes arrive or the download settles
    pub fn wait_started(&self, cancel: &AtomicBool) -> bool {
        let mut state = self.lock();
        loop {
            if !state.data.is_empty() {
                return true;
            }
            if state.is_settled() || cancel.load(Ordering::Acquire) {
                return false;
            }
            state = self
                .changed
                .wait_timeout(state, READ_WAIT)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl std::fmt::Debug for ProgressiveBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ProgressiveBytes")
            .field("len", &state.data.len())
            .field("complete", &state.complete)
            .field("failed", &state.failed)
            .field("cancelled", &state.cancelled)
            .finish()
    }
}

/// Blocking `Read + Seek` view of a progressive download
pub struct ProgressiveReader {
    bytes: Arc<ProgressiveBytes>,
    position: u64,
    cancel: Arc<AtomicBool>,
}

impl ProgressiveReader {
    pub fn new(bytes: Arc<ProgressiveBytes>, cancel: Arc<AtomicBool>) -> Self {
        Self {
            bytes,
            position: 0,
            cancel,
        }
    }

    fn cancelled() -> io::Error {
        io::Error::other("progressive read cancelled")
    }
}

impl Read for ProgressiveReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut state = self.bytes.lock();
        loop {
            if self.cancel.load(Ordering::Acquire) || state.cancelled {
                return Err(Self::cancelled());
            }

            let available = state.data.len() as u64;
            if self.position < available {
                let start = self.position as usize;
                let n = buf.len().min(state.data.len() - start);
                buf[..n].copy_from_slice(&state.data[start..start + n]);
                self.position += n as u64;
                return Ok(n);
            }

            if state.complete {
                return Ok(0);
            }
            if let Some(message) = &state.failed {
                return Err(io::Error::other(message.clone()));
            }

            state = self
                .bytes
                .changed
                .wait_timeout(state, READ_WAIT)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl Seek for ProgressiveReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => {
                // The length is only known once the download is complete
                let mut state = self.bytes.lock();
                loop {
                    if self.cancel.load(Ordering::Acquire) || state.cancelled {
                        return Err(Self::cancelled());
                    }
                    if state.complete {
                        break (state.data.len() as u64).checked_add_signed(delta);
                    }
                    if let Some(message) = &state.failed {
                        return Err(io::Error::other(message.clone()));
                    }
                    state = self
                        .bytes
                        .changed
                        .wait_timeout(state, READ_WAIT)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        };

        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of stream")
        })?;
        self.position = target;
        Ok(target)
    }
}

impl MediaSource for ProgressiveReader {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        let state = self.bytes.lock();
        state.complete.then_some(state.data.len() as u64)
    }
}

/// Download `url` into `bytes` chunk by chunk
///
/// Settles `bytes` in every case: finished, failed or cancelled.
pub async fn download(client: Client, url: String, bytes: Arc<ProgressiveBytes>) {
    let mut response = match fetch::get(&client, &url).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(url = %url, "Stream download failed: {}", e);
            bytes.fail(e.to_string());
            return;
        }
    };
    bytes.set_content_type(fetch::content_type(&response));

    loop {
        if bytes.is_cancelled() {
            tracing::debug!(url = %url, "Stream download cancelled");
            return;
        }

        match response.chunk().await {
            Ok(Some(chunk)) => bytes.append(&chunk),
            Ok(None) => {
                tracing::debug!(url = %url, bytes = bytes.len(), "Stream download complete");
                bytes.finish();
                return;
            }
            Err(e) => {
                tracing::warn!(url = %url, "Stream download interrupted: {}", e);
                bytes.fail(e.to_string());
                return;
            }
        }
    }
}

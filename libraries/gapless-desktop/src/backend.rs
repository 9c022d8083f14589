//! Desktop implementation of the playback backend traits

use crate::config::DesktopConfig;
use crate::error::Result;
use crate::loader::HttpLoader;
use crate::output::{self, OutputTarget};
use crate::stream::HttpStream;
use gapless_playback::{AudioBackend, AudioContext, BackendError, LoadReply, StreamingHandle};
use std::sync::Arc;
use tokio::runtime::Handle;

/// HTTP streaming, fetch-then-decode and cpal output behind one backend
///
/// Streams and loads share the loader's runtime and HTTP client. The precise
/// context is opened lazily: by the first buffer handoff or the first
/// stream that starts playing.
#[derive(Debug)]
pub struct DesktopBackend {
    loader: HttpLoader,
    output: OutputTarget,
    buffer_secs: f64,
}

impl DesktopBackend {
    /// Backend with its own runtime, rendering to the default output device
    pub fn new(config: &DesktopConfig) -> Result<Self> {
        let loader = HttpLoader::new(&config.http)?;
        Ok(Self::with_loader(loader, config))
    }

    /// Backend spawning its network tasks onto an existing runtime
    pub fn with_handle(config: &DesktopConfig, handle: Handle) -> Result<Self> {
        let loader = HttpLoader::with_handle(handle, &config.http)?;
        Ok(Self::with_loader(loader, config))
    }

    fn with_loader(loader: HttpLoader, config: &DesktopConfig) -> Self {
        Self {
            loader: loader.with_target_rate(Arc::new(output::shared_sample_rate)),
            output: OutputTarget::Device,
            buffer_secs: config.output.stream_buffer_secs,
        }
    }

    /// Render to `output` instead of the default device
    pub fn with_output(mut self, output: OutputTarget) -> Self {
        let target = output.clone();
        self.loader = self
            .loader
            .with_target_rate(Arc::new(move || target.sample_rate()));
        self.output = output;
        self
    }

    pub fn output(&self) -> &OutputTarget {
        &self.output
    }

    pub fn loader(&self) -> &HttpLoader {
        &self.loader
    }

    /// Shareable handle for [`gapless_playback::GaplessQueue::new`]
    pub fn into_shared(self) -> Arc<dyn AudioBackend> {
        Arc::new(self)
    }
}

impl AudioBackend for DesktopBackend {
    fn create_stream(&self, url: &str) -> Box<dyn StreamingHandle> {
        Box::new(HttpStream::new(
            url,
            self.loader.client().clone(),
            self.loader.handle(),
            self.output.clone(),
            self.buffer_secs,
        ))
    }

    fn context(&self) -> std::result::Result<Arc<dyn AudioContext>, BackendError> {
        self.output.context()
    }

    fn load(&self, url: &str, reply: LoadReply) {
        self.loader.load(url, reply);
    }
}

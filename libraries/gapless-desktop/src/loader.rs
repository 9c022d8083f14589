//! Background fetch-then-decode pipeline
//!
//! ```text
//! Queue thread                  Tokio runtime                Blocking pool
//!      │                              │                            │
//!      │  load(url, reply)            │                            │
//!      │─────────────────────────────>│ HEAD (resolve) + GET       │
//!      │                              │───────────────────────────>│ symphonia decode
//!      │                              │                            │ + resample
//!      │  LoadCompletion via inbox    │<───────────────────────────│
//!      │<─────────────────────────────│                            │
//! ```
//!
//! `load` returns immediately. The outcome always reaches the queue's inbox
//! through the [`LoadReply`], which reports `Cancelled` if the task dies.

use crate::config::HttpSettings;
use crate::decode;
use crate::error::Result;
use crate::fetch;
use gapless_playback::{LoadError, LoadReply, LoadedTrack};
use reqwest::Client;
use std::sync::Arc;
use tokio::runtime::{Handle, Runtime};

/// Supplies the rate decoded buffers should be resampled to
pub type TargetRate = Arc<dyn Fn() -> Option<u32> + Send + Sync>;

enum LoaderRuntime {
    Owned(Runtime),
    Borrowed(Handle),
}

/// Asynchronous loader shared by every track of a backend
pub struct HttpLoader {
    runtime: LoaderRuntime,
    client: Client,
    resolve_redirects: bool,
    target_rate: TargetRate,
}

impl HttpLoader {
    /// Loader with its own multi-threaded runtime
    pub fn new(settings: &HttpSettings) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("gapless-loader")
            .enable_all()
            .build()?;

        Self::with_runtime(LoaderRuntime::Owned(runtime), settings)
    }

    /// Loader spawning onto an existing runtime
    pub fn with_handle(handle: Handle, settings: &HttpSettings) -> Result<Self> {
        Self::with_runtime(LoaderRuntime::Borrowed(handle), settings)
    }

    fn with_runtime(runtime: LoaderRuntime, settings: &HttpSettings) -> Result<Self> {
        Ok(Self {
            runtime,
            client: fetch::build_client(settings)?,
            resolve_redirects: settings.resolve_redirects,
            target_rate: Arc::new(|| None),
        })
    }

    /// Resample decoded tracks to whatever `rate` reports at load time
    pub fn with_target_rate(mut self, rate: TargetRate) -> Self {
        self.target_rate = rate;
        self
    }

    pub fn handle(&self) -> Handle {
        match &self.runtime {
            LoaderRuntime::Owned(runtime) => runtime.handle().clone(),
            LoaderRuntime::Borrowed(handle) => handle.clone(),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Start fetching and decoding `url`; the outcome goes to `reply`
    pub fn load(&self, url: &str, reply: LoadReply) {
        let client = self.client.clone();
        let url = url.to_string();
        let resolve_redirects = self.resolve_redirects;
        let target_rate = (self.target_rate)();

        tracing::debug!(track = %reply.track(), url = %url, "Starting precise load");

        self.handle().spawn(async move {
            let outcome = fetch_and_decode(&client, &url, resolve_redirects, target_rate).await;
            match &outcome {
                Ok(loaded) => tracing::debug!(
                    track = %reply.track(),
                    url = %url,
                    duration = loaded.audio.duration(),
                    "Precise load finished"
                ),
                Err(e) => tracing::warn!(track = %reply.track(), url = %url, "Precise load failed: {}", e),
            }
            reply.send(outcome);
        });
    }
}

impl std::fmt::Debug for HttpLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpLoader")
            .field(
                "runtime",
                &match self.runtime {
                    LoaderRuntime::Owned(_) => "owned",
                    LoaderRuntime::Borrowed(_) => "borrowed",
                },
            )
            .field("resolve_redirects", &self.resolve_redirects)
            .finish_non_exhaustive()
    }
}

/// Fetch `url` and decode it into a buffer for the precise backend
pub async fn fetch_and_decode(
    client: &Client,
    url: &str,
    resolve_redirects: bool,
    target_rate: Option<u32>,
) -> std::result::Result<LoadedTrack, LoadError> {
    let fetched = fetch::fetch_bytes(client, url, resolve_redirects).await?;
    let extension = fetched.extension();
    let resolved_url = (fetched.url != url).then(|| fetched.url.clone());

    let audio = tokio::task::spawn_blocking(move || {
        decode::decode_bytes(fetched.bytes, extension.as_deref(), target_rate)
    })
    .await
    .map_err(|e| LoadError::Decode(format!("decode task failed: {}", e)))??;

    Ok(LoadedTrack {
        audio,
        resolved_url,
    })
}

/// CPAL output device driving the mixer
use crate::error::{AudioError, Result};
use crate::mixer::Mixer;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use gapless_playback::{AudioContext, BackendError, BufferSource, DecodedAudio, Gain, SharedContext};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// The one precise context of the process
static CONTEXT: SharedContext<CpalContext> = SharedContext::new();

/// Process-wide output context, opened on first use
///
/// Later calls return the same instance. A failed open is retried on the
/// next call.
pub fn shared_context() -> std::result::Result<Arc<CpalContext>, BackendError> {
    CONTEXT.get_or_init(|| {
        let context = CpalContext::open()?;
        tracing::info!(
            sample_rate = context.sample_rate(),
            channels = context.channels(),
            "Opened audio output"
        );
        Ok(Arc::new(context))
    })
}

/// Output rate of the shared context, if it has been opened
pub fn shared_sample_rate() -> Option<u32> {
    CONTEXT.get().map(|context| context.sample_rate())
}

/// Where streams and buffer sources are rendered
#[derive(Clone, Debug, Default)]
pub enum OutputTarget {
    /// The default output device through the shared [`CpalContext`]
    #[default]
    Device,
    /// A caller-driven mixer, rendered manually (headless use, tests)
    Mixer(Arc<Mixer>),
}

impl OutputTarget {
    pub fn mixer(&self) -> std::result::Result<Arc<Mixer>, BackendError> {
        match self {
            OutputTarget::Device => shared_context().map(|context| context.mixer()),
            OutputTarget::Mixer(mixer) => Ok(Arc::clone(mixer)),
        }
    }

    pub fn context(&self) -> std::result::Result<Arc<dyn AudioContext>, BackendError> {
        match self {
            OutputTarget::Device => {
                shared_context().map(|context| context as Arc<dyn AudioContext>)
            }
            OutputTarget::Mixer(mixer) => Ok(Arc::clone(mixer) as Arc<dyn AudioContext>),
        }
    }

    /// Rate decoded buffers should match, when already known
    pub fn sample_rate(&self) -> Option<u32> {
        match self {
            OutputTarget::Device => shared_sample_rate(),
            OutputTarget::Mixer(mixer) => Some(mixer.sample_rate()),
        }
    }
}

/// Commands sent to the audio thread
enum OutputCommand {
    /// Stop the device and exit the thread
    Shutdown,
}

/// CPAL output context
///
/// **Architecture**: a dedicated audio thread owns the CPAL Stream, avoiding
/// Send/Sync issues with CPAL's Stream type across platforms. The stream
/// callback renders the shared [`Mixer`]; everything else talks to the
/// mixer directly.
pub struct CpalContext {
    mixer: Arc<Mixer>,
    command_tx: Sender<OutputCommand>,
    sample_rate: u32,
    channels: u16,
    audio_thread: Option<JoinHandle<()>>,
}

impl CpalContext {
    /// Open the default output device
    pub fn open() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(AudioError::DeviceNotFound)?;

        let config = device.default_output_config()?;
        let sample_rate = config.sample_rate();
        let channels = config.channels();
        let config = config.config();

        Self::with_device_and_config(device, config, sample_rate, channels)
    }

    fn with_device_and_config(
        device: Device,
        config: StreamConfig,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Self> {
        let mixer = Arc::new(Mixer::new(sample_rate));
        let (command_tx, command_rx) = bounded::<OutputCommand>(32);
        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);

        let mixer_clone = Arc::clone(&mixer);
        let audio_thread = thread::Builder::new()
            .name("gapless-output".to_string())
            .spawn(move || {
                Self::audio_thread_run(&device, &config, mixer_clone, &command_rx, &ready_tx);
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = audio_thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = audio_thread.join();
                return Err(AudioError::ThreadError(
                    "audio thread exited before the stream started".into(),
                ));
            }
        }

        Ok(Self {
            mixer,
            command_tx,
            sample_rate,
            channels,
            audio_thread: Some(audio_thread),
        })
    }

    /// Audio thread main loop
    ///
    /// Builds and starts the stream, reports the outcome on `ready`, then
    /// keeps the stream alive until shutdown.
    fn audio_thread_run(
        device: &Device,
        config: &StreamConfig,
        mixer: Arc<Mixer>,
        command_rx: &Receiver<OutputCommand>,
        ready: &Sender<Result<()>>,
    ) {
        let channels = usize::from(config.channels);
        let stream = device.build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                mixer.render(data, channels);
            },
            |err| tracing::error!("Audio stream error: {}", err),
            None,
        );

        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                let _ = ready.send(Err(e.into()));
                return;
            }
        };

        if let Err(e) = stream.play() {
            let _ = ready.send(Err(e.into()));
            return;
        }
        let _ = ready.send(Ok(()));

        // Block until shutdown; a dropped sender also ends the thread
        let _ = command_rx.recv();

        drop(stream);
        tracing::debug!("Audio output thread stopped");
    }

    pub fn mixer(&self) -> Arc<Mixer> {
        Arc::clone(&self.mixer)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

impl AudioContext for CpalContext {
    fn now(&self) -> f64 {
        self.mixer.now()
    }

    fn create_buffer_source(
        &self,
        buffer: Arc<DecodedAudio>,
        gain: Gain,
    ) -> std::result::Result<Box<dyn BufferSource>, BackendError> {
        self.mixer.create_buffer_source(buffer, gain)
    }
}

impl Drop for CpalContext {
    fn drop(&mut self) {
        let _ = self.command_tx.send(OutputCommand::Shutdown);
        if let Some(handle) = self.audio_thread.take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for CpalContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpalContext")
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("mixer", &self.mixer)
            .finish_non_exhaustive()
    }
}

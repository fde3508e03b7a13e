use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::{OutputStream, OutputStreamHandle, Sink};
use tracing::{debug, info, instrument, warn};

use crate::error::PlaybackError;

use super::source::ResourceSource;

/// Live audio transport a session is bound to.
///
/// Every subscribed source plays concurrently, so two can overlap during a
/// crossfade.
pub trait OutputSink {
    /// Start playing `source` on the transport
    fn subscribe(&mut self, source: ResourceSource) -> Result<(), PlaybackError>;

    /// Detach from the transport, dropping anything still playing
    fn destroy(&mut self);

    fn is_bound(&self) -> bool;
}

/// Audio device information
#[derive(Debug, Clone)]
pub struct AudioDevice {
    pub name: String,
    pub index: usize,
}

/// Get list of available audio output devices
pub fn list_audio_devices() -> Vec<AudioDevice> {
    let host = rodio::cpal::default_host();
    let mut devices = Vec::new();

    match host.output_devices() {
        Ok(output_devices) => {
            for (index, device) in output_devices.enumerate() {
                let name = device.name().unwrap_or_else(|_| format!("Device {}", index));
                devices.push(AudioDevice { name, index });
            }
        }
        Err(e) => {
            warn!(error = %e, "Failed to enumerate audio devices");
        }
    }

    devices
}

/// Get the default device index
pub fn default_device_index() -> usize {
    let host = rodio::cpal::default_host();
    let Some(default_name) = host.default_output_device().and_then(|d| d.name().ok()) else {
        return 0;
    };
    host.output_devices()
        .ok()
        .and_then(|mut devices| {
            devices.position(|d| d.name().map(|n| n == default_name).unwrap_or(false))
        })
        .unwrap_or(0)
}

fn open_default() -> Result<(OutputStream, OutputStreamHandle), PlaybackError> {
    OutputStream::try_default().map_err(|e| match e {
        rodio::StreamError::NoDevice => PlaybackError::NoDevice,
        other => PlaybackError::Device(format!("Failed to open audio device: {}", other)),
    })
}

/// Output sink on a local audio device, one rodio `Sink` per resource
pub struct RodioSink {
    /// Keep the stream alive (dropping it stops audio)
    _stream: OutputStream,
    handle: OutputStreamHandle,
    sinks: Vec<Sink>,
    destroyed: bool,
}

impl RodioSink {
    /// Open the device at `device_index`, falling back to the default device
    #[instrument]
    pub fn open(device_index: Option<usize>) -> Result<Self, PlaybackError> {
        info!("Initializing audio output");
        let host = rodio::cpal::default_host();

        let selected = device_index.and_then(|index| {
            let device = host.output_devices().ok()?.nth(index);
            if device.is_none() {
                warn!(index, "Device index out of range, using default");
            }
            device.map(|d| (d, index))
        });

        let (stream, handle, index) = match selected {
            Some((device, index)) => {
                let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
                info!(device = %name, index, "Using selected audio device");
                match OutputStream::try_from_device(&device) {
                    Ok((stream, handle)) => (stream, handle, index),
                    Err(e) => {
                        warn!(error = %e, "Failed to open selected device, using default");
                        let (stream, handle) = open_default()?;
                        (stream, handle, default_device_index())
                    }
                }
            }
            None => {
                let (stream, handle) = open_default()?;
                (stream, handle, default_device_index())
            }
        };

        debug!(index, "Audio output initialized");
        Ok(Self {
            _stream: stream,
            handle,
            sinks: Vec::new(),
            destroyed: false,
        })
    }
}

impl OutputSink for RodioSink {
    fn subscribe(&mut self, source: ResourceSource) -> Result<(), PlaybackError> {
        if self.destroyed {
            return Err(PlaybackError::NotConnected);
        }
        self.sinks.retain(|s| !s.empty());

        let id = source.id();
        let sink = Sink::try_new(&self.handle)
            .map_err(|e| PlaybackError::Transport(format!("Failed to create audio sink: {}", e)))?;
        sink.append(source);
        sink.play();
        self.sinks.push(sink);

        debug!(%id, sinks = self.sinks.len(), "Resource subscribed");
        Ok(())
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        for sink in self.sinks.drain(..) {
            sink.stop();
        }
        self.destroyed = true;
        debug!("Output sink destroyed");
    }

    fn is_bound(&self) -> bool {
        !self.destroyed
    }
}

impl Drop for RodioSink {
    fn drop(&mut self) {
        self.destroy();
    }
}

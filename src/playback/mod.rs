mod crossfade;
mod engine;
mod events;
mod queue;
mod resource;
mod session;
mod sink;
mod source;

pub use crossfade::CrossfadeScheduler;
pub use engine::{EngineHandles, PlaybackEngine};
pub use events::{PlayerEvent, SessionSignal};
pub use queue::QueueManager;
pub use resource::{
    spawn_gain_ramp, ActiveResources, AudioResource, ResourceControl, ResourceFactory, ResourceId,
    ResourceOptions,
};
pub use session::{AdvanceCause, NextAction, PlaybackSession, Transition};
pub use sink::{default_device_index, list_audio_devices, AudioDevice, OutputSink, RodioSink};
pub use source::ResourceSource;

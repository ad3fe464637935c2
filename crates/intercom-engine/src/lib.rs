//! Broadcast session control plane.
//!
//! [`SessionManager`] owns session lifecycle and routes playback commands,
//! [`VolumeRouter`] handles gain directives, and [`SpeakerTargetResolver`]
//! turns channel membership into the speakers a session addresses. Each open
//! session runs a mix loop that feeds its transport link one frame per tick.

pub mod deck;
pub mod error;
pub mod fetch;
pub mod gains;
mod mixer;
pub mod mock;
pub mod playback;
pub mod resolver;
pub mod sequencer;
pub mod session;
pub mod volume;

pub use deck::{NowPlaying, PlayOutcome};
pub use error::ControlError;
pub use fetch::{CatalogFetcher, ContentFetcher, FetchError, LoadedItem};
pub use gains::LiveGains;
pub use playback::PlaybackCoordinator;
pub use resolver::SpeakerTargetResolver;
pub use sequencer::{next_position, SequenceError, Sequencer};
pub use session::{
    EngineConfig, LiveSession, OpenRequest, OpenedSession, SessionManager, SessionState,
    SessionSummary,
};
pub use volume::{VolumeDirective, VolumeOutcome, VolumeRouter};

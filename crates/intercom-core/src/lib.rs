pub mod audio;
pub mod errors;
pub mod events;
pub mod ids;
pub mod playlist;

pub use audio::{AudioSource, FrameFormat, GainSet};
pub use errors::ErrorKind;
pub use events::{ConnectionStatus, DeliveryStats, SessionEvent};
pub use ids::{ChannelId, ContentId, GroupId, SessionId, SpeakerId};
pub use playlist::{PlaylistKind, SequencerStatus};

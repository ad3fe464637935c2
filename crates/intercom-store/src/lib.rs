pub mod channels;
pub mod content;
pub mod database;
pub mod error;
pub mod membership;
pub mod row_helpers;
pub mod schema;
pub mod speakers;

pub use channels::{ChannelRepo, ChannelRow};
pub use content::{ContentRepo, ContentRow};
pub use database::Database;
pub use error::StoreError;
pub use membership::MembershipRepo;
pub use speakers::{GroupRepo, GroupRow, SpeakerRepo, SpeakerRow};

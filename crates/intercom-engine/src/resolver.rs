use std::collections::BTreeSet;

use tracing::{debug, instrument};

use intercom_core::ids::{ChannelId, GroupId, SpeakerId};
use intercom_store::{Database, MembershipRepo};

use crate::error::ControlError;

/// Computes the set of speakers a channel broadcasts to: direct
/// speaker-to-channel rows plus members of groups mapped to the channel.
/// Retracted and soft-deleted rows never contribute.
#[derive(Clone)]
pub struct SpeakerTargetResolver {
    membership: MembershipRepo,
}

impl SpeakerTargetResolver {
    pub fn new(db: Database) -> Self {
        Self {
            membership: MembershipRepo::new(db),
        }
    }

    /// Sorted, duplicate-free target set. Same store state, same answer.
    #[instrument(skip(self), fields(channel_id = %channel))]
    pub fn resolve(&self, channel: &ChannelId) -> Result<Vec<SpeakerId>, ControlError> {
        let mut targets: BTreeSet<SpeakerId> =
            self.membership.direct_speakers(channel)?.into_iter().collect();
        targets.extend(self.membership.speakers_via_groups(channel)?);
        debug!(targets = targets.len(), "speaker targets resolved");
        Ok(targets.into_iter().collect())
    }

    /// Flatten an operator selection of speakers and groups into speakers.
    pub fn expand_selection(
        &self,
        speakers: &[SpeakerId],
        groups: &[GroupId],
    ) -> Result<Vec<SpeakerId>, ControlError> {
        let mut selection: BTreeSet<SpeakerId> = speakers.iter().cloned().collect();
        for group in groups {
            selection.extend(self.membership.group_speakers(group)?);
        }
        Ok(selection.into_iter().collect())
    }

    pub fn membership(&self) -> &MembershipRepo {
        &self.membership
    }
}

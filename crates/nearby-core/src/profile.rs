//! Local profile source

use crate::types::Profile;

/// Provides the profile this device answers fetch requests with.
///
/// Implementations must not block on the network.
pub trait ProfileStore: Send + Sync {
    fn local_profile(&self) -> Profile;
}

/// Profile store backed by a fixed record
#[derive(Debug, Clone, Default)]
pub struct StaticProfileStore {
    profile: Profile,
}

impl StaticProfileStore {
    pub fn new(profile: Profile) -> Self {
        Self { profile }
    }
}

impl ProfileStore for StaticProfileStore {
    fn local_profile(&self) -> Profile {
        self.profile.clone()
    }
}

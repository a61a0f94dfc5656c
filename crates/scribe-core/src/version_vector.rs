//! Version vector with gap tracking.
//!
//! Each site numbers its insertions 1, 2, 3, ... The vector records, per
//! site, the highest counter observed plus the set of lower counters that
//! have not arrived yet. An operation `(site, counter)` is *committed* once
//! the counter is covered and not pending, which is what gates remote
//! deletions.

use crate::identifier::SiteId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Observed counters of a single site.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    #[serde(rename = "peer")]
    pub site: SiteId,
    /// Highest counter observed.
    pub counter: u64,
    /// Counters below `counter` that have not been observed yet.
    #[serde(default)]
    pub pending: BTreeSet<u64>,
}

impl Version {
    pub fn new(site: SiteId) -> Self {
        Version {
            site,
            counter: 0,
            pending: BTreeSet::new(),
        }
    }

    fn observe(&mut self, counter: u64) {
        if counter <= self.counter {
            self.pending.remove(&counter);
        } else {
            self.pending.extend(self.counter + 1..counter);
            self.counter = counter;
        }
    }

    /// Check if the operation numbered `counter` has been observed.
    pub fn includes(&self, counter: u64) -> bool {
        counter <= self.counter && !self.pending.contains(&counter)
    }
}

/// The local site's counter plus one [`Version`] per remote site.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionVector {
    local: Version,
    remote: BTreeMap<SiteId, Version>,
}

impl VersionVector {
    pub fn new(site: SiteId) -> Self {
        VersionVector {
            local: Version::new(site),
            remote: BTreeMap::new(),
        }
    }

    pub fn local_site(&self) -> &SiteId {
        &self.local.site
    }

    pub fn local_version(&self) -> &Version {
        &self.local
    }

    pub fn remote_version(&self, site: &SiteId) -> Option<&Version> {
        self.remote.get(site)
    }

    /// Increment the local counter, returning the new value.
    pub fn update_local_version(&mut self) -> u64 {
        self.local.counter += 1;
        self.local.counter
    }

    /// Record that the operation `(site, counter)` has been applied.
    pub fn update_remote_version(&mut self, site: &SiteId, counter: u64) {
        self.remote
            .entry(site.clone())
            .or_insert_with(|| Version::new(site.clone()))
            .observe(counter);
    }

    /// Check if `(site, counter)` has been observed.
    ///
    /// Operations of the local site are always committed.
    pub fn committed(&self, site: &SiteId, counter: u64) -> bool {
        if *site == self.local.site {
            return true;
        }
        self.remote
            .get(site)
            .is_some_and(|version| version.includes(counter))
    }

    /// Every version this vector knows of, the local one included.
    ///
    /// This is what a host hands to a joining replica next to its document.
    pub fn export(&self) -> Vec<Version> {
        std::iter::once(self.local.clone())
            .chain(self.remote.values().cloned())
            .collect()
    }

    /// Replace all remote versions with `versions`.
    ///
    /// An entry for the local site is skipped; the local counter only ever
    /// moves through [`update_local_version`](Self::update_local_version).
    pub fn install_remote(&mut self, versions: impl IntoIterator<Item = Version>) {
        self.remote = versions
            .into_iter()
            .filter(|v| v.site != self.local.site)
            .map(|v| (v.site.clone(), v))
            .collect();
    }

    pub fn clear_remote(&mut self) {
        self.remote.clear();
    }

    pub fn remote_versions(&self) -> impl Iterator<Item = &Version> {
        self.remote.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(s: &str) -> SiteId {
        SiteId::new(s)
    }

    #[test]
    fn test_local_counter_increments() {
        let mut vv = VersionVector::new(site("me"));
        assert_eq!(vv.local_version().counter, 0);
        assert_eq!(vv.update_local_version(), 1);
        assert_eq!(vv.update_local_version(), 2);
        assert_eq!(vv.local_version().counter, 2);
    }

    #[test]
    fn test_remote_out_of_order_tracks_gaps() {
        let mut vv = VersionVector::new(site("me"));
        let other = site("other");
        for counter in [4, 2, 8, 6] {
            vv.update_remote_version(&other, counter);
        }
        let version = vv.remote_version(&other).unwrap();
        assert_eq!(version.counter, 8);
        assert_eq!(version.pending.iter().copied().collect::<Vec<_>>(), vec![1, 3, 5, 7]);
    }

    #[test]
    fn test_committed() {
        let mut vv = VersionVector::new(site("me"));
        let other = site("other");
        vv.update_remote_version(&other, 3);

        assert!(vv.committed(&other, 3));
        assert!(!vv.committed(&other, 2));
        assert!(!vv.committed(&other, 4));
        assert!(!vv.committed(&site("unknown"), 1));

        vv.update_remote_version(&other, 2);
        assert!(vv.committed(&other, 2));
    }

    #[test]
    fn test_local_always_committed() {
        let vv = VersionVector::new(site("me"));
        assert!(vv.committed(&site("me"), 42));
    }

    #[test]
    fn test_duplicate_observation_is_noop() {
        let mut vv = VersionVector::new(site("me"));
        let other = site("other");
        vv.update_remote_version(&other, 1);
        vv.update_remote_version(&other, 1);
        let version = vv.remote_version(&other).unwrap();
        assert_eq!(version.counter, 1);
        assert!(version.pending.is_empty());
    }

    #[test]
    fn test_export_and_install() {
        let mut host = VersionVector::new(site("host"));
        host.update_local_version();
        host.update_local_version();
        host.update_remote_version(&site("a"), 3);

        let mut joiner = VersionVector::new(site("joiner"));
        joiner.install_remote(host.export());

        assert!(joiner.committed(&site("host"), 2));
        assert!(!joiner.committed(&site("host"), 3));
        assert!(!joiner.committed(&site("a"), 1));
        assert!(joiner.committed(&site("a"), 3));
    }

    #[test]
    fn test_install_skips_local_site() {
        let mut vv = VersionVector::new(site("me"));
        vv.update_local_version();
        let mut stale = Version::new(site("me"));
        stale.counter = 10;
        vv.install_remote(vec![stale]);
        assert_eq!(vv.local_version().counter, 1);
        assert!(vv.remote_version(&site("me")).is_none());
    }

    #[test]
    fn test_version_vector_serialization() {
        let mut vv = VersionVector::new(site("me"));
        vv.update_remote_version(&site("other"), 3);
        let json = serde_json::to_string(&vv).unwrap();
        let deserialized: VersionVector = serde_json::from_str(&json).unwrap();
        assert_eq!(vv, deserialized);
    }

    #[test]
    fn test_version_wire_shape() {
        let mut version = Version::new(site("other"));
        version.observe(3);
        let json = serde_json::to_value(&version).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "peer": "other", "counter": 3, "pending": [1, 2] })
        );

        let parsed: Version = serde_json::from_str(r#"{"peer":"x","counter":1}"#).unwrap();
        assert_eq!(parsed.site, site("x"));
        assert!(parsed.pending.is_empty());
    }
}

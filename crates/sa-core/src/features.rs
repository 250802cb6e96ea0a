//! Feature flags understood by this build.
//!
//! Flags arrive from configuration as a `name -> bool` map. Unknown names are
//! rejected so a typo in a deployment fails at startup instead of silently
//! leaving a behavior off. The resulting [`FeatureSet`] is passed explicitly
//! to whatever needs it; there is no global flag state.

use crate::{Error, Result};
use core::fmt;
use core::str::FromStr;
use std::collections::{BTreeMap, HashSet};

/// A toggleable behavior of the storage authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Record which account revoked a certificate alongside the revocation.
    StoreRevokerInfo,
    /// Count new orders with an indexed query instead of a table scan.
    FasterNewOrdersRateLimit,
    /// Drop challenges that were not used once an authorization is finalized.
    DeleteUnusedChallenges,
    /// Reject orders that reference legacy authorization rows.
    DisableLegacyAuthzReuse,
}

impl Feature {
    pub const ALL: [Self; 4] = [
        Self::StoreRevokerInfo,
        Self::FasterNewOrdersRateLimit,
        Self::DeleteUnusedChallenges,
        Self::DisableLegacyAuthzReuse,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StoreRevokerInfo => "StoreRevokerInfo",
            Self::FasterNewOrdersRateLimit => "FasterNewOrdersRateLimit",
            Self::DeleteUnusedChallenges => "DeleteUnusedChallenges",
            Self::DisableLegacyAuthzReuse => "DisableLegacyAuthzReuse",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|feature| feature.as_str() == s)
            .ok_or_else(|| Error::UnknownFeature {
                name: s.to_string(),
            })
    }
}

/// The set of features switched on for this process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureSet {
    enabled: HashSet<Feature>,
}

impl FeatureSet {
    /// Builds the set from a configured `name -> enabled` map.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownFeature`] for the first name not known to this
    /// build, whether it is switched on or off.
    pub fn from_map(flags: &BTreeMap<String, bool>) -> Result<Self> {
        let mut enabled = HashSet::new();
        for (name, on) in flags {
            let feature = name.parse::<Feature>()?;
            if *on {
                enabled.insert(feature);
            }
        }
        Ok(Self { enabled })
    }

    pub fn enabled(&self, feature: Feature) -> bool {
        self.enabled.contains(&feature)
    }

    /// Enabled features, in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = Feature> + '_ {
        Feature::ALL
            .into_iter()
            .filter(|feature| self.enabled.contains(feature))
    }
}

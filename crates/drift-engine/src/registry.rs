//! The registry: an ordered, validated catalog of change units.
//!
//! Discovery is external - callers register groups and units explicitly.
//! The builder validates and orders everything up front so the runner
//! never has to re-derive ordering or fail partway through a group:
//!
//! - Duplicate unit ids within a group are a build-time error; no unit in
//!   a group with duplicates ever executes.
//! - Groups order by their explicit order key, falling back to the group
//!   name; units order by their explicit order key, falling back to id.
//!   Ties keep registration order.
//! - An optional caller-supplied predicate filters units at build time
//!   (profile filtering lives outside the engine).
//!
//! The version gate is applied per run, not at build time, because the
//! application version is runner configuration.

use std::collections::HashSet;

use drift_core::version::Version;

use crate::error::{EngineError, Result};
use crate::unit::{ChangeUnit, ChangeUnitDescriptor};

/// A named group of ordered change units (a "changelog" in the source
/// terminology).
#[derive(Debug, Clone)]
pub struct ChangeGroup {
    name: String,
    order: Option<String>,
    version: Option<Version>,
    units: Vec<ChangeUnit>,
}

impl ChangeGroup {
    /// Creates an empty group with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            order: None,
            version: None,
            units: Vec::new(),
        }
    }

    /// Sets an explicit ordering key. Groups without one order by name.
    #[must_use]
    pub fn with_order(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }

    /// Sets the group version used by the version gate.
    #[must_use]
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    /// Adds a unit to the group.
    #[must_use]
    pub fn unit(mut self, unit: ChangeUnit) -> Self {
        self.units.push(unit);
        self
    }

    /// Returns the group name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the group version, if declared.
    #[must_use]
    pub const fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    /// Returns the version the gate judges this group by: the explicit
    /// one if declared, else one parsed from a prefixed group name
    /// (`V1_2__description`).
    #[must_use]
    pub fn effective_version(&self, prefix: &str) -> Option<Version> {
        self.version
            .clone()
            .or_else(|| Version::from_prefixed_name(&self.name, prefix).ok())
    }

    /// Returns the units in execution order (after `build`).
    #[must_use]
    pub fn units(&self) -> &[ChangeUnit] {
        &self.units
    }

    /// Returns the effective ordering key: explicit order, else name.
    fn order_key(&self) -> &str {
        self.order.as_deref().unwrap_or(&self.name)
    }
}

/// Builder assembling and validating a [`Registry`].
pub struct RegistryBuilder {
    groups: Vec<ChangeGroup>,
    unit_filter: Option<Box<dyn Fn(&ChangeUnitDescriptor) -> bool + Send + Sync>>,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            groups: Vec::new(),
            unit_filter: None,
        }
    }

    /// Adds a change group.
    #[must_use]
    pub fn group(mut self, group: ChangeGroup) -> Self {
        self.groups.push(group);
        self
    }

    /// Installs a unit filter, e.g. an external profile resolver. Units
    /// for which the predicate returns false are dropped at build time.
    #[must_use]
    pub fn unit_filter(
        mut self,
        filter: impl Fn(&ChangeUnitDescriptor) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.unit_filter = Some(Box::new(filter));
        self
    }

    /// Validates and orders the catalog.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateUnitId`] the first time a repeated
    /// unit id is seen within a group. Detection happens here, before any
    /// unit executes.
    pub fn build(self) -> Result<Registry> {
        let mut groups = self.groups;

        for group in &mut groups {
            if let Some(filter) = &self.unit_filter {
                let name = group.name.clone();
                group.units.retain(|unit| filter(&unit.descriptor(&name)));
            }

            let mut seen = HashSet::new();
            for unit in &group.units {
                if !seen.insert(unit.id()) {
                    return Err(EngineError::DuplicateUnitId {
                        unit_id: unit.id(),
                        group: group.name.clone(),
                    });
                }
            }

            // Stable sort: ties keep registration order
            group.units.sort_by_key(ChangeUnit::order_key);
        }

        groups.sort_by(|a, b| a.order_key().cmp(b.order_key()));

        Ok(Registry { groups })
    }
}

impl std::fmt::Debug for RegistryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("groups", &self.groups.len())
            .field("has_unit_filter", &self.unit_filter.is_some())
            .finish()
    }
}

/// The validated, ordered catalog of change units for a run.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    groups: Vec<ChangeGroup>,
}

impl Registry {
    /// Returns all groups in execution order, before version gating.
    #[must_use]
    pub fn groups(&self) -> &[ChangeGroup] {
        &self.groups
    }

    /// Returns the groups that pass the version gate.
    ///
    /// When an application version is given, groups whose effective
    /// version (see [`ChangeGroup::effective_version`]) compares greater
    /// are excluded entirely - they appear in no report, as if filtered at
    /// discovery time. Groups with no resolvable version always pass.
    #[must_use]
    pub fn gated(&self, app_version: Option<&Version>, prefix: &str) -> Vec<&ChangeGroup> {
        self.groups
            .iter()
            .filter(|group| match (app_version, group.effective_version(prefix)) {
                (Some(app), Some(version)) => version <= *app,
                _ => true,
            })
            .collect()
    }

    /// Returns the total number of registered units across all groups.
    #[must_use]
    pub fn unit_count(&self) -> usize {
        self.groups.iter().map(|g| g.units.len()).sum()
    }

    /// Returns true if no units are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.unit_count() == 0
    }
}

//! Fixture patch registry
//!
//! Maps fixtures onto channel windows of a universe. The registry only
//! validates ranges and overlaps; it never moves or re-addresses a fixture.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

use crate::universe::{Universe, CHANNELS_PER_UNIVERSE};

/// Patch validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    /// Channel window overlaps an already patched fixture
    #[error("fixture {fixture_id} (channels {start}-{end}) overlaps {existing} in universe {universe}")]
    Conflict {
        fixture_id: String,
        existing: String,
        universe: Universe,
        start: u16,
        end: u16,
    },

    /// A fixture with this id is already patched
    #[error("fixture id already patched: {0}")]
    DuplicateFixture(String),

    /// Start address outside 1-512
    #[error("invalid start address {address} for fixture {fixture_id} (must be 1-512)")]
    InvalidAddress { fixture_id: String, address: u16 },

    /// Footprint is zero or runs past channel 512
    #[error("invalid footprint {footprint} at address {address} for fixture {fixture_id}")]
    InvalidFootprint {
        fixture_id: String,
        address: u16,
        footprint: u16,
    },
}

/// A fixture patched into a universe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchEntry {
    pub fixture_id: String,
    pub fixture_type: String,
    pub universe: Universe,
    /// First channel, 1-512
    pub start_address: u16,
    /// Number of consecutive channels
    pub footprint: u16,
}

impl PatchEntry {
    /// Create a new patch entry
    pub fn new(
        fixture_id: impl Into<String>,
        fixture_type: impl Into<String>,
        universe: Universe,
        start_address: u16,
        footprint: u16,
    ) -> Self {
        Self {
            fixture_id: fixture_id.into(),
            fixture_type: fixture_type.into(),
            universe,
            start_address,
            footprint,
        }
    }

    /// Last channel occupied by this fixture
    pub fn end_address(&self) -> u16 {
        self.start_address
            .saturating_add(self.footprint)
            .saturating_sub(1)
    }

    /// Whether the two fixtures share any channel in the same universe
    pub fn overlaps(&self, other: &PatchEntry) -> bool {
        self.universe == other.universe
            && self.start_address <= other.end_address()
            && other.start_address <= self.end_address()
    }

    fn validate(&self) -> Result<(), PatchError> {
        if self.start_address == 0 || self.start_address as usize > CHANNELS_PER_UNIVERSE {
            return Err(PatchError::InvalidAddress {
                fixture_id: self.fixture_id.clone(),
                address: self.start_address,
            });
        }
        let last = self.start_address as usize + self.footprint as usize - 1;
        if self.footprint == 0 || last > CHANNELS_PER_UNIVERSE {
            return Err(PatchError::InvalidFootprint {
                fixture_id: self.fixture_id.clone(),
                address: self.start_address,
                footprint: self.footprint,
            });
        }
        Ok(())
    }
}

/// All patched fixtures, indexed by id and by universe
#[derive(Debug, Clone, Default)]
pub struct PatchRegistry {
    entries: HashMap<String, PatchEntry>,
    // Fixture ids per universe, kept sorted by start address
    by_universe: BTreeMap<Universe, Vec<String>>,
}

impl PatchRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a list of entries, failing on the first invalid one
    pub fn from_entries(entries: impl IntoIterator<Item = PatchEntry>) -> Result<Self, PatchError> {
        let mut registry = Self::new();
        for entry in entries {
            registry.add_entry(entry)?;
        }
        Ok(registry)
    }

    /// Patch a fixture.
    ///
    /// Rejects the entry if its id is taken, its window is out of range, or
    /// it shares a channel with another fixture in the same universe.
    pub fn add_entry(&mut self, entry: PatchEntry) -> Result<(), PatchError> {
        entry.validate()?;

        if self.entries.contains_key(&entry.fixture_id) {
            return Err(PatchError::DuplicateFixture(entry.fixture_id));
        }

        if let Some(existing) = self
            .iter_universe(entry.universe)
            .find(|existing| existing.overlaps(&entry))
        {
            return Err(PatchError::Conflict {
                fixture_id: entry.fixture_id.clone(),
                existing: existing.fixture_id.clone(),
                universe: entry.universe,
                start: entry.start_address,
                end: entry.end_address(),
            });
        }

        tracing::debug!(
            "Patched {} ({}) at {}/{}-{}",
            entry.fixture_id,
            entry.fixture_type,
            entry.universe,
            entry.start_address,
            entry.end_address()
        );

        let ids = self.by_universe.entry(entry.universe).or_default();
        let position = ids
            .iter()
            .position(|id| self.entries[id].start_address > entry.start_address)
            .unwrap_or(ids.len());
        ids.insert(position, entry.fixture_id.clone());
        self.entries.insert(entry.fixture_id.clone(), entry);

        Ok(())
    }

    /// Unpatch a fixture, returning its entry if it existed
    pub fn remove_entry(&mut self, fixture_id: &str) -> Option<PatchEntry> {
        let entry = self.entries.remove(fixture_id)?;
        if let Some(ids) = self.by_universe.get_mut(&entry.universe) {
            ids.retain(|id| id != fixture_id);
            if ids.is_empty() {
                self.by_universe.remove(&entry.universe);
            }
        }
        Some(entry)
    }

    /// Fixtures patched in a universe, ordered by start address
    pub fn entries_for_universe(&self, universe: Universe) -> Vec<PatchEntry> {
        self.iter_universe(universe).cloned().collect()
    }

    fn iter_universe(&self, universe: Universe) -> impl Iterator<Item = &PatchEntry> {
        self.by_universe
            .get(&universe)
            .into_iter()
            .flatten()
            .map(|id| &self.entries[id])
    }

    /// Look up a fixture by id
    pub fn get(&self, fixture_id: &str) -> Option<&PatchEntry> {
        self.entries.get(fixture_id)
    }

    /// Universes with at least one fixture
    pub fn universes(&self) -> Vec<Universe> {
        self.by_universe.keys().copied().collect()
    }

    /// Number of patched fixtures
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is patched
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

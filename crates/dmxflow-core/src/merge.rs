//! Multi-source merging
//!
//! Only senders at the universe's highest active priority take part in a
//! merge. Among those:
//!
//! - **HTP** takes the highest value per channel, so two consoles at equal
//!   priority can each own different channels.
//! - **LTP** takes the full payload of the most recently heard sender. When
//!   two senders share the latest timestamp, the one with the smallest
//!   [`SourceId`](crate::SourceId) wins.

use serde::{Deserialize, Serialize};

use crate::source::SourceRecord;
use crate::state::UniverseState;
use crate::universe::DmxFrame;

/// Arbitration between senders at the same priority
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Highest Takes Priority, per channel
    #[default]
    Htp,
    /// Latest Takes Priority, whole universe
    Ltp,
}

/// What the merged frame does once the last sender is gone
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZeroSourcePolicy {
    /// Keep the last merged values, like a fixture holding on signal loss
    #[default]
    #[serde(rename = "hold")]
    HoldLast,
    /// Drop every channel to zero
    #[serde(rename = "blackout")]
    Blackout,
}

/// Computes a universe's authoritative frame from its active senders
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeEngine {
    pub strategy: MergeStrategy,
    pub zero_source: ZeroSourcePolicy,
}

impl MergeEngine {
    /// Create a merge engine
    pub fn new(strategy: MergeStrategy, zero_source: ZeroSourcePolicy) -> Self {
        Self {
            strategy,
            zero_source,
        }
    }

    /// Merge the given senders. `None` when there are none.
    ///
    /// Senders must be supplied in a stable order; LTP ties go to the first.
    pub fn merge<'a, I>(&self, sources: I) -> Option<DmxFrame>
    where
        I: IntoIterator<Item = &'a SourceRecord>,
        I::IntoIter: Clone,
    {
        let sources = sources.into_iter();
        let max_priority = sources.clone().map(|s| s.priority).max()?;
        let contenders = sources.filter(move |s| s.priority == max_priority);

        let frame = match self.strategy {
            MergeStrategy::Htp => merge_htp(contenders),
            MergeStrategy::Ltp => merge_ltp(contenders),
        };
        Some(frame)
    }

    /// Recompute a universe's reference frame from its senders.
    ///
    /// Returns whether any channel changed.
    pub fn recompute(&self, state: &mut UniverseState) -> bool {
        let merged = match self.merge(state.sources().values()) {
            Some(frame) => frame,
            None => match self.zero_source {
                ZeroSourcePolicy::HoldLast => return false,
                ZeroSourcePolicy::Blackout => DmxFrame::blackout(),
            },
        };
        state.replace_frame(merged)
    }
}

fn merge_htp<'a>(contenders: impl Iterator<Item = &'a SourceRecord>) -> DmxFrame {
    let mut merged = DmxFrame::blackout();
    for source in contenders {
        for (out, value) in merged
            .as_mut_slice()
            .iter_mut()
            .zip(source.payload.as_slice())
        {
            *out = (*out).max(*value);
        }
    }
    merged
}

fn merge_ltp<'a>(contenders: impl Iterator<Item = &'a SourceRecord>) -> DmxFrame {
    let mut latest: Option<&SourceRecord> = None;
    for source in contenders {
        match latest {
            // Strictly newer only, so the first of equal timestamps is kept
            Some(current) if source.last_seen <= current.last_seen => {}
            _ => latest = Some(source),
        }
    }
    latest.map(|s| s.payload).unwrap_or_default()
}

use std::collections::BTreeMap;

use thiserror::Error;

use crate::types::ActionKind;

/// Credit pricing for metered actions. Read-only at request time; the cost is
/// snapshotted onto the reservation, so table changes only affect new
/// reservations.
#[derive(Clone, Debug)]
pub struct PricingTable {
    costs: BTreeMap<ActionKind, u64>,
}

#[derive(Debug, Error)]
pub enum PricingError {
    #[error("unknown action kind: {kind}")]
    UnknownActionKind { kind: ActionKind },
    #[error("invalid cost for {kind}: cost must be a positive integer")]
    InvalidCost { kind: ActionKind },
}

impl Default for PricingTable {
    fn default() -> Self {
        let mut costs = BTreeMap::new();
        costs.insert(ActionKind::TextGeneration, 5);
        costs.insert(ActionKind::ImageGeneration, 10);
        costs.insert(ActionKind::CodeGeneration, 8);
        costs.insert(ActionKind::DataAnalysis, 15);
        costs.insert(ActionKind::TextSummarization, 3);
        costs.insert(ActionKind::SeoOptimization, 12);
        Self { costs }
    }
}

impl PricingTable {
    pub fn empty() -> Self {
        Self {
            costs: BTreeMap::new(),
        }
    }

    /// Builds a table registering exactly the given entries. Kinds left out
    /// are rejected at request time with `UnknownActionKind`.
    pub fn from_entries(entries: &BTreeMap<ActionKind, u64>) -> Result<Self, PricingError> {
        let mut table = Self::empty();
        for (&kind, &cost) in entries {
            table.set_cost(kind, cost)?;
        }
        Ok(table)
    }

    pub fn set_cost(&mut self, kind: ActionKind, cost: u64) -> Result<(), PricingError> {
        if cost == 0 {
            return Err(PricingError::InvalidCost { kind });
        }
        self.costs.insert(kind, cost);
        Ok(())
    }

    pub fn cost(&self, kind: ActionKind) -> Result<u64, PricingError> {
        self.costs
            .get(&kind)
            .copied()
            .ok_or(PricingError::UnknownActionKind { kind })
    }
}

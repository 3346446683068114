use super::{Gate, GateContext, GateVerdict, DUPLICATE_DETECTION};
use crate::{Candidate, GateName};

/// Rejects items already seen in the run, by content id or near-identical title.
#[derive(Debug, Clone)]
pub struct DuplicateGate {
    name: GateName,
    similarity_threshold: f64,
}

impl DuplicateGate {
    /// Creates the gate. Titles whose similarity exceeds the threshold are duplicates.
    pub fn new(similarity_threshold: f64) -> Self {
        Self {
            name: GateName::from_static(DUPLICATE_DETECTION),
            similarity_threshold,
        }
    }
}

impl Gate for DuplicateGate {
    fn name(&self) -> &GateName {
        &self.name
    }

    fn evaluate(&self, candidate: &Candidate, ctx: &GateContext<'_>) -> GateVerdict {
        if ctx.seen.contains_id(&candidate.id) {
            return GateVerdict::fail(
                &self.name,
                format!("Exact duplicate of {}", candidate.id.short()),
            );
        }
        if let Some((title, score)) = ctx.seen.most_similar_title(&candidate.title) {
            if score > self.similarity_threshold {
                return GateVerdict::fail(
                    &self.name,
                    format!("Similar title already seen: '{title}' (similarity {score:.2})"),
                );
            }
        }
        GateVerdict::pass(&self.name, "No duplicates found")
    }
}

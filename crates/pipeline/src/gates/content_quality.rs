use super::language;
use super::{Gate, GateContext, GateVerdict, CONTENT_QUALITY};
use crate::{Candidate, GateName};

/// Rejects articles that are too short, too long or not predominantly Spanish.
#[derive(Debug, Clone)]
pub struct ContentQualityGate {
    name: GateName,
    min_length: usize,
    max_length: usize,
    min_language_ratio: f64,
}

impl ContentQualityGate {
    /// Creates the gate with the given character bounds and Spanish ratio.
    pub fn new(min_length: usize, max_length: usize, min_language_ratio: f64) -> Self {
        Self {
            name: GateName::from_static(CONTENT_QUALITY),
            min_length,
            max_length,
            min_language_ratio,
        }
    }
}

impl Gate for ContentQualityGate {
    fn name(&self) -> &GateName {
        &self.name
    }

    fn evaluate(&self, candidate: &Candidate, _ctx: &GateContext<'_>) -> GateVerdict {
        if candidate.title.trim().is_empty() || candidate.body.trim().is_empty() {
            return GateVerdict::fail(&self.name, "Missing title or body");
        }
        let length = candidate.content_length;
        if length < self.min_length {
            return GateVerdict::fail(
                &self.name,
                format!("Content too short: {length} chars (min: {})", self.min_length),
            );
        }
        if length > self.max_length {
            return GateVerdict::fail(
                &self.name,
                format!("Content too long: {length} chars (max: {})", self.max_length),
            );
        }

        let profile = language::profile(&format!("{}\n{}", candidate.title, candidate.body));
        let ratio = profile.spanish_ratio();
        if ratio < self.min_language_ratio {
            return GateVerdict::fail(
                &self.name,
                format!(
                    "Not predominantly Spanish: ratio {ratio:.2} (min: {:.2}; {} Spanish vs {} English tokens)",
                    self.min_language_ratio, profile.spanish, profile.english
                ),
            );
        }

        GateVerdict::pass(
            &self.name,
            format!("Content OK: {length} chars, Spanish ratio {ratio:.2}"),
        )
    }
}

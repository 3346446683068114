use super::{Gate, GateContext, GateVerdict, TEMPORAL_RELEVANCE};
use crate::{Candidate, GateName};

/// Rejects articles older than the configured age at evaluation time.
///
/// Articles dated in the future have a negative age and pass.
#[derive(Debug, Clone)]
pub struct TemporalRelevanceGate {
    name: GateName,
    max_age_hours: f64,
}

impl TemporalRelevanceGate {
    /// Creates the gate with the given maximum age.
    pub fn new(max_age_hours: f64) -> Self {
        Self {
            name: GateName::from_static(TEMPORAL_RELEVANCE),
            max_age_hours,
        }
    }
}

impl Gate for TemporalRelevanceGate {
    fn name(&self) -> &GateName {
        &self.name
    }

    fn evaluate(&self, candidate: &Candidate, ctx: &GateContext<'_>) -> GateVerdict {
        let age_hours = candidate.published_at.hours_until(ctx.now);
        if age_hours > self.max_age_hours {
            return GateVerdict::fail(
                &self.name,
                format!(
                    "Article too old: {age_hours:.1} hours (max: {})",
                    self.max_age_hours
                ),
            );
        }
        GateVerdict::pass(&self.name, format!("Article age: {age_hours:.1} hours"))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::gates::SeenWindow;

    fn verdict(published: &str) -> GateVerdict {
        let seen = SeenWindow::new();
        TemporalRelevanceGate::new(48.0).evaluate(
            &candidate("Título", "cuerpo", published),
            &GateContext { seen: &seen, now: now() },
        )
    }

    #[test]
    fn recent_articles_pass() {
        let v = verdict(&hours_ago(47));
        assert!(v.passed);
        assert_eq!(v.reason, "Article age: 47.0 hours");
    }

    #[test]
    fn the_boundary_is_inclusive() {
        assert!(verdict(&hours_ago(48)).passed);
    }

    #[test]
    fn old_articles_fail() {
        let v = verdict(&hours_ago(72));
        assert!(!v.passed);
        assert_eq!(v.reason, "Article too old: 72.0 hours (max: 48)");
    }

    #[test]
    fn future_dated_articles_pass() {
        assert!(verdict(&hours_ago(-5)).passed);
    }
}

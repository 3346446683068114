//! End-to-end admission scenarios against the standard gate evaluator.

use chrono::{Duration, TimeZone, Utc};
use pipeline::gates::{CONTENT_QUALITY, DUPLICATE_DETECTION, TEMPORAL_RELEVANCE};
use pipeline::{
    normalize, Candidate, Gate, GateConfig, GateContext, GateEvaluator, GateName, GateVerdict,
    RawArticle, SeenWindow, Timestamp,
};
use proptest::prelude::*;

fn now() -> Timestamp {
    Timestamp::from_utc(Utc.with_ymd_and_hms(2026, 10, 16, 14, 0, 0).unwrap())
}

fn article(title: &str, body: &str, hours_old: i64) -> Candidate {
    let published = now().as_datetime() - Duration::hours(hours_old);
    normalize(&RawArticle {
        title: title.into(),
        body: body.into(),
        timestamp: published.to_rfc3339(),
        source: "el_tiempo".into(),
        url: "https://example.com/nota".into(),
    })
    .unwrap()
}

const SPANISH_ARTICLE: &str = "La junta directiva del Banco de la República decidió este \
    viernes mantener sin cambios la tasa de interés de política monetaria, en una decisión \
    dividida que sorprendió a buena parte de los analistas del mercado. Según el comunicado \
    oficial, la inflación continúa por encima de la meta y la tasa de cambio ha mostrado una \
    volatilidad elevada durante las últimas semanas, en parte por la caída del precio del \
    petróleo y por la incertidumbre sobre la reforma tributaria que se discute en el \
    Congreso. El gerente del emisor explicó que la autoridad monetaria seguirá atenta a los \
    datos de empleo y de crecimiento.";

const ENGLISH_ARTICLE: &str = "The weather was pleasant on Saturday and the local football \
    team won their match in the last minutes, which made the fans celebrate in the streets \
    for hours after the game. Meanwhile the city council said that it would open a new park \
    near the river next spring.";

#[test]
fn english_article_without_keywords_is_rejected_early() {
    let evaluator = GateEvaluator::standard(&GateConfig::default()).unwrap();
    let mut seen = SeenWindow::new();
    let candidate = article("Weekend roundup", ENGLISH_ARTICLE, 72);
    assert!(candidate.content_length >= 200);

    let result = evaluator.evaluate(&candidate, &mut seen, now());

    assert!(!result.admitted);
    assert_eq!(result.verdicts.len(), 1);
    assert_eq!(result.verdicts[0].gate_name.as_str(), CONTENT_QUALITY);
}

#[test]
fn relevant_spanish_article_passes_every_gate() {
    let evaluator = GateEvaluator::standard(&GateConfig::default()).unwrap();
    let mut seen = SeenWindow::new();
    let candidate = article(
        "Banco de la República mantiene la tasa de interés",
        SPANISH_ARTICLE,
        2,
    );
    assert!(candidate.content_length >= 500);

    let result = evaluator.evaluate(&candidate, &mut seen, now());

    assert!(result.admitted, "{:?}", result.rejection());
    assert_eq!(result.verdicts.len(), 4);
    assert!(result.verdicts.iter().all(|v| v.passed));
    assert!(result.verdicts[1].reason.starts_with("Found "));
}

#[test]
fn second_copy_is_rejected_as_duplicate_in_either_order() {
    let evaluator = GateEvaluator::standard(&GateConfig::default()).unwrap();
    let a = article("Banco de la República mantiene la tasa", SPANISH_ARTICLE, 2);
    let b = article("banco de la  república MANTIENE la tasa", SPANISH_ARTICLE, 5);
    assert_eq!(a.id, b.id);

    for (first, second) in [(&a, &b), (&b, &a)] {
        let mut seen = SeenWindow::new();
        assert!(evaluator.evaluate(first, &mut seen, now()).admitted);
        let result = evaluator.evaluate(second, &mut seen, now());
        assert!(!result.admitted);
        assert_eq!(
            result.rejection().map(|v| v.gate_name.as_str()),
            Some(DUPLICATE_DETECTION)
        );
    }
}

#[test]
fn a_rejected_item_still_catches_its_later_copy() {
    let evaluator = GateEvaluator::standard(&GateConfig::default()).unwrap();
    let mut seen = SeenWindow::new();
    let stale = article("Banco de la República mantiene la tasa", SPANISH_ARTICLE, 96);

    let first = evaluator.evaluate(&stale, &mut seen, now());
    assert_eq!(
        first.rejection().map(|v| v.gate_name.as_str()),
        Some(TEMPORAL_RELEVANCE)
    );

    let copy = article("Banco de la República mantiene la tasa", SPANISH_ARTICLE, 1);
    let second = evaluator.evaluate(&copy, &mut seen, now());
    assert_eq!(
        second.rejection().map(|v| v.gate_name.as_str()),
        Some(DUPLICATE_DETECTION)
    );
}

#[test]
fn separate_windows_do_not_share_state() {
    let evaluator = GateEvaluator::standard(&GateConfig::default()).unwrap();
    let candidate = article("Banco de la República mantiene la tasa", SPANISH_ARTICLE, 2);

    let mut run_one = SeenWindow::new();
    let mut run_two = SeenWindow::new();
    assert!(evaluator.evaluate(&candidate, &mut run_one, now()).admitted);
    assert!(evaluator.evaluate(&candidate, &mut run_two, now()).admitted);
}

struct Fixed {
    name: GateName,
    pass: bool,
}

impl Gate for Fixed {
    fn name(&self) -> &GateName {
        &self.name
    }

    fn evaluate(&self, _: &Candidate, _: &GateContext<'_>) -> GateVerdict {
        if self.pass {
            GateVerdict::pass(&self.name, "pass")
        } else {
            GateVerdict::fail(&self.name, "fail")
        }
    }
}

proptest! {
    #[test]
    fn verdicts_end_at_the_first_failure(outcomes in proptest::collection::vec(any::<bool>(), 4)) {
        let gates: Vec<Box<dyn Gate>> = outcomes
            .iter()
            .enumerate()
            .map(|(i, pass)| {
                Box::new(Fixed { name: GateName::new(format!("g{i}")).unwrap(), pass: *pass })
                    as Box<dyn Gate>
            })
            .collect();
        let evaluator = GateEvaluator::from_gates(gates).unwrap();
        let mut seen = SeenWindow::new();
        let candidate = article("Título", SPANISH_ARTICLE, 1);

        let result = evaluator.evaluate(&candidate, &mut seen, now());

        let expected_len = outcomes.iter().position(|p| !p).map_or(4, |i| i + 1);
        prop_assert_eq!(result.verdicts.len(), expected_len);
        prop_assert_eq!(result.admitted, outcomes.iter().all(|p| *p));
        prop_assert_eq!(result.admitted, result.verdicts.iter().all(|v| v.passed));
    }
}

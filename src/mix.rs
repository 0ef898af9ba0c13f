use std::collections::BTreeMap;

use itertools::Itertools;
use rand::Rng;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::trace::AppCatalog;

/// Normalized application mix. Apps are kept in name order, which is the
/// order `choose` walks them in.
#[derive(Debug, Clone, PartialEq)]
pub struct MixDistribution {
    apps: Vec<String>,
    probs: Vec<f64>,
}

/// Clamps each weight to be non-negative and scales them to sum to 1.
pub fn normalize(weights: &BTreeMap<String, f64>) -> Result<BTreeMap<String, f64>> {
    let clamp = |w: f64| if w.is_finite() { w.max(0.0) } else { 0.0 };
    let total: f64 = weights.values().map(|&w| clamp(w)).sum();
    if !(total > 0.0) {
        return Err(Error::config("app mix must have positive probabilities"));
    }
    Ok(weights
        .iter()
        .map(|(app, &w)| (app.clone(), clamp(w) / total))
        .collect())
}

/// Picks the first app whose cumulative probability reaches `draw`.
///
/// Apps with zero probability are never picked. Falls back to the last app
/// carrying mass so rounding at the top of the range cannot fall through.
pub fn choose_with<'a>(apps: &'a [String], probs: &[f64], draw: f64) -> Option<&'a str> {
    let mut cumulative = 0.0;
    let mut fallback = None;
    for (app, &p) in apps.iter().zip(probs) {
        if p <= 0.0 {
            continue;
        }
        cumulative += p;
        fallback = Some(app.as_str());
        if draw <= cumulative {
            return fallback;
        }
    }
    fallback.or_else(|| apps.last().map(String::as_str))
}

impl MixDistribution {
    pub fn new(weights: &BTreeMap<String, f64>) -> Result<Self> {
        let normalized = normalize(weights)?;
        let (apps, probs) = normalized.into_iter().unzip();
        Ok(MixDistribution { apps, probs })
    }

    /// Like `new`, but every app must be present in `catalog`.
    pub fn validated(weights: &BTreeMap<String, f64>, catalog: &AppCatalog) -> Result<Self> {
        if let Some(unknown) = weights.keys().find(|app| !catalog.contains(app)) {
            return Err(Error::config(format!(
                "unknown app '{}' (must be one of [{}])",
                unknown,
                catalog.apps().join(", ")
            )));
        }
        Self::new(weights)
    }

    /// Parses a JSON object of app name to weight.
    pub fn parse_weights(json: &str) -> Result<BTreeMap<String, f64>> {
        let value: Value = serde_json::from_str(json)?;
        let object = value
            .as_object()
            .ok_or_else(|| Error::config("app mix must be a JSON object"))?;
        object
            .iter()
            .map(|(app, weight)| {
                weight
                    .as_f64()
                    .map(|w| (app.clone(), w))
                    .ok_or_else(|| Error::config(format!("weight for '{}' is not a number", app)))
            })
            .collect()
    }

    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        let draw: f64 = rng.gen();
        // Non-empty: normalize rejects an empty map.
        choose_with(&self.apps, &self.probs, draw).unwrap_or_default()
    }

    pub fn apps(&self) -> &[String] {
        &self.apps
    }

    pub fn probability(&self, app: &str) -> f64 {
        self.apps
            .iter()
            .position(|a| a == app)
            .map(|i| self.probs[i])
            .unwrap_or(0.0)
    }

    /// `app:prob` pairs for logging.
    pub fn describe(&self) -> String {
        self.apps
            .iter()
            .zip(&self.probs)
            .map(|(app, p)| format!("{}:{:.2}", app, p))
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{Trace, TracePoint};
    use rand::SeedableRng;
    use rand_mt::Mt64;

    fn weights(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|&(a, w)| (a.to_string(), w)).collect()
    }

    #[test]
    fn normalize_preserves_ratios() {
        let n = normalize(&weights(&[("a", 1.0), ("b", 3.0), ("c", -2.0)])).unwrap();
        assert!((n.values().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!((n["a"] - 0.25).abs() < 1e-12);
        assert!((n["b"] - 0.75).abs() < 1e-12);
        assert_eq!(n["c"], 0.0);
    }

    #[test]
    fn normalize_rejects_zero_sum() {
        assert!(normalize(&weights(&[("a", 0.0), ("b", -1.0)])).is_err());
        assert!(normalize(&BTreeMap::new()).is_err());
    }

    #[test]
    fn choose_with_fixed_draws() {
        let apps: Vec<String> = vec!["a".into(), "b".into(), "c".into()];
        let probs = [0.2, 0.0, 0.8];
        assert_eq!(choose_with(&apps, &probs, 0.0), Some("a"));
        assert_eq!(choose_with(&apps, &[0.0, 0.4, 0.6], 0.0), Some("b"));
        assert_eq!(choose_with(&apps, &probs, 0.2), Some("a"));
        assert_eq!(choose_with(&apps, &probs, 0.21), Some("c"));
        assert_eq!(choose_with(&apps, &probs, 0.9999), Some("c"));
        // Rounding can leave the cumulative sum just short of 1.
        assert_eq!(choose_with(&apps, &[0.1, 0.1, 0.7999], 0.99995), Some("c"));
    }

    #[test]
    fn zero_weight_apps_are_never_chosen() {
        let mix = MixDistribution::new(&weights(&[("a", 0.0), ("b", 1.0), ("c", 0.0)])).unwrap();
        let mut rng = Mt64::seed_from_u64(7);
        assert!((0..1000).all(|_| mix.choose(&mut rng) == "b"));
    }

    #[test]
    fn seeded_choice_is_deterministic() {
        let mix = MixDistribution::new(&weights(&[("a", 1.0), ("b", 1.0), ("c", 2.0)])).unwrap();
        let mut r1 = Mt64::seed_from_u64(42);
        let mut r2 = Mt64::seed_from_u64(42);
        let s1: Vec<String> = (0..64).map(|_| mix.choose(&mut r1).to_string()).collect();
        let s2: Vec<String> = (0..64).map(|_| mix.choose(&mut r2).to_string()).collect();
        assert_eq!(s1, s2);
        assert!(s1.iter().all(|a| mix.apps().contains(a)));
    }

    #[test]
    fn parse_weights_from_json() {
        let w = MixDistribution::parse_weights(r#"{"youtube": 1, "browsing": 0.5}"#).unwrap();
        assert_eq!(w["youtube"], 1.0);
        assert_eq!(w["browsing"], 0.5);
        assert!(MixDistribution::parse_weights("[1, 2]").unwrap_err().is_configuration());
        assert!(MixDistribution::parse_weights(r#"{"a": "x"}"#).is_err());
        assert!(MixDistribution::parse_weights("{").unwrap_err().is_configuration());
    }

    #[test]
    fn unknown_apps_are_rejected() {
        let mut catalog = AppCatalog::new();
        let trace = Trace::from_points(vec![TracePoint::new(0.0, 10.0).unwrap()]).unwrap();
        catalog.insert("youtube", trace);
        let err = MixDistribution::validated(&weights(&[("tiktok", 1.0)]), &catalog).unwrap_err();
        assert!(err.is_configuration());
        assert!(MixDistribution::validated(&weights(&[("youtube", 1.0)]), &catalog).is_ok());
    }
}

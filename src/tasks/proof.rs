// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Proof verdicts from the external verification step.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Minimum confidence accepted when no other threshold is configured.
pub const DEFAULT_ACCEPTANCE_THRESHOLD: f64 = 0.6;

/// Verdict produced by the proof-analysis collaborator.
///
/// Either field may carry the decision. When both are present both must
/// pass; when neither is present the verdict is rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProofVerdict {
    /// Explicit accept/reject decision.
    #[serde(default)]
    pub accepted: Option<bool>,
    /// Confidence score in `[0, 1]`.
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Reference to the analysed evidence (upload id, URL).
    pub reference: String,
    /// Structured findings, e.g. detected hashtags.
    #[serde(default)]
    pub findings: Vec<String>,
}

impl ProofVerdict {
    pub fn accepted(reference: impl Into<String>) -> Self {
        Self {
            accepted: Some(true),
            confidence: None,
            reference: reference.into(),
            findings: Vec::new(),
        }
    }

    pub fn with_confidence(reference: impl Into<String>, confidence: f64) -> Self {
        Self {
            accepted: None,
            confidence: Some(confidence),
            reference: reference.into(),
            findings: Vec::new(),
        }
    }

    /// Check the verdict against `threshold`; returns the rejection reason.
    pub fn evaluate(&self, threshold: f64) -> Result<(), String> {
        if self.reference.trim().is_empty() {
            return Err("Proof reference is required".to_string());
        }
        if self.accepted == Some(false) {
            return Err("Proof was rejected by verification".to_string());
        }
        match self.confidence {
            Some(c) if !c.is_finite() || !(0.0..=1.0).contains(&c) => {
                Err(format!("Confidence {c} is outside [0, 1]"))
            }
            Some(c) if c < threshold => Err(format!(
                "Confidence {c:.2} is below the acceptance threshold {threshold:.2}"
            )),
            Some(_) => Ok(()),
            None if self.accepted == Some(true) => Ok(()),
            None => Err("Verdict carries no decision".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepted_flag_alone_passes() {
        assert!(ProofVerdict::accepted("upload-1").evaluate(0.6).is_ok());
    }

    #[test]
    fn confidence_is_compared_to_threshold() {
        assert!(ProofVerdict::with_confidence("u", 0.6).evaluate(0.6).is_ok());
        assert!(ProofVerdict::with_confidence("u", 0.8).evaluate(0.6).is_ok());
        assert!(ProofVerdict::with_confidence("u", 0.59).evaluate(0.6).is_err());
    }

    #[test]
    fn both_fields_must_pass() {
        let mut verdict = ProofVerdict::accepted("u");
        verdict.confidence = Some(0.2);
        assert!(verdict.evaluate(0.6).is_err());

        let mut verdict = ProofVerdict::with_confidence("u", 0.9);
        verdict.accepted = Some(false);
        assert!(verdict.evaluate(0.6).is_err());
    }

    #[test]
    fn empty_or_malformed_verdicts_are_rejected() {
        let empty = ProofVerdict {
            accepted: None,
            confidence: None,
            reference: "u".to_string(),
            findings: vec![],
        };
        assert!(empty.evaluate(0.6).is_err());
        assert!(ProofVerdict::accepted("  ").evaluate(0.6).is_err());
        assert!(ProofVerdict::with_confidence("u", f64::NAN).evaluate(0.0).is_err());
        assert!(ProofVerdict::with_confidence("u", 1.5).evaluate(0.6).is_err());
    }

    #[test]
    fn deserializes_with_defaults() {
        let verdict: ProofVerdict =
            serde_json::from_str(r#"{"confidence":0.8,"reference":"upload-9"}"#).unwrap();
        assert_eq!(verdict.accepted, None);
        assert!(verdict.findings.is_empty());
    }
}

//! Collection matching: a live capture against a user's enrolled samples.
//!
//! Both matchers have any-of semantics — the scan short-circuits on the
//! first sample inside the threshold. Records without a collection fall
//! back to the legacy single-sample fields.

use crate::embedding::{self, Embedding};
use crate::policy;
use crate::pose::{self, PoseSample};
use crate::record::BiometricRecord;

/// Outcome of an embedding collection scan, carrying the evidence used so
/// callers can log it. Consumers act on `matched`.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionMatch {
    pub matched: bool,
    /// Lowest distance observed across comparable samples, if any.
    pub best_distance: Option<f32>,
    /// Index of the sample that satisfied the threshold.
    pub sample_index: Option<usize>,
}

impl CollectionMatch {
    fn legacy(matched: bool) -> Self {
        Self {
            matched,
            best_distance: None,
            sample_index: None,
        }
    }
}

/// Match a live embedding against the record's enrolled collection.
///
/// With no collection the legacy stored embedding decides (shape-dispatched
/// single-sample comparison). With a collection, every sample is compared
/// by Euclidean distance over the first 128 components against the
/// failure-adaptive ceiling; a malformed sample is skipped, never fatal.
pub fn match_collection(record: &BiometricRecord, live: &Embedding) -> CollectionMatch {
    if !record.has_collection() {
        let matched = record
            .legacy_embedding
            .as_ref()
            .map(|stored| embedding::embedding_matches(stored, live))
            .unwrap_or(false);
        return CollectionMatch::legacy(matched);
    }

    let threshold = policy::thresholds_for(record.failed_attempts()).distance;
    let mut best: Option<f32> = None;

    for (index, sample) in record.samples.iter().enumerate() {
        let dist = match embedding::euclidean_128(sample.embedding.values(), live.values()) {
            Ok(dist) => dist,
            Err(fault) => {
                tracing::debug!(index, %fault, "skipping uncomparable enrollment sample");
                continue;
            }
        };
        if best.map_or(true, |b| dist < b) {
            best = Some(dist);
        }
        if dist < threshold {
            return CollectionMatch {
                matched: true,
                best_distance: Some(dist),
                sample_index: Some(index),
            };
        }
    }

    CollectionMatch {
        matched: false,
        best_distance: best,
        sample_index: None,
    }
}

/// Match a live pose against the record's enrolled poses under the
/// failure-adaptive windows. With no collection, the legacy pose stands in
/// as a one-element collection. An absent live sample matches nothing.
pub fn match_pose_collection(record: &BiometricRecord, live: Option<&PoseSample>) -> bool {
    let Some(live) = live else {
        return false;
    };

    let tol = policy::thresholds_for(record.failed_attempts()).pose;
    if !record.has_collection() {
        return record
            .legacy_pose
            .as_ref()
            .map(|stored| pose::pose_matches(stored, live, &tol))
            .unwrap_or(false);
    }

    record
        .samples
        .iter()
        .any(|sample| pose::pose_matches(&sample.pose, live, &tol))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::EnrollmentSample;

    /// 128-dim embedding at Euclidean distance `dist` from the zero vector.
    fn offset_embedding(dist: f32) -> Embedding {
        let mut values = vec![0.0; 128];
        values[0] = dist;
        Embedding::from_values(values)
    }

    fn zero_embedding() -> Embedding {
        Embedding::from_values(vec![0.0; 128])
    }

    fn frontal_pose() -> PoseSample {
        PoseSample::Planar {
            x: 0.5,
            y: 0.5,
            scale: 1.0,
        }
    }

    fn record_with_samples(samples: Vec<EnrollmentSample>) -> BiometricRecord {
        let mut record = BiometricRecord::new("alice", "12345678");
        record.samples = samples;
        record
    }

    fn sample(embedding: Embedding) -> EnrollmentSample {
        EnrollmentSample {
            embedding,
            pose: frontal_pose(),
        }
    }

    #[test]
    fn any_sample_inside_threshold_matches() {
        let record = record_with_samples(vec![
            sample(offset_embedding(2.0)),
            sample(offset_embedding(0.2)),
            sample(offset_embedding(3.0)),
        ]);
        let result = match_collection(&record, &zero_embedding());
        assert!(result.matched);
        assert_eq!(result.sample_index, Some(1));
    }

    #[test]
    fn no_sample_inside_threshold_rejects() {
        let record = record_with_samples(vec![
            sample(offset_embedding(0.9)),
            sample(offset_embedding(0.7)),
        ]);
        let result = match_collection(&record, &zero_embedding());
        assert!(!result.matched);
        assert_eq!(result.sample_index, None);
        let best = result.best_distance.unwrap();
        assert!((best - 0.7).abs() < 1e-5);
    }

    #[test]
    fn malformed_sample_is_skipped_not_fatal() {
        let record = record_with_samples(vec![
            sample(Embedding::from_values(vec![0.0; 16])),
            sample(offset_embedding(0.1)),
        ]);
        let result = match_collection(&record, &zero_embedding());
        assert!(result.matched);
        assert_eq!(result.sample_index, Some(1));
    }

    #[test]
    fn distance_half_rejected_fresh_accepted_after_three_failures() {
        let mut record = record_with_samples(vec![sample(offset_embedding(0.5))]);
        // Ceiling 0.45 at zero failures.
        assert!(!match_collection(&record, &zero_embedding()).matched);

        // After three failures the ceiling widens to 0.54.
        record.set_failed_attempts(3);
        assert!(match_collection(&record, &zero_embedding()).matched);
    }

    #[test]
    fn empty_live_embedding_rejected() {
        let record = record_with_samples(vec![sample(zero_embedding())]);
        let result = match_collection(&record, &Embedding::from_values(vec![]));
        assert!(!result.matched);
        assert_eq!(result.best_distance, None);
    }

    #[test]
    fn legacy_cosine_path_when_no_collection() {
        // A 768-component fallback fingerprint stored before collections
        // existed is compared by cosine similarity.
        let fingerprint: Vec<f32> = (0..768).map(|i| ((i % 7) as f32 + 1.0) * 0.1).collect();
        let mut record = BiometricRecord::new("alice", "12345678");
        record.legacy_embedding = Some(Embedding::from_values(fingerprint.clone()));

        let live = Embedding::from_values(fingerprint);
        assert!(match_collection(&record, &live).matched);

        let orthogonal: Vec<f32> = (0..768)
            .map(|i| if i % 2 == 0 { 1.0 } else { -1.0 })
            .collect();
        let live = Embedding::from_values(orthogonal);
        assert!(!match_collection(&record, &live).matched);
    }

    #[test]
    fn no_collection_and_no_legacy_rejects() {
        let record = BiometricRecord::new("alice", "12345678");
        assert!(!match_collection(&record, &zero_embedding()).matched);
        assert!(!match_pose_collection(&record, Some(&frontal_pose())));
    }

    #[test]
    fn collection_ignores_legacy_fields() {
        // Collection present: a legacy embedding that would match must not
        // be consulted.
        let mut record = record_with_samples(vec![sample(offset_embedding(3.0))]);
        record.legacy_embedding = Some(zero_embedding());
        assert!(!match_collection(&record, &zero_embedding()).matched);
    }

    #[test]
    fn pose_any_of_across_collection() {
        let mut record = record_with_samples(vec![
            EnrollmentSample {
                embedding: zero_embedding(),
                pose: PoseSample::Planar {
                    x: 0.1,
                    y: 0.1,
                    scale: 1.0,
                },
            },
            EnrollmentSample {
                embedding: zero_embedding(),
                pose: frontal_pose(),
            },
        ]);
        record.set_failed_attempts(0);
        let live = PoseSample::Planar {
            x: 0.52,
            y: 0.48,
            scale: 1.05,
        };
        assert!(match_pose_collection(&record, Some(&live)));
    }

    #[test]
    fn pose_windows_tighten_with_failures() {
        // Offset inside the baseline window but outside the max-failure one.
        let mut record = record_with_samples(vec![sample(zero_embedding())]);
        let live = PoseSample::Planar {
            x: 0.57,
            y: 0.5,
            scale: 1.0,
        };
        assert!(match_pose_collection(&record, Some(&live)));

        record.set_failed_attempts(5);
        assert!(!match_pose_collection(&record, Some(&live)));
    }

    #[test]
    fn absent_live_pose_rejected() {
        let record = record_with_samples(vec![sample(zero_embedding())]);
        assert!(!match_pose_collection(&record, None));
    }

    #[test]
    fn legacy_pose_substitutes_for_empty_collection() {
        let mut record = BiometricRecord::new("alice", "12345678");
        record.legacy_pose = Some(frontal_pose());
        let live = PoseSample::Planar {
            x: 0.55,
            y: 0.5,
            scale: 1.0,
        };
        assert!(match_pose_collection(&record, Some(&live)));

        // Adaptive windows apply to the substituted pose as well.
        record.set_failed_attempts(5);
        let far = PoseSample::Planar {
            x: 0.57,
            y: 0.5,
            scale: 1.0,
        };
        assert!(!match_pose_collection(&record, Some(&far)));
    }

    #[test]
    fn pose_schema_mismatch_never_matches() {
        let record = record_with_samples(vec![sample(zero_embedding())]);
        let live = PoseSample::Angular {
            roll: 0.0,
            pitch: 0.0,
            yaw: 0.0,
            dist: 0.5,
        };
        assert!(!match_pose_collection(&record, Some(&live)));
    }
}

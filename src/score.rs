use crate::model::{Attendance, LessonType};
use serde::{Deserialize, Serialize};

/// One grade cell joined with the lesson it belongs to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreRecord {
    pub grade: Option<i64>,
    pub attendance: Attendance,
    pub lesson_type: LessonType,
    pub max_points: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    Excellent,
    Good,
    Satisfactory,
    Unsatisfactory,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScorePolicy {
    pub formative_weight: f64,
    pub sor_weight: f64,
    pub soch_weight: f64,
    /// Below this many eligible items the formative bucket averages to 0.
    pub formative_min_count: usize,
    pub formative_max_points: f64,
}

impl Default for ScorePolicy {
    fn default() -> Self {
        Self {
            formative_weight: 0.10,
            sor_weight: 0.50,
            soch_weight: 0.40,
            formative_min_count: 4,
            formative_max_points: 10.0,
        }
    }
}

impl ScorePolicy {
    pub fn validate(&self) -> Result<(), String> {
        let weights = [self.formative_weight, self.sor_weight, self.soch_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err("weights must be finite and >= 0".to_string());
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(format!("weights must sum to 1, got {sum}"));
        }
        if !self.formative_max_points.is_finite() || self.formative_max_points <= 0.0 {
            return Err("formativeMaxPoints must be > 0".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketAverage {
    pub count: usize,
    /// 0..=100, already zeroed when the bucket does not count.
    pub avg_percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuarterScore {
    pub percentage: u8,
    pub band: Band,
    pub formative: BucketAverage,
    pub sor: BucketAverage,
    pub soch: BucketAverage,
    pub has_data: bool,
}

enum Bucket {
    Formative,
    Sor,
    Soch,
}

fn bucket_for(record: &ScoreRecord) -> Option<(Bucket, f64)> {
    if record.attendance != Attendance::Present {
        return None;
    }
    let grade = record.grade.filter(|g| *g >= 0)? as f64;
    match record.lesson_type {
        LessonType::Default
        | LessonType::ClassWork
        | LessonType::IndependentWork
        | LessonType::ProjectWork => Some((Bucket::Formative, grade)),
        LessonType::Sor | LessonType::Soch => {
            let max = record.max_points.filter(|m| *m > 0)? as f64;
            let bucket = if record.lesson_type == LessonType::Sor {
                Bucket::Sor
            } else {
                Bucket::Soch
            };
            Some((bucket, grade / max))
        }
    }
}

/// Round half up, matching how the percentage badge has always been shown.
fn round_half_up(x: f64) -> f64 {
    // Weighted sums of ratios land a hair under an exact .5 (0.5 * 28.999999999999996).
    let snapped = (x * 1e9).round() / 1e9;
    (snapped + 0.5).floor()
}

pub fn score_quarter<I>(records: I, policy: &ScorePolicy) -> QuarterScore
where
    I: IntoIterator<Item = ScoreRecord>,
{
    let mut fo_sum = 0.0;
    let mut fo_count: usize = 0;
    let mut sor_sum = 0.0;
    let mut sor_count: usize = 0;
    let mut soch_sum = 0.0;
    let mut soch_count: usize = 0;

    for record in records {
        match bucket_for(&record) {
            Some((Bucket::Formative, v)) => {
                fo_sum += v;
                fo_count += 1;
            }
            Some((Bucket::Sor, v)) => {
                sor_sum += v;
                sor_count += 1;
            }
            Some((Bucket::Soch, v)) => {
                soch_sum += v;
                soch_count += 1;
            }
            None => {}
        }
    }

    let fo_avg = if fo_count > 0 && fo_count >= policy.formative_min_count {
        fo_sum / (fo_count as f64 * policy.formative_max_points) * 100.0
    } else {
        0.0
    };
    // Mean of per-lesson ratios, not pooled points over pooled maxima.
    let ratio_avg = |sum: f64, count: usize| {
        if count > 0 {
            sum / count as f64 * 100.0
        } else {
            0.0
        }
    };
    let sor_avg = ratio_avg(sor_sum, sor_count);
    let soch_avg = ratio_avg(soch_sum, soch_count);

    let weighted = policy.formative_weight * fo_avg
        + policy.sor_weight * sor_avg
        + policy.soch_weight * soch_avg;
    let percentage = round_half_up(weighted).clamp(0.0, 100.0) as u8;

    QuarterScore {
        percentage,
        band: band_for(percentage),
        formative: BucketAverage {
            count: fo_count,
            avg_percent: fo_avg,
        },
        sor: BucketAverage {
            count: sor_count,
            avg_percent: sor_avg,
        },
        soch: BucketAverage {
            count: soch_count,
            avg_percent: soch_avg,
        },
        has_data: fo_count + sor_count + soch_count > 0,
    }
}

#[cfg(test)]
pub fn compute_quarter_percentage<I>(records: I) -> u8
where
    I: IntoIterator<Item = ScoreRecord>,
{
    score_quarter(records, &ScorePolicy::default()).percentage
}

pub fn band_for(percentage: u8) -> Band {
    match percentage {
        86..=u8::MAX => Band::Excellent,
        66..=85 => Band::Good,
        30..=65 => Band::Satisfactory,
        _ => Band::Unsatisfactory,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(grade: Option<i64>, lesson_type: LessonType, max_points: Option<i64>) -> ScoreRecord {
        ScoreRecord {
            grade,
            attendance: Attendance::Present,
            lesson_type,
            max_points,
        }
    }

    #[test]
    fn empty_input_scores_zero_unsatisfactory() {
        let s = score_quarter(Vec::new(), &ScorePolicy::default());
        assert_eq!(s.percentage, 0);
        assert_eq!(s.band, Band::Unsatisfactory);
        assert!(!s.has_data);
    }

    #[test]
    fn formative_only_is_not_renormalized() {
        let records = vec![
            rec(Some(10), LessonType::Default, None),
            rec(Some(10), LessonType::ClassWork, None),
            rec(Some(10), LessonType::IndependentWork, None),
            rec(Some(10), LessonType::ProjectWork, None),
        ];
        let s = score_quarter(records, &ScorePolicy::default());
        assert_eq!(s.formative.avg_percent, 100.0);
        assert_eq!(s.percentage, 10);
        assert_eq!(s.band, Band::Unsatisfactory);
    }

    #[test]
    fn formative_below_floor_counts_as_zero() {
        let records = vec![
            rec(Some(10), LessonType::Default, None),
            rec(Some(10), LessonType::Default, None),
            rec(Some(10), LessonType::Default, None),
        ];
        let s = score_quarter(records, &ScorePolicy::default());
        assert_eq!(s.formative.count, 3);
        assert_eq!(s.formative.avg_percent, 0.0);
        assert_eq!(s.percentage, 0);
        assert!(s.has_data);
    }

    #[test]
    fn single_sor_is_half_weighted() {
        let records = vec![rec(Some(18), LessonType::Sor, Some(20))];
        assert_eq!(compute_quarter_percentage(records), 45);
        assert_eq!(band_for(45), Band::Satisfactory);
    }

    #[test]
    fn soch_averages_per_item_ratios() {
        let records = vec![
            rec(Some(20), LessonType::Soch, Some(20)),
            rec(Some(15), LessonType::Soch, Some(20)),
        ];
        let s = score_quarter(records, &ScorePolicy::default());
        assert_eq!(s.soch.avg_percent, 87.5);
        assert_eq!(s.percentage, 35);
    }

    #[test]
    fn averaged_ratios_diverge_from_pooled_points() {
        // averaged: (100 + 4) / 2 = 52 -> 20.8; pooled: 21/45 = 46.7% -> 18.7
        let records = vec![
            rec(Some(20), LessonType::Soch, Some(20)),
            rec(Some(1), LessonType::Soch, Some(25)),
        ];
        let s = score_quarter(records, &ScorePolicy::default());
        assert!((s.soch.avg_percent - 52.0).abs() < 1e-9);
        assert_eq!(s.percentage, 21);
    }

    #[test]
    fn non_present_and_malformed_records_are_excluded() {
        let mut absent = rec(Some(20), LessonType::Sor, Some(20));
        absent.attendance = Attendance::Absent;
        let mut excused = rec(Some(20), LessonType::Sor, Some(20));
        excused.attendance = Attendance::Excused;
        let records = vec![
            absent,
            excused,
            rec(Some(-1), LessonType::Sor, Some(20)),
            rec(Some(5), LessonType::Sor, Some(0)),
            rec(Some(5), LessonType::Soch, None),
            rec(None, LessonType::Sor, Some(20)),
        ];
        let s = score_quarter(records, &ScorePolicy::default());
        assert_eq!(s.percentage, 0);
        assert!(!s.has_data);
    }

    #[test]
    fn full_marks_everywhere_is_one_hundred() {
        let mut records: Vec<ScoreRecord> = (0..5)
            .map(|_| rec(Some(10), LessonType::ClassWork, None))
            .collect();
        records.push(rec(Some(20), LessonType::Sor, Some(20)));
        records.push(rec(Some(25), LessonType::Soch, Some(25)));
        let s = score_quarter(records, &ScorePolicy::default());
        assert_eq!(s.percentage, 100);
        assert_eq!(s.band, Band::Excellent);
    }

    #[test]
    fn over_max_grades_stay_in_range() {
        let records = vec![
            rec(Some(100), LessonType::Sor, Some(10)),
            rec(Some(100), LessonType::Soch, Some(10)),
        ];
        assert_eq!(compute_quarter_percentage(records), 100);
    }

    #[test]
    fn single_sor_out_of_hundred_rounds_half_up() {
        for g in 0..=100i64 {
            let records = vec![rec(Some(g), LessonType::Sor, Some(100))];
            assert_eq!(
                compute_quarter_percentage(records) as i64,
                (g + 1) / 2,
                "SOR {g}/100"
            );
        }
    }

    #[test]
    fn half_point_totals_cross_the_band_boundary() {
        // 59/100 on the only SOR is 29.5 weighted, which must reach satisfactory.
        let s = score_quarter(
            vec![rec(Some(59), LessonType::Sor, Some(100))],
            &ScorePolicy::default(),
        );
        assert_eq!(s.percentage, 30);
        assert_eq!(s.band, Band::Satisfactory);
    }

    #[test]
    fn band_boundaries() {
        assert_eq!(band_for(85), Band::Good);
        assert_eq!(band_for(86), Band::Excellent);
        assert_eq!(band_for(65), Band::Satisfactory);
        assert_eq!(band_for(66), Band::Good);
        assert_eq!(band_for(29), Band::Unsatisfactory);
        assert_eq!(band_for(30), Band::Satisfactory);
        assert_eq!(serde_json::to_value(band_for(100)).ok(), Some(serde_json::json!("excellent")));
    }

    #[test]
    fn repeated_calls_agree() {
        let records = vec![
            rec(Some(7), LessonType::Default, None),
            rec(Some(8), LessonType::Default, None),
            rec(Some(9), LessonType::Default, None),
            rec(Some(6), LessonType::Default, None),
            rec(Some(14), LessonType::Sor, Some(20)),
        ];
        let a = score_quarter(records.clone(), &ScorePolicy::default());
        let b = score_quarter(records, &ScorePolicy::default());
        assert_eq!(a, b);
    }

    #[test]
    fn policy_validation_rejects_bad_weights() {
        let mut p = ScorePolicy::default();
        assert!(p.validate().is_ok());
        p.sor_weight = 0.6;
        assert!(p.validate().is_err());
        let p = ScorePolicy {
            formative_weight: 0.25,
            sor_weight: 0.25,
            soch_weight: 0.5,
            ..ScorePolicy::default()
        };
        assert!(p.validate().is_ok());
    }
}

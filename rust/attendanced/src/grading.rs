use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBand {
    pub letter: String,
    pub min_percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<f64>,
}

impl GradeBand {
    fn new(letter: &str, min_percent: f64, points: f64) -> Self {
        Self {
            letter: letter.to_string(),
            min_percent,
            points: Some(points),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GradeScaleError {
    #[error("grade scale must have at least one band")]
    Empty,
    #[error("band letter must not be empty")]
    EmptyLetter,
    #[error("band `{letter}` minimum {min} is outside 0..=100")]
    OutOfRange { letter: String, min: f64 },
    #[error("bands `{a}` and `{b}` share minimum {min}")]
    Overlap { a: String, b: String, min: f64 },
    #[error("grade scale needs a band starting at 0")]
    NoFloor,
}

/// Bands ordered highest minimum first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradeScale {
    bands: Vec<GradeBand>,
}

impl Default for GradeScale {
    fn default() -> Self {
        Self {
            bands: vec![
                GradeBand::new("A", 90.0, 4.0),
                GradeBand::new("B", 80.0, 3.0),
                GradeBand::new("C", 70.0, 2.0),
                GradeBand::new("D", 60.0, 1.0),
                GradeBand::new("F", 0.0, 0.0),
            ],
        }
    }
}

impl GradeScale {
    pub fn new(mut bands: Vec<GradeBand>) -> Result<Self, GradeScaleError> {
        if bands.is_empty() {
            return Err(GradeScaleError::Empty);
        }
        for b in bands.iter_mut() {
            b.letter = b.letter.trim().to_string();
            if b.letter.is_empty() {
                return Err(GradeScaleError::EmptyLetter);
            }
            if !b.min_percent.is_finite() || !(0.0..=100.0).contains(&b.min_percent) {
                return Err(GradeScaleError::OutOfRange {
                    letter: b.letter.clone(),
                    min: b.min_percent,
                });
            }
        }
        bands.sort_by(|a, b| b.min_percent.total_cmp(&a.min_percent));
        for pair in bands.windows(2) {
            if pair[0].min_percent == pair[1].min_percent {
                return Err(GradeScaleError::Overlap {
                    a: pair[0].letter.clone(),
                    b: pair[1].letter.clone(),
                    min: pair[0].min_percent,
                });
            }
        }
        if bands.last().map(|b| b.min_percent) != Some(0.0) {
            return Err(GradeScaleError::NoFloor);
        }
        Ok(Self { bands })
    }

    pub fn bands(&self) -> &[GradeBand] {
        &self.bands
    }

    /// Highest band whose minimum is at or below `percent`. Percentages are
    /// clamped to 0..=100; NaN has no band.
    pub fn band_for(&self, percent: f64) -> Option<&GradeBand> {
        if percent.is_nan() {
            return None;
        }
        let p = percent.clamp(0.0, 100.0);
        self.bands.iter().find(|b| p >= b.min_percent)
    }

    pub fn letter_for(&self, percent: f64) -> Option<&str> {
        self.band_for(percent).map(|b| b.letter.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band(letter: &str, min: f64) -> GradeBand {
        GradeBand {
            letter: letter.to_string(),
            min_percent: min,
            points: None,
        }
    }

    #[test]
    fn default_scale_boundaries() {
        let s = GradeScale::default();
        assert_eq!(s.letter_for(100.0), Some("A"));
        assert_eq!(s.letter_for(90.0), Some("A"));
        assert_eq!(s.letter_for(89.999), Some("B"));
        assert_eq!(s.letter_for(62.5), Some("D"));
        assert_eq!(s.letter_for(0.0), Some("F"));
        assert_eq!(s.letter_for(-5.0), Some("F"));
        assert_eq!(s.letter_for(140.0), Some("A"));
        assert_eq!(s.letter_for(f64::NAN), None);
    }

    #[test]
    fn new_sorts_bands_descending() {
        let s = GradeScale::new(vec![band("Fail", 0.0), band("Pass", 50.0)]).expect("valid");
        assert_eq!(s.bands()[0].letter, "Pass");
        assert_eq!(s.letter_for(49.0), Some("Fail"));
    }

    #[test]
    fn new_rejects_bad_scales() {
        assert_eq!(GradeScale::new(vec![]), Err(GradeScaleError::Empty));
        assert_eq!(
            GradeScale::new(vec![band(" ", 0.0)]),
            Err(GradeScaleError::EmptyLetter)
        );
        assert!(matches!(
            GradeScale::new(vec![band("A", 101.0), band("F", 0.0)]),
            Err(GradeScaleError::OutOfRange { .. })
        ));
        assert!(matches!(
            GradeScale::new(vec![band("A", 50.0), band("B", 50.0), band("F", 0.0)]),
            Err(GradeScaleError::Overlap { .. })
        ));
        assert_eq!(
            GradeScale::new(vec![band("A", 50.0)]),
            Err(GradeScaleError::NoFloor)
        );
    }
}

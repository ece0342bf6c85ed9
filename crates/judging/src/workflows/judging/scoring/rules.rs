use super::super::criteria::{Criterion, ScaleType};
use super::super::domain::CriterionValue;
use super::ScoringError;

const TOLERANCE: f64 = 1e-9;

/// Checks a raw value against its criterion and maps it onto `[0, 1]`.
///
/// Free-text values are accepted but carry no score, so they yield `None`.
pub(crate) fn normalize(
    criterion: &Criterion,
    value: &CriterionValue,
) -> Result<Option<f64>, ScoringError> {
    match (&criterion.scale, value) {
        (ScaleType::Numeric { min, max, step }, CriterionValue::Numeric(raw)) => {
            let raw = *raw;
            if !raw.is_finite() || raw < min - TOLERANCE || raw > max + TOLERANCE {
                return Err(ScoringError::ScoreOutOfRange {
                    criterion: criterion.id.clone(),
                    value: raw,
                    min: *min,
                    max: *max,
                });
            }
            if *step > 0.0 {
                let steps = (raw - min) / step;
                if (steps - steps.round()).abs() > 1e-6 {
                    return Err(ScoringError::OffStep {
                        criterion: criterion.id.clone(),
                        value: raw,
                        step: *step,
                    });
                }
            }
            let normalized = ((raw - min) / (max - min)).clamp(0.0, 1.0);
            Ok(Some(normalized))
        }
        (ScaleType::Boolean, CriterionValue::Boolean(flag)) => {
            Ok(Some(if *flag { 1.0 } else { 0.0 }))
        }
        (ScaleType::FreeText, CriterionValue::Text(_)) => Ok(None),
        (scale, other) => Err(ScoringError::ValueTypeMismatch {
            criterion: criterion.id.clone(),
            expected: scale.label(),
            found: other.kind_label(),
        }),
    }
}

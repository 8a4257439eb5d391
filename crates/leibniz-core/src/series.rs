//! Leibniz series arithmetic.
//!
//! The series `sum((-1)^k / (2k + 1))` for `k = 0, 1, 2, ...` converges to
//! pi/4. The engine keeps that partial sum as an `f64` accumulator and
//! projects it to text as `partial_sum * 4`.

use crate::snapshot::PI_TEXT_ZERO;

/// Errors raised while computing the next series term.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SeriesError {
    /// The term index no longer fits the integer arithmetic of a step.
    #[error("term index {index} overflows the series arithmetic")]
    IndexOverflow {
        /// The index that could not be advanced.
        index: u64,
    },

    /// The accumulator left the finite range.
    #[error("partial sum became non-finite at term index {index}")]
    NonFinite {
        /// The index of the term that produced the value.
        index: u64,
    },
}

/// The Leibniz term at index `k`: `(-1)^k / (2k + 1)`.
///
/// # Errors
///
/// Returns [`SeriesError::IndexOverflow`] if `2k + 1` does not fit in a `u64`.
pub fn leibniz_term(k: u64) -> Result<f64, SeriesError> {
    let denominator = k
        .checked_mul(2)
        .and_then(|d| d.checked_add(1))
        .ok_or(SeriesError::IndexOverflow { index: k })?;

    // Denominators above 2^53 round; native float precision is all we promise.
    #[allow(clippy::cast_precision_loss)]
    let magnitude = 1.0 / denominator as f64;

    Ok(if k % 2 == 0 { magnitude } else { -magnitude })
}

/// Render a pi approximation as text.
///
/// Uses the shortest representation that parses back to the same `f64`,
/// and always keeps a fractional part (`4.0`, not `4`).
pub fn render_pi(pi: f64) -> String {
    format!("{pi:?}")
}

/// Recover the pi/4 accumulator from persisted pi text.
///
/// The `"0"` sentinel and unparsable or non-finite text yield `0.0`.
pub fn partial_sum_from_pi_text(pi_text: &str) -> f64 {
    if pi_text == PI_TEXT_ZERO {
        return 0.0;
    }
    pi_text
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map_or(0.0, |pi| pi / 4.0)
}

/// Whether `pi_text` is a finite decimal numeral.
///
/// Exponent forms such as `1e300` are rejected.
pub fn is_valid_pi_text(pi_text: &str) -> bool {
    !pi_text.is_empty()
        && pi_text == pi_text.trim()
        && !pi_text.contains(['e', 'E'])
        && pi_text.parse::<f64>().is_ok_and(f64::is_finite)
}

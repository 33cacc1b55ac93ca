//! Bracketed 1-D root finding via the modified Illinois method.

use crate::error::ProfileError;
use crate::traits::Scalar;

/// Hard cap on Illinois iterations. Reaching it is not an error; the
/// current estimate is returned.
pub const MAX_ITERATIONS: usize = 100;

/// Outcome of a successful bracketed solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RootEstimate<T> {
    pub root: T,
    pub iterations: usize,
}

/// Locates a root of `f` inside the bracket `[r, s]` with the modified
/// Illinois variant of regula falsi.
///
/// `f(r)` and `f(s)` must have opposite signs (a zero endpoint counts as a
/// valid bracket). Iteration stops once the step shrinks to `xacc`, the
/// residual drops to `yacc`, or [`MAX_ITERATIONS`] is reached.
///
/// When a false-position step lands on the same side as the previous
/// estimate, the stale endpoint's function value is scaled by
/// `gamma = 1 - (f(t)/f(s)) / (1 - f(t)/f(r))` (forced to 1/2 when
/// negative) so that endpoint is not retained indefinitely.
///
/// The finder itself is domain-agnostic; objectives with physical-radius
/// arguments should be bracketed with non-negative endpoints, since `f` is
/// evaluated throughout the bracket.
pub fn illinois<T, F>(
    mut f: F,
    mut r: T,
    mut s: T,
    xacc: T,
    yacc: T,
) -> Result<RootEstimate<T>, ProfileError>
where
    T: Scalar,
    F: FnMut(T) -> T,
{
    let mut fr = f(r);
    let mut fs = f(s);
    if fr * fs > T::zero() {
        return Err(ProfileError::InvalidBracket);
    }
    if fr == fs {
        // Both endpoints evaluate to exactly zero; the secant is undefined.
        return Err(ProfileError::InvalidBracket);
    }

    let mut t = (s * fr - r * fs) / (fr - fs);
    let mut iterations = 0;
    while iterations < MAX_ITERATIONS && (t - s).abs() > xacc {
        let ft = f(t);
        if ft.abs() <= yacc {
            break;
        }
        if ft * fs < T::zero() {
            // Unmodified step: the sign flipped, both endpoints stay live.
            r = s;
            fr = fs;
            s = t;
            fs = ft;
        } else {
            // Modified step: scale the stale endpoint's function value.
            let phi_s = ft / fs;
            let phi_r = ft / fr;
            let mut gamma = T::one() - phi_s / (T::one() - phi_r);
            if gamma < T::zero() {
                gamma = T::from_f64(0.5).unwrap();
            }
            fr = fr * gamma;
            s = t;
            fs = ft;
        }
        t = (s * fr - r * fs) / (fr - fs);
        iterations += 1;
    }

    Ok(RootEstimate { root: t, iterations })
}

use rand_core::RngCore;

use crate::error::FieldError;
use crate::field::FieldElement;

/// A polynomial over the field, coefficients ordered constant-term first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Polynomial {
    coeffs: Vec<FieldElement>,
}

impl Polynomial {
    pub fn new(coeffs: Vec<FieldElement>) -> Self {
        assert!(!coeffs.is_empty(), "a polynomial needs at least a constant term");
        Polynomial { coeffs }
    }

    pub fn degree(&self) -> usize {
        self.coeffs.len() - 1
    }

    pub fn constant_term(&self) -> FieldElement {
        self.coeffs[0]
    }

    /// Samples a uniform random degree-`degree` polynomial with a fixed
    /// constant term, as used by every dealer in CSS sharing.
    pub fn random<R: RngCore>(degree: usize, constant: FieldElement, rng: &mut R) -> Self {
        let mut coeffs = Vec::with_capacity(degree + 1);
        coeffs.push(constant);
        for _ in 0..degree {
            coeffs.push(FieldElement::random(rng));
        }
        Polynomial { coeffs }
    }

    /// Evaluates the polynomial at `x` via Horner's method.
    pub fn evaluate(&self, x: FieldElement) -> FieldElement {
        let mut acc = FieldElement::zero();
        for coeff in self.coeffs.iter().rev() {
            acc = acc * x + *coeff;
        }
        acc
    }

    /// Interpolates the unique polynomial through `points` and returns
    /// its value at x=0 (i.e. the shared secret), via Lagrange
    /// interpolation.
    pub fn interpolate_at_zero(points: &[(FieldElement, FieldElement)]) -> Result<FieldElement, FieldError> {
        if points.is_empty() {
            return Err(FieldError::EmptyPointSet);
        }
        let coeffs = lagrange_coefficients_at_zero(&points.iter().map(|(x, _)| *x).collect::<Vec<_>>())?;
        let mut acc = FieldElement::zero();
        for ((_, y), lambda) in points.iter().zip(coeffs.iter()) {
            acc = acc + *lambda * *y;
        }
        Ok(acc)
    }
}

/// Computes the Lagrange basis coefficients `L_i(0)` for the given
/// x-values, so that `sum_i L_i(0) * y_i` recovers `p(0)` for any `y_i =
/// p(x_i)` on a polynomial of degree `< len(x_values)`.
pub fn lagrange_coefficients_at_zero(x_values: &[FieldElement]) -> Result<Vec<FieldElement>, FieldError> {
    if x_values.is_empty() {
        return Err(FieldError::EmptyPointSet);
    }
    for (i, xi) in x_values.iter().enumerate() {
        for xj in &x_values[i + 1..] {
            if xi == xj {
                return Err(FieldError::DuplicateXCoordinate(xi.to_u128()));
            }
        }
    }

    let mut result = Vec::with_capacity(x_values.len());
    for (i, xi) in x_values.iter().enumerate() {
        let mut numerator = FieldElement::one();
        let mut denominator = FieldElement::one();
        for (j, xj) in x_values.iter().enumerate() {
            if i == j {
                continue;
            }
            numerator = numerator * (*xj);
            denominator = denominator * (*xj - *xi);
        }
        let inv_denominator = denominator.inverse()?;
        result.push(numerator * inv_denominator);
    }
    Ok(result)
}

//! Prime-field arithmetic, polynomial interpolation and verification
//! identifiers underlying the secret-sharing and MPC layers.

mod error;
mod field;
mod polynomial;
mod vid;

pub use error::FieldError;
pub use field::{FieldElement, PRIME};
pub use polynomial::{lagrange_coefficients_at_zero, Polynomial};
pub use vid::compute_vid;

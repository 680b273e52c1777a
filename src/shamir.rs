//! Shamir secret sharing over GF(256) for KEK escrow and recovery.
//!
//! A secret is split byte-by-byte: each byte becomes the constant term of
//! a random polynomial of degree `threshold - 1`, and share `i` holds the
//! polynomial evaluated at `x = i`. Any `threshold` shares reconstruct the
//! secret by Lagrange interpolation at zero; fewer reveal nothing.
//!
//! Field arithmetic uses the AES reduction polynomial (x^8 + x^4 + x^3 +
//! x + 1). Polynomial coefficients are drawn from the injected
//! [`RandomSource`].

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{ClientError, Result};
use crate::primitives::{random_bytes, RandomSource};

/// One share of a split secret.
///
/// `x` is the share's evaluation point (nonzero, unique per share); `y`
/// holds one field element per secret byte.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Share {
    /// Evaluation point, 1-based and unique across the share set.
    pub x: u8,
    /// Per-byte polynomial evaluations; same length as the secret.
    pub y: Vec<u8>,
    /// Shares required for reconstruction.
    pub threshold: u8,
    /// Total shares produced by the split.
    pub total: u8,
}

impl std::fmt::Debug for Share {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // y is secret-derived material
        f.debug_struct("Share")
            .field("x", &self.x)
            .field("threshold", &self.threshold)
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}

/// Splits `secret` into `total` shares, any `threshold` of which
/// reconstruct it.
///
/// # Errors
///
/// Returns `ClientError::InsufficientShares` if `threshold` is zero or
/// exceeds `total`.
pub fn split(
    secret: &[u8],
    total: u8,
    threshold: u8,
    rng: &dyn RandomSource,
) -> Result<Vec<Share>> {
    if threshold == 0 || threshold > total {
        return Err(ClientError::InsufficientShares {
            needed: threshold as usize,
            got: total as usize,
        });
    }

    // One random coefficient per secret byte per non-constant term.
    let coeffs = random_bytes(rng, secret.len() * (threshold as usize - 1))?;

    let mut shares = Vec::with_capacity(total as usize);
    for x in 1..=total {
        let y = secret
            .iter()
            .enumerate()
            .map(|(i, &secret_byte)| {
                let poly = &coeffs[i * (threshold as usize - 1)..(i + 1) * (threshold as usize - 1)];
                eval_poly(secret_byte, poly, x)
            })
            .collect();
        shares.push(Share {
            x,
            y,
            threshold,
            total,
        });
    }
    Ok(shares)
}

/// Reconstructs a secret of `secret_len` bytes from a set of shares.
///
/// Any subset of at least `threshold` distinct shares yields the original
/// secret; the subset's order does not matter.
///
/// # Errors
///
/// - `ClientError::InsufficientShares` if fewer than `threshold` shares
///   are supplied.
/// - `ClientError::DuplicateShareX` if two shares carry the same
///   x-coordinate.
/// - `ClientError::InvalidShareLength` if any share's payload does not
///   match `secret_len`.
pub fn reconstruct(shares: &[Share], secret_len: usize) -> Result<Vec<u8>> {
    let Some(first) = shares.first() else {
        return Err(ClientError::InsufficientShares { needed: 1, got: 0 });
    };
    let threshold = first.threshold as usize;
    if shares.len() < threshold {
        return Err(ClientError::InsufficientShares {
            needed: threshold,
            got: shares.len(),
        });
    }

    let mut seen = [false; 256];
    for share in shares {
        if share.y.len() != secret_len {
            return Err(ClientError::InvalidShareLength);
        }
        if seen[share.x as usize] {
            return Err(ClientError::DuplicateShareX(share.x));
        }
        seen[share.x as usize] = true;
    }

    let mut secret = vec![0u8; secret_len];
    for (i, byte) in secret.iter_mut().enumerate() {
        *byte = lagrange_at_zero(shares, i);
    }
    Ok(secret)
}

/// Evaluates `constant + poly[0]*x + poly[1]*x^2 + ...` by Horner's rule.
fn eval_poly(constant: u8, poly: &[u8], x: u8) -> u8 {
    let mut acc = 0u8;
    for &coeff in poly.iter().rev() {
        acc = gf_mul(acc, x) ^ coeff;
    }
    gf_mul(acc, x) ^ constant
}

/// Interpolates the polynomial through the shares' points at x = 0,
/// for secret byte `index`.
fn lagrange_at_zero(shares: &[Share], index: usize) -> u8 {
    let mut acc = 0u8;
    for share_i in shares {
        let mut weight = 1u8;
        for share_j in shares {
            if share_j.x != share_i.x {
                // l_i(0) = prod_j x_j / (x_j - x_i); subtraction is XOR.
                weight = gf_mul(weight, gf_div(share_j.x, share_j.x ^ share_i.x));
            }
        }
        acc ^= gf_mul(weight, share_i.y[index]);
    }
    acc
}

// =============================================================================
// GF(256) arithmetic, reduction polynomial x^8 + x^4 + x^3 + x + 1
// =============================================================================

fn gf_mul(mut a: u8, mut b: u8) -> u8 {
    let mut product = 0u8;
    for _ in 0..8 {
        if b & 1 != 0 {
            product ^= a;
        }
        let carry = a & 0x80;
        a <<= 1;
        if carry != 0 {
            a ^= 0x1b;
        }
        b >>= 1;
    }
    product
}

fn gf_div(a: u8, b: u8) -> u8 {
    gf_mul(a, gf_inv(b))
}

/// Multiplicative inverse as b^254 (Fermat's little theorem for GF(2^8)).
fn gf_inv(b: u8) -> u8 {
    let mut result = 1u8;
    let mut base = b;
    let mut exp = 254u8;
    while exp > 0 {
        if exp & 1 != 0 {
            result = gf_mul(result, base);
        }
        base = gf_mul(base, base);
        exp >>= 1;
    }
    result
}

// =============================================================================
// Tests
// =============================================================================

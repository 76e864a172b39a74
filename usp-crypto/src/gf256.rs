//! GF(2^8) arithmetic over the AES irreducible polynomial 0x11B.
//!
//! Backs Shamir secret sharing: every share coordinate and every
//! interpolation step is a field operation here.

use std::sync::OnceLock;

const IRREDUCIBLE: u16 = 0x11B;

/// `exp[i] = g^i`, `log[g^i] = i`, for a generator `g` of GF(2^8)*.
/// `exp` has 512 entries so `exp[log_a + log_b]` never needs a modulo
/// when both logs are already reduced mod 255.
struct Tables {
    exp: [u8; 512],
    log: [u8; 256],
}

fn build_tables() -> Tables {
    let mut exp = [0u8; 512];
    let mut log = [0u8; 256];
    let mut x: u16 = 1;
    for i in 0..255usize {
        exp[i] = x as u8;
        log[x as usize] = i as u8;
        x <<= 1;
        if x & 0x100 != 0 {
            x ^= IRREDUCIBLE;
        }
    }
    for i in 255..512 {
        exp[i] = exp[i - 255];
    }
    Tables { exp, log }
}

static TABLES: OnceLock<Tables> = OnceLock::new();

fn tables() -> &'static Tables {
    TABLES.get_or_init(build_tables)
}

/// Multiply two field elements.
pub fn mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    let t = tables();
    let la = t.log[a as usize] as usize;
    let lb = t.log[b as usize] as usize;
    t.exp[la + lb]
}

/// Divide `a` by `b` in the field. `b` must be nonzero.
pub fn div(a: u8, b: u8) -> u8 {
    assert!(b != 0, "division by zero in GF(2^8)");
    if a == 0 {
        return 0;
    }
    let t = tables();
    let la = t.log[a as usize] as i32;
    let lb = t.log[b as usize] as i32;
    let mut d = la - lb;
    if d < 0 {
        d += 255;
    }
    t.exp[d as usize]
}

/// Add (== subtract) two field elements: plain XOR.
#[inline]
pub fn add(a: u8, b: u8) -> u8 {
    a ^ b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mul_by_zero_is_zero() {
        assert_eq!(mul(0, 200), 0);
        assert_eq!(mul(200, 0), 0);
    }

    #[test]
    fn mul_identity() {
        for a in 1..=255u8 {
            assert_eq!(mul(a, 1), a);
        }
    }

    #[test]
    fn div_is_mul_inverse() {
        for a in 1..=255u8 {
            for b in 1..=255u8 {
                let q = div(a, b);
                assert_eq!(mul(q, b), a);
            }
        }
    }

    #[test]
    fn add_is_involution() {
        for a in 0..=255u8 {
            for b in 0..=255u8 {
                assert_eq!(add(add(a, b), b), a);
            }
        }
    }
}

//! Python-style `//` and `%` (spec §4.5.2, §8): the quotient rounds toward
//! negative infinity and the remainder takes the sign of the divisor, unlike
//! Rust's native `/`/`%` which truncate toward zero and take the sign of the
//! dividend. Shared by the parser's constant folding and the evaluator's
//! runtime arithmetic so the two can't disagree on negative operands.

pub fn floor_div_i64(a: i64, b: i64) -> i64 {
    let q = a / b;
    let r = a % b;
    if r != 0 && (r < 0) != (b < 0) { q - 1 } else { q }
}

pub fn mod_i64(a: i64, b: i64) -> i64 {
    let r = a % b;
    if r != 0 && (r < 0) != (b < 0) { r + b } else { r }
}

pub fn floor_div_f64(a: f64, b: f64) -> f64 {
    (a / b).floor()
}

pub fn mod_f64(a: f64, b: f64) -> f64 {
    a - b * (a / b).floor()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_div_rounds_toward_negative_infinity() {
        assert_eq!(floor_div_i64(-7, -2), 3);
        assert_eq!(floor_div_i64(7, -2), -4);
        assert_eq!(floor_div_i64(-7, 2), -4);
        assert_eq!(floor_div_i64(7, 2), 3);
    }

    #[test]
    fn mod_takes_the_sign_of_the_divisor() {
        assert_eq!(mod_i64(7, -2), -1);
        assert_eq!(mod_i64(-7, -2), -1);
        assert_eq!(mod_i64(-7, 2), 1);
        assert_eq!(mod_i64(7, 2), 1);
    }

    #[test]
    fn float_variants_agree_with_the_integer_ones() {
        assert_eq!(floor_div_f64(-7.0, -2.0), 3.0);
        assert_eq!(mod_f64(7.0, -2.0), -1.0);
    }
}

use crate::real;

pub fn norm(v: &[real]) -> real {
    v.iter().copied().map(|e| e * e).sum::<real>().sqrt()
}

pub fn dot(a: &[real], b: &[real]) -> real {
    assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(&a, &b)| a * b).sum()
}

/// Norm used as a cosine denominator; vanishing vectors count as unit length.
pub(crate) fn safe_norm(v: &[real]) -> real {
    let n = norm(v);
    if n < 1e-6 {
        1.0
    } else {
        n
    }
}

/// In-place softmax with the maximum subtracted first.
pub(crate) fn softmax(v: &mut [real]) {
    let max = v.iter().copied().fold(real::NEG_INFINITY, real::max);
    let mut sum = 0.0;
    for e in v.iter_mut() {
        *e = (*e - max).exp();
        sum += *e;
    }
    for e in v.iter_mut() {
        *e /= sum;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn softmax_sums_to_one() {
        let mut v = vec![1000.0, 1001.0, 999.0];
        softmax(&mut v);
        let total: real = v.iter().sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert!(v[1] > v[0] && v[0] > v[2]);
    }

    #[test]
    fn dot_and_norm() {
        assert_eq!(dot(&[1.0, 2.0, 3.0], &[4.0, -5.0, 6.0]), 12.0);
        assert_eq!(norm(&[3.0, 4.0]), 5.0);
    }

    #[test]
    fn tiny_vectors_have_unit_norm() {
        assert_eq!(safe_norm(&[0.0, 0.0]), 1.0);
        assert!((safe_norm(&[3.0, 4.0]) - 5.0).abs() < 1e-6);
    }
}

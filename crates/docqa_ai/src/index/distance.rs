/// Squared Euclidean distance. Smaller is more similar.
///
/// For unit vectors this is `2 - 2 * cosine`, so it ranges over `[0, 4]`.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    let mut sum = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        let d = x - y;
        sum += d * d;
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_cosine_on_unit_vectors() {
        let a = [1.0f32, 0.0];
        let b = [0.6f32, 0.8];
        let cosine = 0.6f32;
        assert!((squared_l2(&a, &b) - (2.0 - 2.0 * cosine)).abs() < 1e-6);
        assert_eq!(squared_l2(&a, &a), 0.0);
    }
}

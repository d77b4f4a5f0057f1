/// Indices that strictly exceed every one of their `order` neighbours on each side.
///
/// Undefined values are never extrema, and an index whose neighbourhood is truncated by either
/// end of the series or contains an undefined value is skipped. Ties are not peaks.
pub fn find_peaks(series: &[Option<f64>], order: usize) -> Vec<usize> {
    find_extrema(series, order, |value, neighbour| value > neighbour)
}

/// Indices strictly below every one of their `order` neighbours on each side.
///
/// See [`find_peaks`] for the handling of undefined values and series edges.
pub fn find_troughs(series: &[Option<f64>], order: usize) -> Vec<usize> {
    find_extrema(series, order, |value, neighbour| value < neighbour)
}

fn find_extrema<F>(series: &[Option<f64>], order: usize, beats: F) -> Vec<usize>
where
    F: Fn(f64, f64) -> bool,
{
    if order == 0 || series.len() < 2 * order + 1 {
        return Vec::new();
    }

    (order..series.len() - order)
        .filter(|&index| {
            let Some(value) = series[index] else {
                return false;
            };

            (1..=order).all(|offset| {
                [series[index - offset], series[index + offset]]
                    .into_iter()
                    .all(|neighbour| neighbour.is_some_and(|neighbour| beats(value, neighbour)))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defined(values: &[f64]) -> Vec<Option<f64>> {
        values.iter().copied().map(Some).collect()
    }

    #[test]
    fn test_find_peaks() {
        struct TestCase {
            input: Vec<Option<f64>>,
            order: usize,
            expected: Vec<usize>,
        }

        let tests = vec![
            // TC0: single peak
            TestCase {
                input: defined(&[1.0, 2.0, 3.0, 2.0, 1.0]),
                order: 2,
                expected: vec![2],
            },
            // TC1: plateau is not a peak
            TestCase {
                input: defined(&[1.0, 3.0, 3.0, 1.0, 0.0]),
                order: 1,
                expected: vec![],
            },
            // TC2: undefined neighbour disqualifies
            TestCase {
                input: vec![None, Some(1.0), Some(5.0), Some(1.0), Some(0.0)],
                order: 2,
                expected: vec![],
            },
            // TC3: two peaks w/ order 1
            TestCase {
                input: defined(&[0.0, 2.0, 1.0, 3.0, 0.0]),
                order: 1,
                expected: vec![1, 3],
            },
            // TC4: zero order
            TestCase {
                input: defined(&[0.0, 2.0, 0.0]),
                order: 0,
                expected: vec![],
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = find_peaks(&test.input, test.order);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_find_troughs() {
        let series = defined(&[5.0, 4.0, 3.0, 4.0, 5.0, 2.0, 5.0]);
        assert_eq!(find_troughs(&series, 1), vec![2, 5]);
        assert_eq!(find_troughs(&series, 2), vec![2]);
    }

    #[test]
    fn test_extrema_are_disjoint_and_idempotent() {
        let series = (0..200)
            .map(|i| {
                let x = i as f64;
                (i % 17 != 0).then_some((x * 0.31).sin() * 10.0 + (x * 0.07).cos() * 3.0)
            })
            .collect::<Vec<_>>();

        for order in 1..=5 {
            let peaks = find_peaks(&series, order);
            let troughs = find_troughs(&series, order);

            assert!(!peaks.is_empty());
            assert!(peaks.iter().all(|index| !troughs.contains(index)));
            assert_eq!(find_peaks(&series, order), peaks);
            assert_eq!(find_troughs(&series, order), troughs);
        }
    }
}

//! Table-driven testing helper for the shape fusion crates.

use std::fmt::Debug;
use std::panic::RefUnwindSafe;

/// Runs a test function against each case of a parametrized test.
///
/// To create a table driven test, define a struct conventionally named `Case`
/// which holds the data for one case and implements `Debug`, build a
/// collection of cases and call `cases.test_each` with the test function.
///
/// Every case is run even if earlier ones fail. Panics in the test function
/// are caught, and once all cases have run `test_each` panics with the
/// positions and debug representations of the failing cases.
///
/// ## Example
///
/// ```
/// use rten_testing::TestCases;
///
/// // Add #[test] attribute
/// fn test_copy_dim_count() {
///   #[derive(Debug)]
///   struct Case {
///     shape: Vec<i64>,
///     expected: usize,
///   }
///
///   let cases = [
///     Case { shape: vec![0, 0, -1], expected: 2 },
///     Case { shape: vec![2, 4], expected: 0 },
///   ];
///
///   cases.test_each(|case| {
///     let count = case.shape.iter().filter(|&&size| size == 0).count();
///     assert_eq!(count, case.expected);
///   });
/// }
/// # test_copy_dim_count();
/// ```
///
/// ## Unwind safety
///
/// Test cases and values captured by the test function must be
/// [unwind safe](https://doc.rust-lang.org/std/panic/fn.catch_unwind.html).
/// Values with interior mutability, such as graphs built from reference
/// counted expressions, should be created inside the test function instead.
pub trait TestCases {
    /// The data for a single test case.
    type Case;

    /// Call `test` with a reference to each test case, catching any panics.
    fn test_each(self, test: impl Fn(&Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + RefUnwindSafe;
}

impl<I: IntoIterator> TestCases for I {
    type Case = I::Item;

    fn test_each(self, test: impl Fn(&I::Item) + RefUnwindSafe)
    where
        Self::Case: Debug + RefUnwindSafe,
    {
        let failures: Vec<(usize, I::Item)> = self
            .into_iter()
            .enumerate()
            .filter(|(_, case)| std::panic::catch_unwind(|| test(case)).is_err())
            .collect();

        assert!(
            failures.is_empty(),
            "{} test cases failed: {:?}",
            failures.len(),
            failures
        );
    }
}

#[cfg(test)]
mod tests {
    use super::TestCases;

    #[derive(Debug)]
    struct Case {
        x: i32,
    }

    #[test]
    fn test_test_each_success() {
        let cases = [Case { x: 1 }, Case { x: 2 }];
        cases.test_each(|case| assert!(case.x > 0));
    }

    #[test]
    #[should_panic(expected = "1 test cases failed: [(1, Case { x: -2 })]")]
    fn test_test_each_failure() {
        let cases = [Case { x: 1 }, Case { x: -2 }, Case { x: 3 }];
        cases.test_each(|case| assert!(case.x > 0));
    }
}

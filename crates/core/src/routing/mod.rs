use crate::domain::matrix::{Matrix, MatrixSelection};

/// Deterministic matrix selection over the configured matrix store.
///
/// Only active matrices whose criteria hold are considered. Ties break on the
/// lowest configured `sequence`, then on the tightest bounded `max_amount`
/// (descending, unbounded last), then on id, so identical inputs always
/// resolve to the same matrix.
#[derive(Clone, Debug, Default)]
pub struct MatrixResolver {
    matrices: Vec<Matrix>,
}

impl MatrixResolver {
    pub fn new(matrices: Vec<Matrix>) -> Self {
        Self { matrices }
    }

    pub fn resolve(&self, selection: &MatrixSelection) -> Option<&Matrix> {
        let mut candidates: Vec<&Matrix> =
            self.matrices.iter().filter(|matrix| matrix.matches(selection)).collect();

        candidates.sort_by(|left, right| {
            left.sequence
                .cmp(&right.sequence)
                .then_with(|| {
                    let left_max = left.criteria.bounded_max_amount();
                    let right_max = right.criteria.bounded_max_amount();
                    match (left_max, right_max) {
                        (Some(l), Some(r)) => r.cmp(&l),
                        (Some(_), None) => std::cmp::Ordering::Less,
                        (None, Some(_)) => std::cmp::Ordering::Greater,
                        (None, None) => std::cmp::Ordering::Equal,
                    }
                })
                .then_with(|| left.id.0.cmp(&right.id.0))
        });

        candidates.into_iter().next()
    }
}

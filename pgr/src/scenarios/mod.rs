//! The fixture suite. Every fixture is order-independent: it resets the
//! target to a known state before driving it, so fixtures can be filtered
//! or reordered freely.

use crate::{Executor, Fixture};

mod registration;
mod reservation;

/// The complete suite, registration fixtures first.
pub fn all<E: Executor + Clone + 'static>() -> Vec<Fixture<E>> {
    let mut fixtures = registration::fixtures();
    fixtures.extend(reservation::fixtures());
    fixtures
}

#[cfg(test)]
mod tests {
    use crate::Shell;

    #[test]
    fn test_fixture_names_are_unique() {
        let mut names = super::all::<Shell>()
            .iter()
            .map(|f| f.name().to_string())
            .collect::<Vec<String>>();
        let total = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), total);
    }
}

//! Property tests for well addressing.

use labtrace_model::plate::{coordinates_for, normalize_well, well_coordinates, MAX_ROWS};
use proptest::prelude::*;

proptest! {
    #[test]
    fn well_label_round_trips(row in 0usize..MAX_ROWS, column in 0usize..48) {
        let well = well_coordinates(row, column).unwrap();
        prop_assert_eq!(coordinates_for(&well).unwrap(), (row, column));
    }

    #[test]
    fn bracketed_encoding_normalizes_to_label(row in 0usize..MAX_ROWS, column in 0usize..48) {
        let legacy = format!("[[{}, {}]]", row, column);
        let well = well_coordinates(row, column).unwrap();
        prop_assert_eq!(normalize_well(&legacy).unwrap(), well);
    }

    #[test]
    fn normalization_is_idempotent(row in 0usize..MAX_ROWS, column in 0usize..48) {
        let well = well_coordinates(row, column).unwrap();
        prop_assert_eq!(normalize_well(&well).unwrap(), well);
    }
}

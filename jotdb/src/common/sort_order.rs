/// Specifies the direction for sorting query results.
///
/// Used by the `$orderby` query hint to control result ordering. In the
/// hints document an ascending field is written as `1` and a descending
/// field as `-1`, matching the integer convention of the `$orderby` wire
/// form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Sort from smallest to largest value
    Ascending,
    /// Sort from largest to smallest value
    Descending,
}

impl SortOrder {
    /// Parses the `$orderby` integer convention: positive is ascending,
    /// negative is descending.
    pub fn from_direction(direction: i64) -> Option<SortOrder> {
        match direction {
            d if d > 0 => Some(SortOrder::Ascending),
            d if d < 0 => Some(SortOrder::Descending),
            _ => None,
        }
    }
}

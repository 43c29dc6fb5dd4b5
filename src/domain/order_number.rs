use chrono::NaiveDate;

/// How many times order creation re-reads the daily sequence after losing a
/// unique-constraint race on `orders.order_number`.
pub const MAX_SEQUENCE_ATTEMPTS: u32 = 5;

/// `ORD-<YYYYMMDD>-<NNN>`; the sequence is zero padded to three digits and
/// simply grows wider past 999.
pub fn format_order_number(date: NaiveDate, sequence: u64) -> String {
    format!("ORD-{}-{:03}", date.format("%Y%m%d"), sequence)
}

/// Prefix shared by every order number issued on `date`.
pub fn daily_prefix(date: NaiveDate) -> String {
    format!("ORD-{}-", date.format("%Y%m%d"))
}

/// Sequence to try given how many orders exist today and how many inserts
/// already collided.
pub fn next_sequence(existing_today: u64, attempt: u32) -> u64 {
    existing_today + 1 + u64::from(attempt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_date_and_padded_sequence() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(format_order_number(date, 7), "ORD-20240309-007");
        assert_eq!(format_order_number(date, 1234), "ORD-20240309-1234");
        assert!(format_order_number(date, 1).starts_with(&daily_prefix(date)));
    }

    #[test]
    fn retries_move_past_the_collided_sequence() {
        assert_eq!(next_sequence(0, 0), 1);
        assert_eq!(next_sequence(4, 0), 5);
        assert_eq!(next_sequence(4, 2), 7);
    }
}

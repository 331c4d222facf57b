//! Billing period arithmetic

use time::{Month, OffsetDateTime};

use lnk_shared::BillingCycle;

/// Add calendar months, clamping the day to the end of the target month
/// (Jan 31 + 1 month = Feb 28/29).
pub fn add_months(from: OffsetDateTime, months: u32) -> OffsetDateTime {
    let total = from.month() as i32 - 1 + months as i32;
    let year = from.year() + total.div_euclid(12);
    let month = month_from_index(total.rem_euclid(12));
    let day = from.day().min(month.length(year));

    // Every component is in range by construction; fall back to the input otherwise.
    from.replace_day(1)
        .and_then(|d| d.replace_year(year))
        .and_then(|d| d.replace_month(month))
        .and_then(|d| d.replace_day(day))
        .unwrap_or(from)
}

/// End of the period that starts at `start`
pub fn period_end(start: OffsetDateTime, cycle: BillingCycle) -> OffsetDateTime {
    match cycle {
        BillingCycle::Monthly => add_months(start, 1),
        BillingCycle::Yearly => add_months(start, 12),
    }
}

fn month_from_index(index: i32) -> Month {
    match index {
        0 => Month::January,
        1 => Month::February,
        2 => Month::March,
        3 => Month::April,
        4 => Month::May,
        5 => Month::June,
        6 => Month::July,
        7 => Month::August,
        8 => Month::September,
        9 => Month::October,
        10 => Month::November,
        _ => Month::December,
    }
}

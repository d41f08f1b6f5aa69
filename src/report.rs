use std::collections::BTreeMap;
use std::fmt::Write;

use serde::Serialize;

use crate::earnings::TeacherEarningsReport;
use crate::error::Error;
use crate::pricing::{SubjectPrice, DEFAULT_CURRENCY, DEFAULT_GROUP_PRICE, DEFAULT_INDIVIDUAL_PRICE};

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

fn period_label(month: Option<u32>, year: Option<i32>) -> String {
    let month_name = month
        .and_then(|m| m.checked_sub(1))
        .and_then(|i| MONTH_NAMES.get(i as usize));
    match (month_name, year) {
        (Some(name), Some(year)) => format!("{name} {year}"),
        (None, Some(year)) => year.to_string(),
        _ => "all time".to_string(),
    }
}

pub fn build_earnings_markdown(report: &TeacherEarningsReport) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Earnings for {}", report.teacher_name);
    let _ = writeln!(
        output,
        "Period: {} (teacher {})",
        period_label(report.month, report.year),
        report.teacher_id
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## By Subject");

    if report.by_subject.is_empty() {
        let _ = writeln!(output, "No billable lessons in this period.");
    } else {
        let _ = writeln!(output, "| Subject | Type | Lessons | Hours | Rate | Earnings |");
        let _ = writeln!(output, "|---|---|---:|---:|---:|---:|");
        for entry in &report.by_subject {
            let _ = writeln!(
                output,
                "| {} | {} | {} | {:.2} | {:.2} | {:.2} |",
                entry.subject,
                entry.lesson_type,
                entry.lesson_count,
                entry.total_hours,
                entry.price_per_hour,
                entry.total_earnings
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Totals");
    let _ = writeln!(output, "- Lessons: {}", report.total_lessons);
    let _ = writeln!(output, "- Hours: {:.2}", report.total_hours);
    let _ = writeln!(output, "- Earnings: {:.2}", report.total_earnings);

    output
}

/// Pretty JSON for command output.
pub fn render_json<T: Serialize>(value: &T) -> Result<String, Error> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Price list view: every priced subject followed by the fallback rates.
pub fn build_price_list(prices: &BTreeMap<String, SubjectPrice>) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "Subject prices:");
    if prices.is_empty() {
        let _ = writeln!(output, "No subjects priced yet.");
    }
    for (subject, price) in prices {
        let _ = writeln!(
            output,
            "- {}: individual {:.2} / group {:.2} {}",
            subject, price.individual, price.group, price.currency
        );
    }
    let _ = writeln!(
        output,
        "Defaults: individual {:.2} / group {:.2} {}",
        DEFAULT_INDIVIDUAL_PRICE, DEFAULT_GROUP_PRICE, DEFAULT_CURRENCY
    );

    output
}

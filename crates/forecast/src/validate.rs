//! Parsing and validation of user-typed flow input.
//!
//! All functions here are pure; flows turn their errors into an in-place
//! re-prompt.

use crate::error::ValidationError;
use crate::model::{EventType, Options};
use chrono::{DateTime, Days, FixedOffset, NaiveDateTime, NaiveTime, TimeZone, Utc};
use std::collections::HashSet;

pub const MAX_QUESTION_LEN: usize = 255;
pub const MAX_OPTION_LEN: usize = 100;
pub const DEADLINE_FORMAT: &str = "%d.%m.%Y %H:%M";

/// Hour of day (local) that preset deadlines are normalized to.
pub const PRESET_DEADLINE_HOUR: u32 = 12;

pub fn question(input: &str) -> Result<String, ValidationError> {
    let question = input.trim();
    if question.is_empty() {
        return Err(ValidationError::BlankQuestion);
    }
    let len = question.chars().count();
    if len > MAX_QUESTION_LEN {
        return Err(ValidationError::QuestionTooLong {
            len,
            max: MAX_QUESTION_LEN,
        });
    }
    Ok(question.to_string())
}

/// Newline-delimited option list; blank lines are skipped.
pub fn option_lines(input: &str) -> Result<Options, ValidationError> {
    let options: Options = input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    options_for(EventType::MultiOption, &options)?;
    Ok(options)
}

/// Checks the option set against the bounds of `event_type`.
pub fn options_for(event_type: EventType, options: &[String]) -> Result<(), ValidationError> {
    let (min, max) = event_type.option_bounds();
    if options.len() < min || options.len() > max {
        return Err(ValidationError::OptionCount {
            got: options.len(),
            min,
            max,
        });
    }

    let mut seen = HashSet::new();
    for (index, option) in options.iter().enumerate() {
        let option = option.trim();
        if option.is_empty() {
            return Err(ValidationError::OptionCount {
                got: options.iter().filter(|o| !o.trim().is_empty()).count(),
                min,
                max,
            });
        }
        if option.chars().count() > MAX_OPTION_LEN {
            return Err(ValidationError::OptionTooLong {
                index: index + 1,
                max: MAX_OPTION_LEN,
            });
        }
        if !seen.insert(option.to_lowercase()) {
            return Err(ValidationError::DuplicateOption(option.to_string()));
        }
    }
    Ok(())
}

/// Reads `DD.MM.YYYY HH:MM` in the configured local offset.
pub fn deadline(
    input: &str,
    offset: FixedOffset,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, ValidationError> {
    let naive = NaiveDateTime::parse_from_str(input.trim(), DEADLINE_FORMAT)
        .map_err(|_| ValidationError::DeadlineFormat)?;
    let local = offset
        .from_local_datetime(&naive)
        .single()
        .ok_or(ValidationError::DeadlineFormat)?;
    future(local.with_timezone(&Utc), now)
}

/// `days` after today, at the canonical local hour.
pub fn preset_deadline(
    days: u32,
    offset: FixedOffset,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, ValidationError> {
    let today = now.with_timezone(&offset).date_naive();
    let date = today
        .checked_add_days(Days::new(u64::from(days)))
        .ok_or(ValidationError::DeadlineFormat)?;
    let time = NaiveTime::from_hms_opt(PRESET_DEADLINE_HOUR, 0, 0).ok_or(ValidationError::DeadlineFormat)?;
    let local = offset
        .from_local_datetime(&date.and_time(time))
        .single()
        .ok_or(ValidationError::DeadlineFormat)?;
    future(local.with_timezone(&Utc), now)
}

pub fn future(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Result<DateTime<Utc>, ValidationError> {
    if deadline <= now {
        return Err(ValidationError::DeadlineNotInFuture);
    }
    Ok(deadline)
}

pub fn format_deadline(deadline: DateTime<Utc>, offset: FixedOffset) -> String {
    deadline.with_timezone(&offset).format(DEADLINE_FORMAT).to_string()
}

pub fn name(input: &str) -> Result<String, ValidationError> {
    let name = input.trim();
    if name.is_empty() {
        return Err(ValidationError::BlankName);
    }
    Ok(name.to_string())
}

pub fn number<T: std::str::FromStr>(input: &str) -> Result<T, ValidationError> {
    let trimmed = input.trim();
    trimmed
        .parse()
        .map_err(|_| ValidationError::InvalidNumber(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 10, 15, 30, 0).unwrap()
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn blank_question_is_rejected() {
        assert_eq!(question("   \n "), Err(ValidationError::BlankQuestion));
        assert_eq!(question("  Will BTC hit 100k? ").unwrap(), "Will BTC hit 100k?");
        assert!(matches!(
            question(&"x".repeat(MAX_QUESTION_LEN + 1)),
            Err(ValidationError::QuestionTooLong { .. })
        ));
    }

    #[test]
    fn option_lines_accept_two_to_six() {
        assert_eq!(option_lines("a\n\n  b  \n").unwrap().as_slice(), ["a", "b"]);
        assert!(option_lines("1\n2\n3\n4\n5\n6").is_ok());
        assert_eq!(
            option_lines("1\n2\n3\n4\n5\n6\n7"),
            Err(ValidationError::OptionCount {
                got: 7,
                min: 2,
                max: 6
            })
        );
        assert!(matches!(option_lines("only"), Err(ValidationError::OptionCount { got: 1, .. })));
        assert!(matches!(option_lines(""), Err(ValidationError::OptionCount { got: 0, .. })));
        assert_eq!(
            option_lines("Red\nred"),
            Err(ValidationError::DuplicateOption("red".into()))
        );
    }

    #[test]
    fn fixed_types_need_their_exact_count() {
        let three: Vec<String> = vec!["a".into(), "b".into(), "c".into()];
        assert!(options_for(EventType::Binary, &three).is_err());
        assert!(options_for(EventType::Probability, &three).is_err());
        assert!(options_for(EventType::MultiOption, &three).is_ok());
    }

    #[test]
    fn deadline_must_be_future() {
        assert_eq!(
            deadline("11.06.2025 09:00", utc(), now()).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 11, 9, 0, 0).unwrap()
        );
        assert_eq!(
            deadline("10.06.2025 15:30", utc(), now()),
            Err(ValidationError::DeadlineNotInFuture)
        );
        assert_eq!(deadline("tomorrow", utc(), now()), Err(ValidationError::DeadlineFormat));
        assert_eq!(deadline("31.02.2026 10:00", utc(), now()), Err(ValidationError::DeadlineFormat));
    }

    #[test]
    fn deadline_reads_local_offset() {
        let plus3 = FixedOffset::east_opt(3 * 3600).unwrap();
        let parsed = deadline("11.06.2025 09:00", plus3, now()).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 6, 11, 6, 0, 0).unwrap());
        assert_eq!(format_deadline(parsed, plus3), "11.06.2025 09:00");
    }

    #[test]
    fn presets_land_on_canonical_hour() {
        for days in crate::callback::DEADLINE_PRESETS {
            let deadline = preset_deadline(days, utc(), now()).unwrap();
            assert_eq!(deadline.hour(), PRESET_DEADLINE_HOUR);
            assert_eq!(deadline.minute(), 0);
            assert_eq!(
                deadline.date_naive(),
                now().date_naive() + Days::new(u64::from(days))
            );
        }
    }

    #[test]
    fn numbers_report_input() {
        assert_eq!(number::<i64>(" -1001234 ").unwrap(), -1001234);
        assert_eq!(number::<i64>("12a"), Err(ValidationError::InvalidNumber("12a".into())));
    }
}

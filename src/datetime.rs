//! `D:YYYYMMDDHHmmSSOHH'mm'` date strings of the Info dictionary.

use chrono::prelude::*;

use crate::Object;

impl From<DateTime<Local>> for Object {
    fn from(date: DateTime<Local>) -> Self {
        let mut text = date.format("D:%Y%m%d%H%M%S%:z'").to_string().into_bytes();
        apostrophe_offset(&mut text);
        Object::string_literal(text)
    }
}

impl From<DateTime<FixedOffset>> for Object {
    fn from(date: DateTime<FixedOffset>) -> Self {
        let mut text = date.format("D:%Y%m%d%H%M%S%:z'").to_string().into_bytes();
        apostrophe_offset(&mut text);
        Object::string_literal(text)
    }
}

impl From<DateTime<Utc>> for Object {
    fn from(date: DateTime<Utc>) -> Self {
        Object::string_literal(date.format("D:%Y%m%d%H%M%SZ").to_string())
    }
}

// `+02:00'` becomes `+02'00'`.
fn apostrophe_offset(bytes: &mut [u8]) {
    if let Some(colon) = bytes.iter().rposition(|&b| b == b':') {
        bytes[colon] = b'\'';
    }
}

impl Object {
    /// Reads a date string. Missing seconds, time or offset are accepted; no
    /// offset means UTC.
    pub fn as_datetime(&self) -> Option<DateTime<FixedOffset>> {
        let Object::String(bytes, _) = self else {
            return None;
        };
        let text = std::str::from_utf8(bytes).ok()?;
        let text = text.strip_prefix("D:").unwrap_or(text);
        let digits: String = text.chars().take_while(char::is_ascii_digit).collect();
        let offset = offset_from(&text[digits.len()..])?;

        let field = |range: std::ops::Range<usize>, default: u32| -> Option<u32> {
            match digits.get(range) {
                Some(part) => part.parse().ok(),
                None => Some(default),
            }
        };
        let year: i32 = digits.get(0..4)?.parse().ok()?;
        let date = NaiveDate::from_ymd_opt(year, field(4..6, 1)?, field(6..8, 1)?)?;
        let time = NaiveTime::from_hms_opt(field(8..10, 0)?, field(10..12, 0)?, field(12..14, 0)?)?;
        offset.from_local_datetime(&date.and_time(time)).single()
    }
}

fn offset_from(rest: &str) -> Option<FixedOffset> {
    let sign = match rest.chars().next() {
        None | Some('Z') => return FixedOffset::east_opt(0),
        Some('+') => 1,
        Some('-') => -1,
        Some(_) => return None,
    };
    let digits: String = rest[1..].chars().filter(char::is_ascii_digit).collect();
    let hours: i32 = digits.get(0..2)?.parse().ok()?;
    let minutes: i32 = digits.get(2..4).map_or(Some(0), |m| m.parse().ok())?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utc_round_trip() {
        let time = Utc.with_ymd_and_hms(2024, 3, 9, 17, 5, 1).unwrap();
        let text: Object = time.into();
        assert_eq!(text, Object::string_literal("D:20240309170501Z"));
        assert_eq!(text.as_datetime().unwrap(), time);
    }

    #[test]
    fn offsets_use_apostrophes() {
        let offset = FixedOffset::east_opt(2 * 3600 + 30 * 60).unwrap();
        let time = offset.with_ymd_and_hms(2023, 12, 31, 23, 59, 0).unwrap();
        let text: Object = time.into();
        assert_eq!(text, Object::string_literal("D:20231231235900+02'30'"));
        assert_eq!(text.as_datetime().unwrap(), time);
    }

    #[test]
    fn partial_dates() {
        let date = Object::string_literal("D:199812").as_datetime().unwrap();
        assert_eq!((date.year(), date.month(), date.day(), date.hour()), (1998, 12, 1, 0));

        let no_seconds = Object::string_literal("D:202001021314-05'00'").as_datetime().unwrap();
        assert_eq!(no_seconds.offset().local_minus_utc(), -5 * 3600);
        assert_eq!(no_seconds.minute(), 14);

        assert!(Object::string_literal("yesterday").as_datetime().is_none());
        assert!(Object::Integer(3).as_datetime().is_none());
    }
}

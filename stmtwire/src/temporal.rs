//! Compact integer date and time encodings.
//!
//! Dates are day numbers relative to 1858-11-17 (Modified Julian Day zero),
//! times are counts of 100 microsecond fractions since midnight.
//! Offset time zones are carried as a zone id, see [`encode_zone`].
use time::{Date, Duration, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

use crate::codec::CodecError;

pub const FRACTIONS_PER_SECOND: u32 = 10_000;
pub const FRACTIONS_PER_MINUTE: u32 = 60 * FRACTIONS_PER_SECOND;
pub const FRACTIONS_PER_HOUR: u32 = 60 * FRACTIONS_PER_MINUTE;

const NANOS_PER_FRACTION: u32 = 1_000_000_000 / FRACTIONS_PER_SECOND;

/// Zone id of offset `+00:00`, offset zones are `MINUTES_BIAS + offset minutes`.
const MINUTES_BIAS: i32 = 23 * 60 + 59;

/// Encode date as day number.
pub fn encode_date(date: Date) -> i32 {
    let mut year = date.year() as i64;
    let month = u8::from(date.month()) as i64;
    let day = date.day() as i64;

    // march based year, january and february belong to the previous one
    let month = if month > 2 {
        month - 3
    } else {
        year -= 1;
        month + 9
    };

    let century = year.div_euclid(100);
    let year_of_century = year - 100 * century;

    let days = (146_097 * century).div_euclid(4)
        + (1_461 * year_of_century) / 4
        + (153 * month + 2) / 5
        + day
        + 1_721_119
        - 2_400_001;
    days as i32
}

/// Decode day number into date.
pub fn decode_date(days: i32) -> Result<Date, CodecError> {
    let nday = days as i64 + 2_400_001 - 1_721_119;

    let century = (4 * nday - 1).div_euclid(146_097);
    let nday = 4 * nday - 1 - 146_097 * century;
    let day = nday / 4;

    let nday = (4 * day + 3) / 1_461;
    let day = 4 * day + 3 - 1_461 * nday;
    let day = (day + 4) / 4;

    let month = (5 * day - 3) / 153;
    let day = 5 * day - 3 - 153 * month;
    let day = (day + 5) / 5;

    let mut year = 100 * century + nday;
    let month = if month < 10 {
        month + 3
    } else {
        year += 1;
        month - 9
    };

    let invalid = |reason: String| CodecError::invalid("DATE", reason);
    let year = i32::try_from(year).map_err(|_| invalid(format!("year {year} out of range")))?;
    let month = Month::try_from(month as u8).map_err(|e| invalid(e.to_string()))?;
    Date::from_calendar_date(year, month, day as u8).map_err(|e| invalid(e.to_string()))
}

/// Encode time as fractions since midnight, truncating below 100 microseconds.
pub fn encode_time(time: Time) -> u32 {
    let (hour, minute, second, nano) = time.as_hms_nano();
    hour as u32 * FRACTIONS_PER_HOUR
        + minute as u32 * FRACTIONS_PER_MINUTE
        + second as u32 * FRACTIONS_PER_SECOND
        + nano / NANOS_PER_FRACTION
}

/// Decode fractions since midnight into time.
pub fn decode_time(fractions: u32) -> Result<Time, CodecError> {
    let hour = fractions / FRACTIONS_PER_HOUR;
    let rest = fractions % FRACTIONS_PER_HOUR;
    let minute = rest / FRACTIONS_PER_MINUTE;
    let rest = rest % FRACTIONS_PER_MINUTE;
    let second = rest / FRACTIONS_PER_SECOND;
    let fraction = rest % FRACTIONS_PER_SECOND;

    Time::from_hms_nano(
        hour.try_into().unwrap_or(u8::MAX),
        minute as u8,
        second as u8,
        fraction * NANOS_PER_FRACTION,
    )
    .map_err(|e| CodecError::invalid("TIME", e.to_string()))
}

/// Drop precision below 100 microseconds.
pub fn truncate(time: Time) -> Time {
    let (hour, minute, second, nano) = time.as_hms_nano();
    let nano = nano - nano % NANOS_PER_FRACTION;
    Time::from_hms_nano(hour, minute, second, nano).unwrap_or(time)
}

pub fn encode_timestamp(timestamp: PrimitiveDateTime) -> (i32, u32) {
    (encode_date(timestamp.date()), encode_time(timestamp.time()))
}

pub fn decode_timestamp(date: i32, time: u32) -> Result<PrimitiveDateTime, CodecError> {
    Ok(PrimitiveDateTime::new(decode_date(date)?, decode_time(time)?))
}

/// Zone id of an offset zone.
pub fn encode_zone(offset: UtcOffset) -> u16 {
    (offset.whole_minutes() as i32 + MINUTES_BIAS) as u16
}

/// Offset of a zone id, named region zones are not supported.
pub fn decode_zone(zone: u16) -> Result<UtcOffset, CodecError> {
    let zone = zone as i32;
    if zone > 2 * MINUTES_BIAS {
        return Err(CodecError::unsupported(format!("time zone region {zone}")));
    }
    UtcOffset::from_whole_seconds((zone - MINUTES_BIAS) * 60)
        .map_err(|e| CodecError::invalid("TIME ZONE", e.to_string()))
}

/// Encode local time with offset as utc fractions and zone id.
pub fn encode_time_tz(time: Time, offset: UtcOffset) -> (u32, u16) {
    let utc = time - Duration::seconds(offset.whole_seconds().into());
    (encode_time(utc), encode_zone(offset))
}

/// Decode utc fractions and zone id into local time with offset.
pub fn decode_time_tz(fractions: u32, zone: u16) -> Result<(Time, UtcOffset), CodecError> {
    let offset = decode_zone(zone)?;
    let utc = decode_time(fractions)?;
    Ok((utc + Duration::seconds(offset.whole_seconds().into()), offset))
}

/// Encode instant as utc date, utc time and zone id.
pub fn encode_timestamp_tz(timestamp: OffsetDateTime) -> Result<(i32, u32, u16), CodecError> {
    let utc = timestamp
        .checked_to_offset(UtcOffset::UTC)
        .ok_or_else(|| CodecError::invalid("TIMESTAMP WITH TIME ZONE", "out of range"))?;
    let (date, time) = encode_timestamp(PrimitiveDateTime::new(utc.date(), utc.time()));
    Ok((date, time, encode_zone(timestamp.offset())))
}

pub fn decode_timestamp_tz(date: i32, time: u32, zone: u16) -> Result<OffsetDateTime, CodecError> {
    let offset = decode_zone(zone)?;
    decode_timestamp(date, time)?
        .assume_utc()
        .checked_to_offset(offset)
        .ok_or_else(|| CodecError::invalid("TIMESTAMP WITH TIME ZONE", "out of range"))
}

#[cfg(test)]
mod test {
    use time::macros::{date, datetime, offset, time};

    use super::*;

    #[test]
    fn date_epoch() {
        assert_eq!(encode_date(date!(1858-11-17)), 0);
        assert_eq!(encode_date(date!(1858-11-18)), 1);
        assert_eq!(encode_date(date!(2000-01-01)), 51_544);
        assert_eq!(decode_date(51_544).unwrap(), date!(2000-01-01));
        assert_eq!(decode_date(-1).unwrap(), date!(1858-11-16));
    }

    #[test]
    fn date_round_trip() {
        let mut date = date!(0001-01-01);
        let mut expected = encode_date(date);
        while date.year() < 9999 {
            let days = encode_date(date);
            assert_eq!(days, expected, "{date}");
            assert_eq!(decode_date(days).unwrap(), date);
            date = date.next_day().unwrap();
            expected += 1;
        }
    }

    #[test]
    fn leap_days() {
        for d in [date!(2000-02-29), date!(2024-02-29), date!(1900-02-28), date!(1900-03-01)] {
            assert_eq!(decode_date(encode_date(d)).unwrap(), d);
        }
        assert_eq!(encode_date(date!(1900-03-01)) - encode_date(date!(1900-02-28)), 1);
    }

    #[test]
    fn time_formula() {
        let t = time!(13:45:30.1234);
        assert_eq!(encode_time(t), 13 * 36_000_000 + 45 * 600_000 + 30 * 10_000 + 1234);
        assert_eq!(decode_time(encode_time(t)).unwrap(), t);
    }

    #[test]
    fn time_truncates() {
        let t = time!(23:59:59.999_999_999);
        assert_eq!(decode_time(encode_time(t)).unwrap(), time!(23:59:59.9999));
        assert_eq!(truncate(t), time!(23:59:59.9999));
        assert!(decode_time(24 * FRACTIONS_PER_HOUR).is_err());
    }

    #[test]
    fn time_round_trip() {
        let mut fractions = 0;
        while fractions < 24 * FRACTIONS_PER_HOUR {
            let t = decode_time(fractions).unwrap();
            assert_eq!(encode_time(t), fractions);
            fractions += 7_919;
        }
    }

    #[test]
    fn timestamp_round_trip() {
        let ts = datetime!(2024-02-29 08:15:00.5);
        let (d, t) = encode_timestamp(ts);
        assert_eq!(decode_timestamp(d, t).unwrap(), ts);
    }

    #[test]
    fn zones() {
        assert_eq!(encode_zone(offset!(UTC)), 1439);
        assert_eq!(encode_zone(offset!(+7)), 1439 + 420);
        assert_eq!(decode_zone(1439 - 330).unwrap(), offset!(-5:30));
        assert!(decode_zone(65_535).is_err());
    }

    #[test]
    fn time_tz_is_utc_on_wire() {
        let (fractions, zone) = encode_time_tz(time!(01:00), offset!(+2));
        assert_eq!(decode_time(fractions).unwrap(), time!(23:00));
        assert_eq!(decode_time_tz(fractions, zone).unwrap(), (time!(01:00), offset!(+2)));
    }

    #[test]
    fn timestamp_tz_round_trip() {
        let ts = datetime!(2024-01-01 00:30 +03:00);
        let (d, t, z) = encode_timestamp_tz(ts).unwrap();
        assert_eq!(decode_date(d).unwrap(), date!(2023-12-31));
        let back = decode_timestamp_tz(d, t, z).unwrap();
        assert_eq!(back, ts);
        assert_eq!(back.offset(), offset!(+3));
    }
}

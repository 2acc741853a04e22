//! Cron specs for scheduled tasks.
//!
//! Standard five-field cron (minute hour day-of-month month day-of-week),
//! optionally preceded by a seconds field, plus the literal `"* * *"` which
//! means "every tick" and exists for fast-turnaround test setups. Fields
//! accept `*`, single values, ranges, steps and comma lists; day-of-week 7
//! is Sunday like 0. When both day fields are restricted, either matching
//! suffices, as in classic cron.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CronError {
  #[error("cron spec must have 5 or 6 fields, got {0}")]
  FieldCount(usize),
  #[error("invalid cron field {0:?}")]
  Field(String),
  #[error("cron value {value} outside {min}..={max}")]
  Range { value: u32, min: u32, max: u32 },
}

/// A parsed cron spec; each field is a bitmask over its value range.
#[derive(Debug, Clone, PartialEq)]
pub struct CronSpec {
  every_tick: bool,
  seconds:    Option<u64>,
  minutes:    u64,
  hours:      u64,
  dom:        u64,
  months:     u64,
  dow:        u64,
  /// Whether the day fields were written as `*` (needed for the either-or
  /// day rule).
  dom_is_any: bool,
  dow_is_any: bool,
}

fn parse_field(field: &str, min: u32, max: u32) -> Result<(u64, bool), CronError> {
  let mut mask = 0u64;
  let mut is_any = false;

  for item in field.split(',') {
    let (base, step) = match item.split_once('/') {
      Some((base, step)) => {
        let step: u32 = step
          .parse()
          .map_err(|_| CronError::Field(item.to_owned()))?;
        if step == 0 {
          return Err(CronError::Field(item.to_owned()));
        }
        (base, step)
      }
      None => (item, 1),
    };

    let (lo, hi) = if base == "*" {
      if step == 1 && field == "*" {
        is_any = true;
      }
      (min, max)
    } else if let Some((lo, hi)) = base.split_once('-') {
      let lo: u32 = lo.parse().map_err(|_| CronError::Field(item.to_owned()))?;
      let hi: u32 = hi.parse().map_err(|_| CronError::Field(item.to_owned()))?;
      (lo, hi)
    } else {
      let value: u32 =
        base.parse().map_err(|_| CronError::Field(item.to_owned()))?;
      (value, value)
    };

    for value in (lo..=hi).step_by(step as usize) {
      // Day-of-week 7 is an alias for Sunday.
      let value = if max == 6 && value == 7 { 0 } else { value };
      if value < min || value > max {
        return Err(CronError::Range { value, min, max });
      }
      mask |= 1 << value;
    }
  }

  if mask == 0 {
    return Err(CronError::Field(field.to_owned()));
  }
  Ok((mask, is_any))
}

impl CronSpec {
  pub fn parse(spec: &str) -> Result<Self, CronError> {
    let spec = spec.trim();
    if spec == "* * *" {
      return Ok(Self {
        every_tick: true,
        seconds:    None,
        minutes:    0,
        hours:      0,
        dom:        0,
        months:     0,
        dow:        0,
        dom_is_any: true,
        dow_is_any: true,
      });
    }

    let fields: Vec<&str> = spec.split_whitespace().collect();
    let (seconds, rest) = match fields.len() {
      5 => (None, &fields[..]),
      6 => (Some(parse_field(fields[0], 0, 59)?.0), &fields[1..]),
      n => return Err(CronError::FieldCount(n)),
    };

    let (minutes, _) = parse_field(rest[0], 0, 59)?;
    let (hours, _) = parse_field(rest[1], 0, 23)?;
    let (dom, dom_is_any) = parse_field(rest[2], 1, 31)?;
    let (months, _) = parse_field(rest[3], 1, 12)?;
    // 7 aliases Sunday, handled inside parse_field.
    let (dow, dow_is_any) = parse_field(rest[4], 0, 6)?;

    Ok(Self {
      every_tick: false,
      seconds,
      minutes,
      hours,
      dom,
      months,
      dow,
      dom_is_any,
      dow_is_any,
    })
  }

  fn day_matches(&self, dt: &DateTime<Utc>) -> bool {
    let dom_hit = self.dom & (1 << dt.day()) != 0;
    let dow_hit = self.dow & (1 << dt.weekday().num_days_from_sunday()) != 0;
    match (self.dom_is_any, self.dow_is_any) {
      (false, false) => dom_hit || dow_hit,
      (false, true) => dom_hit,
      (true, false) => dow_hit,
      (true, true) => true,
    }
  }

  /// The first fire time strictly after `after`, or `None` when no match
  /// exists within roughly two years (an impossible spec like Feb 30).
  pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if self.every_tick {
      return Some(after + Duration::seconds(1));
    }

    // Walk minute by minute; the horizon bounds impossible specs.
    let mut candidate = Utc
      .with_ymd_and_hms(
        after.year(),
        after.month(),
        after.day(),
        after.hour(),
        after.minute(),
        0,
      )
      .single()?;
    let horizon = after + Duration::days(366 * 2);

    loop {
      // Within the starting minute only seconds after `after` count.
      let sec_floor = if candidate <= after && candidate + Duration::seconds(59) > after {
        Some(after.second() + 1)
      } else if candidate > after {
        Some(0)
      } else {
        None
      };

      if let Some(sec_floor) = sec_floor
        && sec_floor < 60
        && self.months & (1 << candidate.month()) != 0
        && self.day_matches(&candidate)
        && self.hours & (1 << candidate.hour()) != 0
        && self.minutes & (1 << candidate.minute()) != 0
      {
        let seconds_mask = self.seconds.unwrap_or(1);
        for second in sec_floor..60 {
          if seconds_mask & (1 << second) != 0 {
            return Some(candidate + Duration::seconds(second as i64));
          }
        }
      }

      candidate += Duration::minutes(1);
      if candidate > horizon {
        return None;
      }
    }
  }

  /// Unix-seconds variant used by the scheduler bookkeeping.
  pub fn next_after_unix(&self, after_sec: i64) -> Option<i64> {
    let after = Utc.timestamp_opt(after_sec, 0).single()?;
    self.next_after(after).map(|dt| dt.timestamp())
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;

  fn at(
    y: i32,
    mo: u32,
    d: u32,
    h: u32,
    mi: u32,
    s: u32,
  ) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
  }

  #[test]
  fn every_minute() {
    let spec = CronSpec::parse("* * * * *").unwrap();
    assert_eq!(
      spec.next_after(at(2024, 5, 1, 10, 0, 0)),
      Some(at(2024, 5, 1, 10, 1, 0))
    );
    assert_eq!(
      spec.next_after(at(2024, 5, 1, 10, 0, 30)),
      Some(at(2024, 5, 1, 10, 1, 0))
    );
  }

  #[test]
  fn hourly_at_minute_zero() {
    let spec = CronSpec::parse("0 * * * *").unwrap();
    assert_eq!(
      spec.next_after(at(2024, 5, 1, 10, 0, 0)),
      Some(at(2024, 5, 1, 11, 0, 0))
    );
    assert_eq!(
      spec.next_after(at(2024, 5, 1, 10, 59, 59)),
      Some(at(2024, 5, 1, 11, 0, 0))
    );
  }

  #[test]
  fn daily_rolls_over_midnight() {
    let spec = CronSpec::parse("30 2 * * *").unwrap();
    assert_eq!(
      spec.next_after(at(2024, 5, 1, 3, 0, 0)),
      Some(at(2024, 5, 2, 2, 30, 0))
    );
  }

  #[test]
  fn steps_ranges_and_lists() {
    let spec = CronSpec::parse("*/15 9-17 * * 1-5").unwrap();
    // Wednesday 2024-05-01 10:07 → 10:15.
    assert_eq!(
      spec.next_after(at(2024, 5, 1, 10, 7, 0)),
      Some(at(2024, 5, 1, 10, 15, 0))
    );
    // Friday 17:45 → Monday 09:00.
    assert_eq!(
      spec.next_after(at(2024, 5, 3, 17, 45, 1)),
      Some(at(2024, 5, 6, 9, 0, 0))
    );

    let list = CronSpec::parse("5,35 * * * *").unwrap();
    assert_eq!(
      list.next_after(at(2024, 5, 1, 10, 6, 0)),
      Some(at(2024, 5, 1, 10, 35, 0))
    );
  }

  #[test]
  fn six_fields_honour_seconds() {
    let spec = CronSpec::parse("*/10 * * * * *").unwrap();
    assert_eq!(
      spec.next_after(at(2024, 5, 1, 10, 0, 3)),
      Some(at(2024, 5, 1, 10, 0, 10))
    );
    assert_eq!(
      spec.next_after(at(2024, 5, 1, 10, 0, 55)),
      Some(at(2024, 5, 1, 10, 1, 0))
    );
  }

  #[test]
  fn every_tick_literal() {
    let spec = CronSpec::parse("* * *").unwrap();
    assert_eq!(
      spec.next_after(at(2024, 5, 1, 10, 0, 3)),
      Some(at(2024, 5, 1, 10, 0, 4))
    );
  }

  #[test]
  fn dow_seven_is_sunday() {
    let spec = CronSpec::parse("0 0 * * 7").unwrap();
    // Saturday 2024-05-04 → Sunday 2024-05-05 00:00.
    assert_eq!(
      spec.next_after(at(2024, 5, 4, 12, 0, 0)),
      Some(at(2024, 5, 5, 0, 0, 0))
    );
  }

  #[test]
  fn restricted_day_fields_match_either() {
    // Classic cron: day 13 OR friday.
    let spec = CronSpec::parse("0 0 13 * 5").unwrap();
    // 2024-05-06 (Mon) → 2024-05-10 is the first Friday, before the 13th.
    assert_eq!(
      spec.next_after(at(2024, 5, 6, 1, 0, 0)),
      Some(at(2024, 5, 10, 0, 0, 0))
    );
  }

  #[test]
  fn rejects_malformed_specs() {
    assert!(matches!(
      CronSpec::parse("* * * *"),
      Err(CronError::FieldCount(4))
    ));
    assert!(CronSpec::parse("61 * * * *").is_err());
    assert!(CronSpec::parse("a * * * *").is_err());
    assert!(CronSpec::parse("*/0 * * * *").is_err());
  }

  #[test]
  fn impossible_spec_has_no_next() {
    let spec = CronSpec::parse("0 0 30 2 *").unwrap();
    assert_eq!(spec.next_after(at(2024, 1, 1, 0, 0, 0)), None);
  }
}

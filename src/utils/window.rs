//! 日历对齐的计数窗口
//!
//! 计数器的过期时间只在窗口内第一次写入时设置，窗口因此对齐到
//! 整点、零点或月初，而不是滑动时长。

use std::fmt;

use chrono::{
    DateTime, Datelike, Days, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Timelike,
};
use serde::{Deserialize, Serialize};

/// 计数重置周期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetPeriod {
    Hourly,
    Daily,
    Monthly,
}

impl ResetPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResetPeriod::Hourly => "hourly",
            ResetPeriod::Daily => "daily",
            ResetPeriod::Monthly => "monthly",
        }
    }
}

impl fmt::Display for ResetPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 计算从 `now` 到下一个重置边界的秒数
///
/// `now` 先向下取整到秒，正好落在边界上的时刻视为新周期的开始，
/// 因此返回值总是 >= 1。边界按 `now` 所在时区的本地时间计算。
pub fn expiry_seconds<Tz: TimeZone>(period: ResetPeriod, now: &DateTime<Tz>) -> i64 {
    let now = floor_to_second(now);
    let local = now.naive_local();

    let boundary = match period {
        ResetPeriod::Hourly => start_of_hour(local) + TimeDelta::hours(1),
        ResetPeriod::Daily => (local.date() + Days::new(1)).and_time(NaiveTime::default()),
        ResetPeriod::Monthly => {
            first_of_next_month(local.date()).and_time(NaiveTime::default())
        }
    };

    seconds_until(&now, boundary).max(1)
}

fn floor_to_second<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Tz> {
    now.clone() - TimeDelta::nanoseconds(i64::from(now.timestamp_subsec_nanos()))
}

fn start_of_hour(local: NaiveDateTime) -> NaiveDateTime {
    local - TimeDelta::seconds(i64::from(local.minute() * 60 + local.second()))
}

// 从本月 1 日前进 32 天必然落在下个月，再截断到该月 1 日
fn first_of_next_month(date: NaiveDate) -> NaiveDate {
    let first = date - Days::new(u64::from(date.day0()));
    let later = first + Days::new(32);
    later - Days::new(u64::from(later.day0()))
}

fn seconds_until<Tz: TimeZone>(now: &DateTime<Tz>, boundary: NaiveDateTime) -> i64 {
    match now.timezone().from_local_datetime(&boundary).earliest() {
        Some(at) => (at - now.clone()).num_seconds(),
        // 边界落在夏令时空档内，退回按挂钟时间计算
        None => (boundary - now.naive_local()).num_seconds(),
    }
}

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use regex::Regex;

use crate::config::HarvestConfig;
use crate::error::{Error, Result};

const MILLIS_PER_DAY: u32 = 86_400_000;

/// 从文件名提取时间点（Unix epoch 毫秒）
pub trait TimestampExtractor: Send + Sync {
    fn extract(&self, file_name: &str) -> Result<i64>;
}

/// 正则截取 + chrono strftime 解析
///
/// 解析顺序：带时区的完整时间 → 无时区时间（补默认偏移）→ 纯日期（补默认时刻与偏移）
#[derive(Debug)]
pub struct PatternTimestamp {
    regex: Regex,
    group: usize,
    format: String,
    milli_of_day: u32,
    offset: FixedOffset,
}

impl PatternTimestamp {
    pub fn new(
        pattern: &str,
        group: usize,
        format: &str,
        milli_of_day: u32,
        offset_seconds: i32,
    ) -> Result<Self> {
        let regex = Regex::new(pattern)?;
        // captures_len 包含第 0 组（整体匹配）
        if group >= regex.captures_len() {
            return Err(Error::Config(format!(
                "time-index {group} out of range, pattern has {} capture group(s)",
                regex.captures_len() - 1
            )));
        }
        if StrftimeItems::new(format).any(|it| matches!(it, Item::Error)) {
            return Err(Error::Config(format!("malformed time-format {format:?}")));
        }
        if milli_of_day >= MILLIS_PER_DAY {
            return Err(Error::Config(format!(
                "milli-of-day {milli_of_day} must be below {MILLIS_PER_DAY}"
            )));
        }
        let offset = FixedOffset::east_opt(offset_seconds).ok_or_else(|| {
            Error::Config(format!("offset-seconds {offset_seconds} out of range"))
        })?;

        Ok(Self {
            regex,
            group,
            format: format.to_string(),
            milli_of_day,
            offset,
        })
    }

    pub fn from_config(cfg: &HarvestConfig) -> Result<Self> {
        Self::new(
            &cfg.pattern,
            cfg.time_index,
            &cfg.time_format,
            cfg.milli_of_day,
            cfg.offset_seconds,
        )
    }

    fn default_time(&self) -> NaiveTime {
        let secs = self.milli_of_day / 1000;
        let nanos = (self.milli_of_day % 1000) * 1_000_000;
        NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos).unwrap_or(NaiveTime::MIN)
    }

    fn localize(&self, ndt: NaiveDateTime, name: &str) -> Result<i64> {
        self.offset
            .from_local_datetime(&ndt)
            .single()
            .map(|dt| dt.timestamp_millis())
            .ok_or_else(|| Error::TimeParse {
                name: name.to_string(),
                reason: "ambiguous local time".to_string(),
            })
    }
}

impl TimestampExtractor for PatternTimestamp {
    fn extract(&self, file_name: &str) -> Result<i64> {
        let fail = |reason: String| Error::TimeParse {
            name: file_name.to_string(),
            reason,
        };

        let caps = self
            .regex
            .captures(file_name)
            .ok_or_else(|| fail("pattern does not match".to_string()))?;
        let text = caps
            .get(self.group)
            .ok_or_else(|| fail(format!("capture group {} did not participate", self.group)))?
            .as_str();

        if let Ok(dt) = DateTime::parse_from_str(text, &self.format) {
            return Ok(dt.timestamp_millis());
        }
        if let Ok(ndt) = NaiveDateTime::parse_from_str(text, &self.format) {
            return self.localize(ndt, file_name);
        }
        match NaiveDate::parse_from_str(text, &self.format) {
            Ok(date) => self.localize(date.and_time(self.default_time()), file_name),
            Err(e) => Err(fail(format!("{text:?} does not fit {:?}: {e}", self.format))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2023-01-01T00:00:00Z
    const JAN_1: i64 = 1_672_531_200_000;

    #[test]
    fn date_only_uses_midnight_utc() {
        let ex = PatternTimestamp::new(r"sst_(\d{8})", 1, "%Y%m%d", 0, 0).unwrap();
        assert_eq!(ex.extract("sst_20230101.tif").unwrap(), JAN_1);
    }

    #[test]
    fn date_only_is_filled_with_defaults() {
        let ex = PatternTimestamp::new(r"sst_(\d{8})", 1, "%Y%m%d", 43_200_000, 3600).unwrap();
        // 12:00 在 +01:00 == 11:00Z
        assert_eq!(
            ex.extract("sst_20230101.tif").unwrap(),
            JAN_1 + 11 * 3_600_000
        );
    }

    #[test]
    fn naive_datetime_gets_default_offset() {
        let ex = PatternTimestamp::new(r"_(\d{8}T\d{4})", 1, "%Y%m%dT%H%M", 0, -7200).unwrap();
        assert_eq!(
            ex.extract("wind_20230101T0130.nc").unwrap(),
            JAN_1 + 90 * 60_000 + 2 * 3_600_000
        );
    }

    #[test]
    fn explicit_offset_wins() {
        let ex = PatternTimestamp::new(r"_(.+)\.tif$", 1, "%Y%m%d%H%M%z", 0, 3600).unwrap();
        assert_eq!(ex.extract("x_202301010000+0000.tif").unwrap(), JAN_1);
    }

    #[test]
    fn unmatched_name_is_a_time_parse_error() {
        let ex = PatternTimestamp::new(r"sst_(\d{8})", 1, "%Y%m%d", 0, 0).unwrap();
        assert!(matches!(
            ex.extract("readme.txt"),
            Err(Error::TimeParse { .. })
        ));
        assert!(matches!(
            ex.extract("sst_20231340.tif"),
            Err(Error::TimeParse { .. })
        ));
    }

    #[test]
    fn construction_rejects_bad_settings() {
        assert!(matches!(
            PatternTimestamp::new(r"sst_(\d{8}", 1, "%Y%m%d", 0, 0),
            Err(Error::Pattern(_))
        ));
        assert!(PatternTimestamp::new(r"sst_(\d{8})", 2, "%Y%m%d", 0, 0).is_err());
        assert!(PatternTimestamp::new(r"sst_(\d{8})", 1, "%Y%m%Q%", 0, 0).is_err());
        assert!(PatternTimestamp::new(r"sst_(\d{8})", 1, "%Y%m%d", MILLIS_PER_DAY, 0).is_err());
        assert!(PatternTimestamp::new(r"sst_(\d{8})", 1, "%Y%m%d", 0, 90_000).is_err());
    }
}

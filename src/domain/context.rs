use chrono::{DateTime, FixedOffset, Offset, Utc};

/// Company-scoped settings threaded through every orchestration call.
#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    pub company_id: u32,
    /// Offset of the company's local time from UTC.
    pub utc_offset: FixedOffset,
    /// `strftime` pattern for dates.
    pub date_format: String,
    /// `strftime` pattern for date and time.
    pub datetime_format: String,
}

impl Context {
    pub fn new(company_id: u32) -> Self {
        Self {
            company_id,
            utc_offset: Utc.fix(),
            date_format: "%b %-d, %Y".to_string(),
            datetime_format: "%b %-d, %Y %-I:%M:%S %p".to_string(),
        }
    }

    pub fn with_utc_offset(mut self, offset: FixedOffset) -> Self {
        self.utc_offset = offset;
        self
    }

    pub fn format_date(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.utc_offset)
            .format(&self.date_format)
            .to_string()
    }

    pub fn format_datetime(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.utc_offset)
            .format(&self.datetime_format)
            .to_string()
    }
}

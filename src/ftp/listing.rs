//! Parsing of raw `LIST` output.
//!
//! Servers answer `LIST` with loosely formatted text in one of two dialects:
//! `ls -l` style lines on Unix-like servers and `dir` style lines on Windows
//! (IIS) servers. The dialect is detected from the first entry parsed and
//! then kept for the lifetime of the parser.

use std::sync::LazyLock;

use chrono::{Datelike, Month, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use tracing::debug;

use crate::attributes::{Attributes, DirectoryAttributes, FileAttributes};
use crate::config::SystemType;
use crate::errors::{FsError, FsResult};
use crate::path::{PathPrefixer, join_logical};
use crate::visibility::VisibilityConverter;

static WINDOWS_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]{2,4}-[0-9]{2}-[0-9]{2}").expect("windows date pattern is valid")
});

const WINDOWS_FALLBACK_FORMATS: &[&str] = &[
    "%m-%d-%Y %I:%M%p",
    "%m-%d-%y %H:%M",
    "%m-%d-%Y %H:%M",
    "%Y-%m-%d %I:%M%p",
    "%d-%m-%Y %H:%M",
];

/// How a single raw listing line is treated.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ListingLine<'a> {
    Skip,
    /// Block header of a recursive listing; the new base directory.
    Header(String),
    Entry(&'a str),
}

pub(crate) fn classify_line<'a>(line: &'a str, prefixer: Option<&PathPrefixer>) -> ListingLine<'a> {
    if line.trim().is_empty()
        || line.ends_with(" .")
        || line.ends_with(" ..")
        || line.starts_with("total")
    {
        return ListingLine::Skip;
    }

    let Some(header) = line.strip_suffix(':') else {
        return ListingLine::Entry(line);
    };
    let header = if header == "." {
        ""
    } else {
        header.trim_start_matches("./")
    };
    let header = prefixer
        .and_then(|prefixer| header.strip_prefix(prefixer.prefix()))
        .unwrap_or(header);
    ListingLine::Header(header.trim_matches('/').to_string())
}

pub(crate) fn detect_system_type(item: &str) -> SystemType {
    if WINDOWS_DATE.is_match(item) {
        SystemType::Windows
    } else {
        SystemType::Unix
    }
}

/// Decodes an `ls -l` permission string such as `drwxr-xr-x` into mode bits.
pub(crate) fn normalize_permissions(permissions: &str) -> u32 {
    let bits: Vec<u32> = permissions
        .chars()
        .skip(1)
        .take(9)
        .map(|flag| match flag {
            'r' => 4,
            'w' => 2,
            'x' | 's' | 't' => 1,
            _ => 0,
        })
        .collect();
    bits.chunks(3)
        .fold(0, |mode, group| mode * 8 + group.iter().sum::<u32>())
}

/// Splits `item` on whitespace runs into at most `count` fields. The last
/// field keeps its inner whitespace so names with spaces survive.
fn split_fields(item: &str, count: usize) -> Vec<&str> {
    let mut fields = Vec::with_capacity(count);
    let mut rest = item.trim();
    while fields.len() + 1 < count {
        let Some(index) = rest.find(char::is_whitespace) else {
            break;
        };
        fields.push(&rest[..index]);
        rest = rest[index..].trim_start();
    }
    if !rest.is_empty() {
        fields.push(rest);
    }
    fields
}

#[derive(Debug, Clone)]
pub(crate) struct ListingParser {
    system_type: Option<SystemType>,
    converter: VisibilityConverter,
    unix_timestamps: bool,
    current_year: i32,
}

impl ListingParser {
    pub fn new(
        system_type: Option<SystemType>,
        converter: VisibilityConverter,
        unix_timestamps: bool,
    ) -> Self {
        Self {
            system_type,
            converter,
            unix_timestamps,
            current_year: Utc::now().year(),
        }
    }

    /// Pins the year assumed for Unix entries that carry a time instead.
    pub fn with_current_year(mut self, year: i32) -> Self {
        self.current_year = year;
        self
    }

    pub fn system_type(&self) -> Option<SystemType> {
        self.system_type
    }

    pub fn parse(&mut self, item: &str, base: &str) -> FsResult<Attributes> {
        let system_type = match self.system_type {
            Some(system_type) => system_type,
            None => {
                let detected = detect_system_type(item);
                debug!(?detected, "detected ftp listing dialect");
                self.system_type = Some(detected);
                detected
            }
        };

        match system_type {
            SystemType::Unix => self.parse_unix(item, base),
            SystemType::Windows => self.parse_windows(item, base),
        }
    }

    fn parse_unix(&self, item: &str, base: &str) -> FsResult<Attributes> {
        let fields = split_fields(item, 9);
        let [permissions, _links, _owner, _group, size, month, day, time_or_year, name] =
            fields[..]
        else {
            return Err(FsError::invalid_listing(item, "not enough parts"));
        };

        let path = join_logical(base, name);
        let mode = normalize_permissions(permissions);
        let last_modified = if self.unix_timestamps {
            self.unix_timestamp(month, day, time_or_year)
        } else {
            None
        };

        if permissions.starts_with('d') {
            return Ok(DirectoryAttributes::new(&path)
                .with_visibility(Some(self.converter.inverse_for_directory(mode)))
                .with_last_modified(last_modified)
                .into());
        }

        Ok(FileAttributes::new(&path)
            .with_file_size(size.parse().unwrap_or(0))
            .with_visibility(Some(self.converter.inverse_for_file(mode)))
            .with_last_modified(last_modified)
            .into())
    }

    fn unix_timestamp(&self, month: &str, day: &str, time_or_year: &str) -> Option<i64> {
        let month = month.parse::<Month>().ok()?;
        let day = day.parse().ok()?;
        let (year, hour, minute) = if !time_or_year.is_empty()
            && time_or_year.bytes().all(|byte| byte.is_ascii_digit())
        {
            (time_or_year.parse().ok()?, 0, 0)
        } else {
            let (hour, minute) = time_or_year.split_once(':')?;
            (self.current_year, hour.parse().ok()?, minute.parse().ok()?)
        };

        let date = NaiveDate::from_ymd_opt(year, month.number_from_month(), day)?;
        Some(date.and_hms_opt(hour, minute, 0)?.and_utc().timestamp())
    }

    fn parse_windows(&self, item: &str, base: &str) -> FsResult<Attributes> {
        let fields = split_fields(item, 4);
        let [date, time, size, name] = fields[..] else {
            return Err(FsError::invalid_listing(item, "not enough parts"));
        };

        let path = join_logical(base, name);
        if size == "<DIR>" {
            return Ok(DirectoryAttributes::new(&path).into());
        }

        Ok(FileAttributes::new(&path)
            .with_file_size(size.parse().unwrap_or(0))
            .with_last_modified(windows_timestamp(date, time))
            .into())
    }
}

fn windows_timestamp(date: &str, time: &str) -> Option<i64> {
    let format = if date.len() == 8 {
        "%m-%d-%y%I:%M%p"
    } else {
        "%Y-%m-%d%H:%M"
    };
    let strict = NaiveDateTime::parse_from_str(&format!("{date}{time}"), format);
    let combined = format!("{date} {time}");
    strict
        .ok()
        .or_else(|| {
            WINDOWS_FALLBACK_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(&combined, format).ok())
        })
        .map(|parsed| parsed.and_utc().timestamp())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::visibility::Visibility;

    fn parser(system_type: Option<SystemType>) -> ListingParser {
        ListingParser::new(system_type, VisibilityConverter::default(), true).with_current_year(2024)
    }

    fn timestamp(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> i64 {
        Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
            .unwrap()
            .timestamp()
    }

    #[test]
    fn unix_directory_line() {
        let mut parser = parser(None);
        let entry = parser
            .parse("drwxr-xr-x 2 user group 4096 Jan 5 10:30 subdir", "")
            .unwrap();

        assert!(entry.is_dir());
        assert_eq!(entry.path(), "subdir");
        assert_eq!(entry.visibility(), Some(Visibility::Public));
        assert_eq!(entry.last_modified(), Some(timestamp(2024, 1, 5, 10, 30)));
        assert_eq!(parser.system_type(), Some(SystemType::Unix));
    }

    #[test]
    fn unix_file_line_with_year() {
        let mut parser = parser(None);
        let entry = parser
            .parse("-rw-r--r-- 1 user group 120 Jan 5 2020 file.txt", "docs/")
            .unwrap();

        let file = entry.as_file().unwrap();
        assert_eq!(file.path(), "docs/file.txt");
        assert_eq!(file.size(), 120);
        assert_eq!(file.visibility(), Some(Visibility::Public));
        assert_eq!(file.last_modified(), Some(timestamp(2020, 1, 5, 0, 0)));
    }

    #[test]
    fn unix_names_keep_inner_spaces() {
        let mut parser = parser(Some(SystemType::Unix));
        let entry = parser
            .parse("-rw-------   1 1000  1000   7 Mar 14  2021 annual  report.pdf", "")
            .unwrap();
        assert_eq!(entry.path(), "annual  report.pdf");
        assert_eq!(entry.visibility(), Some(Visibility::Private));
    }

    #[test]
    fn unix_timestamps_can_be_disabled() {
        let mut parser = ListingParser::new(None, VisibilityConverter::default(), false);
        let entry = parser
            .parse("-rw-r--r-- 1 user group 120 Jan 5 2020 file.txt", "")
            .unwrap();
        assert_eq!(entry.last_modified(), None);
    }

    #[test]
    fn windows_directory_line() {
        let mut parser = parser(None);
        let entry = parser.parse("01-05-24 10:30AM <DIR> subdir", "").unwrap();

        assert!(entry.is_dir());
        assert_eq!(entry.path(), "subdir");
        assert_eq!(parser.system_type(), Some(SystemType::Windows));
    }

    #[test]
    fn windows_file_line_parses_timestamp() {
        let mut parser = parser(Some(SystemType::Windows));
        let entry = parser
            .parse("01-05-24  02:15PM               2048 report final.docx", "a")
            .unwrap();

        let file = entry.as_file().unwrap();
        assert_eq!(file.path(), "a/report final.docx");
        assert_eq!(file.size(), 2048);
        assert_eq!(file.last_modified(), Some(timestamp(2024, 1, 5, 14, 15)));
        assert_eq!(file.visibility(), None);

        let long_date = parser.parse("2024-01-05  09:00  12 x.txt", "").unwrap();
        assert_eq!(long_date.last_modified(), Some(timestamp(2024, 1, 5, 9, 0)));

        let unparsable = parser.parse("99-99-99  nonsense  12 y.txt", "").unwrap();
        assert_eq!(unparsable.last_modified(), None);
    }

    #[test]
    fn short_unix_line_is_rejected() {
        let mut parser = parser(Some(SystemType::Unix));
        assert!(matches!(
            parser.parse("drwxr-xr-x 2 user", ""),
            Err(FsError::InvalidListing { .. })
        ));
    }

    #[test]
    fn dialect_detection_sticks() {
        let mut parser = parser(None);
        parser
            .parse("-rw-r--r-- 1 user group 1 Jan 5 2020 a.txt", "")
            .unwrap();
        assert!(matches!(
            parser.parse("01-05-24 10:30AM <DIR> subdir", ""),
            Err(FsError::InvalidListing { .. })
        ));
        assert_eq!(parser.system_type(), Some(SystemType::Unix));
    }

    #[test]
    fn permission_strings_decode_to_octal() {
        assert_eq!(normalize_permissions("drwxr-xr-x"), 0o755);
        assert_eq!(normalize_permissions("-rw-------"), 0o600);
        assert_eq!(normalize_permissions("-rwsr-xr-t"), 0o755);
        assert_eq!(normalize_permissions("-rwSr--r-T"), 0o644);
        assert_eq!(normalize_permissions("drwxr-xr-x+"), 0o755);
    }

    #[test]
    fn classifies_noise_and_headers() {
        assert_eq!(classify_line("", None), ListingLine::Skip);
        assert_eq!(classify_line("total 12", None), ListingLine::Skip);
        assert_eq!(
            classify_line("drwxr-xr-x 2 u g 4096 Jan 5 10:30 .", None),
            ListingLine::Skip
        );
        assert_eq!(
            classify_line("drwxr-xr-x 2 u g 4096 Jan 5 10:30 ..", None),
            ListingLine::Skip
        );
        assert_eq!(
            classify_line("./nested/dir:", None),
            ListingLine::Header("nested/dir".to_string())
        );

        let prefixer = PathPrefixer::new("/home/ftp", '/');
        assert_eq!(
            classify_line("/home/ftp/a/b:", Some(&prefixer)),
            ListingLine::Header("a/b".to_string())
        );
        assert_eq!(
            classify_line("-rw-r--r-- 1 u g 5 Jan 5 2020 x", Some(&prefixer)),
            ListingLine::Entry("-rw-r--r-- 1 u g 5 Jan 5 2020 x")
        );
    }
}

// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2016 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Parser for the line-oriented EPG dump the player subprocess prints in
//! response to an `info` command.
//!
//! Lines come in three shapes:
//! ```text
//! +----[ EPG NHK総合1・東京 [Program 101] [Table 80] ]
//! | 2026-07-28 19:00:00: Some Program (00:30) - description text
//! +----[ end of stream info ]
//! ```
//! Section headers (optionally prefixed with `> `) open a section named in
//! brackets; only `EPG ... [Program N] [Table T]` sections with
//! `0x50 <= T < 0x60` (the present/following and schedule EIT tables) carry
//! event lines. The literal section `end of stream info` ends the dump.

use base::{err, Error};
use nom::bytes::complete::{tag, take_till, take_while_m_n};
use nom::combinator::{map_res, opt};
use nom::sequence::{delimited, tuple};
use nom::IResult;

use crate::model::{EventInfo, ProgramInfo, StreamInfo};

fn digits<'a>(len: usize) -> impl FnMut(&'a str) -> IResult<&'a str, i64> {
    map_res(take_while_m_n(len, len, |c: char| c.is_ascii_digit()), |s: &str| {
        s.parse::<i64>()
    })
}

fn varint(input: &str) -> IResult<&str, i64> {
    map_res(
        nom::bytes::complete::take_while1(|c: char| c.is_ascii_digit()),
        |s: &str| s.parse::<i64>(),
    )(input)
}

/// Parses a section header line, returning the section name.
fn section_header(line: &str) -> Option<&str> {
    let inner = |input| -> IResult<&str, &str> {
        delimited(
            tuple((opt(tag("> ")), tag("+----[ "))),
            take_till(|c| c == ']'),
            tag(" ]"),
        )(input)
    };
    match inner(line) {
        Ok((rest, name)) if rest.is_empty() => Some(name),
        _ => None,
    }
}

/// Parses an `EPG <service> [Program <n>] [Table <t>]` section name.
fn epg_program_header(section: &str) -> Option<(&str, u32, u32)> {
    let inner = |input| -> IResult<&str, (&str, i64, i64)> {
        let (input, _) = tag("EPG ")(input)?;
        let (input, service) = take_till(|c| c == '[')(input)?;
        let (input, _) = tag("[Program ")(input)?;
        let (input, program) = varint(input)?;
        let (input, _) = tag("] [Table ")(input)?;
        let (input, table) = varint(input)?;
        let (input, _) = tag("]")(input)?;
        Ok((input, (service, program, table)))
    };
    match inner(section) {
        Ok((rest, (service, program, table))) if rest.is_empty() => {
            Some((service.trim(), program as u32, table as u32))
        }
        _ => None,
    }
}

struct EventLine {
    year: i16,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
    name: String,
    duration_hours: i64,
    duration_minutes: i64,
    description: String,
}

fn event_line(line: &str) -> Option<EventLine> {
    let inner = |input| -> IResult<&str, (i64, i64, i64, i64, i64, i64, &str, i64, i64, &str)> {
        let (input, _) = tag("| ")(input)?;
        let (input, year) = digits(4)(input)?;
        let (input, _) = tag("-")(input)?;
        let (input, month) = digits(2)(input)?;
        let (input, _) = tag("-")(input)?;
        let (input, day) = digits(2)(input)?;
        let (input, _) = tag(" ")(input)?;
        let (input, hour) = digits(2)(input)?;
        let (input, _) = tag(":")(input)?;
        let (input, minute) = digits(2)(input)?;
        let (input, _) = tag(":")(input)?;
        let (input, second) = digits(2)(input)?;
        let (input, _) = tag(": ")(input)?;
        let (input, name) = take_till(|c| c == '(')(input)?;
        let (input, _) = tag("(")(input)?;
        let (input, dur_hour) = digits(2)(input)?;
        let (input, _) = tag(":")(input)?;
        let (input, dur_min) = digits(2)(input)?;
        let (input, _) = tag(")")(input)?;
        let (input, _) = tag(" - ")(input)?;
        Ok((
            "",
            (year, month, day, hour, minute, second, name.trim_end(), dur_hour, dur_min, input),
        ))
    };
    let (_, (year, month, day, hour, minute, second, name, dur_hour, dur_min, description)) =
        inner(line).ok()?;
    Some(EventLine {
        year: year as i16,
        month: month as u8,
        day,
        hour: hour as u8,
        minute: minute as u8,
        second: second as u8,
        name: name.to_string(),
        duration_hours: dur_hour,
        duration_minutes: dur_min,
        description: description.to_string(),
    })
}

const TABLE_MIN: u32 = 0x50;
const TABLE_MAX: u32 = 0x60;

/// Parses a full `info` dump into a [`StreamInfo`], given the timezone
/// event timestamps are expressed in and the time the scan was scheduled.
///
/// Returns an error if the stream ends (or `lines` is exhausted) before the
/// `end of stream info` section is seen.
pub fn parse_stream_info<'a>(
    lines: impl Iterator<Item = &'a str>,
    tz: &jiff::tz::TimeZone,
    scan_time: jiff::Timestamp,
) -> Result<StreamInfo, Error> {
    let mut programs: Vec<ProgramInfo> = Vec::new();
    let mut current_program: Option<usize> = None;

    for line in lines {
        if let Some(section) = section_header(line) {
            if section == "end of stream info" {
                return Ok(StreamInfo {
                    scan_time,
                    programs,
                });
            }
            current_program = None;
            if let Some((title, number, table)) = epg_program_header(section) {
                if table < TABLE_MIN || table >= TABLE_MAX {
                    continue;
                }
                let index = match programs.iter().position(|p| p.number == number) {
                    Some(i) => i,
                    None => {
                        programs.push(ProgramInfo {
                            number,
                            title: title.to_string(),
                            events: Vec::new(),
                        });
                        programs.len() - 1
                    }
                };
                current_program = Some(index);
            }
            continue;
        }

        let Some(index) = current_program else {
            continue;
        };
        let Some(ev) = event_line(line) else {
            continue;
        };
        let dt = jiff::civil::DateTime::new(
            ev.year,
            ev.month as i8,
            ev.day as i8,
            ev.hour as i8,
            ev.minute as i8,
            ev.second as i8,
            0,
        )
        .map_err(|e| err!(InvalidArgument, msg("invalid event timestamp"), source(e)))?;
        let start = tz
            .into_ambiguous_zoned(dt)
            .compatible()
            .map_err(|e| err!(InvalidArgument, source(e)))?
            .timestamp();
        programs[index].events.push(EventInfo {
            start,
            duration_secs: ev.duration_hours * 3600 + ev.duration_minutes * 60,
            name: ev.name,
            description: ev.description,
        });
    }

    Err(err!(
        InvalidArgument,
        msg("stream info ended without an \"end of stream info\" section")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
+----[ EPG NHK\u{7dcf}\u{5408}1\u{30fb}\u{6771}\u{4eac} [Program 101] [Table 80] ]
| 2026-07-28 19:00:00: Evening News (00:30) - the day's news
| 2026-07-28 19:30:00: Quiz Show (01:00) - trivia competition
+----[ EPG some other table [Program 101] [Table 2] ]
| 2026-07-28 20:00:00: Should not appear (00:30) - filtered by table id
+----[ some unrelated section ]
blah blah
+----[ end of stream info ]
";

    #[test]
    fn parses_sample_dump() {
        let tz = jiff::tz::TimeZone::get("Asia/Tokyo").unwrap();
        let scan_time: jiff::Timestamp = "2026-07-28T18:55:00Z".parse().unwrap();
        let info = parse_stream_info(SAMPLE.lines(), &tz, scan_time).unwrap();
        assert_eq!(info.programs.len(), 1);
        let program = &info.programs[0];
        assert_eq!(program.number, 101);
        assert_eq!(program.events.len(), 2);
        assert_eq!(program.events[0].name, "Evening News");
        assert_eq!(program.events[0].duration_secs, 1800);
        assert_eq!(program.events[1].name, "Quiz Show");
        assert_eq!(program.events[1].duration_secs, 3600);
    }

    #[test]
    fn missing_terminator_is_an_error() {
        let tz = jiff::tz::TimeZone::get("Asia/Tokyo").unwrap();
        let truncated = SAMPLE.lines().take(2).collect::<Vec<_>>().join("\n");
        let scan_time: jiff::Timestamp = "2026-07-28T18:55:00Z".parse().unwrap();
        parse_stream_info(truncated.lines(), &tz, scan_time).unwrap_err();
    }

    #[test]
    fn section_header_accepts_optional_caret_prefix() {
        assert_eq!(section_header("+----[ foo ]"), Some("foo"));
        assert_eq!(section_header("> +----[ foo ]"), Some("foo"));
        assert_eq!(section_header("not a header"), None);
    }
}

// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2016 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! A minimal server-rendered timetable and rule-edit form. Not a design
//! goal in its own right (the spec's non-goals exclude a rich UI) but
//! there has to be *some* way for a human to look at what's scheduled and
//! add a recording rule without hand-editing JSON.

use data::{Data, RuleConfig};

use base::{err, Error, ErrorKind};

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Renders every known event across all streams, oldest first, with an
/// inline form to create a one-shot recording rule for it.
pub fn render_timetable(data: &Data) -> String {
    let mut out = String::from(
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>timetable</title></head><body>",
    );
    out.push_str("<h1>rules</h1><ul>");
    for (id, rule) in &data.rule_config_map {
        out.push_str(&format!(
            "<li>{} — program {} at {}{}</li>",
            escape(id),
            rule.program_number,
            rule.start,
            if rule.weekly { " (weekly)" } else { "" }
        ));
    }
    out.push_str("</ul><h1>events</h1><table border=\"1\"><tr><th>stream</th><th>program</th><th>start</th><th>name</th><th></th></tr>");
    for (stream_id, info) in &data.stream_info_map {
        for program in &info.programs {
            for event in &program.events {
                out.push_str(&format!(
                    "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>\
                     <form method=\"post\" action=\"?mode=html\">\
                     <input type=\"hidden\" name=\"program_number\" value=\"{}\">\
                     <input type=\"hidden\" name=\"start\" value=\"{}\">\
                     <button type=\"submit\">record</button></form></td></tr>",
                    escape(stream_id),
                    program.number,
                    event.start,
                    escape(&event.name),
                    program.number,
                    event.start,
                ));
            }
        }
    }
    out.push_str("</table></body></html>");
    out
}

/// Parses the `application/x-www-form-urlencoded` body posted by
/// [`render_timetable`]'s inline record form into a one-shot `RuleConfig`
/// delta.
pub fn parse_rule_form(body: &[u8]) -> Result<Data, Error> {
    let body = std::str::from_utf8(body)
        .map_err(|e| err!(InvalidArgument, msg("form body is not UTF-8"), source(e)))?;
    let mut program_number = None;
    let mut start = None;
    for kv in body.split('&') {
        let Some((k, v)) = kv.split_once('=') else { continue };
        let v = percent_decode(v);
        match k {
            "program_number" => program_number = v.parse::<u32>().ok(),
            "start" => start = v.parse::<jiff::Timestamp>().ok(),
            _ => {}
        }
    }
    let program_number = program_number.ok_or_else(|| err!(InvalidArgument, msg("missing program_number")))?;
    let start = start.ok_or_else(|| err!(InvalidArgument, msg("missing or unparseable start")))?;

    let mut delta = Data::default();
    let rule_id = format!("{:05}@{}", program_number, start);
    delta.rule_config_map.insert(
        rule_id,
        RuleConfig {
            program_number,
            start,
            duration_secs: None,
            name: None,
            weekly: false,
            deleted: false,
        },
    );
    Ok(delta)
}

fn percent_decode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut bytes = s.bytes();
    while let Some(b) = bytes.next() {
        match b {
            b'+' => out.push(' '),
            b'%' => {
                let hi = bytes.next();
                let lo = bytes.next();
                if let (Some(hi), Some(lo)) = (hi, lo) {
                    if let Ok(byte) = u8::from_str_radix(&format!("{}{}", hi as char, lo as char), 16) {
                        out.push(byte as char);
                        continue;
                    }
                }
            }
            _ => out.push(b as char),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_rules_and_events() {
        let mut data = Data::default();
        data.rule_config_map.insert(
            "r1".into(),
            RuleConfig {
                program_number: 101,
                start: "2026-07-28T10:00:00Z".parse().unwrap(),
                duration_secs: None,
                name: None,
                weekly: false,
                deleted: false,
            },
        );
        let html = render_timetable(&data);
        assert!(html.contains("program 101"));
    }

    #[test]
    fn parses_posted_form() {
        let body = b"program_number=101&start=2026-07-28T10%3A00%3A00Z";
        let delta = parse_rule_form(body).unwrap();
        assert_eq!(delta.rule_config_map.len(), 1);
        let rule = delta.rule_config_map.values().next().unwrap();
        assert_eq!(rule.program_number, 101);
    }

    #[test]
    fn missing_field_is_an_error() {
        assert!(parse_rule_form(b"program_number=101").is_err());
    }
}

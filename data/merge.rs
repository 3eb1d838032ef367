// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2016 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

use crate::model::Data;

/// Applies `delta` onto `base` in place.
///
/// There is no field-level merge: the smallest unit of update is a whole map
/// entry. A rule delta with `deleted: true` removes the entry instead of
/// storing the tombstone. Stream state and stream info entries are always
/// overwritten unconditionally.
pub fn merge_data(base: &mut Data, delta: Data) {
    for (id, rule) in delta.rule_config_map {
        if rule.deleted {
            base.rule_config_map.remove(&id);
        } else {
            base.rule_config_map.insert(id, rule);
        }
    }
    for (id, state) in delta.stream_state_map {
        base.stream_state_map.insert(id, state);
    }
    for (id, info) in delta.stream_info_map {
        base.stream_info_map.insert(id, info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RuleConfig, StreamInfo, StreamState};

    fn rule(program_number: u32) -> RuleConfig {
        RuleConfig {
            program_number,
            start: "2026-07-28T10:00:00Z".parse().unwrap(),
            duration_secs: None,
            name: None,
            weekly: false,
            deleted: false,
        }
    }

    #[test]
    fn insert_and_overwrite_rule() {
        let mut base = Data::default();
        let mut delta = Data::default();
        delta.rule_config_map.insert("r1".into(), rule(101));
        merge_data(&mut base, delta);
        assert_eq!(base.rule_config_map["r1"].program_number, 101);

        let mut delta = Data::default();
        delta.rule_config_map.insert("r1".into(), rule(102));
        merge_data(&mut base, delta);
        assert_eq!(base.rule_config_map["r1"].program_number, 102);
    }

    #[test]
    fn tombstone_deletes_and_is_idempotent() {
        let mut base = Data::default();
        base.rule_config_map.insert("r1".into(), rule(101));

        let mut tombstone = rule(101);
        tombstone.deleted = true;
        let mut delta = Data::default();
        delta.rule_config_map.insert("r1".into(), tombstone.clone());
        merge_data(&mut base, delta);
        assert!(!base.rule_config_map.contains_key("r1"));

        let mut delta = Data::default();
        delta.rule_config_map.insert("r1".into(), tombstone);
        merge_data(&mut base, delta);
        assert!(!base.rule_config_map.contains_key("r1"));
    }

    #[test]
    fn stream_state_and_info_overwrite_unconditionally() {
        let mut base = Data::default();
        let t1: jiff::Timestamp = "2026-07-28T00:00:00Z".parse().unwrap();
        let t2: jiff::Timestamp = "2026-07-28T03:00:00Z".parse().unwrap();
        base.stream_state_map
            .insert("s1".into(), StreamState { last_scan_time: t1 });
        base.stream_info_map.insert(
            "s1".into(),
            StreamInfo {
                scan_time: t1,
                programs: vec![],
            },
        );

        let mut delta = Data::default();
        delta
            .stream_state_map
            .insert("s1".into(), StreamState { last_scan_time: t2 });
        merge_data(&mut base, delta);
        assert_eq!(base.stream_state_map["s1"].last_scan_time, t2);
        // info untouched by a delta that didn't mention it.
        assert_eq!(base.stream_info_map["s1"].scan_time, t1);
    }
}

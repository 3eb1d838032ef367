// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2020 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

pub mod merge;
pub mod model;
pub mod scan;

// Used by #[cfg(test)] in this crate and by the dependent binary crate's
// tests; #[cfg(test)] isn't propagated across crates, so this is plain `pub`.
pub mod testutil;

pub use crate::merge::merge_data;
pub use crate::model::{
    current_matched_event, next_matched_event, rule_matching_event, Catalog, Data, Event,
    EventInfo, Program, ProgramInfo, RuleConfig, RuleId, Stream, StreamConfig, StreamId,
    StreamInfo, StreamState, System,
};

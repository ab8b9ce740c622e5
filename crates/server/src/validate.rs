// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Target input validation (C9): IP/domain acceptance and length cap.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

const MAX_LEN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidatedTarget {
    Invalid,
    Ip,
    Domain,
}

fn domain_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(
            r"(?x)
            ^
            ([A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?\.)+
            [A-Za-z]{2,}
            $
            ",
        )
        .unwrap()
    })
}

/// Validates a browser-supplied target per spec.md §4.9.
pub fn validate_input(raw: &str) -> ValidatedTarget {
    let s = raw.trim();
    if s.is_empty() || s.len() > MAX_LEN {
        return ValidatedTarget::Invalid;
    }

    let host = match s.matches(':').count() {
        0 => s,
        1 => {
            let Some((host, port)) = s.split_once(':') else {
                return ValidatedTarget::Invalid;
            };
            if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
                return ValidatedTarget::Invalid;
            }
            host
        }
        // More than one colon: only valid as a bare IPv6 literal, handled below.
        _ => s,
    };

    if Ipv4Addr::from_str(host).is_ok() || Ipv6Addr::from_str(host).is_ok() {
        return ValidatedTarget::Ip;
    }
    if domain_regex().is_match(host) {
        return ValidatedTarget::Domain;
    }
    ValidatedTarget::Invalid
}

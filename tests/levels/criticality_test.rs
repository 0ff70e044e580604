//! Tests for `src/clevels.rs`: line classification and canonical precedence.

use unilog::clevels::{criticality, json_criticality, AusterityLevel, DEFAULT_CRITICALITY};
use unilog::json::LogLine;

const API_PREFIX: &str = "[2016-11-10 19:18:05.844100] [98381|f1.northwest-1.example.com/EzBDuA4iNq-2631925524 85137cc252d87354>e9b8c49860f01f15]";
const API_BODY: &str = r#"api_method=AccountRetrieveMethod http_method=GET path="/v1/accounts/acct_xxxx" status=200"#;
const PLAIN: &str = r#"[2016-11-10 19:01:02.461489] [21515|adminbox.example.com/kUku-wvrZK-28 0000000000000000>93e612b5bd9b69eb] HTTP response headers: Content-Type="text/html;charset=utf-8" Content-Length="10879" Set"#;

#[test]
fn canonical_lines_are_critical_plus() {
    let cases = [
        format!("{API_PREFIX} CANONICAL-API-LINE: {API_BODY}"),
        format!("{API_PREFIX} CANONICAL-OTHER-CRITICAL-LINE: {API_BODY}"),
        format!("{API_PREFIX} CANONICAL-ADMIN-LINE: path=\"/fonts/x.woff\" status=200"),
        format!("{API_PREFIX} canonical-monster-line: status=200"),
    ];
    for line in &cases {
        assert_eq!(criticality(line), AusterityLevel::CriticalPlus, "{line}");
    }
}

#[test]
fn canonical_beats_explicit_lower_tag() {
    let line = format!("{API_PREFIX} CANONICAL-API-LINE: {API_BODY} clevel=sheddable");
    assert_eq!(criticality(&line), AusterityLevel::CriticalPlus);

    let line = format!("{API_PREFIX} CANONICAL-API-LINE: {API_BODY} [clevel: sheddable]");
    assert_eq!(criticality(&line), AusterityLevel::CriticalPlus);
}

#[test]
fn untagged_line_gets_default() {
    assert_eq!(criticality(PLAIN), DEFAULT_CRITICALITY);
    assert_eq!(DEFAULT_CRITICALITY, AusterityLevel::SheddablePlus);
}

#[test]
fn bracketed_tag_any_case() {
    assert_eq!(
        criticality(&format!("{PLAIN} [clevel: Critical]")),
        AusterityLevel::Critical
    );
    assert_eq!(
        criticality(&format!("{PLAIN} [clevel: critical]")),
        AusterityLevel::Critical
    );
}

#[test]
fn inline_tag() {
    let line = "Showed info for merchant: merchant=acct_xxxx tier=tier0 clevel=criticalplus";
    assert_eq!(criticality(line), AusterityLevel::CriticalPlus);
}

#[test]
fn unparseable_tag_falls_back_to_default() {
    assert_eq!(
        criticality(&format!("{PLAIN} [clevel: urgent]")),
        DEFAULT_CRITICALITY
    );
    assert_eq!(criticality("x clevel=nope"), DEFAULT_CRITICALITY);
}

#[test]
fn inline_tag_needs_leading_whitespace() {
    assert_eq!(criticality("xclevel=critical"), DEFAULT_CRITICALITY);
}

#[test]
fn structured_records_use_fields() {
    let canonical = LogLine::parse(r#"{"canonical":true,"clevel":"sheddable"}"#).expect("json");
    assert_eq!(json_criticality(&canonical), AusterityLevel::CriticalPlus);

    let named = LogLine::parse(r#"{"canonical":"api","msg":"x"}"#).expect("json");
    assert_eq!(json_criticality(&named), AusterityLevel::CriticalPlus);

    let tagged = LogLine::parse(r#"{"clevel":"Critical"}"#).expect("json");
    assert_eq!(json_criticality(&tagged), AusterityLevel::Critical);

    let not_canonical = LogLine::parse(r#"{"canonical":false,"clevel":"sheddable"}"#).expect("json");
    assert_eq!(json_criticality(&not_canonical), AusterityLevel::Sheddable);

    let plain = LogLine::parse(r#"{"msg":"CANONICAL-API-LINE"}"#).expect("json");
    assert_eq!(json_criticality(&plain), DEFAULT_CRITICALITY);
}

#[test]
fn tags_are_read_from_lines_that_are_not_utf8() {
    assert_eq!(
        criticality(b"caf\xe9 [clevel: critical]"),
        AusterityLevel::Critical
    );
    assert_eq!(
        criticality(b"\xff\xfe CANONICAL-API-LINE"),
        AusterityLevel::CriticalPlus
    );
    assert_eq!(criticality(b"\xff clevel=\xe9"), DEFAULT_CRITICALITY);
}

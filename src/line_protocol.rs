//! InfluxDB line-protocol rendering of a [`Snapshot`].
//!
//! `measurement,index=0,name=...,bus_id=...,uuid=... field=value,... errors="..." <ns>`

use crate::field::{Field, Value};
use crate::snapshot::Snapshot;
use std::fmt::Write as _;
use std::io::{self, Write};

/// Escapes a measurement name: commas, spaces and backslashes.
pub fn escape_measurement(s: &str) -> String {
    escape(s, &[',', ' ', '\\'])
}

/// Escapes a tag key/value or field key: commas, equals signs, spaces and
/// backslashes. A trailing backslash would otherwise escape the separator.
pub fn escape_tag(s: &str) -> String {
    escape(s, &[',', '=', ' ', '\\'])
}

/// Escapes the inside of a double-quoted string field value.
pub fn escape_string(s: &str) -> String {
    escape(s, &['"', '\\'])
}

fn escape(s: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn push_value(out: &mut String, value: &Value) {
    // Writing to a String cannot fail.
    let _ = match value {
        Value::Bool(b) => write!(out, "{b}"),
        Value::U32(v) => write!(out, "{v}"),
        Value::U64(v) => write!(out, "{v}u"),
        Value::F64(v) => write!(out, "{v}"),
        Value::Str(s) => write!(out, "\"{}\"", escape_string(s)),
    };
}

/// The `errors` field text: `name (CODE)` entries joined by commas.
pub fn error_summary(snapshot: &Snapshot) -> Option<String> {
    let failures = snapshot.failures();
    if failures.is_empty() {
        return None;
    }
    Some(
        failures
            .iter()
            .map(|(name, code)| format!("{name} ({code})"))
            .collect::<Vec<_>>()
            .join(","),
    )
}

/// Renders one record, newline-terminated.
///
/// A tag whose query failed is listed in `errors`. A tag that succeeded
/// with an empty value is left out silently, since the protocol has no
/// empty tag values and the device reported no error.
pub fn render(measurement: &str, snapshot: &Snapshot) -> String {
    let mut out = escape_measurement(measurement);
    let _ = write!(out, ",index={}", snapshot.device_index);
    for (key, tag) in [
        ("name", &snapshot.tags.name),
        ("bus_id", &snapshot.tags.bus_id),
        ("uuid", &snapshot.tags.uuid),
    ] {
        if let Some(value) = tag.value().filter(|v| !v.is_empty()) {
            let _ = write!(out, ",{key}={}", escape_tag(value));
        }
    }

    let mut sep = ' ';
    for (name, field) in &snapshot.metrics {
        if let Field::Value(value) = field {
            out.push(sep);
            out.push_str(&escape_tag(name));
            out.push('=');
            push_value(&mut out, value);
            sep = ',';
        }
    }
    if let Some(errors) = error_summary(snapshot) {
        out.push(sep);
        let _ = write!(out, "errors=\"{}\"", escape_string(&errors));
    }

    let _ = writeln!(out, " {}", snapshot.timestamp_ns);
    out
}

/// Renders and writes one record. Does not flush.
pub fn write_record<W: Write + ?Sized>(
    writer: &mut W,
    measurement: &str,
    snapshot: &Snapshot,
) -> io::Result<()> {
    writer.write_all(render(measurement, snapshot).as_bytes())
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Result keys for tag sources.
//!
//! A key is `<KIND>:<id>` where every occurrence of two slashes followed by
//! any one character is replaced by a single slash. The replacement swallows
//! the character after the slashes (`a//bc` becomes `a/c`); keys emitted by
//! deployed gateways depend on this exact behavior. Line terminators do not
//! count as "any character", so `a//\nb` is left alone.

use crate::model::SourceRef;

/// Key under which a source's latest value appears in the combined payload.
///
/// The scope does not take part in the key.
pub fn sanitize(source: &SourceRef) -> String {
    format!("{}:{}", source.kind, collapse_slashes(&source.id))
}

fn collapse_slashes(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    let mut rest = id;
    while let Some(pos) = rest.find("//") {
        let mut after = rest[pos + 2..].chars();
        match after.next() {
            None => break,
            Some(c) if is_line_terminator(c) => {
                // no match here; the second slash may still start one
                out.push_str(&rest[..=pos]);
                rest = &rest[pos + 1..];
            }
            Some(_) => {
                out.push_str(&rest[..pos]);
                out.push('/');
                rest = after.as_str();
            }
        }
    }
    out.push_str(rest);
    out
}

const fn is_line_terminator(c: char) -> bool {
    matches!(c, '\n' | '\r' | '\u{85}' | '\u{2028}' | '\u{2029}')
}

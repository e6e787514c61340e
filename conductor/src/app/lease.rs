// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! DHCP lease text reported by agents
//!
//! A lease is a sequence of blocks of the form
//!
//! ```text
//! lease {
//!   interface "api";
//!   fixed-address 10.0.0.100;
//!   option subnet-mask 255.255.255.0;
//! }
//! ```
//!
//! where every statement is a non-empty run of characters other than `;`,
//! `{` and `}`, terminated by `;`.  Blank text means "no lease".

use foundry_common::api::external::Error;

const LEASE_KEYWORD: &str = "lease";

/// A lease block broken into its statements, each without the trailing `;`
type LeaseBlock = Vec<String>;

fn parse(text: &str) -> Result<Vec<LeaseBlock>, String> {
    let mut blocks = Vec::new();
    let mut rest = text.trim_start();
    while !rest.is_empty() {
        rest = rest.strip_prefix(LEASE_KEYWORD).ok_or_else(|| {
            format!("expected {:?} at {:?}", LEASE_KEYWORD, truncated(rest))
        })?;
        // "lease" must be a whole word
        if rest.starts_with(|c: char| !c.is_whitespace() && c != '{') {
            return Err(format!(
                "expected {:?} at {:?}",
                LEASE_KEYWORD,
                truncated(rest)
            ));
        }
        rest = rest
            .trim_start()
            .strip_prefix('{')
            .ok_or_else(|| format!("expected '{{' at {:?}", truncated(rest)))?;

        let mut statements = Vec::new();
        loop {
            rest = rest.trim_start();
            if let Some(after) = rest.strip_prefix('}') {
                rest = after.trim_start();
                break;
            }
            let end = rest
                .find(|c| c == ';' || c == '{' || c == '}')
                .ok_or_else(|| String::from("unterminated lease block"))?;
            if !rest[end..].starts_with(';') {
                return Err(format!(
                    "statement {:?} is not terminated by ';'",
                    truncated(&rest[..end])
                ));
            }
            let statement = rest[..end].split_whitespace().collect::<Vec<_>>();
            if statement.is_empty() {
                return Err(String::from("empty statement in lease block"));
            }
            statements.push(statement.join(" "));
            rest = &rest[end + 1..];
        }
        blocks.push(statements);
    }
    Ok(blocks)
}

fn truncated(s: &str) -> String {
    s.chars().take(20).collect()
}

/// Checks that `text` is a well-formed lease
///
/// `label` names the field being checked and is used in the error.
pub fn verify_lease(label: &str, text: &str) -> Result<(), Error> {
    parse(text).map(|_| ()).map_err(|message| Error::InvalidValue {
        label: label.to_string(),
        message,
    })
}

/// Returns `text` in the canonical layout used for storage
///
/// Text that does not parse is returned trimmed but otherwise untouched;
/// callers are expected to have verified it first.
pub fn format_lease(text: &str) -> String {
    match parse(text) {
        Ok(blocks) => blocks
            .iter()
            .map(|statements| {
                let mut block = String::from("lease {\n");
                for statement in statements {
                    block.push_str("  ");
                    block.push_str(statement);
                    block.push_str(";\n");
                }
                block.push_str("}\n");
                block
            })
            .collect(),
        Err(_) => text.trim().to_string(),
    }
}

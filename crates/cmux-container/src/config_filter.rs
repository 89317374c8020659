//! Git config filter: strip host-keychain credential helpers
//! and host-specific TLS backend settings from the user's git config
//! before mounting it into a container read-only.

const CREDENTIAL_HELPER_DENYLIST: &[&str] = &[
    "osxkeychain",
    "manager",
    "manager-core",
    "wincred",
    "libsecret",
    "gnome-keyring",
];

const DENYLISTED_SECTIONS_KEYS: &[(&str, &str)] = &[("http", "sslbackend"), ("http", "schannel")];

/// Rewrites `source` (the contents of a user's `~/.gitconfig`), returning
/// the filtered contents to write to a temp path for mounting.
pub fn filter_git_config(source: &str) -> String {
    let mut out_lines: Vec<String> = Vec::new();
    let mut current_section = String::new();
    let mut saw_credential_section = false;
    let mut credential_section_nonempty = false;

    for raw_line in source.lines() {
        let trimmed = raw_line.trim();

        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            current_section = trimmed
                .trim_start_matches('[')
                .trim_end_matches(']')
                .split_whitespace()
                .next()
                .unwrap_or("")
                .to_string();
            if current_section == "credential" {
                saw_credential_section = true;
            }
            out_lines.push(raw_line.to_string());
            continue;
        }

        if current_section == "credential" {
            if let Some((key, value)) = split_key_value(trimmed) {
                if key == "helper"
                    && CREDENTIAL_HELPER_DENYLIST
                        .iter()
                        .any(|denied| value.contains(denied))
                {
                    continue;
                }
            }
            credential_section_nonempty = true;
        }

        if DENYLISTED_SECTIONS_KEYS.iter().any(|(section, key)| {
            *section == current_section
                && split_key_value(trimmed)
                    .map(|(k, _)| k == *key)
                    .unwrap_or(false)
        }) {
            continue;
        }

        out_lines.push(raw_line.to_string());
    }

    // Drop the `[credential]` header itself if every line under it got
    // filtered out, so we can append a clean `helper = store` fallback.
    if saw_credential_section && !credential_section_nonempty {
        out_lines = drop_empty_credential_section(out_lines);
    }

    let mut result = out_lines.join("\n");
    if !result.is_empty() && !result.ends_with('\n') {
        result.push('\n');
    }

    if !saw_credential_section || !credential_section_nonempty {
        result.push_str("[credential]\n\thelper = store\n");
    }

    result
}

fn split_key_value(line: &str) -> Option<(&str, &str)> {
    let line = line.trim_start_matches('\t').trim();
    let (key, value) = line.split_once('=')?;
    Some((key.trim(), value.trim()))
}

fn drop_empty_credential_section(lines: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len());
    let mut skipping = false;
    for line in lines {
        let trimmed = line.trim();
        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            skipping = trimmed.trim_start_matches('[').trim_end_matches(']') == "credential";
            if skipping {
                continue;
            }
        } else if skipping {
            continue;
        }
        out.push(line);
    }
    out
}

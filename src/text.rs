// 🧹 Text Normalization - Small pure helpers the page parser leans on

use chrono::NaiveDate;
use regex::Regex;
use std::sync::LazyLock;

static ACT_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bAct\s+(\d+)").expect("static regex"));
static GOV_MSG_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Gov\.?\s*Msg\.?\s*No\.?\s*(\d+)").expect("static regex")
});
static CONF_COM_REP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Conf\.?\s*Com\.?\s*Rep\.?\s*No\.?\s*(\d+)").expect("static regex")
});
static SLASH_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2})/(\d{1,2})/(\d{4})").expect("static regex"));
static PARTY_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(([^)]+)\)\s*$").expect("static regex"));
static DISTRICT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(House|Senate)\s+District\s+(\d+)").expect("static regex")
});
static VERSION_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_((?:SD|HD|CD)\d+)_?$").expect("static regex"));
static PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(?(\d{3})\)?[-.\s]?(\d{3})[-.\s]?(\d{4})").expect("static regex"));
static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("static regex")
});
static REFERRAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\breferred to\s+([^.;]+)").expect("static regex"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("static regex"));

/// Collapse whitespace and normalize typographic characters.
/// Returns None for empty results so optional fields stay absent.
pub fn clean_text(text: &str) -> Option<String> {
    let replaced = text
        .replace('\u{a0}', " ")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace(['\u{201c}', '\u{201d}'], "\"");
    let collapsed = WHITESPACE.replace_all(&replaced, " ");
    let trimmed = collapsed.trim();

    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Dates as the source prints them: "1/17/2025", "2025-01-17", "January 17, 2025"
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let cleaned = clean_text(text)?;

    for fmt in ["%m/%d/%Y", "%Y-%m-%d", "%B %d, %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(&cleaned, fmt) {
            return Some(date);
        }
    }

    // Date embedded in a longer string
    let caps = SLASH_DATE.captures(&cleaned)?;
    let month = caps[1].parse().ok()?;
    let day = caps[2].parse().ok()?;
    let year = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

pub fn extract_act_number(text: &str) -> Option<u32> {
    ACT_NUMBER.captures(text)?[1].parse().ok()
}

pub fn extract_governor_message_number(text: &str) -> Option<u32> {
    GOV_MSG_NUMBER.captures(text)?[1].parse().ok()
}

pub fn extract_conference_committee_report(text: &str) -> Option<String> {
    CONF_COM_REP.captures(text).map(|caps| caps[1].to_string())
}

/// "Referred to JDC, WAM." → "JDC, WAM"
pub fn extract_referral(action: &str) -> Option<String> {
    REFERRAL
        .captures(action)
        .and_then(|caps| clean_text(&caps[1]))
}

/// "Elle Cochran (D)" → (Some("D"), "Elle Cochran")
pub fn split_party_from_name(text: &str) -> (Option<String>, String) {
    match PARTY_SUFFIX.captures(text) {
        Some(caps) => {
            let party = caps[1].trim().to_string();
            let name = text[..caps.get(0).map_or(text.len(), |m| m.start())]
                .trim()
                .to_string();
            (Some(party), name)
        }
        None => (None, text.trim().to_string()),
    }
}

/// "Senate District 7" → ("Senate District", 7)
pub fn parse_district(text: &str) -> Option<(String, u32)> {
    let caps = DISTRICT.captures(text)?;
    let chamber = capitalize(&caps[1]);
    let number = caps[2].parse().ok()?;
    Some((format!("{} District", chamber), number))
}

/// "SB1300_CD1" → "CD1"
pub fn extract_version_code(version_name: &str) -> Option<String> {
    VERSION_CODE
        .captures(version_name)
        .map(|caps| caps[1].to_string())
}

/// Normalize to XXX-XXX-XXXX when a ten digit number is present
pub fn normalize_phone(text: &str) -> Option<String> {
    let cleaned = clean_text(text)?;
    match PHONE.captures(&cleaned) {
        Some(caps) => Some(format!("{}-{}-{}", &caps[1], &caps[2], &caps[3])),
        None => Some(cleaned),
    }
}

pub fn extract_email(text: &str) -> Option<String> {
    EMAIL.find(text).map(|m| m.as_str().to_lowercase())
}

/// Chair / Vice Chair / Member
pub fn committee_position(text: &str) -> &'static str {
    let lower = text.to_lowercase();
    if lower.contains("vice") && lower.contains("chair") {
        "Vice Chair"
    } else if lower.contains("chair") {
        "Chair"
    } else {
        "Member"
    }
}

pub fn committee_type(committee_name: &str) -> &'static str {
    let lower = committee_name.to_lowercase();
    if lower.contains("joint") {
        "Joint"
    } else if lower.contains("select") {
        "Select"
    } else if lower.contains("conference") {
        "Conference"
    } else if lower.contains("investigat") {
        "Investigative"
    } else if lower.contains("special") {
        "Special"
    } else {
        "Standing"
    }
}

fn capitalize(word: &str) -> String {
    let lower = word.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ============================================================================
// TESTS
// ============================================================================

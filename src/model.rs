// 🏛️ Record Model - Identity keys and parsed records
//
// Identity (never changes):  Bill = (type, number, year), Member = source member id
// Values (change per scrape): everything else, owned by the repository once written

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// BILL TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BillType {
    /// Senate Bill
    SB,
    /// House Bill
    HB,
    /// Senate Resolution
    SR,
    /// House Resolution
    HR,
    /// Senate Concurrent Resolution
    SCR,
    /// House Concurrent Resolution
    HCR,
    /// Governor's Message
    GM,
}

impl BillType {
    /// Every type the source publishes, in enumeration order
    pub const ALL: [BillType; 7] = [
        BillType::SB,
        BillType::HB,
        BillType::SR,
        BillType::HR,
        BillType::SCR,
        BillType::HCR,
        BillType::GM,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BillType::SB => "SB",
            BillType::HB => "HB",
            BillType::SR => "SR",
            BillType::HR => "HR",
            BillType::SCR => "SCR",
            BillType::HCR => "HCR",
            BillType::GM => "GM",
        }
    }
}

impl fmt::Display for BillType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        BillType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == upper)
            .ok_or_else(|| format!("unknown bill type: {}", s))
    }
}

// ============================================================================
// IDENTITY KEYS
// ============================================================================

/// (bill type, bill number, year) - globally unique, never reassigned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BillKey {
    pub bill_type: BillType,
    pub number: u32,
    pub year: i32,
}

impl BillKey {
    pub fn new(bill_type: BillType, number: u32, year: i32) -> Self {
        BillKey {
            bill_type,
            number,
            year,
        }
    }
}

impl fmt::Display for BillKey {
    /// "SB1300-2025"
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}-{}", self.bill_type, self.number, self.year)
    }
}

/// One scrape target: a bill, or a member in a given year
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Target {
    Bill(BillKey),
    Member { member_id: i64, year: i32 },
}

impl Target {
    pub fn year(&self) -> i32 {
        match self {
            Target::Bill(key) => key.year,
            Target::Member { year, .. } => *year,
        }
    }

    /// Identity key string used for logging, events and write serialization
    pub fn identity(&self) -> String {
        match self {
            Target::Bill(key) => key.to_string(),
            Target::Member { member_id, year } => format!("member:{}-{}", member_id, year),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identity())
    }
}

// ============================================================================
// BILL RECORD
// ============================================================================

/// Everything one bill page yields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillRecord {
    pub key: BillKey,

    /// Current version label, e.g. "SB1300 SD2 HD1 CD1" (the identity anchor)
    pub current_version: String,

    pub title: Option<String>,
    pub description: Option<String>,

    /// Free text, may name several legislators
    pub introducer: Option<String>,
    pub companion: Option<String>,
    pub package: Option<String>,
    pub current_referral: Option<String>,

    /// Set once enacted
    pub act_number: Option<u32>,
    pub governor_message_number: Option<u32>,

    /// The page we fetched it from
    pub current_bill_url: String,
    pub current_pdf_url: Option<String>,
    pub rss_feed_url: Option<String>,

    /// Chronological, in page order
    pub status_updates: Vec<StatusUpdate>,
    pub versions: Vec<BillVersion>,
    pub committee_reports: Vec<CommitteeReport>,
}

/// One event in a bill's life
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub date: NaiveDate,

    /// "S" or "H"
    pub chamber: String,

    pub action: String,

    pub committee: Option<String>,
    pub conference_committee_report_number: Option<String>,
    pub meeting_info: Option<String>,
}

impl StatusUpdate {
    pub fn new(date: NaiveDate, chamber: &str, action: &str) -> Self {
        StatusUpdate {
            date,
            chamber: chamber.to_string(),
            action: action.to_string(),
            committee: None,
            conference_committee_report_number: None,
            meeting_info: None,
        }
    }

    /// Dedup key over (date, chamber, action text).
    /// Re-scraping the same event must land on the same key.
    pub fn dedup_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}\u{1f}{}\u{1f}{}",
            self.date.format("%Y-%m-%d"),
            self.chamber,
            self.action
        ));
        format!("{:x}", hasher.finalize())
    }
}

/// A textual revision of a bill (draft, amended, final)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillVersion {
    /// Natural key within the bill, e.g. "SB1300_CD1"
    pub version_name: String,
    /// "SD1", "HD2", "CD1"
    pub version_code: Option<String>,
    pub html_url: Option<String>,
    pub pdf_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitteeReport {
    /// Natural key within the bill, e.g. "SB1300_SD1_SSCR96_"
    pub report_name: String,
    pub html_url: Option<String>,
    pub pdf_url: Option<String>,
}

// ============================================================================
// MEMBER RECORD
// ============================================================================

/// Everything one member page yields for one year
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberRecord {
    /// Source member id (stable external key)
    pub member_id: i64,
    pub name: String,
    pub bio: Option<String>,
    pub term: MemberTerm,
    pub committees: Vec<CommitteeAssignment>,
    pub measures: Vec<MeasureRef>,
}

/// One legislator's state for one year
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemberTerm {
    pub year: i32,

    /// "Senator", "Representative"
    pub title: Option<String>,
    /// "D", "R", "I"
    pub party: Option<String>,

    // District
    pub district_type: Option<String>,
    pub district_number: Option<u32>,
    pub district_description: Option<String>,
    pub district_map_url: Option<String>,

    // Contact
    pub email: Option<String>,
    pub phone: Option<String>,
    pub office: Option<String>,
    pub fax: Option<String>,

    // Media, feeds, reports
    pub photo_url: Option<String>,
    pub rss_feed_url: Option<String>,
    pub allowance_report_url: Option<String>,

    // Background
    pub current_experience: Option<String>,
    pub previous_experience: Option<String>,

    // Page tabs
    pub about_content: Option<String>,
    pub experience_content: Option<String>,
    pub news_content: Option<String>,
    pub links: Vec<Link>,
}

impl MemberTerm {
    pub fn new(year: i32) -> Self {
        MemberTerm {
            year,
            ..MemberTerm::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub label: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitteeAssignment {
    pub committee_name: String,
    /// "Chair", "Vice Chair", "Member"
    pub position: String,
    /// "Standing", "Joint", "Select", ...
    pub committee_type: String,
}

/// A measure the member introduced, as linked from their page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasureRef {
    pub bill_type: BillType,
    pub bill_number: u32,
    pub year: i32,
    pub title: Option<String>,
    pub url: Option<String>,
}

impl MeasureRef {
    pub fn key(&self) -> BillKey {
        BillKey::new(self.bill_type, self.bill_number, self.year)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bill_type_parse() {
        assert_eq!("sb".parse::<BillType>().unwrap(), BillType::SB);
        assert_eq!(" HCR ".parse::<BillType>().unwrap(), BillType::HCR);
        assert!("XB".parse::<BillType>().is_err());
    }

    #[test]
    fn test_bill_key_display() {
        let key = BillKey::new(BillType::SB, 1300, 2025);
        assert_eq!(key.to_string(), "SB1300-2025");
        assert_eq!(Target::Bill(key).identity(), "SB1300-2025");
        assert_eq!(
            Target::Member {
                member_id: 253,
                year: 2025
            }
            .identity(),
            "member:253-2025"
        );
    }

    #[test]
    fn test_dedup_key_stable_and_discriminating() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 17).unwrap();
        let a = StatusUpdate::new(date, "S", "Introduced.");
        let b = StatusUpdate::new(date, "S", "Introduced.");
        let c = StatusUpdate::new(date, "H", "Introduced.");

        assert_eq!(a.dedup_key(), b.dedup_key());
        assert_ne!(a.dedup_key(), c.dedup_key());
        assert_eq!(a.dedup_key().len(), 64, "SHA-256 hex digest");

        // Optional metadata does not participate in identity
        let mut d = a.clone();
        d.meeting_info = Some("meeting".to_string());
        assert_eq!(a.dedup_key(), d.dedup_key());
    }
}

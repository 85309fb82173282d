// 📤 Snapshot Exporter - Flatten the repository into static JSON documents
//
// Read-only. Same repository state + same timestamp → byte-identical files.
// Ordering comes from the repository queries; maps are BTreeMaps.

use crate::db::{BillRow, MemberRow, RecentStatus, Repository, Snapshot};
use crate::model::{BillType, CommitteeAssignment, MemberTerm};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Status updates in the recent activity feed
pub const RECENT_ACTIVITY_WINDOW: usize = 50;

// ============================================================================
// DOCUMENTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub generated_at: String,
    pub total_bills: i64,
    pub total_members: i64,
    pub total_status_updates: i64,
    /// Newest first
    pub years_available: Vec<i32>,
    pub bill_types: Vec<BillType>,
    pub documents: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub date: NaiveDate,
    pub chamber: String,
    pub action: String,
    pub committee: Option<String>,
}

/// One bill in `bills_{year}.json`: every scalar plus its latest status only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillEntry {
    pub identifier: String,
    pub bill_type: BillType,
    pub bill_number: u32,
    pub year: i32,
    pub title: Option<String>,
    pub description: Option<String>,
    pub current_version: String,
    pub introducer: Option<String>,
    /// Best-effort surname match; absent when ambiguous or unknown
    pub introducer_member_ids: Vec<i64>,
    pub companion: Option<String>,
    pub package: Option<String>,
    pub current_referral: Option<String>,
    pub act_number: Option<u32>,
    pub governor_message_number: Option<u32>,
    pub current_bill_url: String,
    pub current_pdf_url: Option<String>,
    pub rss_feed_url: Option<String>,
    pub status_count: usize,
    pub status_bucket: String,
    pub latest_status: Option<StatusEntry>,
    pub version_count: usize,
    pub committee_report_count: usize,
}

/// Lightweight row of `bills_all.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillIndexEntry {
    pub identifier: String,
    pub bill_type: BillType,
    pub bill_number: u32,
    pub year: i32,
    pub title: Option<String>,
    pub current_version: String,
    pub act_number: Option<u32>,
    pub status_bucket: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasureEntry {
    pub identifier: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberEntry {
    pub member_id: i64,
    pub name: String,
    pub bio: Option<String>,
    /// Null for a member that has never had a term scraped
    pub latest_term: Option<MemberTerm>,
    pub committees: Vec<CommitteeAssignment>,
    pub measures: Vec<MeasureEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub date: NaiveDate,
    pub bill_identifier: String,
    pub bill_title: Option<String>,
    pub current_version: String,
    pub chamber: String,
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassageRate {
    pub passed: usize,
    pub total: usize,
    /// Percentage, two decimals
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analytics {
    pub bills_by_type: BTreeMap<String, usize>,
    pub bills_by_year: BTreeMap<String, usize>,
    pub bills_by_status: BTreeMap<String, usize>,
    pub passage_rate: PassageRate,
}

/// Every document of one export, before serialization
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSet {
    pub summary: Summary,
    pub bills_by_year: BTreeMap<i32, Vec<BillEntry>>,
    pub bills_all: Vec<BillIndexEntry>,
    pub members: Vec<MemberEntry>,
    pub recent_activity: Vec<ActivityEntry>,
    pub analytics: Analytics,
}

impl ExportSet {
    /// (file name, pretty JSON) pairs in a fixed order
    pub fn render(&self) -> Result<Vec<(String, String)>> {
        let mut files = vec![("summary.json".to_string(), to_json(&self.summary)?)];
        for (year, bills) in &self.bills_by_year {
            files.push((format!("bills_{}.json", year), to_json(bills)?));
        }
        files.push(("bills_all.json".to_string(), to_json(&self.bills_all)?));
        files.push(("members.json".to_string(), to_json(&self.members)?));
        files.push(("recent_activity.json".to_string(), to_json(&self.recent_activity)?));
        files.push(("analytics.json".to_string(), to_json(&self.analytics)?));
        Ok(files)
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    let mut json = serde_json::to_string_pretty(value).context("Failed to serialize document")?;
    json.push('\n');
    Ok(json)
}

// ============================================================================
// STATUS BUCKETS
// ============================================================================

/// Coarse lifecycle stage, from the act number and the latest action text
pub fn status_bucket(bill: &BillRow) -> &'static str {
    if bill.act_number.is_some() {
        return "enacted";
    }
    let Some(latest) = bill.latest_status() else {
        return "no_status";
    };
    let action = latest.update.action.to_lowercase();

    if action.contains("veto") {
        "vetoed"
    } else if action.starts_with("act ") {
        "enacted"
    } else if action.contains("transmitted to governor") || action.contains("enrolled to governor") {
        "sent_to_governor"
    } else if action.contains("passed third reading") || action.contains("passed final reading") {
        "passed_chamber"
    } else if action.contains("carried over") || action.contains("deferred") || action.contains("died") {
        "stalled"
    } else if action.contains("referred to")
        || action.contains("report adopted")
        || action.contains("passed second reading")
        || action.contains("hearing")
        || action.contains("decision making")
    {
        "in_committee"
    } else if action.contains("introduced") || action.contains("pass first reading") {
        "introduced"
    } else {
        "other"
    }
}

// ============================================================================
// INTRODUCER JOIN
// ============================================================================

/// Match "KEOHOKALOLE, CHANG (BR)" against member names by surname.
/// A surname shared by more than one member matches nobody.
pub fn introducer_member_ids(introducer: Option<&str>, members: &[(i64, String)]) -> Vec<i64> {
    let Some(introducer) = introducer else { return Vec::new() };
    let names = introducer.split('(').next().unwrap_or_default();

    let mut ids = Vec::new();
    for surname in names.split(',').map(|s| s.trim().to_uppercase()).filter(|s| !s.is_empty()) {
        let suffix = format!(" {}", surname);
        let mut matches = members.iter().filter(|(_, name)| {
            let name = name.to_uppercase();
            name == surname || name.ends_with(&suffix)
        });

        if let (Some((id, _)), None) = (matches.next(), matches.next()) {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }
    }
    ids
}

// ============================================================================
// EXPORTER
// ============================================================================

pub struct Exporter {
    repo: Arc<Repository>,
    out_dir: PathBuf,
}

impl Exporter {
    pub fn new(repo: Arc<Repository>, out_dir: impl Into<PathBuf>) -> Self {
        Exporter {
            repo,
            out_dir: out_dir.into(),
        }
    }

    /// Build every document and write it to the output directory
    pub fn export(&self) -> Result<ExportSet> {
        let set = self.build(Utc::now())?;

        fs::create_dir_all(&self.out_dir)
            .with_context(|| format!("Failed to create {}", self.out_dir.display()))?;
        for (name, json) in set.render()? {
            write_atomically(&self.out_dir, &name, &json)?;
            info!(file = %name, bytes = json.len(), "Exported");
        }

        info!(
            dir = %self.out_dir.display(),
            bills = set.summary.total_bills,
            members = set.summary.total_members,
            "Export complete"
        );
        Ok(set)
    }

    /// Read the repository into documents. Pure apart from the reads, which
    /// all come from one snapshot so the documents agree with each other.
    pub fn build(&self, generated_at: DateTime<Utc>) -> Result<ExportSet> {
        self.repo.snapshot(|repo| build_set(repo, generated_at))
    }
}

fn build_set(repo: &Snapshot<'_>, generated_at: DateTime<Utc>) -> Result<ExportSet> {
    let counts = repo.table_counts()?;
    let members = repo.members()?;
    let name_index: Vec<(i64, String)> = members.iter().map(|m| (m.member_id, m.name.clone())).collect();

    let mut years = repo.bill_years()?;
    years.sort_unstable_by(|a, b| b.cmp(a));

    let mut bills_by_year = BTreeMap::new();
    let mut bills_all = Vec::new();
    let mut bills_by_type: BTreeMap<String, usize> = BTreeMap::new();
    let mut bills_by_year_count: BTreeMap<String, usize> = BTreeMap::new();
    let mut bills_by_status: BTreeMap<String, usize> = BTreeMap::new();
    let mut present_types = Vec::new();
    let mut passed = 0;

    for &year in &years {
        let rows = repo.all_bills_for(year)?;
        let mut entries = Vec::with_capacity(rows.len());

        for row in &rows {
            let bucket = status_bucket(row);
            *bills_by_type.entry(row.key.bill_type.to_string()).or_default() += 1;
            *bills_by_year_count.entry(year.to_string()).or_default() += 1;
            *bills_by_status.entry(bucket.to_string()).or_default() += 1;
            if row.act_number.is_some() {
                passed += 1;
            }
            if !present_types.contains(&row.key.bill_type) {
                present_types.push(row.key.bill_type);
            }

            bills_all.push(BillIndexEntry {
                identifier: row.key.to_string(),
                bill_type: row.key.bill_type,
                bill_number: row.key.number,
                year,
                title: row.title.clone(),
                current_version: row.current_version.clone(),
                act_number: row.act_number,
                status_bucket: bucket.to_string(),
            });
            entries.push(bill_entry(row, bucket, &name_index));
        }
        bills_by_year.insert(year, entries);
    }
    present_types.sort();

    let total = bills_all.len();
    let analytics = Analytics {
        bills_by_type,
        bills_by_year: bills_by_year_count,
        bills_by_status,
        passage_rate: PassageRate {
            passed,
            total,
            percentage: percentage(passed, total),
        },
    };

    let recent_activity = repo
        .recent_status_updates(RECENT_ACTIVITY_WINDOW)?
        .into_iter()
        .map(activity_entry)
        .collect();

    let mut members: Vec<MemberEntry> = members.into_iter().map(member_entry).collect();
    members.sort_by(|a, b| a.name.cmp(&b.name).then(a.member_id.cmp(&b.member_id)));

    let mut documents = vec!["summary.json".to_string()];
    documents.extend(bills_by_year.keys().map(|y| format!("bills_{}.json", y)));
    documents.extend(
        ["bills_all.json", "members.json", "recent_activity.json", "analytics.json"]
            .iter()
            .map(|s| s.to_string()),
    );

    Ok(ExportSet {
        summary: Summary {
            generated_at: generated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            total_bills: counts.bills,
            total_members: counts.members,
            total_status_updates: counts.bill_status_updates,
            years_available: years,
            bill_types: present_types,
            documents,
        },
        bills_by_year,
        bills_all,
        members,
        recent_activity,
        analytics,
    })
}

fn bill_entry(row: &BillRow, bucket: &str, members: &[(i64, String)]) -> BillEntry {
    BillEntry {
        identifier: row.key.to_string(),
        bill_type: row.key.bill_type,
        bill_number: row.key.number,
        year: row.key.year,
        title: row.title.clone(),
        description: row.description.clone(),
        current_version: row.current_version.clone(),
        introducer: row.introducer.clone(),
        introducer_member_ids: introducer_member_ids(row.introducer.as_deref(), members),
        companion: row.companion.clone(),
        package: row.package.clone(),
        current_referral: row.current_referral.clone(),
        act_number: row.act_number,
        governor_message_number: row.governor_message_number,
        current_bill_url: row.current_bill_url.clone(),
        current_pdf_url: row.current_pdf_url.clone(),
        rss_feed_url: row.rss_feed_url.clone(),
        status_count: row.status_history.len(),
        status_bucket: bucket.to_string(),
        latest_status: row.latest_status().map(|s| StatusEntry {
            date: s.update.date,
            chamber: s.update.chamber.clone(),
            action: s.update.action.clone(),
            committee: s.update.committee.clone(),
        }),
        version_count: row.versions.len(),
        committee_report_count: row.committee_reports.len(),
    }
}

fn member_entry(row: MemberRow) -> MemberEntry {
    MemberEntry {
        member_id: row.member_id,
        name: row.name,
        bio: row.bio,
        latest_term: row.latest_term,
        committees: row.committees,
        measures: row
            .measures
            .into_iter()
            .map(|m| MeasureEntry {
                identifier: m.key().to_string(),
                title: m.title,
            })
            .collect(),
    }
}

fn activity_entry(recent: RecentStatus) -> ActivityEntry {
    ActivityEntry {
        date: recent.status.update.date,
        bill_identifier: recent.key.to_string(),
        bill_title: recent.title,
        current_version: recent.current_version,
        chamber: recent.status.update.chamber,
        action: recent.status.update.action,
    }
}

fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 / total as f64 * 10_000.0).round() / 100.0
}

/// Write to a sibling temp file, then rename over the target
fn write_atomically(dir: &Path, name: &str, contents: &str) -> Result<()> {
    let target = dir.join(name);
    let temp = dir.join(format!(".{}.tmp", name));
    fs::write(&temp, contents).with_context(|| format!("Failed to write {}", temp.display()))?;
    fs::rename(&temp, &target).with_context(|| format!("Failed to replace {}", target.display()))?;
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        BillKey, BillRecord, CommitteeAssignment, MeasureRef, MemberRecord, MemberTerm,
        StatusUpdate,
    };
    use chrono::TimeZone;

    fn date(month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, month, day).unwrap()
    }

    fn bill(bill_type: BillType, number: u32, introducer: &str, updates: Vec<StatusUpdate>) -> BillRecord {
        let key = BillKey::new(bill_type, number, 2025);
        BillRecord {
            key,
            current_version: key.to_string(),
            title: Some(format!("Title of {}", key)),
            description: None,
            introducer: Some(introducer.to_string()),
            companion: None,
            package: None,
            current_referral: None,
            act_number: None,
            governor_message_number: None,
            current_bill_url: format!("https://example.org/{}", key),
            current_pdf_url: None,
            rss_feed_url: None,
            status_updates: updates,
            versions: Vec::new(),
            committee_reports: Vec::new(),
        }
    }

    fn member(member_id: i64, name: &str) -> MemberRecord {
        MemberRecord {
            member_id,
            name: name.to_string(),
            bio: None,
            term: MemberTerm::new(2025),
            committees: vec![CommitteeAssignment {
                committee_name: "Finance".to_string(),
                position: "Chair".to_string(),
                committee_type: "Standing".to_string(),
            }],
            measures: vec![MeasureRef {
                bill_type: BillType::SB,
                bill_number: 1300,
                year: 2025,
                title: None,
                url: None,
            }],
        }
    }

    fn seeded() -> Arc<Repository> {
        let repo = Arc::new(Repository::open_in_memory().unwrap());

        let mut enacted = bill(
            BillType::SB,
            1300,
            "KEOHOKALOLE, CHANG",
            vec![
                StatusUpdate::new(date(1, 17), "S", "Introduced and Pass First Reading."),
                StatusUpdate::new(date(7, 9), "S", "Act 296, on 07/09/2025 (Gov. Msg. No. 1397)."),
            ],
        );
        enacted.act_number = Some(296);
        repo.upsert_bill(&enacted).unwrap();

        repo.upsert_bill(&bill(
            BillType::HB,
            5,
            "COCHRAN",
            vec![StatusUpdate::new(date(1, 22), "H", "Referred to FIN.")],
        ))
        .unwrap();
        repo.upsert_bill(&bill(BillType::HB, 6, "NOBODY", Vec::new())).unwrap();

        repo.upsert_member(&member(7, "Jarrett Keohokalole")).unwrap();
        repo.upsert_member(&member(253, "Elle Cochran")).unwrap();
        repo
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_export_is_deterministic() {
        let exporter = Exporter::new(seeded(), "unused");
        let first = exporter.build(at()).unwrap().render().unwrap();
        let second = exporter.build(at()).unwrap().render().unwrap();
        assert_eq!(first, second);

        let later = exporter
            .build(at() + chrono::Duration::hours(1))
            .unwrap()
            .render()
            .unwrap();
        // Only the summary carries the timestamp
        assert_ne!(first[0], later[0]);
        assert_eq!(first[1..], later[1..]);
    }

    #[test]
    fn test_documents_content() {
        let set = Exporter::new(seeded(), "unused").build(at()).unwrap();

        assert_eq!(set.summary.total_bills, 3);
        assert_eq!(set.summary.years_available, vec![2025]);
        assert_eq!(set.summary.bill_types, vec![BillType::SB, BillType::HB]);

        let bills = &set.bills_by_year[&2025];
        let sb = bills.iter().find(|b| b.identifier == "SB1300-2025").unwrap();
        assert_eq!(sb.status_count, 2);
        assert_eq!(sb.status_bucket, "enacted");
        assert_eq!(sb.latest_status.as_ref().map(|s| s.date), Some(date(7, 9)));
        assert_eq!(sb.introducer_member_ids, vec![7]);

        let hb5 = bills.iter().find(|b| b.identifier == "HB5-2025").unwrap();
        assert_eq!(hb5.status_bucket, "in_committee");
        assert_eq!(hb5.introducer_member_ids, vec![253]);

        let hb6 = bills.iter().find(|b| b.identifier == "HB6-2025").unwrap();
        assert_eq!(hb6.status_bucket, "no_status");
        assert!(hb6.latest_status.is_none());
        assert!(hb6.introducer_member_ids.is_empty());

        assert_eq!(set.recent_activity[0].bill_identifier, "SB1300-2025");
        assert_eq!(set.recent_activity.len(), 3);

        assert_eq!(set.analytics.passage_rate.passed, 1);
        assert_eq!(set.analytics.passage_rate.percentage, 33.33);
        assert_eq!(set.analytics.bills_by_type["HB"], 2);

        assert_eq!(set.members[0].name, "Elle Cochran");
        assert_eq!(set.members[0].measures[0].identifier, "SB1300-2025");
    }

    #[test]
    fn test_member_without_term_still_exported() {
        let repo = Arc::new(Repository::open_in_memory().unwrap());
        repo.upsert_member(&member(7, "Jarrett Keohokalole")).unwrap();
        // A second member row with no term at all
        repo.execute_raw(
            "INSERT INTO members (member_id, name, created_at, updated_at) VALUES (99, 'Ada Termless', 'x', 'x')",
        )
        .unwrap();

        let set = Exporter::new(repo, "unused").build(at()).unwrap();
        assert_eq!(set.members.len(), 2);

        let termless = set.members.iter().find(|m| m.member_id == 99).unwrap();
        assert!(termless.latest_term.is_none());
        assert!(termless.committees.is_empty());

        let json = set.render().unwrap();
        let members_json = &json.iter().find(|(name, _)| name == "members.json").unwrap().1;
        assert!(members_json.contains("\"latest_term\": null"));
    }

    #[test]
    fn test_introducer_join_is_best_effort() {
        let members = vec![
            (1, "Jarrett Keohokalole".to_string()),
            (2, "Chris Lee".to_string()),
            (3, "Nicole Lee".to_string()),
        ];
        assert_eq!(introducer_member_ids(Some("KEOHOKALOLE (BR)"), &members), vec![1]);
        assert!(introducer_member_ids(Some("LEE"), &members).is_empty());
        assert!(introducer_member_ids(None, &members).is_empty());
    }

    #[test]
    fn test_export_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = Exporter::new(seeded(), dir.path().join("export"));
        let set = exporter.export().unwrap();

        for name in &set.summary.documents {
            assert!(dir.path().join("export").join(name).exists(), "{} missing", name);
        }
        let leftovers = fs::read_dir(dir.path().join("export"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
        println!("✅ Exported {} documents", set.summary.documents.len());
    }
}

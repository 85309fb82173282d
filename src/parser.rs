// 🏗️ Page Parser - Source documents → typed records
// One parser per page kind, selected through a factory

use crate::error::ParseError;
use crate::fetcher::SourceSite;
use crate::model::{
    BillKey, BillRecord, BillType, BillVersion, CommitteeAssignment, CommitteeReport, Link,
    MeasureRef, MemberRecord, MemberTerm, StatusUpdate, Target,
};
use crate::text::{
    clean_text, committee_position, committee_type, extract_act_number,
    extract_conference_committee_report, extract_email, extract_governor_message_number,
    extract_referral, extract_version_code, normalize_phone, parse_date, parse_district,
    split_party_from_name,
};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use url::Url;

const BILL_ANCHOR: &str = "a#MainContent_LinkButtonMeasure";
const MEMBER_ANCHOR: &str = "span#LabelLegname";

/// Markup that only a real bill page carries
const BILL_CONTENT_MARKERS: &str = "#MainContent_LabelMeasureDescription, table.MeasureSummaryContent, table#MainContent_GridViewStatus, #MainContent_RepeaterVersions";

/// Markup that only a real member page carries
const MEMBER_CONTENT_MARKERS: &str = "span#LabelSenRep, img#memberPhoto, #MainContent_memberForm, #MainContent_LabelBio, #MainContent_PanelCommittees";

// ============================================================================
// CORE TYPES
// ============================================================================

/// PageKind - Which kind of document we expect behind a URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageKind {
    Bill,
    Member,
}

impl PageKind {
    /// Human-readable name for display
    pub fn name(&self) -> &'static str {
        match self {
            PageKind::Bill => "bill",
            PageKind::Member => "member",
        }
    }

    pub fn of(target: &Target) -> Self {
        match target {
            Target::Bill(_) => PageKind::Bill,
            Target::Member { .. } => PageKind::Member,
        }
    }
}

/// Output of a parser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParsedRecord {
    Bill(BillRecord),
    Member(MemberRecord),
}

#[cfg(test)]
impl ParsedRecord {
    pub fn into_bill(self) -> Option<BillRecord> {
        match self {
            ParsedRecord::Bill(bill) => Some(bill),
            ParsedRecord::Member(_) => None,
        }
    }

    pub fn into_member(self) -> Option<MemberRecord> {
        match self {
            ParsedRecord::Member(member) => Some(member),
            ParsedRecord::Bill(_) => None,
        }
    }
}

// ============================================================================
// PARSER TRAIT
// ============================================================================

/// PageParser - One implementation per page kind
///
/// Adding a page kind = one more implementation plus one factory arm.
/// Parsers are pure: no I/O, no clock, same document → same record.
pub trait PageParser: Send + Sync {
    /// Extract a record from a parsed document
    ///
    /// # Arguments
    /// * `document` - The parsed HTML
    /// * `target` - The identity the document was fetched for
    /// * `site` - Used to resolve relative links
    ///
    /// # Returns
    /// * `Ok(ParsedRecord)` - The anchor was found; optional fields may be absent
    /// * `Err(ParseError)` - Empty shell page, or the anchor is gone
    fn parse(
        &self,
        document: &Html,
        target: &Target,
        site: &SourceSite,
    ) -> Result<ParsedRecord, ParseError>;

    fn kind(&self) -> PageKind;
}

// ============================================================================
// FACTORY FUNCTIONS
// ============================================================================

/// Get the parser for a page kind
pub fn get_parser(kind: PageKind) -> Box<dyn PageParser> {
    match kind {
        PageKind::Bill => Box::new(BillPageParser::new()),
        PageKind::Member => Box::new(MemberPageParser::new()),
    }
}

/// Parse a raw document body for `target`.
///
/// The HTML tree lives only inside this call, so callers on async tasks
/// never hold it across an await point.
pub fn parse(
    body: &str,
    expected: PageKind,
    target: &Target,
    site: &SourceSite,
) -> Result<ParsedRecord, ParseError> {
    let parser = get_parser(PageKind::of(target));
    if parser.kind() != expected {
        return Err(ParseError::NotARecord {
            kind: expected.name(),
        });
    }
    let document = Html::parse_document(body);
    parser.parse(&document, target, site)
}

// ============================================================================
// DOCUMENT HELPERS
// ============================================================================

fn selector(css: &str) -> Result<Selector, ParseError> {
    Selector::parse(css).map_err(|_| ParseError::InvalidSelector(css.to_string()))
}

fn first<'a>(scope: &'a Html, css: &str) -> Result<Option<ElementRef<'a>>, ParseError> {
    Ok(scope.select(&selector(css)?).next())
}

fn text_of(element: ElementRef<'_>) -> Option<String> {
    clean_text(&element.text().collect::<Vec<_>>().join(" "))
}

/// Text split at element boundaries (`<br>`, `<li>`), blanks dropped
fn lines_of(element: ElementRef<'_>) -> Vec<String> {
    element.text().filter_map(clean_text).collect()
}

fn first_text(document: &Html, css: &str) -> Result<Option<String>, ParseError> {
    Ok(first(document, css)?.and_then(text_of))
}

fn first_link(document: &Html, css: &str, attr: &str, site: &SourceSite) -> Result<Option<String>, ParseError> {
    Ok(first(document, css)?
        .and_then(|el| el.value().attr(attr))
        .and_then(|href| site.resolve(href)))
}

/// Decide between "no such record" and "the markup moved under us"
fn missing_anchor(
    document: &Html,
    kind: &'static str,
    anchor: &'static str,
    markers: &str,
) -> Result<ParseError, ParseError> {
    if first(document, markers)?.is_some() {
        Ok(ParseError::MissingAnchor { kind, anchor })
    } else {
        Ok(ParseError::NotARecord { kind })
    }
}

// ============================================================================
// BILL PAGE
// ============================================================================

pub struct BillPageParser;

impl BillPageParser {
    pub fn new() -> Self {
        BillPageParser
    }

    fn summary_rows(&self, document: &Html) -> Result<Vec<(String, String)>, ParseError> {
        let rows = selector("table.MeasureSummaryContent tr")?;
        let cells = selector("td")?;

        let mut out = Vec::new();
        for row in document.select(&rows) {
            let values: Vec<ElementRef> = row.select(&cells).collect();
            if values.len() < 2 {
                continue;
            }
            let label = text_of(values[0]).unwrap_or_default();
            if let Some(value) = text_of(values[1]) {
                out.push((label.trim_end_matches(':').trim().to_string(), value));
            }
        }
        Ok(out)
    }

    fn status_updates(&self, document: &Html) -> Result<Vec<StatusUpdate>, ParseError> {
        let rows = selector("table#MainContent_GridViewStatus tr")?;
        let cells = selector("td")?;

        let mut updates = Vec::new();
        for row in document.select(&rows) {
            let values: Vec<ElementRef> = row.select(&cells).collect();
            if values.len() < 3 {
                // Header row uses <th>
                continue;
            }
            let Some(date) = text_of(values[0]).as_deref().and_then(parse_date) else {
                continue;
            };
            let chamber = text_of(values[1]).unwrap_or_default();
            let Some(action) = text_of(values[2]) else {
                continue;
            };

            let mut update = StatusUpdate::new(date, &chamber, &action);
            update.committee = extract_referral(&action);
            update.conference_committee_report_number = extract_conference_committee_report(&action);
            if action.to_lowercase().contains("meeting") {
                update.meeting_info = Some(action.clone());
            }
            updates.push(update);
        }
        Ok(updates)
    }

    /// Repeater links paired with their PDF siblings by index suffix
    fn repeater_links(
        &self,
        document: &Html,
        repeater: &str,
        link_prefix: &str,
        site: &SourceSite,
    ) -> Result<Vec<(String, Option<String>, Option<String>)>, ParseError> {
        let links = selector(&format!(
            "#{repeater} a[id^=\"{repeater}_{link_prefix}_\"]"
        ))?;

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for link in document.select(&links) {
            let Some(name) = text_of(link) else { continue };
            if !seen.insert(name.clone()) {
                continue;
            }

            let html_url = link.value().attr("href").and_then(|h| site.resolve(h));
            let index = link
                .value()
                .id()
                .and_then(|id| id.rsplit('_').next())
                .filter(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()));
            let pdf_url = match index {
                Some(n) => first_link(document, &format!("a#{repeater}_PdfLink_{n}"), "href", site)?,
                None => None,
            };
            out.push((name, html_url, pdf_url));
        }
        Ok(out)
    }
}

impl Default for BillPageParser {
    fn default() -> Self {
        Self::new()
    }
}

impl PageParser for BillPageParser {
    fn parse(
        &self,
        document: &Html,
        target: &Target,
        site: &SourceSite,
    ) -> Result<ParsedRecord, ParseError> {
        let Target::Bill(key) = target else {
            return Err(ParseError::NotARecord { kind: "bill" });
        };

        let Some(current_version) = first_text(document, BILL_ANCHOR)? else {
            return Err(missing_anchor(document, "bill", BILL_ANCHOR, BILL_CONTENT_MARKERS)?);
        };

        let mut bill = BillRecord {
            key: *key,
            current_version,
            title: first_text(document, "#MainContent_LabelReportTitle")?,
            description: first_text(document, "#MainContent_LabelMeasureDescription")?,
            introducer: None,
            companion: None,
            package: None,
            current_referral: None,
            act_number: None,
            governor_message_number: None,
            current_bill_url: site.bill_url(key),
            current_pdf_url: first_link(document, "a#MainContent_PdfLink", "href", site)?,
            rss_feed_url: first_link(document, "a#MainContent_RssFeedLink", "href", site)?,
            status_updates: self.status_updates(document)?,
            versions: Vec::new(),
            committee_reports: Vec::new(),
        };

        for (label, value) in self.summary_rows(document)? {
            if label.contains("Companion") {
                bill.companion = Some(value);
            } else if label.contains("Package") {
                bill.package = Some(value);
            } else if label.contains("Current Referral") {
                bill.current_referral = Some(value);
            } else if label.contains("Introducer") {
                bill.introducer = Some(value);
            } else if label.contains("Report Title") && bill.title.is_none() {
                bill.title = Some(value);
            }
        }

        // Last mention wins
        for update in &bill.status_updates {
            if let Some(act) = extract_act_number(&update.action) {
                bill.act_number = Some(act);
            }
            if let Some(msg) = extract_governor_message_number(&update.action) {
                bill.governor_message_number = Some(msg);
            }
        }

        bill.versions = self
            .repeater_links(document, "MainContent_RepeaterVersions", "VersionsLink", site)?
            .into_iter()
            .map(|(version_name, html_url, pdf_url)| BillVersion {
                version_code: extract_version_code(&version_name),
                version_name,
                html_url,
                pdf_url,
            })
            .collect();

        bill.committee_reports = self
            .repeater_links(document, "MainContent_RepeaterCommRpt", "CategoryLink", site)?
            .into_iter()
            .map(|(report_name, html_url, pdf_url)| CommitteeReport {
                report_name,
                html_url,
                pdf_url,
            })
            .collect();

        Ok(ParsedRecord::Bill(bill))
    }

    fn kind(&self) -> PageKind {
        PageKind::Bill
    }
}

// ============================================================================
// MEMBER PAGE
// ============================================================================

pub struct MemberPageParser;

impl MemberPageParser {
    pub fn new() -> Self {
        MemberPageParser
    }

    /// Experience lines ending in "(Present)" are current, the rest previous
    fn experience(&self, document: &Html) -> Result<(Option<String>, Option<String>), ParseError> {
        let Some(block) = first(document, "#MainContent_LabelExperience")? else {
            return Ok((None, None));
        };

        let (current, previous): (Vec<String>, Vec<String>) = lines_of(block)
            .into_iter()
            .partition(|line| line.contains("(Present)"));

        let join = |lines: Vec<String>| if lines.is_empty() { None } else { Some(lines.join("\n")) };
        Ok((join(current), join(previous)))
    }

    fn links(&self, document: &Html, site: &SourceSite) -> Result<Vec<Link>, ParseError> {
        let anchors = selector("#MainContent_PanelLinks a[href]")?;
        Ok(document
            .select(&anchors)
            .filter_map(|a| {
                let url = a.value().attr("href").and_then(|h| site.resolve(h))?;
                let label = text_of(a).unwrap_or_else(|| url.clone());
                Some(Link { label, url })
            })
            .collect())
    }

    fn committees(&self, document: &Html) -> Result<Vec<CommitteeAssignment>, ParseError> {
        let entries = selector("#MainContent_PanelCommittees li")?;

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for entry in document.select(&entries) {
            let Some(text) = text_of(entry) else { continue };
            let (role, name) = split_party_from_name(&text);
            if name.is_empty() || !seen.insert(name.clone()) {
                continue;
            }
            out.push(CommitteeAssignment {
                position: committee_position(role.as_deref().unwrap_or_default()).to_string(),
                committee_type: committee_type(&name).to_string(),
                committee_name: name,
            });
        }
        Ok(out)
    }

    fn measures(&self, document: &Html, site: &SourceSite, year: i32) -> Result<Vec<MeasureRef>, ParseError> {
        let anchors = selector("#MainContent_PanelMeasures a[href]")?;

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for anchor in document.select(&anchors) {
            let Some(url) = anchor.value().attr("href").and_then(|h| site.resolve(h)) else {
                continue;
            };
            let Some(key) = measure_key(&url, year) else { continue };
            if !seen.insert(key) {
                continue;
            }
            out.push(MeasureRef {
                bill_type: key.bill_type,
                bill_number: key.number,
                year: key.year,
                title: anchor.value().attr("title").and_then(clean_text),
                url: Some(url),
            });
        }
        Ok(out)
    }
}

impl Default for MemberPageParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Read (billtype, billnumber, year) off a measure link
fn measure_key(url: &str, default_year: i32) -> Option<BillKey> {
    let parsed = Url::parse(url).ok()?;
    if !parsed.path().to_lowercase().ends_with("measure_indiv.aspx") {
        return None;
    }

    let mut bill_type = None;
    let mut number = None;
    let mut year = default_year;
    for (name, value) in parsed.query_pairs() {
        match name.to_lowercase().as_str() {
            "billtype" => bill_type = value.parse::<BillType>().ok(),
            "billnumber" => number = value.trim().parse::<u32>().ok(),
            "year" => year = value.trim().parse().unwrap_or(default_year),
            _ => {}
        }
    }
    Some(BillKey::new(bill_type?, number?, year))
}

impl PageParser for MemberPageParser {
    fn parse(
        &self,
        document: &Html,
        target: &Target,
        site: &SourceSite,
    ) -> Result<ParsedRecord, ParseError> {
        let Target::Member { member_id, year } = *target else {
            return Err(ParseError::NotARecord { kind: "member" });
        };

        let Some(heading) = first_text(document, MEMBER_ANCHOR)? else {
            return Err(missing_anchor(document, "member", MEMBER_ANCHOR, MEMBER_CONTENT_MARKERS)?);
        };
        let (party, name) = split_party_from_name(&heading);
        if name.is_empty() {
            return Err(ParseError::MissingAnchor {
                kind: "member",
                anchor: MEMBER_ANCHOR,
            });
        }

        let mut term = MemberTerm::new(year);
        term.title = first_text(document, "span#LabelSenRep")?;
        term.party = party;
        term.photo_url = first_link(document, "img#memberPhoto", "src", site)?;
        term.rss_feed_url = first_link(document, "a#MainContent_RssFeedLink", "href", site)?;

        if let Some(district) = first(document, "a#MainContent_memberForm_HyperLinkDistrict")? {
            if let Some((district_type, number)) = text_of(district).as_deref().and_then(parse_district) {
                term.district_type = Some(district_type);
                term.district_number = Some(number);
            }
            term.district_map_url = district.value().attr("href").and_then(|h| site.resolve(h));
        }
        term.district_description = first_text(document, "#MainContent_memberForm_LabelDistrictDesc")?;

        term.phone = first_text(document, "#MainContent_memberForm_LabelPhone")?
            .as_deref()
            .and_then(normalize_phone);
        term.fax = first_text(document, "#MainContent_memberForm_LabelFax")?
            .as_deref()
            .and_then(normalize_phone);
        term.office = first_text(document, "#MainContent_memberForm_LabelOffice")?;
        term.email = first(document, "a#MainContent_memberForm_HyperLinkEmail")?.and_then(|a| {
            text_of(a)
                .as_deref()
                .and_then(extract_email)
                .or_else(|| a.value().attr("href").and_then(extract_email))
        });

        let (current, previous) = self.experience(document)?;
        term.current_experience = current;
        term.previous_experience = previous;

        term.about_content = first_text(document, "#MainContent_PanelAbout")?;
        term.experience_content = first_text(document, "#MainContent_PanelExperience")?;
        term.news_content = first_text(document, "#MainContent_PanelNews")?;
        term.links = self.links(document, site)?;
        term.allowance_report_url = first_link(document, "a#MainContent_HyperLinkAllowance", "href", site)?;

        Ok(ParsedRecord::Member(MemberRecord {
            member_id,
            name,
            bio: first_text(document, "#MainContent_LabelBio")?,
            term,
            committees: self.committees(document)?,
            measures: self.measures(document, site, year)?,
        }))
    }

    fn kind(&self) -> PageKind {
        PageKind::Member
    }
}

// ============================================================================
// TESTS
// ============================================================================
